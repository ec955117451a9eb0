//! Command-line surface.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use crate::context::AppContext;
use crate::templates::{from_interchange, to_interchange, RenderedIssue, Template};
use crate::validation::ValidationSnapshot;

#[derive(Parser, Debug)]
#[command(name = "jtmpl")]
#[command(about = "Author and apply Jira epic/story templates")]
#[command(version)]
pub struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/jtmpl/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// Keep everything in memory for this run
  #[arg(long, global = true)]
  pub ephemeral: bool,

  /// Log at debug level
  #[arg(short, long, global = true)]
  pub verbose: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Manage templates
  #[command(subcommand)]
  Templates(TemplatesCommand),
  /// Show or change settings
  #[command(subcommand)]
  Settings(SettingsCommand),
  /// Inspect the lookup cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Work with the API token
  #[command(subcommand)]
  Token(TokenCommand),
  /// List Jira projects
  Projects,
  /// List Jira issue types
  IssueTypes,
  /// List epics in a project
  Epics { project: String },
  /// Show the detected host and storage backend
  Env,
}

#[derive(Subcommand, Debug)]
pub enum TemplatesCommand {
  List,
  Show {
    id: String,
  },
  /// Create an empty template
  New {
    name: String,
    #[arg(short, long, default_value = "")]
    description: String,
  },
  /// Create or update a template from a JSON file (as printed by `show`)
  Save {
    file: PathBuf,
  },
  Delete {
    id: String,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
  },
  /// Import templates from a JSON file
  Import {
    file: PathBuf,
    /// Replace stored templates that share an id
    #[arg(long)]
    overwrite: bool,
  },
  /// Export all templates as JSON (stdout when no file is given)
  Export {
    file: Option<PathBuf>,
  },
  /// Print a template with variables substituted
  Render(RenderArgs),
  /// Create the epic and its stories in Jira
  Apply {
    #[command(flatten)]
    render: RenderArgs,
    /// Project key to create issues in
    #[arg(short, long)]
    project: String,
  },
}

#[derive(Args, Debug)]
pub struct RenderArgs {
  pub id: String,
  /// Variable value as name=value (repeatable)
  #[arg(long = "var", value_parser = parse_var)]
  pub vars: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
  Show,
  /// Apply a JSON patch, e.g. '{"theme": "dark"}'
  Set {
    patch: String,
    /// Replace the document instead of merging
    #[arg(long)]
    replace: bool,
  },
  /// Store the API token
  SetToken {
    token: String,
  },
  Reset,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  Keys,
  Clear,
  /// Drop entries whose key contains the pattern
  Invalidate {
    pattern: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
  /// Validate the effective token against Jira
  Check,
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
  let (name, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(format!("missing variable name in '{}'", s));
  }
  Ok((name.to_string(), value.to_string()))
}

pub async fn run(ctx: &AppContext, command: Command) -> Result<()> {
  match command {
    Command::Templates(cmd) => templates(ctx, cmd).await,
    Command::Settings(cmd) => settings(ctx, cmd).await,
    Command::Cache(cmd) => cache(ctx, cmd).await,
    Command::Token(TokenCommand::Check) => check_token(ctx).await,
    Command::Projects => {
      for project in ctx.jira().await?.projects().await? {
        println!("{:<12} {}", project.key, project.name);
      }
      Ok(())
    }
    Command::IssueTypes => {
      for issue_type in ctx.jira().await?.issue_types().await? {
        let marker = if issue_type.subtask { " (subtask)" } else { "" };
        println!("{}{}", issue_type.name, marker);
      }
      Ok(())
    }
    Command::Epics { project } => {
      for epic in ctx.jira().await?.epics(&project).await? {
        println!("{:<12} {:<14} {}", epic.key, epic.status, epic.summary);
      }
      Ok(())
    }
    Command::Env => {
      println!("host:    {}", ctx.environment.label());
      println!("storage: {}", ctx.storage.backend_name());
      if ctx.storage.backend_name() != "memory" {
        println!("data:    {}", ctx.config.data_dir()?.display());
      }
      Ok(())
    }
  }
}

async fn find_template(ctx: &AppContext, id: &str) -> Result<Template> {
  ctx
    .templates
    .get_by_id(id)
    .await?
    .ok_or_else(|| eyre!("No template with id {}", id))
}

async fn templates(ctx: &AppContext, cmd: TemplatesCommand) -> Result<()> {
  match cmd {
    TemplatesCommand::List => {
      for template in ctx.templates.list_all().await? {
        println!(
          "{}  {}  ({} stories)",
          template.id().unwrap_or("-"),
          template.name,
          template.stories.len()
        );
      }
    }
    TemplatesCommand::Show { id } => {
      let template = find_template(ctx, &id).await?;
      let json = serde_json::to_string_pretty(&template)
        .map_err(|e| eyre!("Failed to encode template: {}", e))?;
      println!("{}", json);
    }
    TemplatesCommand::New { name, description } => {
      let template = Template {
        description,
        ..Template::new(name)
      };
      let saved = ctx.templates.save(template).await?;
      println!("{}", saved.id().unwrap_or_default());
    }
    TemplatesCommand::Save { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let template: Template = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Invalid template in {}: {}", file.display(), e))?;
      let saved = ctx.templates.save(template).await?;
      println!("Saved {}", saved.id().unwrap_or_default());
    }
    TemplatesCommand::Delete { id, yes } => {
      let confirm = ctx.settings.get_settings().await?.features.confirm_delete;
      if confirm && !yes && !ask(&format!("Delete template {}?", id))? {
        return Ok(());
      }
      if !ctx.templates.delete(&id).await? {
        return Err(eyre!("No template with id {}", id));
      }
      println!("Deleted {}", id);
    }
    TemplatesCommand::Import { file, overwrite } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let imported = ctx
        .templates
        .import_many(from_interchange(&contents)?, overwrite)
        .await?;
      println!("Imported {} templates", imported.len());
    }
    TemplatesCommand::Export { file } => {
      let json = to_interchange(&ctx.templates.export_all().await?)?;
      match file {
        Some(path) => std::fs::write(&path, json)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => println!("{}", json),
      }
    }
    TemplatesCommand::Render(args) => {
      let template = find_template(ctx, &args.id).await?;
      let rendered = template.render(&vars(args.vars))?;
      print_issue(&rendered.epic, "");
      for story in &rendered.stories {
        print_issue(story, "  ");
      }
    }
    TemplatesCommand::Apply { render, project } => {
      let template = find_template(ctx, &render.id).await?;
      let rendered = template.render(&vars(render.vars))?;
      let applied = ctx.jira().await?.apply_template(&project, &rendered).await?;
      println!("{}", applied.epic.key);
      for story in applied.stories {
        println!("  {}", story.key);
      }
    }
  }
  Ok(())
}

fn vars(pairs: Vec<(String, String)>) -> HashMap<String, String> {
  pairs.into_iter().collect()
}

fn print_issue(issue: &RenderedIssue, indent: &str) {
  println!("{}[{}] {}", indent, issue.issue_type, issue.summary);
  for line in issue.description.lines() {
    println!("{}    {}", indent, line);
  }
}

async fn settings(ctx: &AppContext, cmd: SettingsCommand) -> Result<()> {
  let doc = match cmd {
    SettingsCommand::Show => ctx.settings.get_settings().await?,
    SettingsCommand::Set { patch, replace } => {
      let patch: Value =
        serde_json::from_str(&patch).map_err(|e| eyre!("Patch is not valid JSON: {}", e))?;
      ctx.settings.update_settings(patch, !replace).await?
    }
    SettingsCommand::SetToken { token } => {
      let doc = ctx.settings.update_api_token(&token).await?;
      if doc.features.auto_validate && ctx.config.jira.is_some() {
        let coordinator = ctx.coordinator()?;
        coordinator.set_credential(&token);
        report_validation(coordinator.settled().await)?;
      }
      doc
    }
    SettingsCommand::Reset => ctx.settings.reset_settings().await?,
  };

  let mut shown = serde_json::to_value(&doc).map_err(|e| eyre!("Failed to encode settings: {}", e))?;
  if let Some(credential) = shown.get_mut("credential") {
    if credential.as_str().is_some_and(|c| !c.is_empty()) {
      *credential = Value::String("********".to_string());
    }
  }
  let json =
    serde_json::to_string_pretty(&shown).map_err(|e| eyre!("Failed to encode settings: {}", e))?;
  println!("{}", json);
  Ok(())
}

async fn cache(ctx: &AppContext, cmd: CacheCommand) -> Result<()> {
  match cmd {
    CacheCommand::Keys => {
      for key in ctx.cache.keys().await {
        println!("{}", key);
      }
    }
    CacheCommand::Clear => {
      ctx.cache.clear().await;
      println!("Cache cleared");
    }
    CacheCommand::Invalidate { pattern } => {
      let removed = ctx.cache.invalidate(&pattern).await;
      println!("Removed {} entries", removed);
    }
  }
  Ok(())
}

/// Explicit re-check of the effective token, without the edit debounce.
async fn check_token(ctx: &AppContext) -> Result<()> {
  let token = ctx
    .settings
    .credential()
    .await?
    .ok_or_else(|| eyre!("No API token configured"))?;

  let coordinator = ctx.coordinator()?;
  coordinator.set_credential(&token);
  let snapshot = coordinator.revalidate().await;
  coordinator.shutdown();
  report_validation(snapshot)
}

fn report_validation(snapshot: ValidationSnapshot) -> Result<()> {
  if snapshot.is_usable() {
    println!("Token is valid");
    Ok(())
  } else {
    Err(eyre!("Token could not be validated (see log for details)"))
  }
}

fn ask(question: &str) -> Result<bool> {
  eprint!("{} [y/N] ", question);
  std::io::stderr()
    .flush()
    .map_err(|e| eyre!("Failed to write prompt: {}", e))?;

  let mut answer = String::new();
  std::io::stdin()
    .lock()
    .read_line(&mut answer)
    .map_err(|e| eyre!("Failed to read answer: {}", e))?;
  Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_var() {
    assert_eq!(
      parse_var("version=1.2=rc").unwrap(),
      ("version".to_string(), "1.2=rc".to_string())
    );
    assert!(parse_var("novalue").is_err());
    assert!(parse_var("=x").is_err());
  }

  #[test]
  fn test_apply_arguments() {
    let cli = Cli::try_parse_from([
      "jtmpl",
      "templates",
      "apply",
      "abc",
      "--project",
      "PROJ",
      "--var",
      "team=core",
      "--ephemeral",
    ])
    .unwrap();

    assert!(cli.ephemeral);
    match cli.command {
      Command::Templates(TemplatesCommand::Apply { render, project }) => {
        assert_eq!(render.id, "abc");
        assert_eq!(project, "PROJ");
        assert_eq!(render.vars, vec![("team".to_string(), "core".to_string())]);
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_new_then_save_edits_in_place() {
    let ctx = AppContext::open(Default::default(), true).await.unwrap();
    run(
      &ctx,
      Command::Templates(TemplatesCommand::New {
        name: "Release".to_string(),
        description: String::new(),
      }),
    )
    .await
    .unwrap();

    let mut template = ctx.templates.list_all().await.unwrap().remove(0);
    template.name = "Release train".to_string();

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("edit.json");
    std::fs::write(&file, serde_json::to_string(&template).unwrap()).unwrap();
    run(&ctx, Command::Templates(TemplatesCommand::Save { file }))
      .await
      .unwrap();

    let all = ctx.templates.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Release train");
    assert_eq!(all[0].id(), template.id());
  }

  #[test]
  fn test_report_requires_usable_snapshot() {
    use crate::validation::{Phase, ValidationStatus};

    let mut snapshot = ValidationSnapshot {
      current_value: String::new(),
      last_validated_value: None,
      status: ValidationStatus::Valid,
      phase: Phase::Settled,
    };
    assert!(report_validation(snapshot.clone()).is_err());

    snapshot.current_value = "tok".to_string();
    assert!(report_validation(snapshot).is_ok());
  }

  #[tokio::test]
  async fn test_import_then_show_roundtrip_through_context() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("in.json");
    std::fs::write(&file, r#"[{"id": "t1", "name": "Release"}]"#).unwrap();

    let ctx = AppContext::open(Default::default(), true).await.unwrap();
    run(
      &ctx,
      Command::Templates(TemplatesCommand::Import {
        file,
        overwrite: false,
      }),
    )
    .await
    .unwrap();

    assert!(find_template(&ctx, "t1").await.is_ok());
    assert!(find_template(&ctx, "missing").await.is_err());
  }
}
