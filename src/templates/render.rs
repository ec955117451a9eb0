//! `{{variable}}` substitution.

use std::collections::{BTreeSet, HashMap};

use color_eyre::{eyre::eyre, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::types::Template;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder regex is valid")
});

/// An issue ready to be sent to Jira.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedIssue {
  pub summary: String,
  pub description: String,
  pub issue_type: String,
  pub labels: Vec<String>,
  pub priority: Option<String>,
  pub story_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
  pub epic: RenderedIssue,
  pub stories: Vec<RenderedIssue>,
}

fn collect_placeholders(text: &str, into: &mut BTreeSet<String>) {
  for caps in PLACEHOLDER.captures_iter(text) {
    into.insert(caps[1].to_string());
  }
}

fn substitute(text: &str, values: &HashMap<String, String>) -> String {
  PLACEHOLDER
    .replace_all(text, |caps: &Captures| {
      values
        .get(&caps[1])
        .cloned()
        .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

impl Template {
  /// Every placeholder name used in epic and story text.
  pub fn placeholders(&self) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_placeholders(&self.epic.summary, &mut names);
    collect_placeholders(&self.epic.description, &mut names);
    for story in &self.stories {
      collect_placeholders(&story.summary, &mut names);
      collect_placeholders(&story.description, &mut names);
    }
    names
  }

  /// Substitute `values` into the template. Every placeholder must have a
  /// value; the error lists the ones that don't.
  pub fn render(&self, values: &HashMap<String, String>) -> Result<RenderedTemplate> {
    let missing: Vec<String> = self
      .placeholders()
      .into_iter()
      .filter(|name| !values.contains_key(name))
      .collect();
    if !missing.is_empty() {
      return Err(eyre!("Missing values for variables: {}", missing.join(", ")));
    }

    let epic = RenderedIssue {
      summary: substitute(&self.epic.summary, values),
      description: substitute(&self.epic.description, values),
      issue_type: "Epic".to_string(),
      labels: self.epic.labels.clone(),
      priority: self.epic.priority.clone(),
      story_points: None,
    };

    let stories = self
      .stories
      .iter()
      .map(|story| RenderedIssue {
        summary: substitute(&story.summary, values),
        description: substitute(&story.description, values),
        issue_type: story.issue_type.clone(),
        labels: story.labels.clone(),
        priority: None,
        story_points: story.story_points,
      })
      .collect();

    Ok(RenderedTemplate { epic, stories })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::templates::{EpicDetails, StoryTemplate};

  fn release_template() -> Template {
    Template {
      epic: EpicDetails {
        summary: "Release {{version}}".to_string(),
        description: "Ship {{ version }} for {{team}}".to_string(),
        labels: vec!["release".to_string()],
        ..Default::default()
      },
      stories: vec![
        StoryTemplate {
          summary: "Tag {{version}}".to_string(),
          story_points: Some(1.0),
          ..Default::default()
        },
        StoryTemplate {
          summary: "Announce".to_string(),
          issue_type: "Task".to_string(),
          ..Default::default()
        },
      ],
      ..Template::new("Release")
    }
  }

  fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_placeholders() {
    let names: Vec<String> = release_template().placeholders().into_iter().collect();
    assert_eq!(names, vec!["team".to_string(), "version".to_string()]);
  }

  #[test]
  fn test_render_substitutes_everywhere() {
    let rendered = release_template()
      .render(&vars(&[("version", "1.2"), ("team", "core")]))
      .unwrap();

    assert_eq!(rendered.epic.summary, "Release 1.2");
    assert_eq!(rendered.epic.description, "Ship 1.2 for core");
    assert_eq!(rendered.epic.issue_type, "Epic");
    assert_eq!(rendered.stories[0].summary, "Tag 1.2");
    assert_eq!(rendered.stories[0].story_points, Some(1.0));
    assert_eq!(rendered.stories[1].issue_type, "Task");
  }

  #[test]
  fn test_render_reports_missing() {
    let err = release_template()
      .render(&vars(&[("version", "1.2")]))
      .unwrap_err();
    assert!(err.to_string().contains("team"));
  }

  #[test]
  fn test_single_braces_are_left_alone() {
    let template = Template {
      epic: EpicDetails {
        summary: "Use {json} and {{ }}".to_string(),
        ..Default::default()
      },
      ..Template::new("x")
    };
    assert!(template.placeholders().is_empty());
    let rendered = template.render(&HashMap::new()).unwrap();
    assert_eq!(rendered.epic.summary, "Use {json} and {{ }}");
  }
}
