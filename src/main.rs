mod cache;
mod cli;
mod config;
mod context;
mod host;
mod jira;
mod settings;
mod storage;
mod templates;
mod validation;

use std::path::Path;

use clap::Parser;
use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::context::AppContext;

/// Log to a daily file in the data directory; stdout is for command output.
/// `JTMPL_LOG` overrides the level.
fn init_logging(data_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
  let default_level = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_env("JTMPL_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

  if std::fs::create_dir_all(data_dir).is_err() {
    // No writable data directory; keep warnings visible on stderr
    tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::new("warn"))
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let appender = tracing_appender::rolling::daily(data_dir, "jtmpl.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Cli::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config.data_dir()?, args.verbose);
  tracing::info!("jtmpl v{}", env!("CARGO_PKG_VERSION"));

  let ctx = AppContext::open(config, args.ephemeral).await?;
  cli::run(&ctx, args.command).await
}
