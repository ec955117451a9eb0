use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
  /// Jira connection (needed only for remote commands)
  pub jira: Option<JiraConfig>,
  #[serde(default)]
  pub host: HostConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
  /// Auto-detect based on URL: .atlassian.net = cloud, else on-premise
  #[default]
  Auto,
  /// Jira Cloud - uses Basic auth (email + API token as password)
  Cloud,
  /// Jira On-premise - uses Bearer auth (PAT)
  Onpremise,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraConfig {
  pub url: String,
  pub email: String,
  /// Custom field name for epic link (e.g., "customfield_10014")
  pub epic_field: Option<String>,
  /// Custom field that holds story points, if stories should carry them
  pub story_points_field: Option<String>,
  /// Authentication type: auto, cloud, or onpremise
  #[serde(default)]
  pub auth_type: AuthType,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  20
}

impl JiraConfig {
  pub fn is_cloud(&self) -> bool {
    match self.auth_type {
      AuthType::Cloud => true,
      AuthType::Onpremise => false,
      AuthType::Auto => self.url.contains(".atlassian.net"),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Overrides for host detection (normally read from the environment).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
  pub runtime_id: Option<String>,
  pub bridge_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
  /// Defaults to $XDG_DATA_HOME/jtmpl
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
  pub projects_ttl_secs: u64,
  pub issue_types_ttl_secs: u64,
  /// Issue lists (epics), dropped whenever issues are created
  pub issues_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      projects_ttl_secs: 10 * 60,
      issue_types_ttl_secs: 30 * 60,
      issues_ttl_secs: 5 * 60,
    }
  }
}

impl CacheConfig {
  pub fn projects_ttl(&self) -> Duration {
    Duration::from_secs(self.projects_ttl_secs)
  }

  pub fn issue_types_ttl(&self) -> Duration {
    Duration::from_secs(self.issue_types_ttl_secs)
  }

  pub fn issues_ttl(&self) -> Duration {
    Duration::from_secs(self.issues_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
  /// Quiet period before a changed credential is checked
  pub debounce_ms: u64,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self { debounce_ms: 300 }
  }
}

impl ValidationConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jtmpl.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jtmpl/config.yaml
  ///
  /// A missing config file is not an error; every section has defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("jtmpl.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jtmpl").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!(e))
  }

  /// Jira section, required by remote commands.
  pub fn jira(&self) -> Result<&JiraConfig> {
    self.jira.as_ref().ok_or_else(|| {
      eyre!(
        "No Jira connection configured. Add a `jira` section with `url` and `email` to \
         ~/.config/jtmpl/config.yaml"
      )
    })
  }

  /// Directory for the embedded database, legacy file and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("jtmpl"))
  }

  /// Get the Jira API token from environment variables.
  ///
  /// Checks JTMPL_JIRA_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn env_api_token() -> Option<String> {
    std::env::var("JTMPL_JIRA_TOKEN")
      .or_else(|_| std::env::var("JIRA_API_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }
}
