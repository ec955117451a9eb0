//! Template records and the JSON interchange format.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Epic that a template creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicDetails {
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  /// Extra Jira fields passed through untouched
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

fn default_issue_type() -> String {
  "Story".to_string()
}

/// One child issue created under the epic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryTemplate {
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub description: String,
  #[serde(default = "default_issue_type")]
  pub issue_type: String,
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub story_points: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Default for StoryTemplate {
  fn default() -> Self {
    Self {
      summary: String::new(),
      description: String::new(),
      issue_type: default_issue_type(),
      labels: Vec::new(),
      story_points: None,
      extra: Map::new(),
    }
  }
}

/// A reusable epic + stories blueprint.
///
/// `id` is absent until the template is first saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub epic: EpicDetails,
  #[serde(default)]
  pub stories: Vec<StoryTemplate>,
  /// Declared variable names
  #[serde(default)]
  pub variables: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

impl Template {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  /// The id, if one has been assigned.
  pub fn id(&self) -> Option<&str> {
    self.id.as_deref().filter(|id| !id.is_empty())
  }

  /// Assign a fresh id when none is set. Returns the id.
  pub(super) fn ensure_id(&mut self) -> String {
    if let Some(id) = self.id() {
      return id.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    self.id = Some(id.clone());
    id
  }
}

/// Parse the interchange format: a flat JSON array of template records.
pub fn from_interchange(json: &str) -> Result<Vec<Template>> {
  serde_json::from_str(json).map_err(|e| eyre!("Invalid template file: {}", e))
}

/// Serialize templates into the interchange format.
pub fn to_interchange(templates: &[Template]) -> Result<String> {
  serde_json::to_string_pretty(templates).map_err(|e| eyre!("Failed to serialize templates: {}", e))
}
