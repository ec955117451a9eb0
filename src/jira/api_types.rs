//! Serde-deserializable types matching Jira API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

use super::types::{CreatedIssue, CurrentUser, Epic, IssueType, Project};

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: String,
  pub key: String,
  pub name: String,
}

impl From<ApiProject> for Project {
  fn from(p: ApiProject) -> Self {
    Project {
      id: p.id,
      key: p.key,
      name: p.name,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiIssueType {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub subtask: bool,
}

impl From<ApiIssueType> for IssueType {
  fn from(t: ApiIssueType) -> Self {
    IssueType {
      id: t.id,
      name: t.name,
      subtask: t.subtask,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiMyself {
  #[serde(rename = "displayName", default)]
  pub display_name: String,
  #[serde(rename = "emailAddress")]
  pub email_address: Option<String>,
}

impl From<ApiMyself> for CurrentUser {
  fn from(me: ApiMyself) -> Self {
    CurrentUser {
      display_name: me.display_name,
      email: me.email_address,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiCreatedIssue {
  pub id: String,
  pub key: String,
}

impl From<ApiCreatedIssue> for CreatedIssue {
  fn from(issue: ApiCreatedIssue) -> Self {
    CreatedIssue {
      id: issue.id,
      key: issue.key,
    }
  }
}

// ============================================================================
// Search endpoint response (epics)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiStatus {
  pub name: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiEpicFields {
  #[serde(default)]
  pub summary: String,
  pub status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchIssue {
  pub key: String,
  #[serde(default)]
  pub fields: ApiEpicFields,
}

impl From<ApiSearchIssue> for Epic {
  fn from(issue: ApiSearchIssue) -> Self {
    Epic {
      key: issue.key,
      summary: issue.fields.summary,
      status: issue.fields.status.map(|s| s.name).unwrap_or_default(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub issues: Vec<ApiSearchIssue>,
  #[serde(rename = "startAt", default)]
  pub start_at: u64,
  #[serde(default)]
  pub total: u64,
}

// ============================================================================
// Error body
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiErrorResponse {
  #[serde(rename = "errorMessages", default)]
  pub error_messages: Vec<String>,
  #[serde(default)]
  pub errors: std::collections::BTreeMap<String, String>,
}

impl ApiErrorResponse {
  /// Flatten Jira's error body into one line.
  pub fn summary(&self) -> String {
    let mut parts = self.error_messages.clone();
    parts.extend(self.errors.iter().map(|(field, msg)| format!("{}: {}", field, msg)));
    parts.join("; ")
  }
}
