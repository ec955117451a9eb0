use serde::{Deserialize, Serialize};

/// Jira project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  pub key: String,
  pub name: String,
}

/// Issue type available on the instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueType {
  pub id: String,
  pub name: String,
  pub subtask: bool,
}

/// Epic summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
  pub key: String,
  pub summary: String,
  pub status: String,
}

/// The account a credential belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
  pub display_name: String,
  pub email: Option<String>,
}

/// Issue returned by the create endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIssue {
  pub id: String,
  pub key: String,
}
