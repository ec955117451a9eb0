use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::config::JiraConfig;
use crate::jira::api_types::{
  ApiCreatedIssue, ApiErrorResponse, ApiIssueType, ApiMyself, ApiProject, ApiSearchResponse,
};
use crate::jira::types::{CreatedIssue, CurrentUser, Epic, IssueType, Project};
use crate::templates::RenderedIssue;
use crate::validation::{CredentialValidator, ValidationError};

/// Jira REST client
#[derive(Clone)]
pub struct JiraClient {
  http: reqwest::Client,
  base: Url,
  email: String,
  cloud: bool,
  epic_field: Option<String>,
  story_points_field: Option<String>,
  token: String,
}

impl JiraClient {
  /// Build a client for `config`, authenticating with `token`. No request is
  /// made here.
  pub fn new(config: &JiraConfig, token: impl Into<String>) -> Result<Self> {
    let mut base =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid Jira URL {}: {}", config.url, e))?;
    // Url::join replaces the last segment unless the path ends in a slash
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .user_agent(concat!("jtmpl/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create Jira client: {}", e))?;

    Ok(Self {
      http,
      base,
      email: config.email.clone(),
      cloud: config.is_cloud(),
      epic_field: config.epic_field.clone(),
      story_points_field: config.story_points_field.clone(),
      token: token.into(),
    })
  }

  /// The token this client authenticates with.
  pub fn credential(&self) -> &str {
    &self.token
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(&format!("rest/api/2/{}", path))
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  fn authorize(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
    if self.cloud {
      request.basic_auth(&self.email, Some(token))
    } else {
      request.bearer_auth(token)
    }
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let url = self.endpoint(path)?;
    debug!("GET {}", url);

    let response = self
      .authorize(self.http.get(url), &self.token)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    decode(path, response).await
  }

  /// The account behind `token`, via the `myself` endpoint.
  async fn myself(&self, token: &str) -> std::result::Result<CurrentUser, ValidationError> {
    let url = self
      .endpoint("myself")
      .map_err(|e| ValidationError::Unreachable(e.to_string()))?;

    let response = self
      .authorize(self.http.get(url), token)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          ValidationError::Timeout
        } else {
          ValidationError::Unreachable(e.to_string())
        }
      })?;

    match response.status() {
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ValidationError::Rejected),
      status if status.is_success() => response
        .json::<ApiMyself>()
        .await
        .map(CurrentUser::from)
        .map_err(|e| ValidationError::Unreachable(format!("Unexpected response: {}", e))),
      status => Err(ValidationError::Unreachable(format!(
        "Jira responded with {}",
        status
      ))),
    }
  }

  pub async fn projects(&self) -> Result<Vec<Project>> {
    let projects: Vec<ApiProject> = self
      .get_json("project")
      .await
      .map_err(|e| eyre!("Failed to get projects: {}", e))?;
    Ok(projects.into_iter().map(Project::from).collect())
  }

  pub async fn issue_types(&self) -> Result<Vec<IssueType>> {
    let types: Vec<ApiIssueType> = self
      .get_json("issuetype")
      .await
      .map_err(|e| eyre!("Failed to get issue types: {}", e))?;
    Ok(types.into_iter().map(IssueType::from).collect())
  }

  /// Epics in a project, most recently created first.
  pub async fn epics(&self, project_key: &str) -> Result<Vec<Epic>> {
    let mut all_epics = Vec::new();
    let mut start_at = 0u64;
    let max_results = 50u64;

    let jql = format!(
      "project = \"{}\" AND issuetype = Epic ORDER BY created DESC",
      project_key
    );

    loop {
      let mut url = self.endpoint("search")?;
      url
        .query_pairs_mut()
        .append_pair("jql", &jql)
        .append_pair("fields", "summary,status")
        .append_pair("startAt", &start_at.to_string())
        .append_pair("maxResults", &max_results.to_string());

      let response = self
        .authorize(self.http.get(url), &self.token)
        .send()
        .await
        .map_err(|e| eyre!("Failed to get epics: {}", e))?;
      let page: ApiSearchResponse = decode("search", response).await?;

      let count = page.issues.len() as u64;
      all_epics.extend(page.issues.into_iter().map(Epic::from));

      // Check if we've fetched all epics
      if count == 0 || page.start_at + count >= page.total {
        break;
      }
      start_at = page.start_at + count;
    }

    Ok(all_epics)
  }

  /// Create one issue in `project_key`, linked to `epic_key` when given.
  pub async fn create_issue(
    &self,
    project_key: &str,
    issue: &RenderedIssue,
    epic_key: Option<&str>,
  ) -> Result<CreatedIssue> {
    let body = json!({ "fields": self.issue_fields(project_key, issue, epic_key) });
    let url = self.endpoint("issue")?;
    debug!("POST {} ({})", url, issue.summary);

    let response = self
      .authorize(self.http.post(url), &self.token)
      .json(&body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to create issue: {}", e))?;

    let created: ApiCreatedIssue = decode("issue", response).await?;
    Ok(created.into())
  }

  fn issue_fields(
    &self,
    project_key: &str,
    issue: &RenderedIssue,
    epic_key: Option<&str>,
  ) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("project".into(), json!({ "key": project_key }));
    fields.insert("summary".into(), json!(issue.summary));
    fields.insert("issuetype".into(), json!({ "name": issue.issue_type }));
    if !issue.description.is_empty() {
      fields.insert("description".into(), json!(issue.description));
    }
    if !issue.labels.is_empty() {
      fields.insert("labels".into(), json!(issue.labels));
    }
    if let Some(priority) = &issue.priority {
      fields.insert("priority".into(), json!({ "name": priority }));
    }
    if let (Some(points), Some(field)) = (issue.story_points, &self.story_points_field) {
      fields.insert(field.clone(), json!(points));
    }
    if let Some(epic_key) = epic_key {
      // Older instances link through a custom field, newer ones through parent
      match &self.epic_field {
        Some(field) => fields.insert(field.clone(), json!(epic_key)),
        None => fields.insert("parent".into(), json!({ "key": epic_key })),
      };
    }
    fields
  }
}

#[async_trait]
impl CredentialValidator for JiraClient {
  async fn validate(&self, credential: &str) -> std::result::Result<(), ValidationError> {
    let user = self.myself(credential).await?;
    info!(
      "Credential belongs to {}",
      user.email.as_deref().unwrap_or(&user.display_name)
    );
    Ok(())
  }
}

/// Decode a successful response, or turn Jira's error body into a report.
async fn decode<T: DeserializeOwned>(what: &str, response: Response) -> Result<T> {
  let status = response.status();
  if !status.is_success() {
    let body: ApiErrorResponse = response.json().await.unwrap_or_default();
    let detail = body.summary();
    return Err(if detail.is_empty() {
      eyre!("Jira {} request failed with {}", what, status)
    } else {
      eyre!("Jira {} request failed with {}: {}", what, status, detail)
    });
  }

  response
    .json()
    .await
    .map_err(|e| eyre!("Failed to parse {} response: {}", what, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AuthType;

  fn config(url: &str) -> JiraConfig {
    JiraConfig {
      url: url.to_string(),
      email: "me@example.com".to_string(),
      epic_field: None,
      story_points_field: None,
      auth_type: AuthType::Auto,
      timeout_secs: 5,
    }
  }

  fn issue() -> RenderedIssue {
    RenderedIssue {
      summary: "Tag 1.2".to_string(),
      description: String::new(),
      issue_type: "Story".to_string(),
      labels: vec!["release".to_string()],
      priority: None,
      story_points: Some(3.0),
    }
  }

  #[test]
  fn test_endpoint_keeps_context_path() {
    let client = JiraClient::new(&config("https://jira.corp/jira"), "t").unwrap();
    assert_eq!(
      client.endpoint("myself").unwrap().as_str(),
      "https://jira.corp/jira/rest/api/2/myself"
    );
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(JiraClient::new(&config("not a url"), "t").is_err());
  }

  #[test]
  fn test_epic_link_uses_parent_by_default() {
    let client = JiraClient::new(&config("https://x.atlassian.net"), "t").unwrap();
    let fields = client.issue_fields("PROJ", &issue(), Some("PROJ-1"));
    assert_eq!(fields["parent"], json!({"key": "PROJ-1"}));
    assert_eq!(fields["labels"], json!(["release"]));
    assert!(!fields.contains_key("description"));
    // No story points field configured
    assert_eq!(fields.len(), 5);
  }

  #[test]
  fn test_epic_link_uses_custom_fields_when_configured() {
    let mut config = config("https://jira.corp");
    config.epic_field = Some("customfield_10014".to_string());
    config.story_points_field = Some("customfield_10016".to_string());
    let client = JiraClient::new(&config, "t").unwrap();

    let fields = client.issue_fields("PROJ", &issue(), Some("PROJ-1"));
    assert_eq!(fields["customfield_10014"], json!("PROJ-1"));
    assert_eq!(fields["customfield_10016"], json!(3.0));
    assert!(!fields.contains_key("parent"));
  }
}
