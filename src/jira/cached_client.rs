//! Cached Jira client that wraps JiraClient with transparent caching.

use color_eyre::Result;
use tracing::info;

use crate::cache::{scoped_key, CacheStore};
use crate::config::CacheConfig;
use crate::templates::RenderedTemplate;

use super::client::JiraClient;
use super::types::{CreatedIssue, Epic, IssueType, Project};

/// Issues created by applying a template.
#[derive(Debug, Clone)]
pub struct AppliedTemplate {
  pub epic: CreatedIssue,
  pub stories: Vec<CreatedIssue>,
}

/// Jira client with transparent caching support.
///
/// Lookups are cached per credential, so switching tokens never serves
/// another account's projects. With caching disabled every call goes to
/// Jira.
#[derive(Clone)]
pub struct CachedJiraClient {
  inner: JiraClient,
  cache: CacheStore,
  ttls: CacheConfig,
  enabled: bool,
}

impl CachedJiraClient {
  pub fn new(inner: JiraClient, cache: CacheStore, ttls: CacheConfig, enabled: bool) -> Self {
    Self {
      inner,
      cache,
      ttls,
      enabled,
    }
  }

  fn key(&self, resource: &str) -> String {
    scoped_key(self.inner.credential(), resource)
  }

  pub async fn projects(&self) -> Result<Vec<Project>> {
    if !self.enabled {
      return self.inner.projects().await;
    }
    let inner = self.inner.clone();
    self
      .cache
      .fetch(&self.key("projects"), self.ttls.projects_ttl(), || async move {
        inner.projects().await
      })
      .await
  }

  pub async fn issue_types(&self) -> Result<Vec<IssueType>> {
    if !self.enabled {
      return self.inner.issue_types().await;
    }
    let inner = self.inner.clone();
    self
      .cache
      .fetch(&self.key("issue-types"), self.ttls.issue_types_ttl(), || async move {
        inner.issue_types().await
      })
      .await
  }

  pub async fn epics(&self, project_key: &str) -> Result<Vec<Epic>> {
    if !self.enabled {
      return self.inner.epics(project_key).await;
    }
    let inner = self.inner.clone();
    let project = project_key.to_string();
    self
      .cache
      .fetch(
        &self.key(&format!("issues:epics:{}", project_key)),
        self.ttls.issues_ttl(),
        || async move { inner.epics(&project).await },
      )
      .await
  }

  /// Create the epic, then each story linked to it. Cached issue lists are
  /// dropped afterwards, even when a story fails part way.
  pub async fn apply_template(
    &self,
    project_key: &str,
    rendered: &RenderedTemplate,
  ) -> Result<AppliedTemplate> {
    let result = self.create_all(project_key, rendered).await;
    self.cache.invalidate("issues").await;
    result
  }

  async fn create_all(&self, project_key: &str, rendered: &RenderedTemplate) -> Result<AppliedTemplate> {
    let epic = self
      .inner
      .create_issue(project_key, &rendered.epic, None)
      .await?;
    info!("Created epic {} (id {})", epic.key, epic.id);

    let mut stories = Vec::with_capacity(rendered.stories.len());
    for story in &rendered.stories {
      let created = self
        .inner
        .create_issue(project_key, story, Some(&epic.key))
        .await?;
      info!("Created {} {} under {}", story.issue_type, created.key, epic.key);
      stories.push(created);
    }

    Ok(AppliedTemplate { epic, stories })
  }
}
