//! Jira REST collaborator: credential checks, lookups for the template
//! editor, and issue creation when a template is applied.

mod api_types;
mod cached_client;
mod client;
pub mod types;

pub use cached_client::CachedJiraClient;
pub use client::JiraClient;
