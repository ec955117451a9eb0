//! The remote check the coordinator drives.

use async_trait::async_trait;
use thiserror::Error;

/// Why a credential check did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("credential was rejected")]
  Rejected,
  #[error("validation timed out")]
  Timeout,
  #[error("could not reach the server: {0}")]
  Unreachable(String),
}

/// Checks whether a credential is accepted by the remote service.
///
/// Timeouts and transport policy belong to the implementation; the
/// coordinator only decides when to call it.
#[async_trait]
pub trait CredentialValidator: Send + Sync + 'static {
  async fn validate(&self, credential: &str) -> Result<(), ValidationError>;
}
