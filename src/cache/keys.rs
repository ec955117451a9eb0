//! Credential-scoped cache keys.

use sha2::{Digest, Sha256};

/// Hex characters of the credential digest kept in keys.
const SCOPE_LEN: usize = 8;

/// Short, non-reversible fragment identifying a credential.
///
/// Remote caches are partitioned by this so switching accounts never serves
/// the previous account's data, while the secret itself never ends up in a
/// key.
pub fn credential_scope(credential: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(credential.as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..SCOPE_LEN].to_string()
}

/// Build a cache key for a remote resource under the given credential.
pub fn scoped_key(credential: &str, resource: &str) -> String {
  format!("{}:{}", credential_scope(credential), resource)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scope_is_stable_and_short() {
    let a = credential_scope("token-a");
    assert_eq!(a.len(), SCOPE_LEN);
    assert_eq!(a, credential_scope("token-a"));
    assert_ne!(a, credential_scope("token-b"));
  }

  #[test]
  fn test_key_does_not_contain_secret() {
    let key = scoped_key("super-secret-token", "projects");
    assert!(key.ends_with(":projects"));
    assert!(!key.contains("super-secret-token"));
  }
}
