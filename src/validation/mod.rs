//! Credential validity tracking.
//!
//! The coordinator debounces credential edits, collapses duplicate checks of
//! the same value into one remote call, and ignores results that arrive after
//! the credential moved on.

mod coordinator;
mod validator;

pub use coordinator::{CredentialCoordinator, ValidationSnapshot};

#[cfg(test)]
pub use coordinator::{Phase, ValidationStatus};
pub use validator::{CredentialValidator, ValidationError};
