//! Host environment detection.
//!
//! jtmpl runs either inside the desktop shell (which hands us a bridge
//! directory and tags the runtime id) or as a plain process, where the
//! embedded SQLite database plays the role of the browser store.

use std::path::PathBuf;

use tracing::{debug, warn};

/// Marker the desktop shell puts in the runtime identification string.
pub const SHELL_MARKER: &str = "jtmpl-shell";

/// Environment variable naming the bridge directory exported by the shell.
pub const BRIDGE_DIR_ENV: &str = "JTMPL_BRIDGE_DIR";

/// Environment variable carrying the runtime identification string.
pub const RUNTIME_ID_ENV: &str = "JTMPL_RUNTIME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEnvironment {
  /// Desktop wrapper with a native bridge
  Native,
  /// Sandboxed runtime backed by the embedded database
  Browser,
}

impl HostEnvironment {
  pub fn label(&self) -> &'static str {
    match self {
      HostEnvironment::Native => "native-shell",
      HostEnvironment::Browser => "browser-sandbox",
    }
  }

  pub fn alternate(&self) -> Self {
    match self {
      HostEnvironment::Native => HostEnvironment::Browser,
      HostEnvironment::Browser => HostEnvironment::Native,
    }
  }
}

/// The two independent signals used to classify the host.
#[derive(Debug, Clone, Default)]
pub struct HostSignals {
  /// Bridge directory handed over by the shell, if any
  pub bridge_dir: Option<PathBuf>,
  /// Runtime identification string
  pub runtime_id: String,
}

impl HostSignals {
  /// Collect signals from the process environment, with config overrides
  /// taking precedence.
  pub fn from_env(runtime_id: Option<&str>, bridge_dir: Option<PathBuf>) -> Self {
    let bridge_dir = bridge_dir.or_else(|| std::env::var_os(BRIDGE_DIR_ENV).map(PathBuf::from));
    let runtime_id = runtime_id
      .map(String::from)
      .or_else(|| std::env::var(RUNTIME_ID_ENV).ok())
      .unwrap_or_else(|| format!("jtmpl/{}", env!("CARGO_PKG_VERSION")));

    Self {
      bridge_dir,
      runtime_id,
    }
  }

  fn bridge_present(&self) -> bool {
    self.bridge_dir.as_ref().is_some_and(|dir| dir.is_dir())
  }

  fn runtime_says_native(&self) -> bool {
    self.runtime_id.contains(SHELL_MARKER)
  }
}

/// Classify the host. When the two signals disagree the identification
/// string wins.
pub fn detect(signals: &HostSignals) -> HostEnvironment {
  let by_bridge = signals.bridge_present();
  let by_runtime = signals.runtime_says_native();

  if by_bridge != by_runtime {
    warn!(
      bridge_present = by_bridge,
      runtime_id = %signals.runtime_id,
      "Host signals disagree, trusting runtime identification"
    );
  }

  let env = if by_runtime {
    HostEnvironment::Native
  } else {
    HostEnvironment::Browser
  };
  debug!("Detected host environment: {}", env.label());
  env
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_plain_runtime_is_browser() {
    let signals = HostSignals {
      bridge_dir: None,
      runtime_id: "jtmpl/0.1.0".to_string(),
    };
    assert_eq!(detect(&signals), HostEnvironment::Browser);
  }

  #[test]
  fn test_both_signals_native() {
    let dir = tempfile::tempdir().unwrap();
    let signals = HostSignals {
      bridge_dir: Some(dir.path().to_path_buf()),
      runtime_id: "jtmpl-shell/2.1 (linux)".to_string(),
    };
    assert_eq!(detect(&signals), HostEnvironment::Native);
  }

  #[test]
  fn test_disagreement_trusts_runtime_id() {
    let dir = tempfile::tempdir().unwrap();

    // Bridge present but runtime says plain process
    let signals = HostSignals {
      bridge_dir: Some(dir.path().to_path_buf()),
      runtime_id: "jtmpl/0.1.0".to_string(),
    };
    assert_eq!(detect(&signals), HostEnvironment::Browser);

    // Runtime says shell but no bridge directory
    let signals = HostSignals {
      bridge_dir: None,
      runtime_id: "jtmpl-shell/2.1".to_string(),
    };
    assert_eq!(detect(&signals), HostEnvironment::Native);
  }

  #[test]
  fn test_missing_bridge_dir_is_not_present() {
    let signals = HostSignals {
      bridge_dir: Some(PathBuf::from("/definitely/not/here")),
      runtime_id: String::new(),
    };
    assert!(!signals.bridge_present());
  }
}
