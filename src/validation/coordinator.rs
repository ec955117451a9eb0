//! Debounced, deduplicated credential validation.
//!
//! ```text
//! idle -> debouncing -> in-flight -> settled
//!            ^   |                     |
//!            +---+ (edit restarts)     +--> debouncing (next edit)
//! ```
//!
//! Every credential change bumps a generation counter. A result is applied
//! only if its generation is still current, the credential still matches
//! and the coordinator has not been shut down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::validator::{CredentialValidator, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
  Unknown,
  Valid,
  Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Nothing scheduled (initial state, or shut down)
  Idle,
  /// Waiting out the quiet period after an edit
  Debouncing,
  /// Remote check running
  InFlight,
  /// Latest credential has a definite status
  Settled,
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSnapshot {
  pub current_value: String,
  pub last_validated_value: Option<String>,
  pub status: ValidationStatus,
  pub phase: Phase,
}

impl ValidationSnapshot {
  /// A credential is usable only when present and confirmed valid.
  pub fn is_usable(&self) -> bool {
    !self.current_value.is_empty() && self.status == ValidationStatus::Valid
  }
}

type SharedCheck = Shared<BoxFuture<'static, Result<(), ValidationError>>>;

struct State {
  current: String,
  /// Last value the remote service accepted
  last_validated: Option<String>,
  status: ValidationStatus,
  phase: Phase,
  generation: u64,
  /// Only set while debouncing
  debounce_task: Option<JoinHandle<()>>,
  /// Running checks keyed by credential, tagged with a registration id
  in_flight: HashMap<String, (u64, SharedCheck)>,
  next_registration: u64,
  closed: bool,
}

impl State {
  fn snapshot(&self) -> ValidationSnapshot {
    ValidationSnapshot {
      current_value: self.current.clone(),
      last_validated_value: self.last_validated.clone(),
      status: self.status,
      phase: self.phase,
    }
  }

  fn cancel_debounce(&mut self) {
    if let Some(task) = self.debounce_task.take() {
      task.abort();
    }
  }
}

struct Inner {
  validator: Arc<dyn CredentialValidator>,
  debounce: Duration,
  state: Mutex<State>,
  updates: watch::Sender<ValidationSnapshot>,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, State> {
    // State stays consistent between statements, so a poisoned lock is usable
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn publish(&self, state: &State) {
    self.updates.send_replace(state.snapshot());
  }

  /// Debounce timer elapsed for `generation`.
  async fn fire(self: Arc<Self>, generation: u64) {
    let value = {
      let mut state = self.lock();
      if state.closed || state.generation != generation {
        return;
      }
      // Past this point the task must not be aborted by later edits
      state.debounce_task = None;
      state.phase = Phase::InFlight;
      self.publish(&state);
      state.current.clone()
    };

    self.check(value, generation).await;
  }

  /// Run (or join) the remote check for `value` and apply the result if it
  /// is still relevant.
  async fn check(&self, value: String, generation: u64) {
    let (registration, check) = {
      let mut state = self.lock();
      let existing = state.in_flight.get(&value).cloned();
      match existing {
        Some(joined) => {
          debug!("Joining in-flight credential check");
          joined
        }
        None => {
          let registration = state.next_registration;
          state.next_registration += 1;

          let validator = Arc::clone(&self.validator);
          let credential = value.clone();
          let check = async move { validator.validate(&credential).await }
            .boxed()
            .shared();

          state
            .in_flight
            .insert(value.clone(), (registration, check.clone()));
          (registration, check)
        }
      }
    };

    let result = check.await;

    let mut state = self.lock();
    if state
      .in_flight
      .get(&value)
      .is_some_and(|(id, _)| *id == registration)
    {
      state.in_flight.remove(&value);
    }

    if state.closed || state.generation != generation || state.current != value {
      debug!("Discarding stale credential check result");
      return;
    }

    match result {
      Ok(()) => {
        info!("Credential validated");
        state.status = ValidationStatus::Valid;
        state.last_validated = Some(value);
      }
      Err(e) => {
        warn!("Credential validation failed: {}", e);
        state.status = ValidationStatus::Invalid;
      }
    }
    state.phase = Phase::Settled;
    self.publish(&state);
  }
}

/// Tracks validity of the active credential.
///
/// Dropping the coordinator shuts it down.
pub struct CredentialCoordinator {
  inner: Arc<Inner>,
}

impl CredentialCoordinator {
  pub fn new(validator: Arc<dyn CredentialValidator>, debounce: Duration) -> Self {
    let state = State {
      current: String::new(),
      last_validated: None,
      status: ValidationStatus::Unknown,
      phase: Phase::Idle,
      generation: 0,
      debounce_task: None,
      in_flight: HashMap::new(),
      next_registration: 0,
      closed: false,
    };
    let (updates, _) = watch::channel(state.snapshot());

    Self {
      inner: Arc::new(Inner {
        validator,
        debounce,
        state: Mutex::new(state),
        updates,
      }),
    }
  }

  pub fn snapshot(&self) -> ValidationSnapshot {
    self.inner.lock().snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<ValidationSnapshot> {
    self.inner.updates.subscribe()
  }

  /// Record an edit of the credential.
  ///
  /// An empty value is invalid immediately. Returning to the last value that
  /// validated successfully restores that status without a call. Anything
  /// else (re)starts the quiet period; the check runs when it elapses.
  pub fn set_credential(&self, value: &str) {
    let mut state = self.inner.lock();
    if state.closed {
      return;
    }
    if state.current == value && state.phase != Phase::Idle {
      return;
    }

    state.current = value.to_string();
    state.generation += 1;
    state.cancel_debounce();

    if value.is_empty() {
      state.status = ValidationStatus::Invalid;
      state.phase = Phase::Settled;
    } else if state.last_validated.as_deref() == Some(value) {
      state.status = ValidationStatus::Valid;
      state.phase = Phase::Settled;
    } else {
      state.status = ValidationStatus::Unknown;
      state.phase = Phase::Debouncing;

      let inner = Arc::clone(&self.inner);
      let generation = state.generation;
      let debounce = self.inner.debounce;
      state.debounce_task = Some(tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        inner.fire(generation).await;
      }));
    }

    self.inner.publish(&state);
  }

  /// Check the current credential now, skipping the quiet period. Concurrent
  /// calls share one remote request.
  pub async fn revalidate(&self) -> ValidationSnapshot {
    let (value, generation) = {
      let mut state = self.inner.lock();
      if state.closed {
        return state.snapshot();
      }
      state.cancel_debounce();

      if state.current.is_empty() {
        state.status = ValidationStatus::Invalid;
        state.phase = Phase::Settled;
        self.inner.publish(&state);
        return state.snapshot();
      }

      state.phase = Phase::InFlight;
      self.inner.publish(&state);
      (state.current.clone(), state.generation)
    };

    self.inner.check(value, generation).await;
    self.snapshot()
  }

  /// Wait until nothing is pending for the current credential.
  pub async fn settled(&self) -> ValidationSnapshot {
    let mut updates = self.subscribe();
    let result = updates
      .wait_for(|s| matches!(s.phase, Phase::Settled | Phase::Idle))
      .await
      .map(|s| s.clone());

    result.unwrap_or_else(|_| self.snapshot())
  }

  /// Cancel pending work. Results still in flight are discarded when they
  /// arrive.
  pub fn shutdown(&self) {
    let mut state = self.inner.lock();
    if state.closed {
      return;
    }
    state.closed = true;
    state.generation += 1;
    state.cancel_debounce();
    state.phase = Phase::Idle;
    self.inner.publish(&state);
  }
}

impl Drop for CredentialCoordinator {
  fn drop(&mut self) {
    self.shutdown();
  }
}
