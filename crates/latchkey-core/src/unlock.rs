//! Door-unlock orchestration.
//!
//! A single unlock attempt is driven by [`UnlockOrchestrator`], a state
//! machine coordinating the primary (proximity/radio) channel with the
//! token fallback path:
//!
//! ```text
//! Idle -> Connecting -> {Success, Failed}
//! Failed/Idle/NoAccess -> TokenEntry -> Connecting(via token) -> {Success, Failed}
//! ```
//!
//! `NotFound` (failed target lookup) and `Cancelled` are terminal.
//! At most one unlock request is outstanding per orchestrator instance,
//! and a response that arrives after the user cancelled is discarded
//! rather than applied.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AccessMethod, Backend, BackendError, OpeningRecord};
use crate::model::{Lock, Session};

/// Token codes are alphanumeric, as produced by the issuer.
static TOKEN_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));

/// User-facing message for a failed primary attempt.
const PRIMARY_FAILED: &str = "Could not reach the lock. Move closer and try again, or use an access token.";

/// User-facing message for a rejected token, distinct from the
/// primary-channel failure message.
const TOKEN_REJECTED: &str = "Token rejected: invalid, expired, or out of uses.";

/// User-facing message when the backend is unreachable during validation.
const TOKEN_CONNECTIVITY: &str = "Cannot reach the server to validate the token. Try again.";

/// Observable state of an unlock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockState {
    /// Ready to start an attempt; target resolved.
    Idle,

    /// A request is in flight on the given channel.
    Connecting {
        /// Channel the outstanding request was issued on.
        via: AccessMethod,
    },

    /// The door was unlocked.
    Success {
        /// Channel that authorized the opening.
        method: AccessMethod,
    },

    /// The attempt failed; the user may retry or fall back to a token.
    Failed {
        /// User-facing explanation.
        message: String,
    },

    /// The user has no grant for this lock; token entry is still offered.
    NoAccess {
        /// User-facing explanation.
        message: String,
    },

    /// Target lookup failed; terminal.
    NotFound,

    /// Awaiting a token code from the user.
    TokenEntry {
        /// Local validation error from the last submission, if any.
        error: Option<String>,
    },

    /// The user abandoned the attempt; terminal. Late responses for this
    /// attempt are discarded.
    Cancelled,
}

impl UnlockState {
    /// Whether this state accepts no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::NotFound | Self::Cancelled)
    }
}

struct Inner {
    state: UnlockState,
    target: Option<Lock>,
    /// Bumped on cancellation; in-flight responses carrying an older
    /// generation are dropped instead of applied.
    generation: u64,
}

/// Drives one unlock attempt end to end.
pub struct UnlockOrchestrator<B> {
    backend: B,
    session: Session,
    inner: Mutex<Inner>,
}

impl<B: Backend> UnlockOrchestrator<B> {
    /// Create an orchestrator that still needs its target resolved.
    pub fn new(backend: B, session: Session) -> Self {
        Self::build(backend, session, None)
    }

    /// Create an orchestrator with a caller-supplied target lock.
    pub fn with_target(backend: B, session: Session, target: Lock) -> Self {
        Self::build(backend, session, Some(target))
    }

    fn build(backend: B, session: Session, target: Option<Lock>) -> Self {
        Self {
            backend,
            session,
            inner: Mutex::new(Inner {
                state: UnlockState::Idle,
                target,
                generation: 0,
            }),
        }
    }

    /// Current state of the attempt.
    pub async fn state(&self) -> UnlockState {
        self.inner.lock().await.state.clone()
    }

    /// Resolve the target lock from a property identifier when the caller
    /// did not supply one. A failed lookup is terminal (`NotFound`).
    pub async fn resolve_target(&self, property_id: Uuid) -> UnlockState {
        {
            let inner = self.inner.lock().await;
            if inner.target.is_some() || inner.state != UnlockState::Idle {
                return inner.state.clone();
            }
        }

        let generation = self.current_generation().await;
        let result = self.backend.resolve_lock_by_property(property_id).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state == UnlockState::Cancelled {
            debug!("discarding stale target lookup result");
            return inner.state.clone();
        }
        match result {
            Ok(lock) => {
                debug!(lock = %lock.id, "unlock target resolved");
                inner.target = Some(lock);
            }
            Err(err) => {
                warn!(%property_id, %err, "unlock target lookup failed");
                inner.state = UnlockState::NotFound;
            }
        }
        inner.state.clone()
    }

    /// Ask the backend whether the session's user holds access to the
    /// target. A negative answer moves to `NoAccess`, from which token
    /// entry is still available.
    pub async fn verify_access(&self) -> UnlockState {
        let Some(lock_id) = self.target_id().await else {
            return self.state().await;
        };
        {
            let inner = self.inner.lock().await;
            if inner.state != UnlockState::Idle {
                return inner.state.clone();
            }
        }

        let generation = self.current_generation().await;
        let result = self.backend.check_access(lock_id, self.session.user_id).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state == UnlockState::Cancelled {
            return inner.state.clone();
        }
        match result {
            Ok(true) => {}
            Ok(false) | Err(BackendError::Rejected(_)) => {
                inner.state = UnlockState::NoAccess {
                    message: "You do not have permission to open this door. Ask the owner for access.".to_string(),
                };
            }
            // Connectivity problems here are not an access verdict; the
            // primary attempt will surface them if they persist.
            Err(err) => warn!(%err, "access pre-check failed"),
        }
        inner.state.clone()
    }

    /// Start the primary (proximity/radio) unlock attempt.
    ///
    /// Only valid from `Idle` with a resolved target; otherwise a no-op
    /// returning the current state.
    pub async fn start_primary(&self) -> UnlockState {
        let Some(lock_id) = self.target_id().await else {
            return self.state().await;
        };
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state != UnlockState::Idle {
                debug!(state = ?inner.state, "primary unlock ignored outside Idle");
                return inner.state.clone();
            }
            inner.state = UnlockState::Connecting {
                via: AccessMethod::Primary,
            };
            inner.generation
        };

        let result = self.backend.primary_unlock(lock_id, &self.session).await;

        match result {
            Ok(()) => {
                self.finish_success(generation, lock_id, AccessMethod::Primary)
                    .await
            }
            Err(err) => {
                warn!(%lock_id, %err, "primary unlock failed");
                self.apply(
                    generation,
                    UnlockState::Failed {
                        message: PRIMARY_FAILED.to_string(),
                    },
                )
                .await
            }
        }
    }

    /// Clear a failure and return to `Idle` for another primary attempt.
    pub async fn retry(&self) -> UnlockState {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, UnlockState::Failed { .. }) {
            inner.state = UnlockState::Idle;
        }
        inner.state.clone()
    }

    /// Open the token-entry affordance. No backend call is made yet.
    pub async fn open_token_entry(&self) -> UnlockState {
        let mut inner = self.inner.lock().await;
        if matches!(
            inner.state,
            UnlockState::Idle | UnlockState::Failed { .. } | UnlockState::NoAccess { .. }
        ) {
            inner.state = UnlockState::TokenEntry { error: None };
        }
        inner.state.clone()
    }

    /// Submit a token code from `TokenEntry`.
    ///
    /// An empty or malformed code is rejected locally without a state
    /// transition and without issuing a backend request.
    pub async fn submit_token(&self, code: &str) -> UnlockState {
        let Some(lock_id) = self.target_id().await else {
            return self.state().await;
        };
        let code = code.trim();

        let generation = {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, UnlockState::TokenEntry { .. }) {
                return inner.state.clone();
            }
            if code.is_empty() {
                inner.state = UnlockState::TokenEntry {
                    error: Some("Enter a token code.".to_string()),
                };
                return inner.state.clone();
            }
            if !TOKEN_CODE_RE.is_match(code) {
                inner.state = UnlockState::TokenEntry {
                    error: Some("Token codes only contain letters and digits.".to_string()),
                };
                return inner.state.clone();
            }
            inner.state = UnlockState::Connecting {
                via: AccessMethod::Token,
            };
            inner.generation
        };

        let result = self.backend.validate_token(code, lock_id).await;

        match result {
            Ok(()) => {
                self.finish_success(generation, lock_id, AccessMethod::Token)
                    .await
            }
            Err(BackendError::NotFound | BackendError::Rejected(_)) => {
                self.apply(
                    generation,
                    UnlockState::Failed {
                        message: TOKEN_REJECTED.to_string(),
                    },
                )
                .await
            }
            Err(err) => {
                warn!(%lock_id, %err, "token validation unreachable");
                self.apply(
                    generation,
                    UnlockState::Failed {
                        message: TOKEN_CONNECTIVITY.to_string(),
                    },
                )
                .await
            }
        }
    }

    /// Abandon the attempt.
    ///
    /// From any non-terminal state this requires `confirmed = true` (the
    /// presentation layer asks first); from `Success` nothing is lost by
    /// leaving, so it is a plain no-op that reports whether leaving is
    /// allowed.
    pub async fn cancel(&self, confirmed: bool) -> UnlockState {
        let mut inner = self.inner.lock().await;
        match inner.state {
            UnlockState::Success { .. } | UnlockState::NotFound | UnlockState::Cancelled => {}
            _ if confirmed => {
                inner.generation += 1;
                inner.state = UnlockState::Cancelled;
                debug!("unlock attempt cancelled");
            }
            _ => {}
        }
        inner.state.clone()
    }

    async fn finish_success(
        &self,
        generation: u64,
        lock_id: Uuid,
        method: AccessMethod,
    ) -> UnlockState {
        let state = self
            .apply(generation, UnlockState::Success { method })
            .await;

        if matches!(state, UnlockState::Success { .. }) {
            info!(%lock_id, ?method, "door unlocked");
            let record = OpeningRecord {
                lock_id,
                user_id: self.session.user_id,
                opened_at: chrono::Utc::now(),
                method,
            };
            // Auditing must never fail the unlock itself.
            if let Err(err) = self.backend.record_opening(&record).await {
                warn!(%err, "failed to record opening");
            }
        }
        state
    }

    /// Apply a transition unless the attempt was cancelled (or superseded)
    /// while the request was in flight.
    async fn apply(&self, generation: u64, next: UnlockState) -> UnlockState {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state == UnlockState::Cancelled {
            debug!(dropped = ?next, "discarding stale unlock response");
        } else {
            inner.state = next;
        }
        inner.state.clone()
    }

    async fn current_generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    async fn target_id(&self) -> Option<Uuid> {
        self.inner.lock().await.target.as_ref().map(|lock| lock.id)
    }
}
