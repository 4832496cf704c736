//! Shareable token issuance.
//!
//! Uniqueness of token codes is negotiated optimistically: the client
//! generates a random code and submits it, and regenerates on a conflict
//! signal from the backend. The code space (62 symbols, length 10-20)
//! makes collisions negligible in practice, but the loop is still capped
//! so a misbehaving backend cannot spin it forever.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendError, NewToken};
use crate::error::{CoreError, Result};
use crate::model::{AccessToken, Session};

/// Shortest generated code length.
pub const CODE_MIN_LEN: usize = 10;

/// Longest generated code length.
pub const CODE_MAX_LEN: usize = 20;

/// Bounds for the issuance retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum creation requests per issuance before giving up.
    pub max_attempts: u32,

    /// Delay between attempts after a conflict.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Owner-side input for issuing a token.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    /// Expiry as entered by the owner; blank or absent means no expiry.
    pub expires_at: Option<String>,

    /// Maximum uses; absent defaults to unlimited.
    pub max_uses: Option<u32>,

    /// Convenience flag forcing `max_uses = 1`.
    pub single_use: bool,
}

/// Issues shareable tokens against the backend.
pub struct TokenIssuer<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: Backend> TokenIssuer<B> {
    /// Create an issuer with the default retry policy.
    pub fn new(backend: B) -> Self {
        Self::with_policy(backend, RetryPolicy::default())
    }

    /// Create an issuer with an explicit retry policy.
    pub const fn with_policy(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Issue a token for the property's lock.
    ///
    /// Resolves the property's lock, validates the request, then runs the
    /// generate-and-submit loop until the backend accepts a code.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockNotFound`] if the property has no lock.
    /// - [`CoreError::InvalidTimestamp`] if the expiry does not parse.
    /// - [`CoreError::IssuanceExhausted`] if every attempt conflicted.
    /// - Any non-conflict backend failure, surfaced without retry.
    pub async fn issue_token(
        &self,
        session: &Session,
        property_id: Uuid,
        request: IssueRequest,
    ) -> Result<AccessToken> {
        let lock = self
            .backend
            .resolve_lock_by_property(property_id)
            .await
            .map_err(|err| match err {
                BackendError::NotFound => CoreError::LockNotFound,
                other => other.into(),
            })?;

        let expires_at = parse_expiry(request.expires_at.as_deref())?;
        let max_uses = if request.single_use {
            1
        } else {
            request.max_uses.unwrap_or(0)
        };

        debug!(
            owner = %session.user_id,
            lock = %lock.id,
            max_uses,
            has_expiry = expires_at.is_some(),
            "issuing token"
        );

        for attempt in 1..=self.policy.max_attempts {
            let new_token = NewToken {
                lock_id: lock.id,
                code: generate_code(),
                expires_at,
                max_uses,
            };

            match self.backend.create_token(&new_token).await {
                Ok(token) => {
                    debug!(token = %token.id, attempt, "token issued");
                    return Ok(token);
                }
                Err(BackendError::Conflict) => {
                    warn!(attempt, "token code collision, regenerating");
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(CoreError::IssuanceExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}

/// Parse an owner-entered expiry. Blank input means "no expiry".
fn parse_expiry(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    crate::activity::parse_timestamp(Some(raw))
        .map(Some)
        .ok_or_else(|| CoreError::InvalidTimestamp(raw.to_string()))
}

/// Generate a random shareable code: alphanumeric, length uniform in
/// [`CODE_MIN_LEN`]..=[`CODE_MAX_LEN`].
fn generate_code() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(CODE_MIN_LEN..=CODE_MAX_LEN);
    rng.sample_iter(&rand::distr::Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::backend::{
        BackendResult, GrantRecord, LockDisplay, NewGrant, OpeningRecord, TokenRecord,
    };
    use crate::model::{AccessGrant, Lock, Role};

    /// Backend double that conflicts for a configurable number of
    /// creation requests before accepting one.
    struct ConflictingBackend {
        conflicts_before_success: u32,
        create_calls: AtomicU32,
    }

    impl ConflictingBackend {
        fn new(conflicts_before_success: u32) -> Self {
            Self {
                conflicts_before_success,
                create_calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.create_calls.load(Ordering::SeqCst)
        }
    }

    impl Backend for ConflictingBackend {
        async fn resolve_lock_by_property(&self, property_id: Uuid) -> BackendResult<Lock> {
            Ok(Lock {
                id: Uuid::new_v4(),
                model: "SL-100".to_string(),
                is_locked: true,
                property_id,
            })
        }

        async fn create_token(&self, request: &NewToken) -> BackendResult<AccessToken> {
            let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.conflicts_before_success {
                return Err(BackendError::Conflict);
            }
            Ok(AccessToken {
                id: Uuid::new_v4(),
                lock_id: request.lock_id,
                code: request.code.clone(),
                expires_at: request.expires_at,
                max_uses: request.max_uses,
                uses_so_far: 0,
            })
        }

        async fn validate_token(&self, _code: &str, _lock_id: Uuid) -> BackendResult<()> {
            unreachable!("not exercised")
        }

        async fn primary_unlock(&self, _lock_id: Uuid, _session: &Session) -> BackendResult<()> {
            unreachable!("not exercised")
        }

        async fn check_access(&self, _lock_id: Uuid, _user_id: Uuid) -> BackendResult<bool> {
            Ok(true)
        }

        async fn create_grant(&self, _request: &NewGrant) -> BackendResult<AccessGrant> {
            unreachable!("not exercised")
        }

        async fn list_grants(&self, _session: &Session) -> BackendResult<Vec<GrantRecord>> {
            Ok(Vec::new())
        }

        async fn list_tokens(&self, _owner_id: Uuid) -> BackendResult<Vec<TokenRecord>> {
            Ok(Vec::new())
        }

        async fn resolve_lock_names(
            &self,
            _lock_ids: &[Uuid],
        ) -> BackendResult<HashMap<Uuid, LockDisplay>> {
            Ok(HashMap::new())
        }

        async fn resolve_owner_name(&self, _lock_id: Uuid) -> BackendResult<String> {
            Ok(String::new())
        }

        async fn record_opening(&self, _record: &OpeningRecord) -> BackendResult<()> {
            Ok(())
        }
    }

    fn owner_session() -> Session {
        Session::new(Uuid::new_v4(), Role::Owner)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_issue_succeeds_on_third_attempt() {
        let issuer = TokenIssuer::with_policy(ConflictingBackend::new(2), fast_policy(20));
        let token = issuer
            .issue_token(&owner_session(), Uuid::new_v4(), IssueRequest::default())
            .await
            .unwrap();

        assert_eq!(issuer.backend.calls(), 3);
        assert!(token.code.len() >= CODE_MIN_LEN && token.code.len() <= CODE_MAX_LEN);
        assert_eq!(token.max_uses, 0);
    }

    #[tokio::test]
    async fn test_issue_exhausts_after_cap() {
        let issuer = TokenIssuer::with_policy(ConflictingBackend::new(u32::MAX), fast_policy(5));
        let err = issuer
            .issue_token(&owner_session(), Uuid::new_v4(), IssueRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::IssuanceExhausted { attempts: 5 }));
        assert_eq!(issuer.backend.calls(), 5);
    }

    #[tokio::test]
    async fn test_single_use_forces_one_max_use() {
        let issuer = TokenIssuer::with_policy(ConflictingBackend::new(0), fast_policy(20));
        let request = IssueRequest {
            single_use: true,
            max_uses: Some(7),
            ..IssueRequest::default()
        };
        let token = issuer
            .issue_token(&owner_session(), Uuid::new_v4(), request)
            .await
            .unwrap();
        assert_eq!(token.max_uses, 1);
    }

    #[tokio::test]
    async fn test_invalid_expiry_rejected_before_any_request() {
        let issuer = TokenIssuer::with_policy(ConflictingBackend::new(0), fast_policy(20));
        let request = IssueRequest {
            expires_at: Some("31/01/2024 12:00".to_string()),
            ..IssueRequest::default()
        };
        let err = issuer
            .issue_token(&owner_session(), Uuid::new_v4(), request)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidTimestamp(_)));
        assert_eq!(issuer.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_conflict_failure_aborts_loop() {
        struct FailingBackend(ConflictingBackend);

        impl Backend for FailingBackend {
            async fn resolve_lock_by_property(&self, property_id: Uuid) -> BackendResult<Lock> {
                self.0.resolve_lock_by_property(property_id).await
            }
            async fn create_token(&self, _request: &NewToken) -> BackendResult<AccessToken> {
                self.0.create_calls.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Transport("connection reset".into()))
            }
            async fn validate_token(&self, _c: &str, _l: Uuid) -> BackendResult<()> {
                unreachable!()
            }
            async fn primary_unlock(&self, _l: Uuid, _s: &Session) -> BackendResult<()> {
                unreachable!()
            }
            async fn check_access(&self, _l: Uuid, _u: Uuid) -> BackendResult<bool> {
                Ok(true)
            }
            async fn create_grant(&self, _r: &NewGrant) -> BackendResult<AccessGrant> {
                unreachable!()
            }
            async fn list_grants(&self, _s: &Session) -> BackendResult<Vec<GrantRecord>> {
                Ok(Vec::new())
            }
            async fn list_tokens(&self, _o: Uuid) -> BackendResult<Vec<TokenRecord>> {
                Ok(Vec::new())
            }
            async fn resolve_lock_names(
                &self,
                _l: &[Uuid],
            ) -> BackendResult<HashMap<Uuid, LockDisplay>> {
                Ok(HashMap::new())
            }
            async fn resolve_owner_name(&self, _l: Uuid) -> BackendResult<String> {
                Ok(String::new())
            }
            async fn record_opening(&self, _r: &OpeningRecord) -> BackendResult<()> {
                Ok(())
            }
        }

        let issuer = TokenIssuer::with_policy(
            FailingBackend(ConflictingBackend::new(0)),
            fast_policy(20),
        );
        let err = issuer
            .issue_token(&owner_session(), Uuid::new_v4(), IssueRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Transport(_)));
        assert_eq!(issuer.backend.0.calls(), 1);
    }

    #[test]
    fn test_generated_codes_are_alphanumeric_and_bounded() {
        for _ in 0..50 {
            let code = generate_code();
            assert!(code.len() >= CODE_MIN_LEN && code.len() <= CODE_MAX_LEN);
            assert!(code.chars().all(char::is_alphanumeric));
        }
    }

    #[test]
    fn test_parse_expiry_formats() {
        assert_eq!(parse_expiry(None).unwrap(), None);
        assert_eq!(parse_expiry(Some("  ")).unwrap(), None);
        assert!(parse_expiry(Some("2024-06-01T12:00")).unwrap().is_some());
        assert!(parse_expiry(Some("2024-06-01T12:00:00")).unwrap().is_some());
        assert!(parse_expiry(Some("2024-06-01T12:00:00Z")).unwrap().is_some());
        assert!(parse_expiry(Some("next tuesday")).is_err());
    }
}
