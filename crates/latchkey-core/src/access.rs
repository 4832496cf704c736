//! Grant creation and enriched grant/token listings.
//!
//! Listing endpoints return raw, possibly partially-populated records.
//! Display rows are enriched with lock/property names through one batched
//! lookup per listing (a scatter/gather join: the rendered list is
//! complete only once every enrichment lookup belonging to it resolved).
//! An individual name that cannot be resolved degrades to a placeholder
//! for that field only; it never fails the listing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::{grant_is_active_raw, token_is_active_raw};
use crate::backend::{Backend, BackendError, GrantRecord, LockDisplay, NewGrant, TokenRecord};
use crate::error::{CoreError, Result};
use crate::model::{AccessGrant, Session};

/// Placeholder for a property the backend could not identify.
pub const UNIDENTIFIED_PROPERTY: &str = "unidentified property";

/// Placeholder for a lock without a resolvable name.
pub const UNNAMED_LOCK: &str = "unnamed lock";

/// Placeholder for a missing property address.
pub const NO_ADDRESS: &str = "no address";

/// Placeholder for a guest whose name is not populated.
pub const UNKNOWN_GUEST: &str = "unknown guest";

/// Placeholder for an owner whose name could not be resolved.
pub const UNKNOWN_OWNER: &str = "unknown owner";

/// Owner-side input for creating a direct grant.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Guest receiving the grant.
    pub guest_id: Uuid,

    /// Property whose lock the grant applies to.
    pub property_id: Uuid,

    /// Window start as entered by the owner.
    pub window_start: String,

    /// Window end as entered by the owner.
    pub window_end: String,
}

/// A grant prepared for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    /// Grant identifier, when the record carried one.
    pub id: Option<Uuid>,

    /// Guest display name or placeholder.
    pub guest_name: String,

    /// Property display name or placeholder.
    pub property_name: String,

    /// Property address or placeholder.
    pub property_address: String,

    /// Owner display name or placeholder (guest-side listings).
    pub owner_name: String,

    /// Raw window start, shown as-is.
    pub window_start: Option<String>,

    /// Raw window end, shown as-is.
    pub window_end: Option<String>,

    /// Whether the grant currently authorizes unlocking.
    pub active: bool,
}

/// A token prepared for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRow {
    /// Token identifier, when the record carried one.
    pub id: Option<Uuid>,

    /// Shareable code or placeholder.
    pub code: String,

    /// Property display name or placeholder.
    pub property_name: String,

    /// Property address or placeholder.
    pub property_address: String,

    /// Lock display name or placeholder.
    pub lock_name: String,

    /// Raw expiry, shown as-is; absent means no expiry.
    pub expires_at: Option<String>,

    /// Maximum uses (`0` = unlimited).
    pub max_uses: u32,

    /// Uses recorded so far.
    pub uses_so_far: u32,

    /// Whether the token currently authorizes unlocking.
    pub active: bool,
}

/// Owner/guest-facing access operations against the backend.
pub struct AccessManager<B> {
    backend: B,
}

impl<B: Backend> AccessManager<B> {
    /// Create a manager over the given backend.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Create a direct access grant for a guest.
    ///
    /// The window is validated locally before any backend call: both
    /// timestamps must parse and the window must not be inverted.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTimestamp`], [`CoreError::InvalidWindow`],
    /// [`CoreError::LockNotFound`], [`CoreError::GuestNotFound`], or a
    /// surfaced backend failure.
    pub async fn create_grant(
        &self,
        session: &Session,
        request: GrantRequest,
    ) -> Result<AccessGrant> {
        let window_start = parse_required(&request.window_start)?;
        let window_end = parse_required(&request.window_end)?;
        if window_start > window_end {
            return Err(CoreError::InvalidWindow);
        }

        let lock = self
            .backend
            .resolve_lock_by_property(request.property_id)
            .await
            .map_err(|err| match err {
                BackendError::NotFound => CoreError::LockNotFound,
                other => other.into(),
            })?;

        debug!(
            owner = %session.user_id,
            guest = %request.guest_id,
            lock = %lock.id,
            "creating access grant"
        );

        let grant = self
            .backend
            .create_grant(&NewGrant {
                guest_id: request.guest_id,
                lock_id: lock.id,
                window_start,
                window_end,
            })
            .await?;
        Ok(grant)
    }

    /// List grants visible to the session, enriched for display.
    pub async fn list_grants(&self, session: &Session) -> Result<Vec<GrantRow>> {
        let records = match self.backend.list_grants(session).await {
            Ok(records) => records,
            Err(BackendError::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let lock_ids = distinct_lock_ids(records.iter().map(|r| r.lock_id));
        let (names, owners) = self.resolve_display_data(&lock_ids).await;

        let now = Utc::now();
        Ok(records
            .into_iter()
            .map(|record| build_grant_row(record, &names, &owners, now))
            .collect())
    }

    /// List tokens issued for the owner's properties, enriched for display.
    pub async fn list_tokens(&self, session: &Session) -> Result<Vec<TokenRow>> {
        let records = match self.backend.list_tokens(session.user_id).await {
            Ok(records) => records,
            Err(BackendError::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let lock_ids = distinct_lock_ids(records.iter().map(|r| r.lock_id));
        let names = self.resolve_names(&lock_ids).await;

        let now = Utc::now();
        Ok(records
            .into_iter()
            .map(|record| build_token_row(record, &names, now))
            .collect())
    }

    /// One batched name lookup for the whole listing; a failure degrades
    /// every name to its placeholder rather than failing the list.
    async fn resolve_names(&self, lock_ids: &[Uuid]) -> HashMap<Uuid, LockDisplay> {
        if lock_ids.is_empty() {
            return HashMap::new();
        }
        match self.backend.resolve_lock_names(lock_ids).await {
            Ok(names) => names,
            Err(err) => {
                warn!(%err, "name enrichment failed, using placeholders");
                HashMap::new()
            }
        }
    }

    /// Gather lock names and owner names for a listing concurrently.
    async fn resolve_display_data(
        &self,
        lock_ids: &[Uuid],
    ) -> (HashMap<Uuid, LockDisplay>, HashMap<Uuid, String>) {
        let owner_lookups = join_all(lock_ids.iter().map(|&lock_id| async move {
            match self.backend.resolve_owner_name(lock_id).await {
                Ok(name) => Some((lock_id, name)),
                Err(err) => {
                    warn!(%lock_id, %err, "owner name lookup failed, using placeholder");
                    None
                }
            }
        }));

        let (names, owners) = tokio::join!(self.resolve_names(lock_ids), owner_lookups);
        (names, owners.into_iter().flatten().collect())
    }
}

fn parse_required(raw: &str) -> Result<DateTime<Utc>> {
    if raw.trim().is_empty() {
        return Err(CoreError::MissingInput("access window"));
    }
    crate::activity::parse_timestamp(Some(raw))
        .ok_or_else(|| CoreError::InvalidTimestamp(raw.to_string()))
}

fn distinct_lock_ids(ids: impl Iterator<Item = Option<Uuid>>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = ids.flatten().collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn build_grant_row(
    record: GrantRecord,
    names: &HashMap<Uuid, LockDisplay>,
    owners: &HashMap<Uuid, String>,
    now: DateTime<Utc>,
) -> GrantRow {
    let display = record
        .lock_id
        .and_then(|id| names.get(&id))
        .cloned()
        .unwrap_or_default();
    let owner_name = record
        .lock_id
        .and_then(|id| owners.get(&id))
        .cloned()
        .unwrap_or_else(|| UNKNOWN_OWNER.to_string());

    let active = grant_is_active_raw(
        record.active,
        record.window_start.as_deref(),
        record.window_end.as_deref(),
        now,
    );

    GrantRow {
        id: record.id,
        guest_name: record
            .guest_name
            .unwrap_or_else(|| UNKNOWN_GUEST.to_string()),
        property_name: display
            .property_name
            .unwrap_or_else(|| UNIDENTIFIED_PROPERTY.to_string()),
        property_address: display
            .property_address
            .unwrap_or_else(|| NO_ADDRESS.to_string()),
        owner_name,
        window_start: record.window_start,
        window_end: record.window_end,
        active,
    }
}

fn build_token_row(
    record: TokenRecord,
    names: &HashMap<Uuid, LockDisplay>,
    now: DateTime<Utc>,
) -> TokenRow {
    let display = record
        .lock_id
        .and_then(|id| names.get(&id))
        .cloned()
        .unwrap_or_default();

    let max_uses = record.max_uses.unwrap_or(0);
    let uses_so_far = record.uses_so_far.unwrap_or(0);
    let active = record.active.map_or_else(
        || token_is_active_raw(record.expires_at.as_deref(), max_uses, uses_so_far, now),
        |explicit| explicit,
    );

    TokenRow {
        id: record.id,
        code: record
            .code
            .unwrap_or_else(|| "code unavailable".to_string()),
        property_name: display
            .property_name
            .unwrap_or_else(|| UNIDENTIFIED_PROPERTY.to_string()),
        property_address: display
            .property_address
            .unwrap_or_else(|| NO_ADDRESS.to_string()),
        lock_name: display
            .lock_name
            .unwrap_or_else(|| UNNAMED_LOCK.to_string()),
        expires_at: record.expires_at,
        max_uses,
        uses_so_far,
        active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::backend::{BackendResult, NewToken, OpeningRecord};
    use crate::model::{AccessToken, Lock, Role};

    fn ts(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_grant_row_placeholders_for_missing_enrichment() {
        let record = GrantRecord {
            lock_id: Some(Uuid::new_v4()),
            window_start: Some("2024-01-01T00:00".to_string()),
            window_end: Some("2024-01-31T23:59".to_string()),
            ..GrantRecord::default()
        };
        let row = build_grant_row(record, &HashMap::new(), &HashMap::new(), ts(2024, 1, 15));

        assert_eq!(row.property_name, UNIDENTIFIED_PROPERTY);
        assert_eq!(row.property_address, NO_ADDRESS);
        assert_eq!(row.guest_name, UNKNOWN_GUEST);
        assert_eq!(row.owner_name, UNKNOWN_OWNER);
        assert!(row.active);
    }

    #[test]
    fn test_grant_row_uses_resolved_names() {
        let lock_id = Uuid::new_v4();
        let mut names = HashMap::new();
        names.insert(
            lock_id,
            LockDisplay {
                lock_name: Some("Front door".to_string()),
                property_name: Some("Beach house".to_string()),
                property_address: Some("1 Shore Rd".to_string()),
            },
        );
        let mut owners = HashMap::new();
        owners.insert(lock_id, "Alex".to_string());

        let record = GrantRecord {
            lock_id: Some(lock_id),
            guest_name: Some("Sam".to_string()),
            window_start: Some("2024-01-01T00:00".to_string()),
            window_end: Some("2024-01-31T23:59".to_string()),
            ..GrantRecord::default()
        };
        let row = build_grant_row(record, &names, &owners, ts(2024, 6, 1));

        assert_eq!(row.property_name, "Beach house");
        assert_eq!(row.owner_name, "Alex");
        assert_eq!(row.guest_name, "Sam");
        // Outside the window, no explicit flag.
        assert!(!row.active);
    }

    #[test]
    fn test_token_row_exhausted_is_inactive() {
        let record = TokenRecord {
            code: Some("abc123XYZ0".to_string()),
            max_uses: Some(3),
            uses_so_far: Some(3),
            ..TokenRecord::default()
        };
        let row = build_token_row(record, &HashMap::new(), ts(2024, 1, 15));
        assert!(!row.active);
        assert_eq!(row.lock_name, UNNAMED_LOCK);
    }

    #[test]
    fn test_token_row_server_flag_wins() {
        let record = TokenRecord {
            active: Some(true),
            expires_at: Some("2000-01-01T00:00".to_string()),
            ..TokenRecord::default()
        };
        let row = build_token_row(record, &HashMap::new(), ts(2024, 1, 15));
        assert!(row.active);
    }

    /// Backend double for the listing flows: two grant records sharing a
    /// lock, name enrichment succeeding for one lock only.
    struct ListingBackend {
        grants: Vec<GrantRecord>,
        tokens_err: Option<BackendError>,
        names_err: bool,
    }

    impl Backend for ListingBackend {
        async fn resolve_lock_by_property(&self, property_id: Uuid) -> BackendResult<Lock> {
            Ok(Lock {
                id: Uuid::new_v4(),
                model: "SL-100".to_string(),
                is_locked: true,
                property_id,
            })
        }
        async fn create_token(&self, _r: &NewToken) -> BackendResult<AccessToken> {
            unreachable!("not exercised")
        }
        async fn validate_token(&self, _c: &str, _l: Uuid) -> BackendResult<()> {
            unreachable!("not exercised")
        }
        async fn primary_unlock(&self, _l: Uuid, _s: &Session) -> BackendResult<()> {
            unreachable!("not exercised")
        }
        async fn check_access(&self, _l: Uuid, _u: Uuid) -> BackendResult<bool> {
            Ok(true)
        }
        async fn create_grant(&self, request: &NewGrant) -> BackendResult<AccessGrant> {
            Ok(AccessGrant {
                id: Uuid::new_v4(),
                lock_id: request.lock_id,
                guest_id: request.guest_id,
                window_start: request.window_start,
                window_end: request.window_end,
                explicit_active: None,
            })
        }
        async fn list_grants(&self, _s: &Session) -> BackendResult<Vec<GrantRecord>> {
            Ok(self.grants.clone())
        }
        async fn list_tokens(&self, _o: Uuid) -> BackendResult<Vec<TokenRecord>> {
            match &self.tokens_err {
                Some(err) => Err(err.clone()),
                None => Ok(Vec::new()),
            }
        }
        async fn resolve_lock_names(
            &self,
            lock_ids: &[Uuid],
        ) -> BackendResult<HashMap<Uuid, LockDisplay>> {
            if self.names_err {
                return Err(BackendError::Transport("enrichment down".into()));
            }
            // Resolve only the first id; the rest stay placeholders.
            let mut out = HashMap::new();
            if let Some(&first) = lock_ids.first() {
                out.insert(
                    first,
                    LockDisplay {
                        lock_name: Some("Front door".to_string()),
                        property_name: Some("Beach house".to_string()),
                        property_address: Some("1 Shore Rd".to_string()),
                    },
                );
            }
            Ok(out)
        }
        async fn resolve_owner_name(&self, _l: Uuid) -> BackendResult<String> {
            Err(BackendError::Transport("owner service down".into()))
        }
        async fn record_opening(&self, _r: &OpeningRecord) -> BackendResult<()> {
            Ok(())
        }
    }

    fn owner() -> Session {
        Session::new(Uuid::new_v4(), Role::Owner)
    }

    #[tokio::test]
    async fn test_listing_survives_enrichment_failures() {
        let lock_a = Uuid::new_v4();
        let manager = AccessManager::new(ListingBackend {
            grants: vec![GrantRecord {
                lock_id: Some(lock_a),
                window_start: Some("2024-01-01T00:00".to_string()),
                window_end: Some("2099-01-01T00:00".to_string()),
                ..GrantRecord::default()
            }],
            tokens_err: None,
            names_err: true,
        });

        let rows = manager.list_grants(&owner()).await.unwrap();
        assert_eq!(rows.len(), 1);
        // Enrichment is down entirely, yet the list still renders.
        assert_eq!(rows[0].property_name, UNIDENTIFIED_PROPERTY);
        assert_eq!(rows[0].owner_name, UNKNOWN_OWNER);
        assert!(rows[0].active);
    }

    #[tokio::test]
    async fn test_listing_partial_enrichment() {
        let lock_a = Uuid::new_v4();
        let lock_b = Uuid::new_v4();
        // Sorted order decides which lock the double resolves.
        let (first, second) = if lock_a < lock_b {
            (lock_a, lock_b)
        } else {
            (lock_b, lock_a)
        };
        let manager = AccessManager::new(ListingBackend {
            grants: vec![
                GrantRecord {
                    lock_id: Some(first),
                    ..GrantRecord::default()
                },
                GrantRecord {
                    lock_id: Some(second),
                    ..GrantRecord::default()
                },
            ],
            tokens_err: None,
            names_err: false,
        });

        let rows = manager.list_grants(&owner()).await.unwrap();
        assert_eq!(rows[0].property_name, "Beach house");
        assert_eq!(rows[1].property_name, UNIDENTIFIED_PROPERTY);
    }

    #[tokio::test]
    async fn test_token_listing_not_found_degrades_to_empty() {
        let manager = AccessManager::new(ListingBackend {
            grants: Vec::new(),
            tokens_err: Some(BackendError::NotFound),
            names_err: false,
        });
        let rows = manager.list_tokens(&owner()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_token_listing_server_error_propagates() {
        let manager = AccessManager::new(ListingBackend {
            grants: Vec::new(),
            tokens_err: Some(BackendError::Transport("500".into())),
            names_err: false,
        });
        assert!(matches!(
            manager.list_tokens(&owner()).await,
            Err(CoreError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_create_grant_validates_window_locally() {
        let manager = AccessManager::new(ListingBackend {
            grants: Vec::new(),
            tokens_err: None,
            names_err: false,
        });
        let session = owner();

        let inverted = GrantRequest {
            guest_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            window_start: "2024-02-01T00:00".to_string(),
            window_end: "2024-01-01T00:00".to_string(),
        };
        assert!(matches!(
            manager.create_grant(&session, inverted).await,
            Err(CoreError::InvalidWindow)
        ));

        let garbled = GrantRequest {
            guest_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            window_start: "whenever".to_string(),
            window_end: "2024-01-01T00:00".to_string(),
        };
        assert!(matches!(
            manager.create_grant(&session, garbled).await,
            Err(CoreError::InvalidTimestamp(_))
        ));

        let blank = GrantRequest {
            guest_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            window_start: String::new(),
            window_end: "2024-01-01T00:00".to_string(),
        };
        assert!(matches!(
            manager.create_grant(&session, blank).await,
            Err(CoreError::MissingInput(_))
        ));
    }

    #[tokio::test]
    async fn test_create_grant_happy_path() {
        let manager = AccessManager::new(ListingBackend {
            grants: Vec::new(),
            tokens_err: None,
            names_err: false,
        });
        let grant = manager
            .create_grant(
                &owner(),
                GrantRequest {
                    guest_id: Uuid::new_v4(),
                    property_id: Uuid::new_v4(),
                    window_start: "2024-01-01T00:00".to_string(),
                    window_end: "2024-01-31T23:59".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(grant.window_start <= grant.window_end);
    }
}
