//! The backend collaborator contract.
//!
//! Everything the core needs from the backend service is expressed as
//! request/response operations on the [`Backend`] trait; the binary
//! protocol spoken to actual lock hardware is owned by the backend and
//! treated as opaque here. The primary unlock channel in particular is
//! unreliable by nature (radio hardware), so it is injectable through
//! this trait and tests substitute deterministic outcomes.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AccessGrant, AccessToken, Lock, Session};

/// Failure signals a backend operation can produce.
///
/// These are the distinguished signals the core reacts to; anything the
/// backend cannot express here is a [`BackendError::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The target entity (property, lock, token) does not exist.
    #[error("not found")]
    NotFound,

    /// The referenced guest does not exist.
    #[error("guest not found")]
    GuestNotFound,

    /// A submitted token code collides with an existing live token.
    #[error("token code already in use")]
    Conflict,

    /// The backend rejected a grant window as invalid.
    #[error("invalid access window")]
    InvalidWindow,

    /// A token or grant was rejected as invalid, expired, or exhausted.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network failure, timeout, or malformed response.
    #[error("transport: {0}")]
    Transport(String),
}

/// A specialized [`Result`] type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Creation request for a shareable token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewToken {
    /// Lock the token will open.
    pub lock_id: Uuid,

    /// Client-generated shareable code.
    pub code: String,

    /// Optional expiry timestamp.
    pub expires_at: Option<DateTime<Utc>>,

    /// Maximum uses; `0` means unlimited.
    pub max_uses: u32,
}

/// Creation request for a direct access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGrant {
    /// Guest receiving the grant.
    pub guest_id: Uuid,

    /// Lock the grant applies to.
    pub lock_id: Uuid,

    /// Start of the access window (inclusive).
    pub window_start: DateTime<Utc>,

    /// End of the access window (inclusive).
    pub window_end: DateTime<Utc>,
}

/// Raw grant record as returned by listing endpoints.
///
/// Listing records may be partially populated; every field the core does
/// not strictly need is optional and tolerated when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantRecord {
    /// Grant identifier, when populated.
    pub id: Option<Uuid>,

    /// Lock the grant applies to, when populated.
    pub lock_id: Option<Uuid>,

    /// Guest display name, when embedded in the record.
    pub guest_name: Option<String>,

    /// Raw window start timestamp, unparsed.
    pub window_start: Option<String>,

    /// Raw window end timestamp, unparsed.
    pub window_end: Option<String>,

    /// Server-declared activity state, when present.
    pub active: Option<bool>,
}

/// Raw token record as returned by listing endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier, when populated.
    pub id: Option<Uuid>,

    /// Lock the token opens, when populated.
    pub lock_id: Option<Uuid>,

    /// Shareable code.
    pub code: Option<String>,

    /// Raw expiry timestamp, unparsed. Absent means no expiry.
    pub expires_at: Option<String>,

    /// Maximum uses; `0` or absent means unlimited.
    pub max_uses: Option<u32>,

    /// Uses recorded so far.
    pub uses_so_far: Option<u32>,

    /// Server-declared activity state, when present.
    pub active: Option<bool>,
}

/// Display metadata for a lock, resolved in one batched lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockDisplay {
    /// Lock display name.
    pub lock_name: Option<String>,

    /// Name of the property the lock belongs to.
    pub property_name: Option<String>,

    /// Address of the property.
    pub property_address: Option<String>,
}

/// How an unlock was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMethod {
    /// Direct proximity/radio channel.
    Primary,
    /// Shareable token fallback.
    Token,
}

/// Audit record for a successful opening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningRecord {
    /// Lock that was opened.
    pub lock_id: Uuid,

    /// User who opened it.
    pub user_id: Uuid,

    /// When the opening happened (UTC).
    pub opened_at: DateTime<Utc>,

    /// Channel that authorized the opening.
    pub method: AccessMethod,
}

/// Request/response contract with the backend service.
///
/// All operations are non-blocking and suspend the calling flow until
/// resolution. Implementations map their own failure modes onto
/// [`BackendError`] signals.
pub trait Backend {
    /// Resolve the lock for a property (first of several, if many).
    fn resolve_lock_by_property(
        &self,
        property_id: Uuid,
    ) -> impl Future<Output = BackendResult<Lock>>;

    /// Submit a token-creation request. Uniqueness of the code among live
    /// tokens is enforced here, signalled by [`BackendError::Conflict`].
    fn create_token(&self, request: &NewToken) -> impl Future<Output = BackendResult<AccessToken>>;

    /// Validate a token code against a lock and, on success, unlock it.
    /// The backend increments the token's use counter.
    fn validate_token(&self, code: &str, lock_id: Uuid)
        -> impl Future<Output = BackendResult<()>>;

    /// Attempt the primary (proximity/radio) unlock channel.
    fn primary_unlock(
        &self,
        lock_id: Uuid,
        session: &Session,
    ) -> impl Future<Output = BackendResult<()>>;

    /// Whether the user currently has access to the lock.
    fn check_access(
        &self,
        lock_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = BackendResult<bool>>;

    /// Create a direct access grant for a guest.
    fn create_grant(&self, request: &NewGrant)
        -> impl Future<Output = BackendResult<AccessGrant>>;

    /// List grants visible to the session (own grants for guests, grants
    /// on owned properties for owners). Not-found degrades to an empty
    /// list at the implementation.
    fn list_grants(&self, session: &Session)
        -> impl Future<Output = BackendResult<Vec<GrantRecord>>>;

    /// List tokens issued for the owner's properties.
    fn list_tokens(&self, owner_id: Uuid)
        -> impl Future<Output = BackendResult<Vec<TokenRecord>>>;

    /// Resolve display metadata for a set of locks in one request.
    /// Locks the backend cannot resolve are simply absent from the map.
    fn resolve_lock_names(
        &self,
        lock_ids: &[Uuid],
    ) -> impl Future<Output = BackendResult<HashMap<Uuid, LockDisplay>>>;

    /// Resolve the display name of the owner of a lock's property.
    fn resolve_owner_name(&self, lock_id: Uuid) -> impl Future<Output = BackendResult<String>>;

    /// Record a successful opening for auditing. Callers treat failure as
    /// non-fatal.
    fn record_opening(&self, record: &OpeningRecord) -> impl Future<Output = BackendResult<()>>;
}
