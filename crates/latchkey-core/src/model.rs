//! Domain entities for properties, locks, grants, and tokens.
//!
//! These types mirror the backend's records. The core only ever holds a
//! cached snapshot of `Property`/`Lock` state for display; the backend
//! copy is authoritative and snapshots may be stale or partially missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A property owned by exactly one owner.
///
/// Immutable after creation as far as this crate is concerned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    /// Property identifier.
    pub id: Uuid,

    /// Display name.
    pub name: String,

    /// Street address.
    pub address: String,

    /// Identifier of the owning user.
    pub owner_id: Uuid,
}

/// A smart lock installed at a property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    /// Lock identifier.
    pub id: Uuid,

    /// Hardware model name.
    pub model: String,

    /// Whether the lock is currently engaged.
    ///
    /// Mutated only by successful unlock operations performed through the
    /// backend; this crate never flips it directly.
    pub is_locked: bool,

    /// Identifier of the property this lock belongs to.
    pub property_id: Uuid,
}

/// A guest's time-bounded right to unlock a specific lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Grant identifier.
    pub id: Uuid,

    /// Lock this grant applies to.
    pub lock_id: Uuid,

    /// Guest holding the grant.
    pub guest_id: Uuid,

    /// Start of the access window (inclusive).
    pub window_start: DateTime<Utc>,

    /// End of the access window (inclusive).
    pub window_end: DateTime<Utc>,

    /// Server-declared activity state, when present.
    ///
    /// Takes precedence over the computed time window; see
    /// [`crate::activity::grant_is_active`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_active: Option<bool>,
}

/// A shareable credential authorizing unlock, not bound to a guest identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token identifier.
    pub id: Uuid,

    /// Lock this token opens.
    pub lock_id: Uuid,

    /// Human-shareable code, unique among live tokens.
    pub code: String,

    /// Expiry timestamp; `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Maximum number of uses; `0` means unlimited.
    pub max_uses: u32,

    /// Uses recorded so far. Incremented by the backend on each
    /// successful validation.
    pub uses_so_far: u32,
}

impl AccessToken {
    /// Returns `true` if the token still has uses remaining (or is unlimited).
    #[must_use]
    pub const fn has_uses_remaining(&self) -> bool {
        self.max_uses == 0 || self.uses_so_far < self.max_uses
    }
}

/// Role of the user a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Property owner: creates grants and tokens.
    Owner,
    /// Guest: holds grants, unlocks doors.
    Guest,
}

/// The current user's identity, passed explicitly into each flow.
///
/// Read once at the start of a flow and treated as read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Identifier of the signed-in user.
    pub user_id: Uuid,

    /// Role of the signed-in user.
    pub role: Role,
}

impl Session {
    /// Create a session for the given user.
    #[must_use]
    pub const fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}
