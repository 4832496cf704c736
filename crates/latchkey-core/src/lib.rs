//! # latchkey-core
//!
//! Core business logic for latchkey, a smart-lock access system: property
//! owners grant guests time-bounded access to doors or hand out shareable
//! limited-use tokens, and holders of a valid grant or token unlock a
//! specific door.
//!
//! This crate provides:
//! - Activity evaluation for grants and tokens (pure, clock-injected)
//! - Token issuance with optimistic uniqueness negotiation and bounded retry
//! - The unlock attempt state machine (primary channel + token fallback)
//! - Grant creation and enriched grant/token listings
//! - The backend collaborator contract
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`model`] - Domain entities (property, lock, grant, token, session)
//! - [`activity`] - Pure activity predicates over supplied data and clock
//! - [`backend`] - The backend request/response contract and its failure signals
//! - [`issuer`] - Shareable token issuance with the conflict-retry loop
//! - [`unlock`] - The door-unlock orchestration state machine
//! - [`access`] - Grant creation and display-ready listings
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod access;
pub mod activity;
pub mod backend;
pub mod error;
pub mod issuer;
pub mod model;
pub mod unlock;

// Re-export primary types for convenience
pub use access::{AccessManager, GrantRequest, GrantRow, TokenRow};
pub use activity::{grant_is_active, grant_is_active_raw, token_is_active, token_is_active_raw};
pub use backend::{
    AccessMethod, Backend, BackendError, BackendResult, GrantRecord, LockDisplay, NewGrant,
    NewToken, OpeningRecord, TokenRecord,
};
pub use error::{CoreError, Result};
pub use issuer::{IssueRequest, RetryPolicy, TokenIssuer, CODE_MAX_LEN, CODE_MIN_LEN};
pub use model::{AccessGrant, AccessToken, Lock, Property, Role, Session};
pub use unlock::{UnlockOrchestrator, UnlockState};
