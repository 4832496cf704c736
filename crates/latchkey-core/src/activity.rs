//! Activity evaluation for grants and tokens.
//!
//! Pure predicates over supplied data plus a supplied clock reading, so
//! they stay independently testable. Nothing here touches the backend.
//!
//! When a record carries a server-declared `explicit_active` flag *and* a
//! time window, the server flag wins. Which one should win when they
//! disagree is a product decision still to be confirmed; treating the
//! server as authoritative is the conservative reading.

use chrono::{DateTime, Utc};

use crate::model::{AccessGrant, AccessToken};

/// Whether a grant currently authorizes unlocking.
///
/// Returns the server-declared state verbatim when present; otherwise
/// checks `window_start <= now <= window_end`. An inverted window never
/// counts as open.
#[must_use]
pub fn grant_is_active(grant: &AccessGrant, now: DateTime<Utc>) -> bool {
    if let Some(explicit) = grant.explicit_active {
        return explicit;
    }
    grant.window_start <= now && now <= grant.window_end
}

/// Whether a token currently authorizes unlocking.
///
/// A token with no expiry is active while uses remain (or it is
/// unlimited). With an expiry, it is active iff `now <= expires_at` and
/// uses remain.
#[must_use]
pub fn token_is_active(token: &AccessToken, now: DateTime<Utc>) -> bool {
    match token.expires_at {
        None => token.has_uses_remaining(),
        Some(expires_at) => now <= expires_at && token.has_uses_remaining(),
    }
}

/// Activity check over raw, possibly partially-populated listing fields.
///
/// Listing endpoints may return unparsed timestamp strings. An absent or
/// unparseable timestamp fails closed: an invalid time window must never
/// be treated as an open access window.
#[must_use]
pub fn grant_is_active_raw(
    explicit_active: Option<bool>,
    window_start: Option<&str>,
    window_end: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if let Some(explicit) = explicit_active {
        return explicit;
    }
    match (parse_timestamp(window_start), parse_timestamp(window_end)) {
        (Some(start), Some(end)) => start <= now && now <= end,
        _ => false,
    }
}

/// Raw-field variant of [`token_is_active`].
///
/// `expires_at = None` means the token never expires; a present but
/// unparseable expiry fails closed to inactive.
#[must_use]
pub fn token_is_active_raw(
    expires_at: Option<&str>,
    max_uses: u32,
    uses_so_far: u32,
    now: DateTime<Utc>,
) -> bool {
    let uses_remain = max_uses == 0 || uses_so_far < max_uses;
    match expires_at {
        None => uses_remain,
        Some(raw) => match parse_timestamp(Some(raw)) {
            Some(expiry) => now <= expiry && uses_remain,
            None => false,
        },
    }
}

/// Parse a backend timestamp, tolerating RFC 3339 with or without an
/// explicit offset (the backend emits `YYYY-MM-DDTHH:MM:SS`).
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map(|naive| naive.and_utc())
        .ok()
}
