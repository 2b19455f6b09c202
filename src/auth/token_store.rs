//! In-memory access token record
//!
//! A [`AccessTokenRecord`] is the only state a
//! [`TokenManager`](super::manager::TokenManager) keeps between calls. It is
//! never persisted: a restart forces a fresh acquisition on first use.

use chrono::{DateTime, Duration, Utc};

use crate::auth::grant::TokenResponse;

// ---------------------------------------------------------------------------
// AccessTokenRecord
// ---------------------------------------------------------------------------

/// The access token, refresh token and expiry held by one token manager.
///
/// Either `access_token` is non-empty and `expires_at` is set, or the record
/// is in its never-initialized [`Default`] state.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::token_store::AccessTokenRecord;
/// use chrono::Utc;
///
/// let record = AccessTokenRecord::default();
/// assert!(!record.is_fresh(Utc::now()));
/// assert!(!record.has_refresh_token());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessTokenRecord {
    /// The access token presented to downstream services.
    pub access_token: String,

    /// Refresh token exchanged for a new access token once this one expires.
    pub refresh_token: String,

    /// UTC instant at which `access_token` stops being usable.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessTokenRecord {
    /// Builds a record from a token endpoint response received at `now`.
    ///
    /// `expires_at` is `now + expires_in`, saturating at
    /// [`DateTime::<Utc>::MAX_UTC`].
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Some(expires_at),
        }
    }

    /// Returns `true` when the access token can be handed out at `now`
    /// without a token endpoint round trip.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokenkeeper::auth::token_store::AccessTokenRecord;
    /// use chrono::{Duration, Utc};
    ///
    /// let now = Utc::now();
    /// let record = AccessTokenRecord {
    ///     access_token: "tok".to_string(),
    ///     refresh_token: "ref".to_string(),
    ///     expires_at: Some(now + Duration::minutes(5)),
    /// };
    /// assert!(record.is_fresh(now));
    /// assert!(!record.is_fresh(now + Duration::minutes(5)));
    /// ```
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => !self.access_token.is_empty() && now < expires_at,
            None => false,
        }
    }

    /// Returns `true` when a refresh token is available.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Resets the record to its never-initialized state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
