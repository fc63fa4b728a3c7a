//! Authorization for destructive and bulk-read store operations.
//!
//! The store never checks passwords itself. Callers run their own
//! permission check and hand the store a grant:
//!
//! - [`ExportGrant`] is minted by the caller once its check has passed.
//! - [`ClearGrant`] can only come out of the two-step confirmation protocol:
//!   [`ConfirmationIssuer::issue`] hands out a short-lived token, and
//!   [`ConfirmationIssuer::confirm`] trades the same token back for a grant.

use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Default lifetime of a confirmation token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

const TOKEN_BYTES: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("no deletion was requested")]
    NoPending,
    #[error("confirmation token does not match")]
    Mismatch,
    #[error("confirmation token expired")]
    Expired,
}

/// Permission to export every stored record.
#[derive(Debug)]
pub struct ExportGrant {
    _private: (),
}

impl ExportGrant {
    /// Mint a grant after the caller's own permission check has passed.
    pub fn authorized() -> Self {
        Self { _private: () }
    }
}

/// Permission to delete every stored record. Obtained only through
/// [`ConfirmationIssuer::confirm`].
#[derive(Debug)]
pub struct ClearGrant {
    _private: (),
}

impl ClearGrant {
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self { _private: () }
    }
}

/// Token shown to the user, to be typed back to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    pub value: String,
    pub expires_in: Duration,
}

#[derive(Debug)]
struct Pending {
    token: String,
    issued_at: Instant,
}

/// Issues and redeems single-use deletion tokens.
#[derive(Debug)]
pub struct ConfirmationIssuer {
    ttl: Duration,
    pending: Option<Pending>,
}

impl Default for ConfirmationIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl ConfirmationIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, pending: None }
    }

    /// Start a deletion request. Any earlier unredeemed token is replaced.
    pub fn issue(&mut self) -> ConfirmationToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.pending = Some(Pending {
            token: token.clone(),
            issued_at: Instant::now(),
        });
        tracing::debug!(
            target: "dupcheck.guard",
            ttl_secs = self.ttl.as_secs(),
            "deletion token issued"
        );
        ConfirmationToken {
            value: token,
            expires_in: self.ttl,
        }
    }

    /// Redeem a token for a [`ClearGrant`].
    pub fn confirm(&mut self, presented: &str) -> Result<ClearGrant, GuardError> {
        self.confirm_at(presented, Instant::now())
    }

    fn confirm_at(&mut self, presented: &str, now: Instant) -> Result<ClearGrant, GuardError> {
        let pending = self.pending.take().ok_or(GuardError::NoPending)?;
        if now.saturating_duration_since(pending.issued_at) > self.ttl {
            tracing::debug!(target: "dupcheck.guard", "deletion token expired");
            return Err(GuardError::Expired);
        }
        if presented.trim() != pending.token {
            // A wrong guess burns the token; the caller has to request a new one.
            return Err(GuardError::Mismatch);
        }
        Ok(ClearGrant { _private: () })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_confirm() {
        let mut issuer = ConfirmationIssuer::default();
        let token = issuer.issue();
        assert_eq!(token.value.len(), TOKEN_BYTES * 2);
        assert_eq!(token.expires_in, DEFAULT_TOKEN_TTL);
        assert!(issuer.confirm(&token.value).is_ok());
    }

    #[test]
    fn test_token_is_single_use() {
        let mut issuer = ConfirmationIssuer::default();
        let token = issuer.issue();
        issuer.confirm(&token.value).unwrap();
        assert_eq!(
            issuer.confirm(&token.value).unwrap_err(),
            GuardError::NoPending
        );
    }

    #[test]
    fn test_confirm_without_request() {
        let mut issuer = ConfirmationIssuer::default();
        assert_eq!(issuer.confirm("abcd").unwrap_err(), GuardError::NoPending);
    }

    #[test]
    fn test_mismatch_burns_token() {
        let mut issuer = ConfirmationIssuer::default();
        let token = issuer.issue();
        let wrong = format!("{}x", token.value);
        assert_eq!(issuer.confirm(&wrong).unwrap_err(), GuardError::Mismatch);
        assert_eq!(
            issuer.confirm(&token.value).unwrap_err(),
            GuardError::NoPending
        );
    }

    #[test]
    fn test_expired_token() {
        let mut issuer = ConfirmationIssuer::new(Duration::from_secs(5));
        let token = issuer.issue();
        let later = Instant::now() + Duration::from_secs(6);
        assert_eq!(
            issuer.confirm_at(&token.value, later).unwrap_err(),
            GuardError::Expired
        );
    }

    #[test]
    fn test_reissue_replaces_previous_token() {
        let mut issuer = ConfirmationIssuer::default();
        let first = issuer.issue();
        let second = issuer.issue();
        if first.value != second.value {
            assert_eq!(
                issuer.confirm(&first.value).unwrap_err(),
                GuardError::Mismatch
            );
        } else {
            assert!(issuer.confirm(&first.value).is_ok());
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let mut issuer = ConfirmationIssuer::default();
        let token = issuer.issue();
        assert!(issuer.confirm(&format!("  {}\n", token.value)).is_ok());
    }
}
