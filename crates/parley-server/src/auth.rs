//! Identity claim verification.
//!
//! Every connection presents a token signed by the auth service.  The
//! verifier runs before anything else can observe the connection: no
//! registry mutation, no event dispatch, nothing, until the claim checks
//! out.

use parley_shared::auth::{AuthToken, Identity};
use parley_shared::AuthError;
use tracing::debug;

/// Verifies identity claims against the auth service's public key.
#[derive(Clone)]
pub struct IdentityVerifier {
    service_pubkey: [u8; 32],
}

impl IdentityVerifier {
    pub fn new(service_pubkey: [u8; 32]) -> Self {
        Self { service_pubkey }
    }

    /// Verify a transported token and return the trusted identity.
    ///
    /// Every failure mode (missing, malformed, forged, expired) collapses
    /// into the same [`AuthError::InvalidCredential`]; the log line keeps
    /// the detail, the caller does not.
    pub fn verify(&self, raw_token: &str) -> Result<Identity, AuthError> {
        let token = AuthToken::decode(raw_token)?;
        let identity = token.verify_with_key(&self.service_pubkey)?;

        debug!(user = %identity.user_id.short(), "identity claim verified");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::UserId;
    use rand::rngs::OsRng;

    fn setup() -> (SigningKey, IdentityVerifier) {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = IdentityVerifier::new(key.verifying_key().to_bytes());
        (key, verifier)
    }

    #[test]
    fn test_verify_valid_token() {
        let (key, verifier) = setup();
        let user = UserId::new();
        let token = AuthToken::issue(user, "alice", Utc::now() + Duration::hours(1), &key);

        let identity = verifier.verify(&token.encode()).unwrap();
        assert_eq!(identity.user_id, user);
    }

    #[test]
    fn test_verify_expired_token() {
        let (key, verifier) = setup();
        let token =
            AuthToken::issue(UserId::new(), "alice", Utc::now() - Duration::minutes(5), &key);

        assert_eq!(
            verifier.verify(&token.encode()),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn test_verify_forged_token() {
        let (_, verifier) = setup();
        let other_key = SigningKey::generate(&mut OsRng);
        let token =
            AuthToken::issue(UserId::new(), "mallory", Utc::now() + Duration::hours(1), &other_key);

        assert_eq!(
            verifier.verify(&token.encode()),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn test_verify_garbage_token() {
        let (_, verifier) = setup();
        assert_eq!(verifier.verify("garbage"), Err(AuthError::InvalidCredential));
        assert_eq!(verifier.verify(""), Err(AuthError::InvalidCredential));
    }
}
