//! Auth-token claims.
//!
//! The auth service signs a claim binding a user id and display name to an
//! expiry; the relay only ever *verifies* these tokens -- issuance lives
//! with the auth service (`issue` exists for that service and for tests).
//!
//! Transport encoding is base64(JSON) so browsers can pass the token as a
//! WebSocket query parameter.

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::UserId;

/// A signed identity claim presented at connection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    pub user_id: UserId,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

/// The verified identity attached to a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

// payload = user_id bytes || expires_at (rfc3339) || display_name
fn signing_payload(user_id: &UserId, expires_at: &DateTime<Utc>, display_name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload.extend_from_slice(display_name.as_bytes());
    payload
}

impl AuthToken {
    /// Sign a claim.  Used by the auth service and by test fixtures.
    pub fn issue(
        user_id: UserId,
        display_name: impl Into<String>,
        expires_at: DateTime<Utc>,
        signing_key: &SigningKey,
    ) -> Self {
        let display_name = display_name.into();
        let signature = signing_key.sign(&signing_payload(&user_id, &expires_at, &display_name));

        Self {
            user_id,
            display_name,
            expires_at,
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Encode for transport (base64 over the JSON form).
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("token serialization is infallible");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a transported token.  Any malformation maps to the uniform
    /// [`AuthError::InvalidCredential`].
    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| AuthError::InvalidCredential)?;
        serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidCredential)
    }

    /// Check expiry and signature against the auth service's public key.
    pub fn verify_with_key(&self, service_pubkey: &[u8; 32]) -> Result<Identity, AuthError> {
        if Utc::now() > self.expires_at {
            return Err(AuthError::InvalidCredential);
        }

        let verifying_key =
            VerifyingKey::from_bytes(service_pubkey).map_err(|_| AuthError::InvalidCredential)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| AuthError::InvalidCredential)?;

        let payload = signing_payload(&self.user_id, &self.expires_at, &self.display_name);
        verifying_key
            .verify(&payload, &signature)
            .map_err(|_| AuthError::InvalidCredential)?;

        Ok(Identity {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
        })
    }
}
