//! Upload session state tokens.
//!
//! Every stateful upload request carries an opaque `_state` query
//! parameter: `base64url(mac || json)` over `{name, uuid, offset,
//! started_at}`, MAC'd with HMAC-SHA256 under a process-wide secret. The
//! token externalizes all session bookkeeping -- any instance sharing the
//! secret and the storage driver can pick up a session mid-flight, and a
//! client replaying a stale token is caught by the offset check against the
//! server-observed session size.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAC_LENGTH: usize = 32;

/// The upload progress a token attests to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadState {
    pub name: String,
    pub uuid: Uuid,
    pub offset: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("malformed upload state token")]
    Malformed,
    #[error("upload state token failed verification")]
    BadSignature,
}

/// Mints and verifies upload state tokens under one symmetric secret.
///
/// Read-only after construction; shared by every handler.
pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// Generate a random per-process secret. Sessions minted under it do
    /// not survive restarts and cannot be resumed by load-balanced peers,
    /// which is why operators should configure a real secret.
    pub fn ephemeral() -> Self {
        tracing::warn!(
            "no upload session secret configured; using an ephemeral secret, \
             in-flight uploads will not survive a restart and cannot span instances"
        );
        Self {
            key: rand::random::<[u8; 32]>().to_vec(),
        }
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("hmac accepts keys of any length");
        mac.update(payload);
        mac
    }

    pub fn sign(&self, state: &UploadState) -> String {
        let payload = serde_json::to_vec(state).expect("upload state always serializes");
        let tag = self.mac(&payload).finalize().into_bytes();
        let mut raw = Vec::with_capacity(MAC_LENGTH + payload.len());
        raw.extend_from_slice(&tag);
        raw.extend_from_slice(&payload);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn verify(&self, token: &str) -> Result<UploadState, TokenError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        if raw.len() < MAC_LENGTH {
            return Err(TokenError::Malformed);
        }
        let (tag, payload) = raw.split_at(MAC_LENGTH);
        self.mac(payload)
            .verify_slice(tag)
            .map_err(|_| TokenError::BadSignature)?;
        serde_json::from_slice(payload).map_err(|_| TokenError::Malformed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn state() -> UploadState {
        UploadState {
            name: "lib/app".to_string(),
            uuid: Uuid::new_v4(),
            offset: 42,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn round_trip() {
        let signer = TokenSigner::new(b"registry secret");
        let state = state();
        let token = signer.sign(&state);
        let verified = signer.verify(&token).unwrap();
        assert_eq!(verified, state);
    }

    #[test]
    fn peers_with_the_same_secret_interoperate() {
        let a = TokenSigner::new(b"shared");
        let b = TokenSigner::new(b"shared");
        let token = a.sign(&state());
        assert!(b.verify(&token).is_ok());
    }

    #[test]
    fn different_secret_is_rejected() {
        let a = TokenSigner::new(b"secret a");
        let b = TokenSigner::new(b"secret b");
        let token = a.sign(&state());
        assert!(matches!(b.verify(&token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = TokenSigner::new(b"secret");
        let token = signer.sign(&state());
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let forged = URL_SAFE_NO_PAD.encode(raw);
        assert!(matches!(
            signer.verify(&forged),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let signer = TokenSigner::new(b"secret");
        assert!(matches!(
            signer.verify("not base64url!!!"),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            signer.verify(&URL_SAFE_NO_PAD.encode(b"short")),
            Err(TokenError::Malformed)
        ));
    }
}
