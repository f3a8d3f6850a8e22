// SPDX-License-Identifier: MIT OR Apache-2.0
//! HMAC-SHA256 signing keys with rotation.
//!
//! The service keeps an ordered list of active keys: the current key plus a
//! bounded tail of prior ones. Signing always uses the current key;
//! verification walks the ring in key-version order, earliest match first,
//! so permits issued before a rotation stay valid until they expire.

use crate::model::Permit;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// One versioned HMAC secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Monotonically-increasing key version.
    pub version: u32,
    /// Raw secret bytes.
    pub secret: String,
}

/// Why a permit failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// No active key reproduced the signature.
    #[error("signature does not verify under any active key")]
    BadSignature,
    /// The permit names a key version the ring does not hold.
    #[error("unknown key version {0}")]
    UnknownKeyVersion(u32),
}

/// Ordered set of active signing keys.
#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
}

impl KeyRing {
    /// Build a ring from keys. Keys are sorted by version; at least one is
    /// required and the highest version becomes the signing key.
    pub fn new(mut keys: Vec<SigningKey>) -> Option<Self> {
        if keys.is_empty() {
            return None;
        }
        keys.sort_by_key(|k| k.version);
        keys.dedup_by_key(|k| k.version);
        Some(Self { keys })
    }

    /// Single-key convenience constructor.
    pub fn single(version: u32, secret: impl Into<String>) -> Self {
        Self {
            keys: vec![SigningKey {
                version,
                secret: secret.into(),
            }],
        }
    }

    /// The key new permits are signed with.
    pub fn current(&self) -> &SigningKey {
        self.keys.last().expect("ring is never empty")
    }

    /// Hex-lowercase HMAC-SHA256 of `message` under the current key.
    pub fn sign(&self, message: &str) -> String {
        hmac_hex(&self.current().secret, message)
    }

    /// Verify `signature` over `message`, trying each key in version order.
    /// Returns the version of the earliest matching key.
    pub fn verify(&self, message: &str, signature: &str) -> Result<u32, VerifyError> {
        for key in &self.keys {
            if mac_matches(&key.secret, message, signature) {
                return Ok(key.version);
            }
        }
        Err(VerifyError::BadSignature)
    }

    /// Verify a full permit: the signature must reproduce over the permit's
    /// canonical message under one of the active keys.
    pub fn verify_permit(&self, permit: &Permit) -> Result<u32, VerifyError> {
        self.verify(&permit.canonical_message(), &permit.signature)
    }
}

fn hmac_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn mac_matches(secret: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    // Constant-time comparison.
    mac.verify_slice(&expected).is_ok()
}

// ---------------------------------------------------------------------------
// SecretSource
// ---------------------------------------------------------------------------

/// Where key material lives.
///
/// Production resolves an ARN against an external secret store; tests use
/// [`MemorySecretSource`]. A missing or unresolvable ARN is a fatal init
/// error for the service.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the active keys addressed by `arn`.
    async fn fetch_keys(&self, arn: &str) -> Result<Vec<SigningKey>, SecretFetchError>;
}

/// Errors from a [`SecretSource`].
#[derive(Debug, thiserror::Error)]
pub enum SecretFetchError {
    /// The ARN does not resolve to a secret.
    #[error("secret not found: {arn}")]
    NotFound {
        /// The offending ARN.
        arn: String,
    },
    /// The secret exists but is not decodable as key material.
    #[error("secret at {arn} is malformed: {reason}")]
    Malformed {
        /// The offending ARN.
        arn: String,
        /// Decode detail.
        reason: String,
    },
}

/// In-memory ARN-to-keys map for tests and local mode.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretSource {
    secrets: BTreeMap<String, Vec<SigningKey>>,
}

impl MemorySecretSource {
    /// New empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register keys under an ARN.
    pub fn with_keys(mut self, arn: impl Into<String>, keys: Vec<SigningKey>) -> Self {
        self.secrets.insert(arn.into(), keys);
        self
    }
}

#[async_trait]
impl SecretSource for MemorySecretSource {
    async fn fetch_keys(&self, arn: &str) -> Result<Vec<SigningKey>, SecretFetchError> {
        self.secrets
            .get(arn)
            .cloned()
            .ok_or_else(|| SecretFetchError::NotFound {
                arn: arn.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "device-abc:50:5:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z";

    /// Golden value: HMAC-SHA256 of the contract message under
    /// `test-secret-v1`, hex-lowercase.
    const GOLDEN: &str = "b7c6ffb47aebb1581ceaa9c9f1740d7cb6b9629427a607933eb98b51ea6013dd";

    #[test]
    fn signature_contract_vector() {
        let ring = KeyRing::single(1, "test-secret-v1");
        assert_eq!(ring.sign(MESSAGE), GOLDEN);
    }

    #[test]
    fn signing_is_deterministic() {
        let a = KeyRing::single(1, "test-secret-v1");
        let b = KeyRing::single(1, "test-secret-v1");
        assert_eq!(a.sign(MESSAGE), b.sign(MESSAGE));
    }

    #[test]
    fn any_field_mutation_changes_the_signature() {
        let ring = KeyRing::single(1, "test-secret-v1");
        let base = ring.sign(MESSAGE);
        let mutations = [
            "device-abd:50:5:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc:500:5:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc:50:6:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc:50:5:2026-02-02T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc:50:5:2026-02-01T00:00:00Z:2026-01-02T00:00:00Z",
            // Reordering, whitespace, altered separators.
            "50:device-abc:5:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc: 50:5:2026-02-01T00:00:00Z:2026-01-01T00:00:00Z",
            "device-abc|50|5|2026-02-01T00:00:00Z|2026-01-01T00:00:00Z",
        ];
        for mutated in mutations {
            assert_ne!(ring.sign(mutated), base, "mutation must change signature");
        }
    }

    #[test]
    fn verify_round_trips_and_rejects_tampering() {
        let ring = KeyRing::single(3, "k3");
        let sig = ring.sign(MESSAGE);
        assert_eq!(ring.verify(MESSAGE, &sig), Ok(3));
        assert_eq!(
            ring.verify("device-abc:500:5:x:y", &sig),
            Err(VerifyError::BadSignature)
        );
        assert_eq!(
            ring.verify(MESSAGE, "deadbeef"),
            Err(VerifyError::BadSignature)
        );
        assert_eq!(
            ring.verify(MESSAGE, "not-hex-at-all"),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn rotation_keeps_old_permits_verifiable() {
        let old = KeyRing::single(1, "first-secret");
        let sig_v1 = old.sign(MESSAGE);

        let rotated = KeyRing::new(vec![
            SigningKey {
                version: 2,
                secret: "second-secret".into(),
            },
            SigningKey {
                version: 1,
                secret: "first-secret".into(),
            },
        ])
        .unwrap();

        // New signatures come from the current (highest) key.
        assert_eq!(rotated.current().version, 2);
        assert_ne!(rotated.sign(MESSAGE), sig_v1);
        // Old signatures still verify, attributed to the old version.
        assert_eq!(rotated.verify(MESSAGE, &sig_v1), Ok(1));
    }

    #[test]
    fn empty_ring_is_rejected() {
        assert!(KeyRing::new(vec![]).is_none());
    }

    #[tokio::test]
    async fn memory_secret_source_resolves_arn() {
        let source = MemorySecretSource::new().with_keys(
            "arn:aws:secretsmanager:ap-northeast-1:1:secret:permits",
            vec![SigningKey {
                version: 1,
                secret: "s".into(),
            }],
        );
        assert!(
            source
                .fetch_keys("arn:aws:secretsmanager:ap-northeast-1:1:secret:permits")
                .await
                .is_ok()
        );
        assert!(matches!(
            source.fetch_keys("arn:missing").await,
            Err(SecretFetchError::NotFound { .. })
        ));
    }
}
