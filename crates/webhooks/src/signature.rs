//! HMAC signatures over raw delivery bodies.
//!
//! GitHub signs every delivery of a hook configured with a secret. Two
//! algorithms are in circulation, each with its own header and digest prefix:
//!
//! | Algorithm | Header                | Prefix    | Status      |
//! |-----------|-----------------------|-----------|-------------|
//! | `Sha1`    | `X-Hub-Signature`     | `sha1=`   | Legacy      |
//! | `Sha256`  | `X-Hub-Signature-256` | `sha256=` | Recommended |
//!
//! Digest comparison is constant-time (`Mac::verify_slice`).
//!
//! # Examples
//!
//! ```rust
//! use webhooks::signature::{sign, verify, SignatureAlgorithm};
//!
//! let digest = sign(b"{}", "s3cret", SignatureAlgorithm::Sha256);
//! assert!(verify(b"{}", "s3cret", SignatureAlgorithm::Sha256, &digest));
//! assert!(!verify(b"{ }", "s3cret", SignatureAlgorithm::Sha256, &digest));
//! ```

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

use crate::types::HookSecretConfig;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SignatureAlgorithm
// ============================================================================

/// Algorithm used to sign and verify deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// HMAC-SHA1, for older hooks.
    Sha1,

    /// HMAC-SHA256.
    #[default]
    Sha256,
}

impl SignatureAlgorithm {
    /// Header carrying the signature for this algorithm.
    pub fn header_name(self) -> &'static str {
        match self {
            Self::Sha1 => "X-Hub-Signature",
            Self::Sha256 => "X-Hub-Signature-256",
        }
    }

    /// Prefix in front of the hex digest in the header value.
    pub fn digest_prefix(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1=",
            Self::Sha256 => "sha256=",
        }
    }

    /// Formats a hex digest the way it appears on the wire.
    pub fn header_value(self, hex_digest: &str) -> String {
        format!("{}{}", self.digest_prefix(), hex_digest)
    }
}

// ============================================================================
// Signing and verification
// ============================================================================

/// Computes the hex-encoded HMAC digest of `payload` under `secret`.
pub fn sign(payload: &[u8], secret: &str, algorithm: SignatureAlgorithm) -> String {
    match algorithm {
        SignatureAlgorithm::Sha1 => {
            // HMAC accepts keys of any length, so construction cannot fail.
            let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
                return String::new();
            };
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha256 => {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
                return String::new();
            };
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Checks `provided` against the digest of `payload` under `secret`.
///
/// `provided` may carry the algorithm's prefix (`sha256=...`) or be the bare
/// hex digest. Malformed hex is a mismatch, not an error.
pub fn verify(payload: &[u8], secret: &str, algorithm: SignatureAlgorithm, provided: &str) -> bool {
    let provided = provided.trim();
    let hex_digest = provided
        .strip_prefix(algorithm.digest_prefix())
        .unwrap_or(provided);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha1 => match HmacSha1::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        },
        SignatureAlgorithm::Sha256 => match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        },
    }
}

/// Picks the effective secret: a target-level secret always overrides the
/// global one.
pub fn select_secret<'a>(
    target: Option<&'a HookSecretConfig>,
    global: Option<&'a HookSecretConfig>,
) -> Option<&'a HookSecretConfig> {
    target.or(global)
}

// ============================================================================
// SignatureVerifier
// ============================================================================

/// Why a delivery failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// A secret is configured but the request carries no signature header.
    #[error("missing signature header '{header}'")]
    MissingSignature {
        /// Header that was expected.
        header: &'static str,
    },

    /// The signature does not match the payload.
    #[error("signature in '{header}' does not match the payload")]
    Mismatch {
        /// Header that was checked.
        header: &'static str,
    },
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The signature matched.
    Verified,
    /// No secret is configured; the delivery is accepted unchecked.
    Skipped,
}

/// Verifies deliveries against the effective secret.
///
/// Holds the resolved secret value, not just its reference. Constructed per
/// request by the inbound endpoint after secret selection.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    algorithm: SignatureAlgorithm,
}

impl SignatureVerifier {
    /// A verifier for `secret`; `None` accepts everything.
    pub fn new(secret: Option<String>, algorithm: SignatureAlgorithm) -> Self {
        Self { secret, algorithm }
    }

    /// A verifier with no secret, which accepts every delivery.
    pub fn permissive() -> Self {
        Self::new(None, SignatureAlgorithm::default())
    }

    /// The algorithm this verifier expects.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Returns `true` if a secret is configured.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Verifies `payload` against the value of the algorithm's header.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::MissingSignature`] if a secret is configured
    /// and `provided` is `None`, and [`SignatureError::Mismatch`] if the
    /// digest does not match.
    pub fn verify(
        &self,
        payload: &[u8],
        provided: Option<&str>,
    ) -> Result<Verification, SignatureError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(Verification::Skipped);
        };
        let header = self.algorithm.header_name();
        let provided = provided.ok_or(SignatureError::MissingSignature { header })?;

        if verify(payload, secret, self.algorithm, provided) {
            Ok(Verification::Verified)
        } else {
            Err(SignatureError::Mismatch { header })
        }
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
