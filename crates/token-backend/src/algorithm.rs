//! Algorithm allow-list and crypto capability check
//!
//! Only the HMAC (`HS*`) and RSA PKCS#1 v1.5 (`RS*`) families are accepted.
//! The RSA family additionally has to be enabled on the [`CryptoBackend`],
//! which is checked once when a backend is constructed.

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenBackendError};

/// Signing algorithms accepted by the token backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenAlgorithm {
    /// HMAC with SHA-256
    HS256,
    /// HMAC with SHA-384
    HS384,
    /// HMAC with SHA-512
    HS512,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RS384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RS512,
}

impl TokenAlgorithm {
    /// Every algorithm in the allow-list
    pub const ALL: [TokenAlgorithm; 6] = [
        Self::HS256,
        Self::HS384,
        Self::HS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
    ];

    /// Canonical JOSE name (`"HS256"`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        }
    }

    /// Whether signing and verification use the same secret
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    /// The matching `jsonwebtoken` algorithm
    pub fn jwt_algorithm(&self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::RS512 => Algorithm::RS512,
        }
    }
}

impl fmt::Display for TokenAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenAlgorithm {
    type Err = TokenBackendError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == name)
            .ok_or_else(|| TokenBackendError::UnsupportedAlgorithm(name.to_string()))
    }
}

/// Algorithm families a backend may be configured with
///
/// This is a policy switch, not a probe of the linked crypto library: the
/// RSA primitives are always present through `jsonwebtoken`. HMAC is always
/// allowed. RSA follows the `rsa` cargo feature by default;
/// [`CryptoBackend::hmac_only`] turns it off regardless of the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoBackend {
    rsa: bool,
}

impl CryptoBackend {
    /// Families enabled by this build's cargo features
    pub fn detect() -> Self {
        Self {
            rsa: cfg!(feature = "rsa"),
        }
    }

    /// A backend that can only handle HMAC algorithms
    pub fn hmac_only() -> Self {
        Self { rsa: false }
    }

    /// Whether `algorithm` can be signed and verified
    pub fn supports(&self, algorithm: TokenAlgorithm) -> bool {
        algorithm.is_symmetric() || self.rsa
    }
}

impl Default for CryptoBackend {
    fn default() -> Self {
        Self::detect()
    }
}

/// Parse an algorithm name and make sure the crypto backend can handle it
///
/// # Errors
///
/// - [`TokenBackendError::UnsupportedAlgorithm`] if `name` is not in the allow-list
/// - [`TokenBackendError::MissingCryptoBackend`] if the algorithm is asymmetric
///   and `crypto` lacks RSA support
pub fn validate_algorithm(name: &str, crypto: CryptoBackend) -> Result<TokenAlgorithm> {
    let algorithm: TokenAlgorithm = name.parse()?;

    if !crypto.supports(algorithm) {
        return Err(TokenBackendError::MissingCryptoBackend(
            algorithm.to_string(),
        ));
    }

    Ok(algorithm)
}
