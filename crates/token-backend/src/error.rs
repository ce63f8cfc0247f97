//! Error taxonomy for the token backend
//!
//! Every failure surfaced by construction, [`encode`](crate::TokenBackend::encode)
//! or [`decode`](crate::TokenBackend::decode) is one of the variants below.
//! Nothing is retried inside the crate; callers decide whether a failure is
//! worth retrying or should simply reject the request.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TokenBackendError>;

/// Token backend errors
#[derive(Debug, Error)]
pub enum TokenBackendError {
    /// Algorithm name is not in the allow-list
    #[error("Unrecognized algorithm type '{0}'")]
    UnsupportedAlgorithm(String),

    /// Asymmetric algorithm requested without an RSA-capable crypto backend
    #[error("A crypto backend with RSA support is required to use {0}")]
    MissingCryptoBackend(String),

    /// Construction parameters are inconsistent or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Remote provider type has no registered JWKS path suffix
    #[error("Remote provider type is unknown: {0}")]
    UnknownProviderType(String),

    /// JWKS endpoint could not be fetched or parsed
    #[error("Failed to fetch remote signing keys: {0}")]
    RemoteFetchError(String),

    /// Token could not be signed
    #[error("Failed to sign token: {0}")]
    SigningError(String),

    /// Token lacks the `kid` header or `iss` claim needed for remote key lookup
    #[error("Token did not contain expected remote information: {0}")]
    MalformedRemoteToken(String),

    /// No remote key carries the token's `kid`
    #[error("No matching remote key with kid = {0} was found")]
    NoMatchingKey(String),

    /// More than one remote key carries the token's `kid`
    #[error("Multiple matching remote keys with kid = {0} were found")]
    AmbiguousKey(String),

    /// Token header declares an algorithm other than the configured one
    #[error("Invalid algorithm specified")]
    InvalidAlgorithm,

    /// Bad signature, expired, not yet valid, malformed, or claim mismatch
    #[error("Token is invalid or expired: {0}")]
    TokenInvalidOrExpired(String),

    /// Any other decode failure (key material, crypto provider)
    #[error("Unknown decode error: {0}")]
    UnknownDecodeError(String),
}

impl TokenBackendError {
    /// Whether this error was produced while decoding a presented token,
    /// as opposed to a construction or configuration failure
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::MalformedRemoteToken(_)
                | Self::NoMatchingKey(_)
                | Self::AmbiguousKey(_)
                | Self::InvalidAlgorithm
                | Self::TokenInvalidOrExpired(_)
                | Self::UnknownDecodeError(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for TokenBackendError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::InvalidAlgorithm,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::ExpiredSignature
            | ErrorKind::ImmatureSignature
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::TokenInvalidOrExpired(err.to_string()),
            _ => Self::UnknownDecodeError(err.to_string()),
        }
    }
}
