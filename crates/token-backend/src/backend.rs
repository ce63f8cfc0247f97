//! Token encoding and the decode pipeline
//!
//! # Key selection
//!
//! ```text
//!            decode(token)
//!                 │
//!     remote keys configured and signature checked?
//!          │ no                     │ yes
//!          ▼                        ▼
//!   local verifying key     peek kid (header) + iss (payload)
//!   (placeholder of the
//!    header's family when
//!    the signature is
//!    not checked)
//!                                   │
//!                           cached issuer? ── no ──► fetch JWKS once, cache
//!                                   │ yes                 │
//!                                   ▼                     ▼
//!                           exactly one entry with matching kid
//!                                   │
//!                                   ▼
//!                verify signature + exp/nbf + aud/iss (algorithms = [configured])
//! ```

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{AlgorithmFamily, DecodingKey, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretVec};
use serde_json::Value;
use tracing::{debug, warn};

use crate::algorithm::TokenAlgorithm;
use crate::cache::RemoteKeyCache;
use crate::config::{TokenBackendBuilder, TokenBackendConfig};
use crate::error::{Result, TokenBackendError};
use crate::jwks::{RemoteKeySource, SigningKeyEntry};
use crate::options::DecodeOptions;

/// JWT claims as a JSON object
pub type Claims = serde_json::Map<String, Value>;

/// Key bytes that never show up in `Debug` output
pub(crate) struct KeyMaterial(SecretVec<u8>);

impl KeyMaterial {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(SecretVec::new(bytes))
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.0.expose_secret()
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self::new(self.bytes().to_vec())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Issues and verifies JWTs
///
/// Construct once per configuration with [`TokenBackend::builder`] or
/// [`TokenBackend::from_config`] and share it (by reference or `Arc`) for the
/// lifetime of the process. Everything except the remote key cache is
/// immutable after construction.
///
/// # Example
///
/// ```rust,no_run
/// use token_backend::{DecodeOptions, TokenBackend};
///
/// # tokio_test::block_on(async {
/// let backend = TokenBackend::builder("RS256")
///     .audience("account")
///     .remotes("https://sso.example.com/realms/acme")
///     .build()
///     .await?;
///
/// let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6Ii4uLiJ9...";
/// let claims = backend.decode(token, &DecodeOptions::default(), None).await?;
/// println!("subject: {:?}", claims.get("sub"));
/// # Ok::<(), token_backend::TokenBackendError>(())
/// # });
/// ```
pub struct TokenBackend {
    pub(crate) algorithm: TokenAlgorithm,
    pub(crate) signing_key: Option<KeyMaterial>,
    pub(crate) verifying_key: Option<KeyMaterial>,
    pub(crate) audience: Option<String>,
    pub(crate) issuer: Option<String>,
    pub(crate) leeway: u64,
    /// `None` means local-key mode only
    pub(crate) remote_keys: Option<RemoteKeyCache>,
    pub(crate) remote_provider_type: String,
    pub(crate) key_source: RemoteKeySource,
}

impl fmt::Debug for TokenBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBackend")
            .field("algorithm", &self.algorithm)
            .field("signing_key", &self.signing_key)
            .field("verifying_key", &self.verifying_key)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("leeway", &self.leeway)
            .field("remote_keys", &self.remote_keys.as_ref().map(RemoteKeyCache::issuers))
            .field("remote_provider_type", &self.remote_provider_type)
            .finish_non_exhaustive()
    }
}

/// Header and payload read without verifying the signature
struct UnverifiedToken {
    header: Claims,
    payload: Claims,
}

impl UnverifiedToken {
    fn peek(token: &str) -> Result<Self> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenBackendError::TokenInvalidOrExpired(
                "Invalid JWT format".to_string(),
            ));
        };

        Ok(Self {
            header: decode_part(header, "header")?,
            payload: decode_part(payload, "payload")?,
        })
    }

    fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    fn key_id(&self) -> Result<&str> {
        self.header
            .get("kid")
            .and_then(Value::as_str)
            .ok_or_else(|| TokenBackendError::MalformedRemoteToken("missing kid header".to_string()))
    }

    fn issuer(&self) -> Result<&str> {
        self.payload
            .get("iss")
            .and_then(Value::as_str)
            .filter(|iss| !iss.is_empty())
            .ok_or_else(|| TokenBackendError::MalformedRemoteToken("missing iss claim".to_string()))
    }
}

fn decode_part(part: &str, name: &str) -> Result<Claims> {
    let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|e| {
        TokenBackendError::TokenInvalidOrExpired(format!("Invalid JWT {name} encoding: {e}"))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenBackendError::TokenInvalidOrExpired(format!("Invalid JWT {name}: {e}")))
}

/// Exactly one key must carry `kid`
fn select_key(keys: &[SigningKeyEntry], kid: &str) -> Result<DecodingKey> {
    let mut matching = keys.iter().filter(|entry| entry.key_id() == kid);
    match (matching.next(), matching.next()) {
        (Some(entry), None) => Ok(entry.key().clone()),
        (None, _) => Err(TokenBackendError::NoMatchingKey(kid.to_string())),
        (Some(_), Some(_)) => Err(TokenBackendError::AmbiguousKey(kid.to_string())),
    }
}

/// Stand-in key for a decode that skips signature verification
///
/// `jsonwebtoken` still builds a verifier for the header's `alg` and rejects
/// a key of another family, so the placeholder follows that family. It is
/// never used to verify anything and no key lookup or fetch happens.
fn unchecked_key(token: &str) -> Result<DecodingKey> {
    let header = jsonwebtoken::decode_header(token).map_err(TokenBackendError::from)?;

    Ok(match header.alg.family() {
        AlgorithmFamily::Hmac => DecodingKey::from_secret(&[]),
        AlgorithmFamily::Rsa => DecodingKey::from_rsa_raw_components(&[], &[]),
        AlgorithmFamily::Ec => DecodingKey::from_ec_der(&[]),
        AlgorithmFamily::Ed => DecodingKey::from_ed_der(&[]),
    })
}

impl TokenBackend {
    /// Start building a backend for the named algorithm
    pub fn builder(algorithm: impl Into<String>) -> TokenBackendBuilder {
        TokenBackendBuilder::new(algorithm)
    }

    /// Build a backend from serde configuration
    ///
    /// # Errors
    ///
    /// See [`TokenBackendBuilder::build`]
    pub async fn from_config(config: TokenBackendConfig) -> Result<Self> {
        config.into_builder().build().await
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> TokenAlgorithm {
        self.algorithm
    }

    /// Configured audience
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Configured issuer
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Whether tokens are verified against remote key sets
    pub fn is_remote(&self) -> bool {
        self.remote_keys.is_some()
    }

    /// Provider type used to build JWKS URLs
    pub fn remote_provider_type(&self) -> &str {
        &self.remote_provider_type
    }

    /// Issuers whose keys are currently cached
    pub fn remote_issuers(&self) -> Vec<String> {
        self.remote_keys
            .as_ref()
            .map(RemoteKeyCache::issuers)
            .unwrap_or_default()
    }

    /// Sign `claims`, injecting the configured `aud` and `iss`
    ///
    /// Caller-supplied `aud`/`iss` values are overwritten when the backend
    /// has them configured.
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::SigningError`] if no signing key is
    /// configured, the key material is malformed, or signing fails
    pub fn encode(&self, claims: &Claims) -> Result<String> {
        let signing_key = self.signing_key.as_ref().ok_or_else(|| {
            TokenBackendError::SigningError("no signing key configured".to_string())
        })?;

        let mut payload = claims.clone();
        if let Some(audience) = &self.audience {
            payload.insert("aud".to_string(), Value::String(audience.clone()));
        }
        if let Some(issuer) = &self.issuer {
            payload.insert("iss".to_string(), Value::String(issuer.clone()));
        }

        let key = if self.algorithm.is_symmetric() {
            EncodingKey::from_secret(signing_key.bytes())
        } else {
            EncodingKey::from_rsa_pem(signing_key.bytes())
                .map_err(|e| TokenBackendError::SigningError(format!("Invalid private key: {e}")))?
        };

        jsonwebtoken::encode(&Header::new(self.algorithm.jwt_algorithm()), &payload, &key)
            .map_err(|e| TokenBackendError::SigningError(e.to_string()))
    }

    /// Verify `token` with default options and the configured key
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode)
    pub async fn decode_default(&self, token: &str) -> Result<Claims> {
        self.decode(token, &DecodeOptions::default(), None).await
    }

    /// Verify `token` and return its claims
    ///
    /// `verifying_key` overrides the configured local key (HMAC secret or PEM
    /// public key) for this call. It is not consulted when the backend
    /// resolves keys remotely.
    ///
    /// # Errors
    ///
    /// - [`TokenBackendError::InvalidAlgorithm`] if the token's `alg` is not the configured algorithm
    /// - [`TokenBackendError::MalformedRemoteToken`] if remote lookup needs a missing `kid` or `iss`
    /// - [`TokenBackendError::RemoteFetchError`] if an unseen issuer's keys cannot be fetched
    /// - [`TokenBackendError::NoMatchingKey`] / [`TokenBackendError::AmbiguousKey`] for zero or several `kid` matches
    /// - [`TokenBackendError::TokenInvalidOrExpired`] for bad signatures, expiry, claim mismatches, malformed tokens
    /// - [`TokenBackendError::InvalidConfiguration`] if no local verifying key is available
    /// - [`TokenBackendError::UnknownDecodeError`] for anything else
    pub async fn decode(
        &self,
        token: &str,
        options: &DecodeOptions,
        verifying_key: Option<&[u8]>,
    ) -> Result<Claims> {
        let key = if options.verify_signature {
            let unverified = UnverifiedToken::peek(token).inspect_err(|e| {
                warn!(error = %e, "Token rejected");
            })?;
            self.check_algorithm(&unverified)?;

            match &self.remote_keys {
                Some(cache) => self.remote_key(cache, &unverified).await?,
                None => self.local_key(verifying_key)?,
            }
        } else {
            unchecked_key(token)?
        };

        let validation = options.validation(
            self.algorithm,
            self.audience.as_deref(),
            self.issuer.as_deref(),
            self.leeway,
        );

        match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(data) => {
                debug!(
                    algorithm = %self.algorithm,
                    subject = ?data.claims.get("sub"),
                    "Token verified"
                );
                Ok(data.claims)
            }
            Err(e) => {
                let err = TokenBackendError::from(e);
                warn!(error = %err, "Token rejected");
                Err(err)
            }
        }
    }

    /// Tokens claiming any other algorithm are rejected before any key lookup
    fn check_algorithm(&self, unverified: &UnverifiedToken) -> Result<()> {
        match unverified.algorithm() {
            Some(alg) if alg == self.algorithm.as_str() => Ok(()),
            alg => {
                warn!(
                    expected = %self.algorithm,
                    received = ?alg,
                    "Token algorithm does not match configured algorithm"
                );
                Err(TokenBackendError::InvalidAlgorithm)
            }
        }
    }

    fn local_key(&self, override_key: Option<&[u8]>) -> Result<DecodingKey> {
        let bytes = override_key
            .or_else(|| self.verifying_key.as_ref().map(KeyMaterial::bytes))
            .ok_or_else(|| {
                TokenBackendError::InvalidConfiguration("no verifying key configured".to_string())
            })?;

        if self.algorithm.is_symmetric() {
            Ok(DecodingKey::from_secret(bytes))
        } else {
            DecodingKey::from_rsa_pem(bytes).map_err(|e| {
                TokenBackendError::UnknownDecodeError(format!("Invalid verifying key: {e}"))
            })
        }
    }

    async fn remote_key(
        &self,
        cache: &RemoteKeyCache,
        unverified: &UnverifiedToken,
    ) -> Result<DecodingKey> {
        let kid = unverified.key_id()?;
        let issuer = unverified.issuer()?;

        let keys = cache
            .get_or_fetch(issuer, || {
                self.key_source
                    .fetch_for_issuer(issuer, &self.remote_provider_type)
            })
            .await?;

        select_key(&keys, kid).inspect_err(|e| {
            warn!(issuer = issuer, kid = kid, error = %e, "Remote key selection failed");
        })
    }
}
