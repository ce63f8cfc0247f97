//! Remote key source: JWKS endpoint resolution and fetching
//!
//! Turns an issuer base URL plus a provider type into a JWKS URL, fetches the
//! JSON Web Key Set published there, and converts each usable record into a
//! [`SigningKeyEntry`].
//!
//! This layer does not cache. Cache scope lives in
//! [`RemoteKeyCache`](crate::RemoteKeyCache) so there is exactly one place
//! that decides when keys are reused.
//!
//! # Security Considerations
//!
//! - HTTPS is required; plain HTTP to loopback hosts is opt-in
//!   ([`RemoteKeySourceConfig::allow_insecure_loopback`])
//! - Redirects are not followed
//! - Response bodies are size-limited

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

use crate::config::RemoteKeySourceConfig;
use crate::error::{Result, TokenBackendError};

/// Provider type used when none is configured
pub const DEFAULT_PROVIDER_TYPE: &str = "KEYCLOAK";

/// JWKS path suffix for Keycloak realms
pub const KEYCLOAK_CERTS_SUFFIX: &str = "/protocol/openid-connect/certs";

/// A verification key published by a remote issuer
#[derive(Clone)]
pub struct SigningKeyEntry {
    key_id: String,
    key: DecodingKey,
    algorithm: Option<String>,
}

impl SigningKeyEntry {
    /// Build an entry from already decoded key material
    pub fn new(key_id: impl Into<String>, key: DecodingKey) -> Self {
        Self {
            key_id: key_id.into(),
            key,
            algorithm: None,
        }
    }

    /// Convert a JWKS record into an entry
    ///
    /// Returns `None` for records that are not signing keys: a `use` other
    /// than `sig`, a missing `kid`, or key material `jsonwebtoken` cannot
    /// turn into a verification key.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        match &jwk.common.public_key_use {
            None | Some(PublicKeyUse::Signature) => {}
            Some(other) => {
                debug!(use_ = ?other, kid = ?jwk.common.key_id, "Skipping non-signing JWK");
                return None;
            }
        }

        let Some(key_id) = jwk.common.key_id.clone() else {
            debug!("Skipping JWK without kid");
            return None;
        };

        match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some(Self {
                key_id,
                key,
                algorithm: jwk.common.key_algorithm.as_ref().map(|alg| format!("{alg:?}")),
            }),
            Err(e) => {
                warn!(kid = %key_id, error = %e, "Skipping unusable JWK");
                None
            }
        }
    }

    /// Key identifier (`kid`)
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Verification key material
    pub fn key(&self) -> &DecodingKey {
        &self.key
    }

    /// Algorithm declared by the JWKS record, if any
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }
}

impl fmt::Debug for SigningKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyEntry")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Raw key set; records are parsed one by one so a single unknown `kty`
/// does not poison the whole document.
#[derive(Debug, Deserialize)]
struct RawJwkSet {
    keys: Vec<serde_json::Value>,
}

/// Fetches signing keys from remote JWKS endpoints
///
/// # Example
///
/// ```rust,no_run
/// # use token_backend::RemoteKeySource;
/// # tokio_test::block_on(async {
/// let source = RemoteKeySource::new()?;
/// let url = source.resolve_endpoint("https://sso.example.com/realms/acme", "KEYCLOAK")?;
/// assert_eq!(url, "https://sso.example.com/realms/acme/protocol/openid-connect/certs");
///
/// let keys = source.fetch_signing_keys(&url).await?;
/// println!("{} signing keys", keys.len());
/// # Ok::<(), token_backend::TokenBackendError>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RemoteKeySource {
    /// HTTP client
    client: reqwest::Client,
    /// Provider type -> JWKS path suffix
    providers: HashMap<String, String>,
    /// Maximum JWKS document size in bytes
    max_response_size: usize,
    /// Plain HTTP allowed for loopback hosts
    allow_insecure_loopback: bool,
}

impl RemoteKeySource {
    /// Create a key source with default settings
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::InvalidConfiguration`] if the HTTP client
    /// cannot be created
    pub fn new() -> Result<Self> {
        Self::with_config(RemoteKeySourceConfig::default())
    }

    /// Create a key source with custom settings
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::InvalidConfiguration`] if the HTTP client
    /// cannot be created
    pub fn with_config(config: RemoteKeySourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                TokenBackendError::InvalidConfiguration(format!(
                    "Failed to create HTTP client: {e}"
                ))
            })?;

        let mut providers = HashMap::new();
        providers.insert(
            DEFAULT_PROVIDER_TYPE.to_string(),
            KEYCLOAK_CERTS_SUFFIX.to_string(),
        );
        providers.extend(config.providers);

        Ok(Self {
            client,
            providers,
            max_response_size: config.max_response_size,
            allow_insecure_loopback: config.allow_insecure_loopback,
        })
    }

    /// Register (or replace) the JWKS path suffix for a provider type
    pub fn register_provider(&mut self, provider_type: impl Into<String>, suffix: impl Into<String>) {
        self.providers.insert(provider_type.into(), suffix.into());
    }

    /// Whether a provider type has a registered suffix
    pub fn knows_provider(&self, provider_type: &str) -> bool {
        self.providers.contains_key(provider_type)
    }

    /// Build the JWKS URL for an issuer
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::UnknownProviderType`] if `provider_type`
    /// is not registered
    pub fn resolve_endpoint(&self, base_url: &str, provider_type: &str) -> Result<String> {
        let suffix = self
            .providers
            .get(provider_type)
            .ok_or_else(|| TokenBackendError::UnknownProviderType(provider_type.to_string()))?;

        Ok(format!("{base_url}{suffix}"))
    }

    /// Fetch and parse the signing keys published at `url`
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::RemoteFetchError`] if:
    /// - The URL is invalid or not HTTPS (loopback hosts excepted when
    ///   `allow_insecure_loopback` is set)
    /// - The endpoint is unreachable or returns a non-success status
    /// - The response is too large or not a JSON Web Key Set
    /// - The set contains no usable signing keys
    pub async fn fetch_signing_keys(&self, url: &str) -> Result<Vec<SigningKeyEntry>> {
        info!(jwks_uri = %url, "Fetching JWKS from endpoint");

        check_transport(url, self.allow_insecure_loopback)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to fetch JWKS");
            TokenBackendError::RemoteFetchError(format!("JWKS fetch failed: {e}"))
        })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %url,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(TokenBackendError::RemoteFetchError(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.max_response_size as u64
        {
            return Err(TokenBackendError::RemoteFetchError(
                "JWKS response size limit exceeded".to_string(),
            ));
        }

        let body = response.bytes().await.map_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to read JWKS response");
            TokenBackendError::RemoteFetchError(format!("Failed to read response: {e}"))
        })?;

        if body.len() > self.max_response_size {
            return Err(TokenBackendError::RemoteFetchError(
                "JWKS response size limit exceeded".to_string(),
            ));
        }

        let keys = parse_signing_keys(&body).inspect_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to parse JWKS");
        })?;

        info!(jwks_uri = %url, key_count = keys.len(), "Successfully fetched JWKS");
        Ok(keys)
    }

    /// Resolve the endpoint for `issuer` and fetch its signing keys
    ///
    /// # Errors
    ///
    /// See [`resolve_endpoint`](Self::resolve_endpoint) and
    /// [`fetch_signing_keys`](Self::fetch_signing_keys)
    pub async fn fetch_for_issuer(
        &self,
        issuer: &str,
        provider_type: &str,
    ) -> Result<Vec<SigningKeyEntry>> {
        let url = self.resolve_endpoint(issuer, provider_type)?;
        self.fetch_signing_keys(&url).await
    }
}

/// Only HTTPS, or HTTP to a loopback host when explicitly allowed
fn check_transport(url: &str, allow_insecure_loopback: bool) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| TokenBackendError::RemoteFetchError(format!("Invalid JWKS URL {url}: {e}")))?;

    let loopback = match parsed.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    };

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if loopback && allow_insecure_loopback => Ok(()),
        _ => {
            warn!(jwks_uri = %url, "Refusing non-HTTPS JWKS endpoint");
            Err(TokenBackendError::RemoteFetchError(
                "JWKS endpoint must use HTTPS".to_string(),
            ))
        }
    }
}

/// Parse a JWKS document into signing key entries
pub(crate) fn parse_signing_keys(body: &[u8]) -> Result<Vec<SigningKeyEntry>> {
    let raw: RawJwkSet = serde_json::from_slice(body)
        .map_err(|e| TokenBackendError::RemoteFetchError(format!("Invalid JWKS format: {e}")))?;

    let keys: Vec<SigningKeyEntry> = raw
        .keys
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) => SigningKeyEntry::from_jwk(&jwk),
            Err(e) => {
                warn!(error = %e, "Skipping unparseable JWK");
                None
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(TokenBackendError::RemoteFetchError(
            "The JWKS endpoint did not contain any signing keys".to_string(),
        ));
    }

    Ok(keys)
}
