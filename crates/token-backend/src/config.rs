//! Token backend configuration
//!
//! Two ways to configure a [`TokenBackend`]:
//!
//! - [`TokenBackendBuilder`], obtained from [`TokenBackend::builder`]
//! - [`TokenBackendConfig`], a serde structure for settings files, passed to
//!   [`TokenBackend::from_config`]

use std::collections::HashMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::algorithm::{CryptoBackend, validate_algorithm};
use crate::backend::{KeyMaterial, TokenBackend};
use crate::cache::RemoteKeyCache;
use crate::error::{Result, TokenBackendError};
use crate::jwks::{DEFAULT_PROVIDER_TYPE, RemoteKeySource};

/// Settings for the HTTP side of [`RemoteKeySource`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteKeySourceConfig {
    /// Request timeout in seconds (default: 10)
    pub request_timeout_secs: u64,
    /// Maximum JWKS document size in bytes (default: 64 KiB)
    pub max_response_size: usize,
    /// User agent for JWKS requests
    pub user_agent: String,
    /// Extra provider types: name -> JWKS path suffix
    pub providers: HashMap<String, String>,
    /// Accept plain `http` JWKS URLs on loopback hosts (default: false)
    ///
    /// Lazily fetched issuers come from unverified tokens, so leave this off
    /// outside local development and tests.
    pub allow_insecure_loopback: bool,
}

impl RemoteKeySourceConfig {
    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RemoteKeySourceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_response_size: 64 * 1024,
            user_agent: format!("token-backend/{}", env!("CARGO_PKG_VERSION")),
            providers: HashMap::new(),
            allow_insecure_loopback: false,
        }
    }
}

/// Ordered list of remote issuer base URLs
///
/// Deserializes from either a single string or a list of strings; any other
/// shape is a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RemotesRepr")]
pub struct Remotes(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RemotesRepr {
    One(String),
    Many(Vec<String>),
}

impl From<RemotesRepr> for Remotes {
    fn from(repr: RemotesRepr) -> Self {
        match repr {
            RemotesRepr::One(issuer) => Self(vec![issuer]),
            RemotesRepr::Many(issuers) => Self(issuers),
        }
    }
}

impl Remotes {
    /// A single issuer
    pub fn one(issuer: impl Into<String>) -> Self {
        Self(vec![issuer.into()])
    }

    /// Several issuers, in order
    pub fn many<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(issuers.into_iter().map(Into::into).collect())
    }

    /// Iterate over the issuers
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of issuers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject empty lists and blank issuers
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::InvalidConfiguration`]
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(TokenBackendError::InvalidConfiguration(
                "remotes must list at least one issuer".to_string(),
            ));
        }
        if self.0.iter().any(|issuer| issuer.trim().is_empty()) {
            return Err(TokenBackendError::InvalidConfiguration(
                "remote issuer must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&str> for Remotes {
    fn from(issuer: &str) -> Self {
        Self::one(issuer)
    }
}

impl From<String> for Remotes {
    fn from(issuer: String) -> Self {
        Self::one(issuer)
    }
}

impl From<Vec<String>> for Remotes {
    fn from(issuers: Vec<String>) -> Self {
        Self(issuers)
    }
}

impl From<Vec<&str>> for Remotes {
    fn from(issuers: Vec<&str>) -> Self {
        Self::many(issuers)
    }
}

/// Serde configuration for a [`TokenBackend`]
///
/// ```rust
/// use token_backend::TokenBackendConfig;
///
/// let config = TokenBackendConfig::from_json(serde_json::json!({
///     "algorithm": "RS256",
///     "audience": "account",
///     "remotes": "https://sso.example.com/realms/acme",
/// }))?;
/// assert_eq!(config.remotes.unwrap().len(), 1);
/// # Ok::<(), token_backend::TokenBackendError>(())
/// ```
#[derive(Debug, Deserialize)]
pub struct TokenBackendConfig {
    /// Algorithm name (`HS256`, `RS256`, ...)
    pub algorithm: String,
    /// HMAC secret or PEM private key
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub signing_key: Option<SecretString>,
    /// PEM public key (asymmetric algorithms only)
    #[serde(default)]
    pub verifying_key: Option<String>,
    /// Expected / injected `aud`
    #[serde(default)]
    pub audience: Option<String>,
    /// Expected / injected `iss`
    #[serde(default)]
    pub issuer: Option<String>,
    /// Remote issuer base URLs
    #[serde(default)]
    pub remotes: Option<Remotes>,
    /// Provider type used to build JWKS URLs (default: `KEYCLOAK`)
    #[serde(default)]
    pub remote_provider_type: Option<String>,
    /// Clock skew tolerance in seconds for `exp`/`nbf`
    #[serde(default)]
    pub leeway: u64,
    /// HTTP settings for remote key fetching
    #[serde(default)]
    pub remote: RemoteKeySourceConfig,
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}

impl TokenBackendConfig {
    /// Parse configuration from a JSON value
    ///
    /// # Errors
    ///
    /// Returns [`TokenBackendError::InvalidConfiguration`] if the value does not
    /// match the expected shape (for example `remotes` is neither a string nor
    /// a list of strings)
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| TokenBackendError::InvalidConfiguration(e.to_string()))
    }

    /// Turn the configuration into a builder
    pub fn into_builder(self) -> TokenBackendBuilder {
        let mut builder = TokenBackendBuilder::new(self.algorithm)
            .leeway(self.leeway)
            .remote_config(self.remote);

        if let Some(key) = self.signing_key {
            builder = builder.signing_key(key.expose_secret().as_bytes());
        }
        if let Some(key) = self.verifying_key {
            builder = builder.verifying_key(key);
        }
        if let Some(audience) = self.audience {
            builder = builder.audience(audience);
        }
        if let Some(issuer) = self.issuer {
            builder = builder.issuer(issuer);
        }
        if let Some(remotes) = self.remotes {
            builder = builder.remotes(remotes);
        }
        if let Some(provider_type) = self.remote_provider_type {
            builder = builder.remote_provider_type(provider_type);
        }
        builder
    }
}

/// Builder for [`TokenBackend`]
///
/// ```rust
/// use token_backend::TokenBackend;
///
/// # tokio_test::block_on(async {
/// let backend = TokenBackend::builder("HS512")
///     .signing_key("a-long-shared-secret")
///     .audience("api")
///     .issuer("https://issuer.example")
///     .build()
///     .await?;
/// assert_eq!(backend.audience(), Some("api"));
/// # Ok::<(), token_backend::TokenBackendError>(())
/// # });
/// ```
pub struct TokenBackendBuilder {
    algorithm: String,
    signing_key: Option<KeyMaterial>,
    verifying_key: Option<KeyMaterial>,
    audience: Option<String>,
    issuer: Option<String>,
    remotes: Option<Remotes>,
    remote_provider_type: Option<String>,
    leeway: u64,
    crypto: CryptoBackend,
    key_source: Option<RemoteKeySource>,
    remote_config: RemoteKeySourceConfig,
}

impl std::fmt::Debug for TokenBackendBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBackendBuilder")
            .field("algorithm", &self.algorithm)
            .field("signing_key", &self.signing_key)
            .field("verifying_key", &self.verifying_key)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("remotes", &self.remotes)
            .field("remote_provider_type", &self.remote_provider_type)
            .field("leeway", &self.leeway)
            .field("crypto", &self.crypto)
            .finish_non_exhaustive()
    }
}

impl TokenBackendBuilder {
    /// Start a builder for the named algorithm
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            signing_key: None,
            verifying_key: None,
            audience: None,
            issuer: None,
            remotes: None,
            remote_provider_type: None,
            leeway: 0,
            crypto: CryptoBackend::detect(),
            key_source: None,
            remote_config: RemoteKeySourceConfig::default(),
        }
    }

    /// HMAC secret or PEM-encoded RSA private key
    pub fn signing_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.signing_key = Some(KeyMaterial::new(key.into()));
        self
    }

    /// PEM-encoded RSA public key; ignored for HMAC algorithms
    pub fn verifying_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.verifying_key = Some(KeyMaterial::new(key.into()));
        self
    }

    /// Audience injected on encode and checked on decode
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Issuer injected on encode and checked on decode
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Remote issuers whose keys are fetched at build time
    pub fn remotes(mut self, remotes: impl Into<Remotes>) -> Self {
        self.remotes = Some(remotes.into());
        self
    }

    /// Provider type used to build JWKS URLs (default: `KEYCLOAK`)
    pub fn remote_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.remote_provider_type = Some(provider_type.into());
        self
    }

    /// Clock skew tolerance in seconds
    pub fn leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    /// Crypto capabilities to check the algorithm against
    pub fn crypto_backend(mut self, crypto: CryptoBackend) -> Self {
        self.crypto = crypto;
        self
    }

    /// Use a preconfigured key source instead of building one from
    /// [`remote_config`](Self::remote_config)
    pub fn key_source(mut self, key_source: RemoteKeySource) -> Self {
        self.key_source = Some(key_source);
        self
    }

    /// HTTP settings for the key source
    pub fn remote_config(mut self, config: RemoteKeySourceConfig) -> Self {
        self.remote_config = config;
        self
    }

    /// Validate the configuration and fetch remote keys
    ///
    /// # Errors
    ///
    /// - [`TokenBackendError::UnsupportedAlgorithm`] for algorithms outside the allow-list
    /// - [`TokenBackendError::MissingCryptoBackend`] for RSA without RSA support
    /// - [`TokenBackendError::InvalidConfiguration`] for an empty or blank remote list
    /// - [`TokenBackendError::UnknownProviderType`] for an unregistered provider type
    /// - [`TokenBackendError::RemoteFetchError`] if any remote issuer cannot be fetched
    pub async fn build(self) -> Result<TokenBackend> {
        let algorithm = validate_algorithm(&self.algorithm, self.crypto)?;

        let signing_key = self.signing_key;
        let verifying_key = if algorithm.is_symmetric() {
            if self.verifying_key.is_some() {
                debug!(%algorithm, "Ignoring explicit verifying key for symmetric algorithm");
            }
            signing_key.as_ref().map(KeyMaterial::duplicate)
        } else {
            self.verifying_key
        };

        let remote_provider_type = self
            .remote_provider_type
            .unwrap_or_else(|| DEFAULT_PROVIDER_TYPE.to_string());

        let key_source = match self.key_source {
            Some(source) => source,
            None => RemoteKeySource::with_config(self.remote_config)?,
        };

        let remote_keys = match self.remotes {
            None => None,
            Some(remotes) => {
                remotes.validate()?;
                let cache = RemoteKeyCache::new();
                for issuer in remotes.iter() {
                    cache
                        .get_or_fetch(issuer, || {
                            key_source.fetch_for_issuer(issuer, &remote_provider_type)
                        })
                        .await?;
                }
                info!(
                    issuer_count = cache.len(),
                    provider_type = %remote_provider_type,
                    "Remote signing keys loaded"
                );
                Some(cache)
            }
        };

        Ok(TokenBackend {
            algorithm,
            signing_key,
            verifying_key,
            audience: self.audience,
            issuer: self.issuer,
            leeway: self.leeway,
            remote_keys,
            remote_provider_type,
            key_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remotes_from_string_or_list() {
        let one: Remotes = serde_json::from_value(json!("https://a.example")).unwrap();
        assert_eq!(one, Remotes::one("https://a.example"));

        let many: Remotes =
            serde_json::from_value(json!(["https://a.example", "https://b.example"])).unwrap();
        assert_eq!(
            many.iter().collect::<Vec<_>>(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_remotes_other_shapes_rejected() {
        for value in [json!(42), json!({ "url": "https://a.example" }), json!([1, 2])] {
            let err = TokenBackendConfig::from_json(json!({
                "algorithm": "RS256",
                "remotes": value,
            }))
            .unwrap_err();
            assert!(matches!(err, TokenBackendError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_remotes_validation() {
        assert!(Remotes::one("https://a.example").validate().is_ok());
        assert!(matches!(
            Remotes::many(Vec::<String>::new()).validate(),
            Err(TokenBackendError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Remotes::many(["https://a.example", "  "]).validate(),
            Err(TokenBackendError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = TokenBackendConfig::from_json(json!({ "algorithm": "HS256" })).unwrap();
        assert!(config.signing_key.is_none());
        assert!(config.remotes.is_none());
        assert_eq!(config.leeway, 0);
        assert_eq!(config.remote.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.remote.max_response_size, 64 * 1024);
        assert!(!config.remote.allow_insecure_loopback);
    }

    #[test]
    fn test_config_secret_not_in_debug() {
        let config = TokenBackendConfig::from_json(json!({
            "algorithm": "HS256",
            "signing_key": "super-secret-value",
        }))
        .unwrap();
        assert!(!format!("{config:?}").contains("super-secret-value"));
    }

    #[test]
    fn test_remote_config_custom_providers() {
        let config: RemoteKeySourceConfig = serde_json::from_value(json!({
            "request_timeout_secs": 3,
            "providers": { "OKTA": "/v1/keys" },
        }))
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.providers.get("OKTA").map(String::as_str), Some("/v1/keys"));

        let source = RemoteKeySource::with_config(config).unwrap();
        assert!(source.knows_provider("OKTA"));
        assert!(source.knows_provider(DEFAULT_PROVIDER_TYPE));
    }

    #[tokio::test]
    async fn test_builder_rejects_empty_remotes() {
        let err = TokenBackendBuilder::new("RS256")
            .remotes(Vec::<String>::new())
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, TokenBackendError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_builder_rejects_unknown_provider_type() {
        let err = TokenBackendBuilder::new("RS256")
            .remotes("https://sso.example.com/realms/acme")
            .remote_provider_type("UNKNOWN")
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, TokenBackendError::UnknownProviderType(ref p) if p == "UNKNOWN"));
    }
}
