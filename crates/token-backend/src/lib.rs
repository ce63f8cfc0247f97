//! # Token Backend - JWT issuing and verification
//!
//! Signs claims into compact JWTs and verifies incoming tokens against either
//! locally configured key material or key sets published by remote identity
//! providers (JWKS endpoints such as Keycloak realms).
//!
//! ## Architecture
//!
//! - [`algorithm`] - Algorithm allow-list and crypto capability check
//! - [`backend`] - [`TokenBackend`]: encode and the decode pipeline
//! - [`cache`] - Per-issuer remote key cache with single-flight fetching
//! - [`config`] - Serde configuration and the [`TokenBackendBuilder`]
//! - [`error`] - The [`TokenBackendError`] taxonomy
//! - [`jwks`] - [`RemoteKeySource`]: provider registry and JWKS fetching
//! - [`options`] - Per-call [`DecodeOptions`]
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use token_backend::{DecodeOptions, TokenBackend};
//!
//! # tokio_test::block_on(async {
//! let backend = TokenBackend::builder("HS256")
//!     .signing_key("secret")
//!     .build()
//!     .await?;
//!
//! let claims = json!({ "user_id": 7 }).as_object().cloned().unwrap();
//! let token = backend.encode(&claims)?;
//!
//! let decoded = backend.decode(&token, &DecodeOptions::default(), None).await?;
//! assert_eq!(decoded, claims);
//! # Ok::<(), token_backend::TokenBackendError>(())
//! # });
//! ```
//!
//! ## Remote keys
//!
//! When a backend is configured with remote issuers, `decode` reads the
//! unverified `kid` header and `iss` claim, resolves that issuer's key set
//! (fetching it once on first sight) and verifies with the single key whose
//! identifier matches. Verification is always restricted to the configured
//! algorithm.
//!
//! ## Feature Flags
//!
//! - `rsa` (default) - enables the RS256/RS384/RS512 algorithms

pub mod algorithm;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod jwks;
pub mod options;

#[doc(inline)]
pub use algorithm::{CryptoBackend, TokenAlgorithm};
#[doc(inline)]
pub use backend::{Claims, TokenBackend};
#[doc(inline)]
pub use cache::RemoteKeyCache;
#[doc(inline)]
pub use config::{Remotes, RemoteKeySourceConfig, TokenBackendBuilder, TokenBackendConfig};
#[doc(inline)]
pub use error::{Result, TokenBackendError};
#[doc(inline)]
pub use jwks::{DEFAULT_PROVIDER_TYPE, RemoteKeySource, SigningKeyEntry};
#[doc(inline)]
pub use options::DecodeOptions;
