//! Common test utilities for integration tests
//!
//! Mock JWKS endpoints laid out like Keycloak realms, RSA fixtures and
//! token helpers.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use token_backend::{Claims, RemoteKeySourceConfig};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// PKCS#1 private key matching [`RSA_PUBLIC_PEM`]
pub const RSA_PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/rsa_private.pem");
/// SPKI public key
pub const RSA_PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/rsa_public.pem");
/// Base64url modulus of [`RSA_PUBLIC_PEM`]
pub const RSA_PUBLIC_N: &str = include_str!("../fixtures/rsa_public.jwk_n.txt");

/// A second, unrelated key pair
pub const OTHER_PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/rsa_other_private.pem");
pub const OTHER_PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/rsa_other_public.pem");
pub const OTHER_PUBLIC_N: &str = include_str!("../fixtures/rsa_other_public.jwk_n.txt");

/// Keycloak certs suffix
pub const CERTS_SUFFIX: &str = "/protocol/openid-connect/certs";

/// Mock identity provider hosting any number of realms
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    /// Start a new mock identity provider
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer URL of a realm
    pub fn issuer(&self, realm: &str) -> String {
        format!("{}/realms/{}", self.server.uri(), realm)
    }

    /// Serve `keys` as the realm's JWKS, expecting exactly `fetches` requests
    pub async fn mock_realm_keys(&self, realm: &str, keys: Vec<Value>, fetches: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/realms/{realm}{CERTS_SUFFIX}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .expect(fetches)
            .mount(&self.server)
            .await;
    }

    /// Answer the realm's JWKS endpoint with an error status
    pub async fn mock_realm_error(&self, realm: &str, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/realms/{realm}{CERTS_SUFFIX}")))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

/// Key source settings that accept the mock server's `http://127.0.0.1` URLs
pub fn loopback_config() -> RemoteKeySourceConfig {
    RemoteKeySourceConfig {
        allow_insecure_loopback: true,
        ..RemoteKeySourceConfig::default()
    }
}

/// JWKS record for an RSA public key
pub fn rsa_jwk(kid: &str, modulus: &str) -> Value {
    json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "alg": "RS256",
        "n": modulus.trim(),
        "e": "AQAB",
    })
}

/// Sign `claims` with an RSA private key and a `kid` header
pub fn sign_rsa(claims: Value, kid: Option<&str>, private_key: &[u8], algorithm: Algorithm) -> String {
    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_string);

    let key = EncodingKey::from_rsa_pem(private_key).expect("Invalid RSA key");
    jsonwebtoken::encode(&header, &claims, &key).expect("Failed to encode test JWT")
}

/// Sign `claims` with an HMAC secret
pub fn sign_hmac(claims: Value, secret: &[u8], algorithm: Algorithm) -> String {
    jsonwebtoken::encode(
        &Header::new(algorithm),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("Failed to encode test JWT")
}

/// JSON object literal as [`Claims`]
pub fn claims(value: Value) -> Claims {
    value.as_object().cloned().expect("claims must be a JSON object")
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
