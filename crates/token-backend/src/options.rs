//! Per-call decode options

use jsonwebtoken::Validation;
use serde::{Deserialize, Serialize};

use crate::algorithm::TokenAlgorithm;

/// Checks applied by [`TokenBackend::decode`](crate::TokenBackend::decode)
///
/// Unset claim checks follow `verify_signature`: a caller that disables
/// signature verification also gets expiry, not-before and issuer checks
/// disabled unless it asks for them explicitly. The audience check is the
/// exception and defaults to "an audience is configured".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Verify the signature (default: true)
    pub verify_signature: bool,
    /// Reject tokens whose `exp` is in the past
    pub verify_exp: Option<bool>,
    /// Reject tokens whose `nbf` is in the future
    pub verify_nbf: Option<bool>,
    /// Require `iss` to equal the configured issuer
    pub verify_iss: Option<bool>,
    /// Require `aud` to contain the configured audience
    pub verify_aud: Option<bool>,
    /// Registered claims that must be present (`exp`, `nbf`, `aud`, `iss`, `sub`)
    pub required_claims: Vec<String>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_signature: true,
            verify_exp: None,
            verify_nbf: None,
            verify_iss: None,
            verify_aud: None,
            required_claims: Vec::new(),
        }
    }
}

impl DecodeOptions {
    /// Options that skip signature verification (and, by default, the
    /// time-based and issuer checks)
    pub fn without_signature() -> Self {
        Self {
            verify_signature: false,
            ..Self::default()
        }
    }

    /// Override the expiry check
    pub fn verify_exp(mut self, verify: bool) -> Self {
        self.verify_exp = Some(verify);
        self
    }

    /// Override the audience check
    pub fn verify_aud(mut self, verify: bool) -> Self {
        self.verify_aud = Some(verify);
        self
    }

    /// Require a registered claim to be present
    pub fn require(mut self, claim: impl Into<String>) -> Self {
        self.required_claims.push(claim.into());
        self
    }

    /// Build the `jsonwebtoken` validation rules for one decode call
    ///
    /// The algorithm list is always exactly `[algorithm]`. A configured
    /// audience or issuer that is being checked must also be present.
    pub(crate) fn validation(
        &self,
        algorithm: TokenAlgorithm,
        audience: Option<&str>,
        issuer: Option<&str>,
        leeway: u64,
    ) -> Validation {
        let mut validation = Validation::new(algorithm.jwt_algorithm());
        validation.algorithms = vec![algorithm.jwt_algorithm()];
        validation.leeway = leeway;

        if !self.verify_signature {
            validation.insecure_disable_signature_validation();
        }

        validation.validate_exp = self.verify_exp.unwrap_or(self.verify_signature);
        validation.validate_nbf = self.verify_nbf.unwrap_or(self.verify_signature);
        validation.validate_aud = self.verify_aud.unwrap_or(audience.is_some());

        let mut required: Vec<&str> = self.required_claims.iter().map(String::as_str).collect();

        if validation.validate_aud
            && let Some(audience) = audience
        {
            validation.set_audience(&[audience]);
            required.push("aud");
        }

        if self.verify_iss.unwrap_or(self.verify_signature)
            && let Some(issuer) = issuer
        {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }

        validation.set_required_spec_claims(&required);
        validation
    }
}
