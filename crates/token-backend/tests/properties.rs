//! Property tests for encode/decode with symmetric algorithms

use proptest::prelude::*;
use serde_json::Value;
use token_backend::{Claims, TokenBackend, TokenBackendError};

fn claim_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
    ]
}

fn claim_set() -> impl Strategy<Value = Claims> {
    prop::collection::btree_map("c_[a-z]{1,8}", claim_value(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn algorithm() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("HS256"), Just("HS384"), Just("HS512")]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_hmac_roundtrip_preserves_claims(
        alg in algorithm(),
        secret in "[a-zA-Z0-9]{8,48}",
        claims in claim_set(),
    ) {
        let decoded = tokio_test::block_on(async {
            let backend = TokenBackend::builder(alg)
                .signing_key(secret.as_bytes())
                .build()
                .await
                .unwrap();
            let token = backend.encode(&claims).unwrap();
            backend.decode_default(&token).await.unwrap()
        });

        prop_assert_eq!(decoded, claims);
    }

    #[test]
    fn prop_other_secret_is_rejected(
        secret in "[a-z]{16}",
        other in "[A-Z]{16}",
        claims in claim_set(),
    ) {
        let result = tokio_test::block_on(async {
            let signer = TokenBackend::builder("HS256")
                .signing_key(secret.as_bytes())
                .build()
                .await
                .unwrap();
            let verifier = TokenBackend::builder("HS256")
                .signing_key(other.as_bytes())
                .build()
                .await
                .unwrap();
            let token = signer.encode(&claims).unwrap();
            verifier.decode_default(&token).await
        });

        prop_assert!(matches!(result, Err(TokenBackendError::TokenInvalidOrExpired(_))));
    }

    #[test]
    fn prop_garbage_tokens_never_panic(token in "[A-Za-z0-9_.-]{0,64}") {
        let result = tokio_test::block_on(async {
            let backend = TokenBackend::builder("HS256")
                .signing_key("secret")
                .build()
                .await
                .unwrap();
            backend.decode_default(&token).await
        });

        prop_assert!(result.is_err());
    }
}
