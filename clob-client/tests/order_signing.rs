//! End-to-end order signing against the CTF Exchange EIP-712 domains.
//!
//! Everything here is offline: a fixed well-known test key, fixed salt, no
//! network. Run with: cargo test -p clob-client --test order_signing

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use rust_decimal_macros::dec;

use clob_client::credentials::{ApiCredentials, CandidateCredentials, CredentialStore};
use clob_client::signer::RequestSigner;
use clob_client::WireOrder;
use clob_core::{OrderSide, OrderSpec, OrderType};

// Hardhat account #0; publicly known, never funded on mainnet
const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn wallet_signer() -> RequestSigner {
    let candidates = CandidateCredentials {
        private_key: Some(TEST_KEY.into()),
        ..Default::default()
    };
    let store = Arc::new(CredentialStore::configure(&candidates).unwrap());
    RequestSigner::new(store)
}

fn fixed_order(maker: Address) -> WireOrder {
    WireOrder {
        salt: U256::from(123_456_789u64),
        maker,
        signer: maker,
        taker: Address::ZERO,
        token_id: U256::from(111u64),
        maker_amount: U256::from(4_500_000u64),
        taker_amount: U256::from(10_000_000u64),
        expiration: U256::ZERO,
        nonce: U256::ZERO,
        fee_rate_bps: U256::ZERO,
        side: 0,
        signature_type: 0,
    }
}

#[tokio::test]
async fn order_signature_is_deterministic_and_well_formed() {
    let signer = wallet_signer();
    let maker: Address = TEST_ADDRESS.parse().unwrap();
    let order = fixed_order(maker);

    let a = signer.sign_order(&order, false).await.unwrap();
    let b = signer.sign_order(&order, false).await.unwrap();
    assert_eq!(a, b);
    assert!(a.starts_with("0x"));
    assert_eq!(a.len(), 132); // 65 bytes of signature, hex encoded
}

#[tokio::test]
async fn neg_risk_domain_changes_the_signature() {
    let signer = wallet_signer();
    let maker: Address = TEST_ADDRESS.parse().unwrap();
    let order = fixed_order(maker);

    let binary = signer.sign_order(&order, false).await.unwrap();
    let neg_risk = signer.sign_order(&order, true).await.unwrap();
    assert_ne!(binary, neg_risk);
}

#[tokio::test]
async fn built_order_signs_and_serializes_in_wire_shape() {
    let signer = wallet_signer();
    let maker: Address = TEST_ADDRESS.parse().unwrap();

    let spec = OrderSpec {
        condition_id: "0xcond".into(),
        token_id: "111".into(),
        side: OrderSide::Buy,
        price: dec!(0.45),
        size: dec!(10),
        order_type: OrderType::Gtc,
        expiration: None,
    };
    let order = clob_client::orders::build_wire_order(&spec, maker).unwrap();
    let signature = signer.sign_order(&order, false).await.unwrap();

    let signed = clob_client::SignedOrder { order, signature };
    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&signed).unwrap()).unwrap();

    assert_eq!(json["maker"], TEST_ADDRESS);
    assert_eq!(json["taker"], format!("{:?}", Address::ZERO));
    assert_eq!(json["tokenId"], "111");
    assert_eq!(json["makerAmount"], "4500000");
    assert_eq!(json["takerAmount"], "10000000");
    assert_eq!(json["side"], "BUY");
    assert!(json["salt"].is_u64());
    assert!(json["signature"].as_str().unwrap().starts_with("0x"));
}

#[test]
fn l2_headers_carry_the_full_auth_set() {
    let candidates = CandidateCredentials {
        private_key: Some(TEST_KEY.into()),
        api_key: Some("key-id".into()),
        // URL-safe base64 of "integration-secret"
        api_secret: Some("aW50ZWdyYXRpb24tc2VjcmV0".into()),
        api_passphrase: Some("phrase".into()),
    };
    let store = Arc::new(CredentialStore::configure(&candidates).unwrap());
    let signer = RequestSigner::new(store);

    let headers = signer.l2_headers("POST", "/order", "{}").unwrap();
    for name in [
        "POLY_ADDRESS",
        "POLY_SIGNATURE",
        "POLY_TIMESTAMP",
        "POLY_API_KEY",
        "POLY_PASSPHRASE",
    ] {
        assert!(headers.contains_key(name), "missing header {}", name);
    }
    assert_eq!(
        headers.get("POLY_ADDRESS").unwrap().to_str().unwrap(),
        TEST_ADDRESS
    );
}

#[test]
fn signer_without_api_triple_degrades() {
    let signer = wallet_signer();
    let err = signer.l2_headers("GET", "/data/orders", "").unwrap_err();
    assert!(matches!(
        err,
        clob_core::ClobError::SigningUnavailable(_)
    ));
    // Reconfiguring in place enables the path
    let candidates = CandidateCredentials {
        private_key: Some(TEST_KEY.into()),
        ..Default::default()
    };
    let store = Arc::new(CredentialStore::configure(&candidates).unwrap());
    store.set_api_credentials(ApiCredentials {
        api_key: "k".into(),
        secret: "c2VjcmV0".into(),
        passphrase: "p".into(),
    });
    let signer = RequestSigner::new(store);
    assert!(signer.l2_headers("GET", "/data/orders", "").is_ok());
}
