//! Request and order signing
//!
//! Two credential paths, mirroring the exchange's auth levels:
//!
//! - L1: EIP-712 wallet signatures, used for API key management and for
//!   signing order payloads against the CTF Exchange domain.
//! - L2: HMAC-SHA256 over `{timestamp}{method}{path}{body}` with the API
//!   secret, used for trading and data endpoints.
//!
//! Every entry point fails with `SigningUnavailable` when the required
//! credential path is not configured; callers degrade to a
//! feature-unavailable response instead of crashing.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::signers::Signer as _;
use alloy::sol;
use alloy::sol_types::{eip712_domain, SolStruct};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::debug;

use clob_core::{ClobError, ClobResult};

use crate::credentials::CredentialStore;
use crate::types::WireOrder;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Constants
// ============================================================================

/// Fixed attestation message for CLOB L1 auth
const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// Polymarket CTF Exchange contract (binary markets)
pub const CTF_EXCHANGE_ADDRESS: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e";

/// Polymarket Neg Risk CTF Exchange (multi-outcome markets)
pub const NEG_RISK_CTF_EXCHANGE_ADDRESS: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

/// Polygon chain id
pub const POLYGON_CHAIN_ID: u64 = 137;

// Header names
const HEADER_ADDRESS: &str = "POLY_ADDRESS";
const HEADER_SIGNATURE: &str = "POLY_SIGNATURE";
const HEADER_TIMESTAMP: &str = "POLY_TIMESTAMP";
const HEADER_NONCE: &str = "POLY_NONCE";
const HEADER_API_KEY: &str = "POLY_API_KEY";
const HEADER_PASSPHRASE: &str = "POLY_PASSPHRASE";

// ============================================================================
// EIP-712 structs
// ============================================================================

// Field and struct names fix the EIP-712 type hashes; they must match the
// exchange contracts exactly.
sol! {
    struct ClobAuth {
        address address;
        string timestamp;
        uint256 nonce;
        string message;
    }
}

sol! {
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

fn clob_auth_domain() -> alloy::sol_types::Eip712Domain {
    eip712_domain! {
        name: "ClobAuthDomain",
        version: "1",
        chain_id: POLYGON_CHAIN_ID,
    }
}

fn exchange_domain(neg_risk: bool) -> ClobResult<alloy::sol_types::Eip712Domain> {
    let address = if neg_risk {
        NEG_RISK_CTF_EXCHANGE_ADDRESS
    } else {
        CTF_EXCHANGE_ADDRESS
    };
    let verifying_contract: Address = address
        .parse()
        .map_err(|e| ClobError::internal(format!("bad exchange address constant: {}", e)))?;

    Ok(eip712_domain! {
        name: "Polymarket CTF Exchange",
        version: "1",
        chain_id: POLYGON_CHAIN_ID,
        verifying_contract: verifying_contract,
    })
}

// ============================================================================
// Signer
// ============================================================================

/// Produces authentication headers and order signatures from whichever
/// credential paths the store holds
pub struct RequestSigner {
    credentials: Arc<CredentialStore>,
}

impl RequestSigner {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }

    /// HMAC-SHA256 signature over the canonical request string
    ///
    /// Message is `{timestamp}{method}{path}{body}`; the secret is base64
    /// decoded (URL-safe, tolerating missing padding) and the output is
    /// URL-safe base64 with padding, as the exchange requires.
    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        body: &str,
        timestamp: u64,
    ) -> ClobResult<String> {
        let api = self.credentials.api_credentials().ok_or_else(|| {
            ClobError::signing_unavailable("API credentials not configured")
        })?;

        let secret_bytes = decode_secret(&api.secret)?;
        let message = format!("{}{}{}{}", timestamp, method, path, body);

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| ClobError::internal(format!("failed to create HMAC: {}", e)))?;
        mac.update(message.as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// L2 authentication headers for a trading/data endpoint call
    pub fn l2_headers(&self, method: &str, path: &str, body: &str) -> ClobResult<HeaderMap> {
        let api = self.credentials.api_credentials().ok_or_else(|| {
            ClobError::signing_unavailable("API credentials not configured")
        })?;
        let address = self.credentials.wallet_address().ok_or_else(|| {
            ClobError::signing_unavailable("wallet not configured for L2 auth")
        })?;

        let timestamp = current_timestamp();
        let signature = self.sign_request(method, path, body, timestamp)?;

        debug!(method, path, timestamp, "built L2 auth headers");

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, HEADER_ADDRESS, &address)?;
        insert_header(&mut headers, HEADER_SIGNATURE, &signature)?;
        insert_header(&mut headers, HEADER_TIMESTAMP, &timestamp.to_string())?;
        insert_header(&mut headers, HEADER_API_KEY, &api.api_key)?;
        insert_header(&mut headers, HEADER_PASSPHRASE, &api.passphrase)?;
        Ok(headers)
    }

    /// L1 authentication headers (EIP-712 `ClobAuth`), for API key management
    pub async fn l1_headers(&self) -> ClobResult<HeaderMap> {
        let wallet = self
            .credentials
            .wallet()
            .ok_or_else(|| ClobError::signing_unavailable("wallet not configured"))?;

        let timestamp = current_timestamp();
        let nonce = generate_nonce();
        let address = wallet.address();

        let auth = ClobAuth {
            address,
            timestamp: timestamp.to_string(),
            nonce: U256::from(nonce),
            message: CLOB_AUTH_MESSAGE.to_string(),
        };
        let signing_hash = auth.eip712_signing_hash(&clob_auth_domain());
        let signature = wallet
            .sign_hash(&signing_hash)
            .await
            .map_err(|e| ClobError::signing_unavailable(format!("L1 signing failed: {}", e)))?;
        let sig_hex = format!("0x{}", hex::encode(signature.as_bytes()));

        debug!(timestamp, nonce, "built L1 auth headers");

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, HEADER_ADDRESS, &address.to_checksum(None))?;
        insert_header(&mut headers, HEADER_SIGNATURE, &sig_hex)?;
        insert_header(&mut headers, HEADER_TIMESTAMP, &timestamp.to_string())?;
        insert_header(&mut headers, HEADER_NONCE, &nonce.to_string())?;
        Ok(headers)
    }

    /// EIP-712 wallet signature for an order payload
    pub async fn sign_order(&self, order: &WireOrder, neg_risk: bool) -> ClobResult<String> {
        let wallet = self
            .credentials
            .wallet()
            .ok_or_else(|| ClobError::signing_unavailable("wallet not configured"))?;

        let eip712_order = Order {
            salt: order.salt,
            maker: order.maker,
            signer: order.signer,
            taker: order.taker,
            tokenId: order.token_id,
            makerAmount: order.maker_amount,
            takerAmount: order.taker_amount,
            expiration: order.expiration,
            nonce: order.nonce,
            feeRateBps: order.fee_rate_bps,
            side: order.side,
            signatureType: order.signature_type,
        };

        let domain = exchange_domain(neg_risk)?;
        let signing_hash = eip712_order.eip712_signing_hash(&domain);
        debug!(neg_risk, hash = %hex::encode(signing_hash), "signing order");

        let signature = wallet
            .sign_hash(&signing_hash)
            .await
            .map_err(|e| ClobError::signing_unavailable(format!("order signing failed: {}", e)))?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Wallet address, when a wallet is configured
    pub fn address(&self) -> Option<String> {
        self.credentials.wallet_address()
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("credentials", &self.credentials)
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Decode an API secret that may arrive URL-safe with or without padding
fn decode_secret(secret: &str) -> ClobResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(secret)
        .or_else(|_| URL_SAFE.decode(secret))
        .or_else(|_| {
            let padded = match secret.len() % 4 {
                2 => format!("{}==", secret),
                3 => format!("{}=", secret),
                _ => secret.to_string(),
            };
            URL_SAFE.decode(&padded)
        })
        .map_err(|e| ClobError::signing_unavailable(format!("invalid secret encoding: {}", e)))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> ClobResult<()> {
    headers.insert(
        name,
        HeaderValue::from_str(value)
            .map_err(|e| ClobError::internal(format!("invalid header value: {}", e)))?,
    );
    Ok(())
}

/// Current unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Millisecond-resolution nonce for L1 auth
pub fn generate_nonce() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Random salt for order uniqueness (u64 range, per exchange convention)
pub fn generate_salt() -> U256 {
    use rand::Rng;
    let mut rng = rand::rng();

    let timestamp_ms = generate_nonce();
    let random_bits: u32 = rng.random();
    U256::from(timestamp_ms.wrapping_mul(1000).wrapping_add(random_bits as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{ApiCredentials, CandidateCredentials};

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn store_with_api() -> Arc<CredentialStore> {
        let store = CredentialStore::unauthenticated();
        store.set_api_credentials(ApiCredentials {
            api_key: "key-id".into(),
            // base64 of "super-secret"
            secret: URL_SAFE.encode(b"super-secret"),
            passphrase: "phrase".into(),
        });
        Arc::new(store)
    }

    #[test]
    fn hmac_signature_is_deterministic() {
        let signer = RequestSigner::new(store_with_api());
        let a = signer
            .sign_request("GET", "/data/orders", "", 1_700_000_000)
            .unwrap();
        let b = signer
            .sign_request("GET", "/data/orders", "", 1_700_000_000)
            .unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());

        // Any component change perturbs the signature
        let c = signer
            .sign_request("POST", "/data/orders", "", 1_700_000_000)
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn hmac_without_credentials_degrades() {
        let signer = RequestSigner::new(Arc::new(CredentialStore::unauthenticated()));
        let err = signer.sign_request("GET", "/", "", 0).unwrap_err();
        assert!(matches!(err, ClobError::SigningUnavailable(_)));
    }

    #[test]
    fn secret_decoding_tolerates_missing_padding() {
        let with_pad = URL_SAFE.encode(b"0123456789");
        let without_pad = with_pad.trim_end_matches('=').to_string();
        assert_eq!(
            decode_secret(&with_pad).unwrap(),
            decode_secret(&without_pad).unwrap()
        );
    }

    #[tokio::test]
    async fn l1_headers_require_wallet() {
        let signer = RequestSigner::new(store_with_api());
        assert!(matches!(
            signer.l1_headers().await.unwrap_err(),
            ClobError::SigningUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn l1_headers_with_wallet() {
        let candidates = CandidateCredentials {
            private_key: Some(TEST_KEY.into()),
            ..Default::default()
        };
        let store = Arc::new(CredentialStore::configure(&candidates).unwrap());
        let signer = RequestSigner::new(store);

        let headers = signer.l1_headers().await.unwrap();
        assert!(headers.contains_key("POLY_ADDRESS"));
        assert!(headers.contains_key("POLY_SIGNATURE"));
        assert!(headers.contains_key("POLY_TIMESTAMP"));
        assert!(headers.contains_key("POLY_NONCE"));

        let sig = headers.get("POLY_SIGNATURE").unwrap().to_str().unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 132); // 65 bytes hex + 0x
    }

    #[test]
    fn salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
