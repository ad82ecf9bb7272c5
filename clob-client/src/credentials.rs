//! Credential store and API-key registry
//!
//! The store owns all signing material for the process lifetime. Credentials
//! are never logged beyond truncated key ids and never serialized; absence
//! of credentials leaves the engine in read-only mode rather than failing
//! startup.

use std::str::FromStr;

use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use clob_core::{ClobError, ClobResult};

/// API key/secret/passphrase triple for HMAC (L2) authentication
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Unvalidated credential candidates, as read from configuration
#[derive(Clone, Default)]
pub struct CandidateCredentials {
    /// Wallet private key (hex, with or without 0x prefix)
    pub private_key: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}

impl CandidateCredentials {
    /// Read candidates from the environment
    ///
    /// Recognizes the same variables as the original plugin:
    /// `WALLET_PRIVATE_KEY` with `PRIVATE_KEY` and `POLYMARKET_PRIVATE_KEY`
    /// as fallbacks, plus the `CLOB_API_*` triple.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let private_key = std::env::var("WALLET_PRIVATE_KEY")
            .or_else(|_| std::env::var("PRIVATE_KEY"))
            .or_else(|_| std::env::var("POLYMARKET_PRIVATE_KEY"))
            .ok()
            .filter(|v| !v.is_empty());

        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            private_key,
            api_key: var("CLOB_API_KEY"),
            api_secret: var("CLOB_API_SECRET"),
            api_passphrase: var("CLOB_API_PASSPHRASE"),
        }
    }

    fn api_triple(&self) -> ClobResult<Option<ApiCredentials>> {
        match (&self.api_key, &self.api_secret, &self.api_passphrase) {
            (Some(key), Some(secret), Some(passphrase)) => Ok(Some(ApiCredentials {
                api_key: key.clone(),
                secret: secret.clone(),
                passphrase: passphrase.clone(),
            })),
            (None, None, None) => Ok(None),
            _ => {
                let mut missing = Vec::new();
                if self.api_key.is_none() {
                    missing.push("api key");
                }
                if self.api_secret.is_none() {
                    missing.push("api secret");
                }
                if self.api_passphrase.is_none() {
                    missing.push("api passphrase");
                }
                Err(ClobError::incomplete_credentials(format!(
                    "partial API credential triple: missing {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

impl std::fmt::Debug for CandidateCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateCredentials")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "api_passphrase",
                &self.api_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Default)]
struct CredentialState {
    wallet: Option<PrivateKeySigner>,
    api: Option<ApiCredentials>,
}

/// Holds wallet signing material and/or an API triple
///
/// Constructed once at startup via [`CredentialStore::configure`]; read-only
/// thereafter except for explicit reconfiguration (e.g. adopting a freshly
/// created API key). No network or disk I/O.
pub struct CredentialStore {
    state: RwLock<CredentialState>,
}

impl CredentialStore {
    /// Validate candidates and build the store
    ///
    /// A partial API triple fails with `IncompleteCredentials`; a missing
    /// triple or missing wallet key merely disables the respective
    /// capability. Both absent is a valid read-only configuration.
    pub fn configure(candidates: &CandidateCredentials) -> ClobResult<Self> {
        let api = candidates.api_triple().inspect_err(|_| {
            warn!("Partial API credential triple supplied; API auth disabled");
        })?;

        let wallet = match &candidates.private_key {
            Some(key) => Some(parse_private_key(key)?),
            None => None,
        };

        match (&wallet, &api) {
            (Some(w), _) => info!("Trading wallet configured: {}", w.address()),
            (None, Some(_)) => info!("API credentials configured; wallet signing disabled"),
            (None, None) => {
                info!("No credentials configured; running in read-only mode");
            }
        }
        if let Some(api) = &api {
            debug!("API key loaded: {}...", key_preview(&api.api_key));
        }

        Ok(Self {
            state: RwLock::new(CredentialState { wallet, api }),
        })
    }

    /// Store with no credentials at all (read-only mode)
    pub fn unauthenticated() -> Self {
        Self {
            state: RwLock::new(CredentialState::default()),
        }
    }

    /// Whether wallet-signed order submission is possible
    pub fn trading_enabled(&self) -> bool {
        self.state.read().wallet.is_some()
    }

    /// Whether HMAC-authenticated API calls are possible
    pub fn api_auth_enabled(&self) -> bool {
        self.state.read().api.is_some()
    }

    /// Wallet signer, when configured
    pub(crate) fn wallet(&self) -> Option<PrivateKeySigner> {
        self.state.read().wallet.clone()
    }

    /// Checksummed wallet address, when configured
    pub fn wallet_address(&self) -> Option<String> {
        self.state
            .read()
            .wallet
            .as_ref()
            .map(|w| w.address().to_checksum(None))
    }

    /// Current API triple, when configured
    pub fn api_credentials(&self) -> Option<ApiCredentials> {
        self.state.read().api.clone()
    }

    /// Adopt a freshly created or derived API triple
    pub fn set_api_credentials(&self, credentials: ApiCredentials) {
        debug!(
            "Adopting API credentials: {}...",
            key_preview(&credentials.api_key)
        );
        self.state.write().api = Some(credentials);
    }

    /// Drop the API triple (after revoking the active key)
    pub fn clear_api_credentials(&self) {
        self.state.write().api = None;
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CredentialStore")
            .field("trading_enabled", &state.wallet.is_some())
            .field("api_auth_enabled", &state.api.is_some())
            .finish()
    }
}

/// First characters of a key id, safe to log. Char-based so ids with
/// multibyte characters never split a UTF-8 boundary.
pub(crate) fn key_preview(key: &str) -> String {
    key.chars().take(8).collect()
}

fn parse_private_key(private_key: &str) -> ClobResult<PrivateKeySigner> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let key_bytes = B256::from_str(key)
        .map_err(|e| ClobError::incomplete_credentials(format!("invalid private key: {}", e)))?;
    PrivateKeySigner::from_bytes(&key_bytes)
        .map_err(|e| ClobError::incomplete_credentials(format!("invalid private key: {}", e)))
}

// ============================================================================
// API Key Registry
// ============================================================================

/// Audit record for one API key
///
/// Created by key-creation calls, mutated only by revocation, never deleted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

/// Local audit trail of API keys seen by this process
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    records: RwLock<Vec<ApiKeyRecord>>,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created or derived key
    pub fn record_created(&self, key_id: impl Into<String>) {
        let key_id = key_id.into();
        let mut records = self.records.write();
        if records.iter().any(|r| r.key_id == key_id) {
            return;
        }
        records.push(ApiKeyRecord {
            key_id,
            created_at: Utc::now(),
            revoked: false,
        });
    }

    /// Flag a key as revoked; returns false when the key is unknown
    pub fn mark_revoked(&self, key_id: &str) -> bool {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.key_id == key_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// All records, revoked ones included
    pub fn records(&self) -> Vec<ApiKeyRecord> {
        self.records.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn full_triple() -> CandidateCredentials {
        CandidateCredentials {
            private_key: None,
            api_key: Some("key".into()),
            api_secret: Some("c2VjcmV0".into()),
            api_passphrase: Some("phrase".into()),
        }
    }

    #[test]
    fn empty_candidates_give_read_only_store() {
        let store = CredentialStore::configure(&CandidateCredentials::default()).unwrap();
        assert!(!store.trading_enabled());
        assert!(!store.api_auth_enabled());
    }

    #[test]
    fn full_triple_enables_api_auth() {
        let store = CredentialStore::configure(&full_triple()).unwrap();
        assert!(store.api_auth_enabled());
        assert!(!store.trading_enabled());
    }

    #[test]
    fn partial_triple_is_rejected() {
        let mut candidates = full_triple();
        candidates.api_secret = None;
        let err = CredentialStore::configure(&candidates).unwrap_err();
        assert!(matches!(err, ClobError::IncompleteCredentials(_)));
    }

    #[test]
    fn wallet_key_enables_trading() {
        let candidates = CandidateCredentials {
            private_key: Some(TEST_KEY.into()),
            ..Default::default()
        };
        let store = CredentialStore::configure(&candidates).unwrap();
        assert!(store.trading_enabled());
        assert!(!store.api_auth_enabled());
        assert_eq!(
            store.wallet_address().unwrap().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn garbage_private_key_is_rejected() {
        let candidates = CandidateCredentials {
            private_key: Some("not-a-key".into()),
            ..Default::default()
        };
        assert!(CredentialStore::configure(&candidates).is_err());
    }

    #[test]
    fn reconfiguring_api_credentials() {
        let store = CredentialStore::unauthenticated();
        assert!(!store.api_auth_enabled());
        store.set_api_credentials(ApiCredentials {
            api_key: "k".into(),
            secret: "s".into(),
            passphrase: "p".into(),
        });
        assert!(store.api_auth_enabled());
        store.clear_api_credentials();
        assert!(!store.api_auth_enabled());
    }

    #[test]
    fn key_preview_respects_char_boundaries() {
        assert_eq!(key_preview("0123456789abcdef"), "01234567");
        assert_eq!(key_preview("ab"), "ab");
        assert_eq!(key_preview(""), "");
        // Multibyte ids must not split a UTF-8 boundary
        assert_eq!(key_preview("ключ-аутентификации"), "ключ-аут");
        assert_eq!(key_preview("密密密密密密密密密"), "密密密密密密密密");
    }

    #[test]
    fn adopting_multibyte_key_id_does_not_panic() {
        let store = CredentialStore::unauthenticated();
        store.set_api_credentials(ApiCredentials {
            api_key: "ключ".into(),
            secret: "c2VjcmV0".into(),
            passphrase: "p".into(),
        });
        assert!(store.api_auth_enabled());
    }

    #[test]
    fn registry_keeps_revoked_records() {
        let registry = ApiKeyRegistry::new();
        registry.record_created("key-1");
        registry.record_created("key-2");
        registry.record_created("key-1"); // duplicate ignored

        assert!(registry.mark_revoked("key-1"));
        assert!(!registry.mark_revoked("key-3"));

        let records = registry.records();
        assert_eq!(records.len(), 2);
        let revoked = records.iter().find(|r| r.key_id == "key-1").unwrap();
        assert!(revoked.revoked);
        let live = records.iter().find(|r| r.key_id == "key-2").unwrap();
        assert!(!live.revoked);
    }
}
