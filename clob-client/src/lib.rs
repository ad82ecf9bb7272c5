//! Polymarket CLOB REST client
//!
//! Credentials, request/order signing, market-data queries, and order
//! management over the exchange's REST API. Realtime synchronization
//! lives in `clob-feed`; this crate supplies the snapshot and order
//! transport it builds on.

pub mod client;
pub mod credentials;
pub mod orders;
pub mod signer;
pub mod types;

pub use client::{ClobRestClient, RetryPolicy, DEFAULT_CLOB_API_URL};
pub use credentials::{
    ApiCredentials, ApiKeyRecord, ApiKeyRegistry, CandidateCredentials, CredentialStore,
};
pub use orders::{OrderManager, OrderUpdate, DEFAULT_RETENTION};
pub use signer::{RequestSigner, CTF_EXCHANGE_ADDRESS, NEG_RISK_CTF_EXCHANGE_ADDRESS, POLYGON_CHAIN_ID};
pub use types::{BookSnapshotResponse, OpenOrderResponse, OrderResponse, SignedOrder, WireOrder};
