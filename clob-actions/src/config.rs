//! Engine configuration
//!
//! Everything the engine needs to start, loadable from the environment with
//! the same variables the original deployment used. Missing credentials are
//! not an error here; they only disable the authenticated capabilities.

use std::time::Duration;

use clob_client::{CandidateCredentials, RetryPolicy, DEFAULT_CLOB_API_URL};
use clob_feed::{FeedConfig, DEFAULT_MARKET_WS_URL, DEFAULT_USER_WS_URL};

#[derive(Debug, Clone)]
pub struct ClobConfig {
    /// REST base URL
    pub api_url: String,
    /// Market-channel websocket URL
    pub market_ws_url: String,
    /// User-channel websocket URL
    pub user_ws_url: String,
    pub credentials: CandidateCredentials,
    pub retry: RetryPolicy,
    /// Feed keepalive cadence
    pub ping_interval: Duration,
    /// Feed inactivity limit before a forced reconnect
    pub heartbeat_timeout: Duration,
    /// Terminal orders are evicted after this long
    pub order_retention: Duration,
    /// An order's local state older than this is reconciled with the server
    pub order_freshness: Duration,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CLOB_API_URL.to_string(),
            market_ws_url: DEFAULT_MARKET_WS_URL.to_string(),
            user_ws_url: DEFAULT_USER_WS_URL.to_string(),
            credentials: CandidateCredentials::default(),
            retry: RetryPolicy::default(),
            ping_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            order_retention: clob_client::DEFAULT_RETENTION,
            order_freshness: Duration::from_secs(5),
        }
    }
}

impl ClobConfig {
    /// Load from the environment
    ///
    /// `CLOB_API_URL` and `CLOB_WS_URL` override the endpoints; credentials
    /// come from the `CLOB_API_*` triple and the wallet-key variable chain.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self {
            credentials: CandidateCredentials::from_env(),
            ..Self::default()
        };
        if let Ok(url) = std::env::var("CLOB_API_URL") {
            if !url.is_empty() {
                config.api_url = url.trim_end_matches('/').to_string();
            }
        }
        if let Ok(url) = std::env::var("CLOB_WS_URL") {
            if !url.is_empty() {
                let base = url.trim_end_matches('/').to_string();
                config.market_ws_url = format!("{}/ws/market", base);
                config.user_ws_url = format!("{}/ws/user", base);
            }
        }
        config
    }

    pub(crate) fn market_feed_config(&self) -> FeedConfig {
        FeedConfig {
            ws_url: self.market_ws_url.clone(),
            ping_interval: self.ping_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            ..FeedConfig::default()
        }
    }

    pub(crate) fn user_feed_config(&self) -> FeedConfig {
        FeedConfig {
            ws_url: self.user_ws_url.clone(),
            ping_interval: self.ping_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            ..FeedConfig::user_channel()
        }
    }
}
