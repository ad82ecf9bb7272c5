//! Engine wiring
//!
//! Owns every component and their startup order: credential store, REST
//! client, book store, order manager, and the lazily started feeds. The
//! facade in `actions.rs` dispatches onto this.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use clob_client::{ClobRestClient, CredentialStore, OrderManager};
use clob_core::{BookStore, ClobError, ClobResult, OrderBook};
use clob_feed::{FeedEvent, FeedState, MarketFeed};

use crate::config::ClobConfig;

pub struct ClobEngine {
    config: ClobConfig,
    credentials: Arc<CredentialStore>,
    rest: Arc<ClobRestClient>,
    books: Arc<BookStore>,
    orders: Arc<OrderManager>,
    market_feed: RwLock<Option<Arc<MarketFeed>>>,
    user_feed: RwLock<Option<Arc<MarketFeed>>>,
}

impl ClobEngine {
    /// Build the engine
    ///
    /// Credential problems downgrade to read-only mode instead of failing
    /// startup; read actions must work without any credentials.
    pub fn new(config: ClobConfig) -> ClobResult<Self> {
        let credentials = match CredentialStore::configure(&config.credentials) {
            Ok(store) => Arc::new(store),
            Err(e) if e.is_degraded_mode() => {
                warn!(%e, "credential configuration invalid, starting read-only");
                Arc::new(CredentialStore::unauthenticated())
            }
            Err(e) => return Err(e),
        };

        let rest = Arc::new(ClobRestClient::new(
            config.api_url.clone(),
            Arc::clone(&credentials),
            config.retry.clone(),
        )?);
        let orders = Arc::new(OrderManager::with_retention(
            Arc::clone(&rest),
            config.order_retention,
        ));

        info!(
            api_url = %config.api_url,
            trading = credentials.trading_enabled(),
            api_auth = credentials.api_auth_enabled(),
            "engine ready"
        );

        Ok(Self {
            config,
            credentials,
            rest,
            books: Arc::new(BookStore::new()),
            orders,
            market_feed: RwLock::new(None),
            user_feed: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ClobConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn rest(&self) -> &ClobRestClient {
        &self.rest
    }

    pub fn books(&self) -> &BookStore {
        &self.books
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// Subscribe the market feed to the given asset ids, starting it on
    /// first use
    pub async fn subscribe_market_feed(&self, asset_ids: Vec<String>) -> ClobResult<()> {
        let feed = self.ensure_market_feed();
        feed.subscribe(asset_ids).await
    }

    /// Start the authenticated user feed for the given markets
    pub async fn subscribe_user_feed(&self, condition_ids: Vec<String>) -> ClobResult<()> {
        if !self.credentials.api_auth_enabled() {
            return Err(ClobError::signing_unavailable(
                "user feed requires API credentials",
            ));
        }
        let feed = {
            let mut guard = self.user_feed.write();
            Arc::clone(guard.get_or_insert_with(|| {
                Arc::new(MarketFeed::start(
                    self.config.user_feed_config(),
                    Arc::clone(&self.books),
                    Arc::clone(&self.rest),
                    Some(Arc::clone(&self.orders)),
                ))
            }))
        };
        feed.subscribe(condition_ids).await
    }

    fn ensure_market_feed(&self) -> Arc<MarketFeed> {
        let mut guard = self.market_feed.write();
        Arc::clone(guard.get_or_insert_with(|| {
            Arc::new(MarketFeed::start(
                self.config.market_feed_config(),
                Arc::clone(&self.books),
                Arc::clone(&self.rest),
                Some(Arc::clone(&self.orders)),
            ))
        }))
    }

    /// Market-feed state, `Disconnected` when the feed was never started
    pub fn feed_state(&self) -> FeedState {
        self.market_feed
            .read()
            .as_ref()
            .map(|f| *f.state().borrow())
            .unwrap_or(FeedState::Disconnected)
    }

    /// Event stream of the market feed, if it is running
    pub fn feed_events(&self) -> Option<tokio::sync::broadcast::Receiver<FeedEvent>> {
        self.market_feed.read().as_ref().map(|f| f.events())
    }

    /// Close both feeds. Idempotent; stores stay inspectable afterwards.
    pub async fn shutdown(&self) -> ClobResult<()> {
        let feeds: Vec<Arc<MarketFeed>> = {
            let market = self.market_feed.read().clone();
            let user = self.user_feed.read().clone();
            market.into_iter().chain(user).collect()
        };
        for feed in feeds {
            feed.close().await?;
        }
        info!("engine shut down");
        Ok(())
    }

    // ========================================================================
    // Book access
    // ========================================================================

    /// Live book when the feed has one, otherwise a fresh REST snapshot
    /// (which also seeds the store)
    pub async fn book(&self, token_id: &str) -> ClobResult<Arc<OrderBook>> {
        if let Some(book) = self.books.snapshot(token_id) {
            return Ok(book);
        }
        let snapshot = self.rest.order_book(token_id).await?;
        self.books.apply_snapshot(
            token_id,
            &snapshot.bid_levels()?,
            &snapshot.ask_levels()?,
            snapshot.sequence(),
        )?;
        self.books
            .snapshot(token_id)
            .ok_or_else(|| ClobError::internal("book vanished after snapshot"))
    }
}

impl std::fmt::Debug for ClobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClobEngine")
            .field("api_url", &self.config.api_url)
            .field("trading_enabled", &self.credentials.trading_enabled())
            .field("api_auth_enabled", &self.credentials.api_auth_enabled())
            .field("feed_state", &self.feed_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clob_core::PriceLevel;
    use rust_decimal_macros::dec;

    fn read_only_engine() -> ClobEngine {
        ClobEngine::new(ClobConfig {
            api_url: "http://localhost:1".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn engine_starts_read_only_without_credentials() {
        let engine = read_only_engine();
        assert!(!engine.credentials().trading_enabled());
        assert!(!engine.credentials().api_auth_enabled());
        assert_eq!(engine.feed_state(), FeedState::Disconnected);
    }

    #[test]
    fn partial_triple_downgrades_instead_of_failing() {
        let mut config = ClobConfig::default();
        config.credentials.api_key = Some("key".into());
        // secret and passphrase missing
        let engine = ClobEngine::new(config).unwrap();
        assert!(!engine.credentials().api_auth_enabled());
    }

    #[tokio::test]
    async fn book_prefers_store_over_network() {
        let engine = read_only_engine();
        engine
            .books()
            .apply_snapshot(
                "asset",
                &[PriceLevel::new(dec!(0.40), dec!(100))],
                &[PriceLevel::new(dec!(0.42), dec!(50))],
                3,
            )
            .unwrap();

        // localhost:1 would fail; the store satisfies this without a request
        let book = engine.book("asset").await.unwrap();
        assert_eq!(book.midpoint(), Some(dec!(0.41)));
    }

    #[tokio::test]
    async fn user_feed_requires_api_credentials() {
        let engine = read_only_engine();
        let err = engine
            .subscribe_user_feed(vec!["0xcond".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ClobError::SigningUnavailable(_)));
    }

    #[tokio::test]
    async fn shutdown_without_feeds_is_fine() {
        let engine = read_only_engine();
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
    }
}
