//! CLOB REST client
//!
//! Market-data queries, API-key lifecycle, and the order-endpoint transport
//! used by the order manager. Each call returns data or a typed failure;
//! `Transport` and `RateLimited` failures are retried with capped
//! exponential backoff, everything else propagates immediately.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use clob_core::{
    ClobError, ClobResult, Market, MarketFilter, MarketsPage, PriceHistory, PriceInterval,
    TradeEvent,
};

use crate::credentials::{ApiCredentials, ApiKeyRegistry, CredentialStore};
use crate::signer::RequestSigner;
use crate::types::{
    ApiKeyResponse, ApiKeysResponse, BookParams, BookSnapshotResponse, ClobMarket,
    LastTradePriceResponse, OpenOrderResponse, OrderResponse, PaginatedResponse,
    PostOrderRequest, SignedOrder, TradeResponse, END_CURSOR,
};

/// Default CLOB REST endpoint
pub const DEFAULT_CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded retry for retryable failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying `attempt` (1-based), preferring the upstream's
    /// retry-after hint when it exists
    fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        hint.unwrap_or(backoff).min(self.max_delay)
    }
}

/// REST client for the CLOB API
pub struct ClobRestClient {
    http: reqwest::Client,
    base_url: String,
    signer: Arc<RequestSigner>,
    credentials: Arc<CredentialStore>,
    key_registry: ApiKeyRegistry,
    retry: RetryPolicy,
}

impl ClobRestClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        retry: RetryPolicy,
    ) -> ClobResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("clob-engine/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClobError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: Arc::new(RequestSigner::new(Arc::clone(&credentials))),
            credentials,
            key_registry: ApiKeyRegistry::new(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn signer(&self) -> Arc<RequestSigner> {
        Arc::clone(&self.signer)
    }

    pub fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.credentials)
    }

    pub fn key_registry(&self) -> &ApiKeyRegistry {
        &self.key_registry
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Send a request, retrying `Transport`/`RateLimited` failures with
    /// capped exponential backoff up to the policy's attempt ceiling
    ///
    /// The builder runs once per attempt so time-sensitive parts of the
    /// request (L2 signature timestamps) stay fresh across backoff sleeps.
    async fn send_with_retry<F>(&self, build: F) -> ClobResult<Response>
    where
        F: Fn() -> ClobResult<reqwest::RequestBuilder>,
    {
        let mut attempt = 1u32;
        loop {
            let outcome: ClobResult<Response> = match build()?.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    Err(classify_status(response).await)
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    Err(ClobError::transport(e.to_string()))
                }
                Err(e) => Err(ClobError::internal(e.to_string())),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt, err.retry_after());
                    warn!(attempt, ?delay, %err, "retryable request failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
                Ok(_) => unreachable!("success returns early"),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> ClobResult<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self.send_with_retry(|| Ok(self.http.get(&url))).await?;
        decode_json(response).await
    }

    async fn get_json_l2<T: DeserializeOwned>(&self, path: &str) -> ClobResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send_with_retry(|| {
                let headers = self.signer.l2_headers("GET", path, "")?;
                Ok(self.http.get(&url).headers(headers))
            })
            .await?;
        decode_json(response).await
    }

    // ========================================================================
    // Market data
    // ========================================================================

    /// One page of markets, optionally filtered by status/category
    #[instrument(skip(self))]
    pub async fn list_markets(&self, filter: &MarketFilter) -> ClobResult<MarketsPage> {
        let cursor = filter.cursor.as_deref().unwrap_or("");
        let path = if cursor.is_empty() {
            "/markets".to_string()
        } else {
            format!("/markets?next_cursor={}", cursor)
        };

        let page: PaginatedResponse<ClobMarket> = self.get_json(&path).await?;
        let next_cursor = page
            .next_cursor
            .filter(|c| !c.is_empty() && c != END_CURSOR);

        let mut markets = Vec::with_capacity(page.data.len());
        for raw in page.data {
            let market = raw.into_market()?;
            if let Some(status) = filter.status {
                if market.status != status {
                    continue;
                }
            }
            if let Some(category) = &filter.category {
                if market.category.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            markets.push(market);
        }
        if let Some(limit) = filter.limit {
            markets.truncate(limit as usize);
        }

        debug!(count = markets.len(), "fetched markets page");
        Ok(MarketsPage {
            markets,
            next_cursor,
        })
    }

    /// Markets eligible for liquidity-reward sampling
    #[instrument(skip(self))]
    pub async fn list_sampling_markets(&self, cursor: Option<&str>) -> ClobResult<MarketsPage> {
        self.list_from_endpoint("/sampling-markets", cursor).await
    }

    /// Reduced market schema, cheaper to page through
    #[instrument(skip(self))]
    pub async fn list_simplified_markets(&self, cursor: Option<&str>) -> ClobResult<MarketsPage> {
        self.list_from_endpoint("/simplified-markets", cursor).await
    }

    async fn list_from_endpoint(
        &self,
        endpoint: &str,
        cursor: Option<&str>,
    ) -> ClobResult<MarketsPage> {
        let path = match cursor {
            Some(c) if !c.is_empty() => format!("{}?next_cursor={}", endpoint, c),
            _ => endpoint.to_string(),
        };
        let page: PaginatedResponse<ClobMarket> = self.get_json(&path).await?;
        let next_cursor = page
            .next_cursor
            .filter(|c| !c.is_empty() && c != END_CURSOR);
        let markets = page
            .data
            .into_iter()
            .map(|m| m.into_market())
            .collect::<ClobResult<Vec<Market>>>()?;
        Ok(MarketsPage {
            markets,
            next_cursor,
        })
    }

    /// Details for one market by condition id
    #[instrument(skip(self))]
    pub async fn get_market(&self, condition_id: &str) -> ClobResult<Market> {
        let raw: ClobMarket = self
            .get_json(&format!("/markets/{}", condition_id))
            .await?;
        raw.into_market()
    }

    /// Price series for one outcome token
    #[instrument(skip(self))]
    pub async fn price_history(
        &self,
        token_id: &str,
        interval: PriceInterval,
    ) -> ClobResult<PriceHistory> {
        let path = format!(
            "/prices-history?market={}&interval={}&fidelity={}",
            token_id,
            interval.as_str(),
            interval.fidelity_minutes()
        );
        let response: crate::types::PriceHistoryResponse = self.get_json(&path).await?;
        Ok(response.into_history(token_id, interval))
    }

    /// Order-book snapshot for one asset
    #[instrument(skip(self))]
    pub async fn order_book(&self, token_id: &str) -> ClobResult<BookSnapshotResponse> {
        self.get_json(&format!("/book?token_id={}", token_id)).await
    }

    /// Order-book snapshots for several assets in one call
    #[instrument(skip(self))]
    pub async fn order_books(
        &self,
        token_ids: &[String],
    ) -> ClobResult<Vec<BookSnapshotResponse>> {
        let params: Vec<BookParams> = token_ids
            .iter()
            .map(|id| BookParams {
                token_id: id.clone(),
            })
            .collect();
        let body = serde_json::to_string(&params)
            .map_err(|e| ClobError::internal(format!("failed to encode body: {}", e)))?;

        let url = format!("{}/books", self.base_url);
        let response = self
            .send_with_retry(|| {
                Ok(self
                    .http
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body.clone()))
            })
            .await?;
        decode_json(response).await
    }

    /// Last traded price for one asset
    #[instrument(skip(self))]
    pub async fn last_trade_price(
        &self,
        token_id: &str,
    ) -> ClobResult<rust_decimal::Decimal> {
        let response: LastTradePriceResponse = self
            .get_json(&format!("/last-trade-price?token_id={}", token_id))
            .await?;
        response
            .price
            .parse()
            .map_err(|e| ClobError::malformed(format!("bad last trade price: {}", e)))
    }

    /// The authenticated account's trade history
    #[instrument(skip(self))]
    pub async fn trade_history(&self, market: Option<&str>) -> ClobResult<Vec<TradeEvent>> {
        let path = match market {
            Some(m) => format!("/data/trades?market={}", m),
            None => "/data/trades".to_string(),
        };
        let page: PaginatedResponse<TradeResponse> = self.get_json_l2(&path).await?;
        page.data
            .into_iter()
            .map(|t| t.into_trade_event())
            .collect()
    }

    // ========================================================================
    // API key lifecycle (L1/L2 authenticated)
    // ========================================================================

    /// Create a fresh API triple via L1 auth and adopt it
    #[instrument(skip(self))]
    pub async fn create_api_key(&self) -> ClobResult<ApiCredentials> {
        let headers = self.signer.l1_headers().await?;
        let url = format!("{}/auth/api-key", self.base_url);
        let response = self
            .send_with_retry(|| Ok(self.http.post(&url).headers(headers.clone())))
            .await?;
        let created: ApiKeyResponse = decode_json(response).await?;
        self.adopt_key(created)
    }

    /// Derive the existing API triple for this wallet, creating one when
    /// none exists yet
    #[instrument(skip(self))]
    pub async fn derive_api_key(&self) -> ClobResult<ApiCredentials> {
        let headers = self.signer.l1_headers().await?;
        let url = format!("{}/auth/derive-api-key", self.base_url);

        let result = self
            .send_with_retry(|| Ok(self.http.get(&url).headers(headers.clone())))
            .await;

        match result {
            Ok(response) => {
                let derived: ApiKeyResponse = decode_json(response).await?;
                self.adopt_key(derived)
            }
            Err(ClobError::NotFound(_)) | Err(ClobError::Rejected(_)) => {
                info!("No existing API key to derive, creating a new one");
                self.create_api_key().await
            }
            Err(e) => Err(e),
        }
    }

    fn adopt_key(&self, response: ApiKeyResponse) -> ClobResult<ApiCredentials> {
        let credentials = ApiCredentials {
            api_key: response.api_key,
            secret: response.secret,
            passphrase: response.passphrase,
        };
        self.key_registry.record_created(&credentials.api_key);
        self.credentials.set_api_credentials(credentials.clone());
        info!(
            "API key ready: {}...",
            crate::credentials::key_preview(&credentials.api_key)
        );
        Ok(credentials)
    }

    /// Revoke an API key; the record stays in the registry flagged revoked
    #[instrument(skip(self))]
    pub async fn revoke_api_key(&self, key_id: &str) -> ClobResult<()> {
        let path = "/auth/api-key";
        let url = format!("{}{}", self.base_url, path);
        self.send_with_retry(|| {
            let headers = self.signer.l2_headers("DELETE", path, "")?;
            Ok(self.http.delete(&url).headers(headers))
        })
        .await?;

        self.key_registry.record_created(key_id);
        self.key_registry.mark_revoked(key_id);
        if self
            .credentials
            .api_credentials()
            .is_some_and(|c| c.api_key == key_id)
        {
            self.credentials.clear_api_credentials();
        }
        info!(
            "API key revoked: {}...",
            crate::credentials::key_preview(key_id)
        );
        Ok(())
    }

    /// Key ids known to the exchange for this account, merged into the
    /// local registry
    #[instrument(skip(self))]
    pub async fn list_api_keys(&self) -> ClobResult<Vec<String>> {
        let response: ApiKeysResponse = self.get_json_l2("/auth/api-keys").await?;
        for key in &response.api_keys {
            self.key_registry.record_created(key);
        }
        Ok(response.api_keys)
    }

    // ========================================================================
    // Order endpoints (transport for the order manager)
    // ========================================================================

    /// Submit a signed order. Not retried: the manager owns idempotency.
    pub async fn post_order(
        &self,
        signed_order: SignedOrder,
        order_type: &str,
    ) -> ClobResult<OrderResponse> {
        let api = self.credentials.api_credentials().ok_or_else(|| {
            ClobError::signing_unavailable("API credentials required for order submission")
        })?;

        let path = "/order";
        let request = PostOrderRequest {
            order: signed_order,
            owner: api.api_key,
            order_type: order_type.to_string(),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| ClobError::internal(format!("failed to encode order: {}", e)))?;
        let headers = self.signer.l2_headers("POST", path, &body)?;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ClobError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        decode_json(response).await
    }

    /// Cancel one order by exchange id
    pub async fn cancel_order(&self, order_id: &str) -> ClobResult<()> {
        let path = "/order";
        let body = serde_json::json!({ "orderID": order_id }).to_string();

        let url = format!("{}{}", self.base_url, path);
        self.send_with_retry(|| {
            let headers = self.signer.l2_headers("DELETE", path, &body)?;
            Ok(self
                .http
                .delete(&url)
                .headers(headers)
                .header("Content-Type", "application/json")
                .body(body.clone()))
        })
        .await?;
        Ok(())
    }

    /// Server-side view of one order
    pub async fn get_order(&self, order_id: &str) -> ClobResult<OpenOrderResponse> {
        self.get_json_l2(&format!("/data/order/{}", order_id)).await
    }

    /// All open orders for the authenticated account
    pub async fn get_open_orders(&self) -> ClobResult<Vec<OpenOrderResponse>> {
        let page: PaginatedResponse<OpenOrderResponse> = self.get_json_l2("/data/orders").await?;
        Ok(page.data)
    }

    /// Whether each order currently counts toward liquidity scoring
    pub async fn check_order_scoring(
        &self,
        order_ids: &[String],
    ) -> ClobResult<std::collections::HashMap<String, bool>> {
        let body = serde_json::to_string(&serde_json::json!({ "orderIds": order_ids }))
            .map_err(|e| ClobError::internal(format!("failed to encode body: {}", e)))?;
        let path = "/orders-scoring";
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send_with_retry(|| {
                let headers = self.signer.l2_headers("POST", path, &body)?;
                Ok(self
                    .http
                    .post(&url)
                    .headers(headers)
                    .header("Content-Type", "application/json")
                    .body(body.clone()))
            })
            .await?;
        decode_json(response).await
    }
}

impl std::fmt::Debug for ClobRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClobRestClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

// ============================================================================
// Response classification
// ============================================================================

/// Map a non-success HTTP response onto the error taxonomy
async fn classify_status(response: Response) -> ClobError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => ClobError::not_found(body_or(&body, "resource not found")),
        StatusCode::TOO_MANY_REQUESTS => ClobError::rate_limited(retry_after),
        s if s.is_server_error() => {
            ClobError::transport(format!("server error {}: {}", s, body))
        }
        s => ClobError::rejected(format!("{}: {}", s, body_or(&body, "request rejected"))),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn body_or<'a>(body: &'a str, fallback: &'a str) -> &'a str {
    if body.is_empty() {
        fallback
    } else {
        body
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> ClobResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| ClobError::transport(format!("failed to read body: {}", e)))?;
    serde_json::from_str(&body)
        .map_err(|e| ClobError::malformed(format!("schema mismatch: {}", e)))
}
