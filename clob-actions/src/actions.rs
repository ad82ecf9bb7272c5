//! Action facade
//!
//! The closed set of operations a host can invoke, dispatched onto the
//! engine. Every request completes with an `ActionResponse`: domain
//! failures render as text plus an `error` value, degraded-mode failures
//! as feature-unavailable messages. No panic crosses this boundary.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use clob_core::{
    BookSide, ClobError, ClobResult, MarketFilter, MarketsPage, OrderSpec, PriceInterval,
};

use crate::engine::ClobEngine;
use crate::response::ActionResponse;

fn default_depth() -> usize {
    10
}

/// Every operation the facade can perform
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ActionRequest {
    RetrieveAllMarkets {
        #[serde(default)]
        filter: MarketFilter,
    },
    GetSimplifiedMarkets {
        #[serde(default)]
        cursor: Option<String>,
    },
    GetSamplingMarkets {
        #[serde(default)]
        cursor: Option<String>,
    },
    GetClobMarkets {
        #[serde(default)]
        cursor: Option<String>,
    },
    GetOpenMarkets {
        #[serde(default)]
        cursor: Option<String>,
    },
    GetMarketDetails {
        condition_id: String,
    },
    GetPriceHistory {
        token_id: String,
        #[serde(default)]
        interval: PriceInterval,
    },
    GetOrderBookSummary {
        token_id: String,
        #[serde(default = "default_depth")]
        depth: usize,
    },
    GetOrderBookDepth {
        token_id: String,
        side: BookSide,
        #[serde(default)]
        price: Option<Decimal>,
        #[serde(default)]
        size: Option<Decimal>,
    },
    GetBestPrice {
        token_id: String,
        side: BookSide,
    },
    GetMidpointPrice {
        token_id: String,
    },
    GetSpread {
        token_id: String,
    },
    PlaceOrder {
        #[serde(flatten)]
        spec: OrderSpec,
    },
    CancelOrder {
        order_id: String,
    },
    CancelAllOrders,
    GetOrderDetails {
        order_id: String,
    },
    CheckOrderScoring {
        order_ids: Vec<String>,
    },
    GetActiveOrders,
    GetTradeHistory {
        #[serde(default)]
        market: Option<String>,
    },
    CreateApiKey,
    RevokeApiKey {
        key_id: String,
    },
    GetAllApiKeys,
    GetAccountAccessStatus,
    HandleAuthentication,
    SetupWebsocket {
        asset_ids: Vec<String>,
    },
    HandleRealtimeUpdates,
}

impl ActionRequest {
    /// Action name, used for error rendering
    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::RetrieveAllMarkets { .. } => "retrieveAllMarkets",
            ActionRequest::GetSimplifiedMarkets { .. } => "getSimplifiedMarkets",
            ActionRequest::GetSamplingMarkets { .. } => "getSamplingMarkets",
            ActionRequest::GetClobMarkets { .. } => "getClobMarkets",
            ActionRequest::GetOpenMarkets { .. } => "getOpenMarkets",
            ActionRequest::GetMarketDetails { .. } => "getMarketDetails",
            ActionRequest::GetPriceHistory { .. } => "getPriceHistory",
            ActionRequest::GetOrderBookSummary { .. } => "getOrderBookSummary",
            ActionRequest::GetOrderBookDepth { .. } => "getOrderBookDepth",
            ActionRequest::GetBestPrice { .. } => "getBestPrice",
            ActionRequest::GetMidpointPrice { .. } => "getMidpointPrice",
            ActionRequest::GetSpread { .. } => "getSpread",
            ActionRequest::PlaceOrder { .. } => "placeOrder",
            ActionRequest::CancelOrder { .. } => "cancelOrder",
            ActionRequest::CancelAllOrders => "cancelAllOrders",
            ActionRequest::GetOrderDetails { .. } => "getOrderDetails",
            ActionRequest::CheckOrderScoring { .. } => "checkOrderScoring",
            ActionRequest::GetActiveOrders => "getActiveOrders",
            ActionRequest::GetTradeHistory { .. } => "getTradeHistory",
            ActionRequest::CreateApiKey => "createApiKey",
            ActionRequest::RevokeApiKey { .. } => "revokeApiKey",
            ActionRequest::GetAllApiKeys => "getAllApiKeys",
            ActionRequest::GetAccountAccessStatus => "getAccountAccessStatus",
            ActionRequest::HandleAuthentication => "handleAuthentication",
            ActionRequest::SetupWebsocket { .. } => "setupWebsocket",
            ActionRequest::HandleRealtimeUpdates => "handleRealtimeUpdates",
        }
    }
}

/// Run one action to completion
#[instrument(skip(engine, request), fields(action = request.name()))]
pub async fn dispatch(engine: &ClobEngine, request: ActionRequest) -> ActionResponse {
    let name = request.name();
    match run(engine, request).await {
        Ok(response) => response,
        Err(e) => ActionResponse::from_error(name, &e),
    }
}

async fn run(engine: &ClobEngine, request: ActionRequest) -> ClobResult<ActionResponse> {
    match request {
        // --------------------------------------------------------------------
        // Market data
        // --------------------------------------------------------------------
        ActionRequest::RetrieveAllMarkets { filter } => {
            let page = engine.rest().list_markets(&filter).await?;
            Ok(markets_response("Retrieved", page))
        }
        ActionRequest::GetSimplifiedMarkets { cursor } => {
            let page = engine
                .rest()
                .list_simplified_markets(cursor.as_deref())
                .await?;
            Ok(markets_response("Retrieved simplified:", page))
        }
        ActionRequest::GetSamplingMarkets { cursor } => {
            let page = engine
                .rest()
                .list_sampling_markets(cursor.as_deref())
                .await?;
            Ok(markets_response("Retrieved sampling:", page))
        }
        ActionRequest::GetClobMarkets { cursor } => {
            let filter = MarketFilter {
                cursor,
                ..Default::default()
            };
            let page = engine.rest().list_markets(&filter).await?;
            Ok(markets_response("Retrieved CLOB", page))
        }
        ActionRequest::GetOpenMarkets { cursor } => {
            let filter = MarketFilter {
                cursor,
                ..MarketFilter::open()
            };
            let page = engine.rest().list_markets(&filter).await?;
            Ok(markets_response("Retrieved open", page))
        }
        ActionRequest::GetMarketDetails { condition_id } => {
            let market = engine.rest().get_market(&condition_id).await?;
            let outcomes: Vec<&str> = market.tokens.iter().map(|t| t.outcome.as_str()).collect();
            Ok(ActionResponse::ok(format!(
                "{} [{:?}], outcomes: {}",
                market.question,
                market.status,
                outcomes.join(" / ")
            ))
            .value("condition_id", json!(market.condition_id))
            .value("tradeable", json!(market.is_tradeable()))
            .data("market", serde_json::to_value(&market).unwrap_or(Value::Null)))
        }
        ActionRequest::GetPriceHistory { token_id, interval } => {
            let history = engine.rest().price_history(&token_id, interval).await?;
            let latest = history.latest().map(|p| p.price);
            let change = history.price_change();
            let text = match (latest, change) {
                (Some(latest), Some(change)) => format!(
                    "Price history for {}: {} points, latest {}, change {}",
                    token_id,
                    history.points.len(),
                    latest,
                    change
                ),
                _ => format!("No price history for {}", token_id),
            };
            Ok(ActionResponse::ok(text)
                .value("points", json!(history.points.len()))
                .value("latest", json!(latest))
                .data("history", serde_json::to_value(&history).unwrap_or(Value::Null)))
        }
        ActionRequest::GetOrderBookSummary { token_id, depth } => {
            let book = engine.book(&token_id).await?;
            let summary = book.summary(depth);
            Ok(ActionResponse::ok(format!(
                "Book for {}: best bid {:?}, best ask {:?} (seq {})",
                token_id,
                book.best_bid(),
                book.best_ask(),
                book.seq
            ))
            .value("seq", json!(book.seq))
            .data("book", serde_json::to_value(&summary).unwrap_or(Value::Null)))
        }
        ActionRequest::GetOrderBookDepth {
            token_id,
            side,
            price,
            size,
        } => {
            let book = engine.book(&token_id).await?;
            match (price, size) {
                (Some(price), _) => {
                    let depth = book.depth_at_price(side, price);
                    Ok(ActionResponse::ok(format!(
                        "Depth at {} and better on {:?}: {}",
                        price, side, depth
                    ))
                    .value("depth", json!(depth)))
                }
                (None, Some(size)) => match book.depth_for_size(side, size) {
                    Some(price) => Ok(ActionResponse::ok(format!(
                        "Filling {} on {:?} reaches price {}",
                        size, side, price
                    ))
                    .value("price", json!(price))),
                    None => Ok(ActionResponse::ok(format!(
                        "Not enough liquidity on {:?} to fill {}",
                        side, size
                    ))
                    .value("liquidity", json!(false))),
                },
                (None, None) => Err(ClobError::invalid_order(
                    "depth query needs a price or a size",
                )),
            }
        }
        ActionRequest::GetBestPrice { token_id, side } => {
            let book = engine.book(&token_id).await?;
            let best = match side {
                BookSide::Bid => book.best_bid(),
                BookSide::Ask => book.best_ask(),
            };
            Ok(price_response(&token_id, &format!("best {:?}", side), best))
        }
        ActionRequest::GetMidpointPrice { token_id } => {
            let book = engine.book(&token_id).await?;
            Ok(price_response(&token_id, "midpoint", book.midpoint()))
        }
        ActionRequest::GetSpread { token_id } => {
            let book = engine.book(&token_id).await?;
            Ok(price_response(&token_id, "spread", book.spread()))
        }

        // --------------------------------------------------------------------
        // Trading
        // --------------------------------------------------------------------
        ActionRequest::PlaceOrder { spec } => {
            // Fail before any network traffic when signing is impossible
            if !engine.credentials().trading_enabled() {
                return Err(ClobError::signing_unavailable(
                    "wallet key required to place orders",
                ));
            }
            let market = engine.rest().get_market(&spec.condition_id).await?;
            let order = engine.orders().submit_order(&spec, &market).await?;
            Ok(ActionResponse::ok(format!(
                "Order {} {} {} @ {}: {:?}",
                spec.side.as_str(),
                spec.size,
                spec.token_id,
                spec.price,
                order.status
            ))
            .value("order_id", json!(order.order_id))
            .value("status", json!(order.status))
            .data("order", serde_json::to_value(&order).unwrap_or(Value::Null)))
        }
        ActionRequest::CancelOrder { order_id } => {
            let order = engine.orders().cancel_order(&order_id).await?;
            Ok(ActionResponse::ok(format!(
                "Order {} is {:?}",
                order_id, order.status
            ))
            .value("status", json!(order.status)))
        }
        ActionRequest::CancelAllOrders => {
            let cancelled = engine.orders().cancel_all().await?;
            Ok(
                ActionResponse::ok(format!("Cancelled {} orders", cancelled.len()))
                    .value("count", json!(cancelled.len()))
                    .data("order_ids", json!(cancelled)),
            )
        }
        ActionRequest::GetOrderDetails { order_id } => {
            let order = engine
                .orders()
                .order_status(&order_id, engine.config().order_freshness)
                .await?;
            Ok(ActionResponse::ok(format!(
                "Order {}: {:?}, filled {}/{}",
                order_id, order.status, order.filled_size, order.size
            ))
            .value("status", json!(order.status))
            .data("order", serde_json::to_value(&order).unwrap_or(Value::Null)))
        }
        ActionRequest::CheckOrderScoring { order_ids } => {
            let scoring = engine.orders().check_order_scoring(&order_ids).await?;
            let scoring_count = scoring.values().filter(|v| **v).count();
            Ok(ActionResponse::ok(format!(
                "{} of {} orders are scoring",
                scoring_count,
                order_ids.len()
            ))
            .value("scoring", json!(scoring_count))
            .data("orders", serde_json::to_value(&scoring).unwrap_or(Value::Null)))
        }
        ActionRequest::GetActiveOrders => {
            let orders = engine.orders().list_active_orders().await?;
            Ok(
                ActionResponse::ok(format!("{} active orders", orders.len()))
                    .value("count", json!(orders.len()))
                    .data("orders", serde_json::to_value(&orders).unwrap_or(Value::Null)),
            )
        }
        ActionRequest::GetTradeHistory { market } => {
            let trades = engine.rest().trade_history(market.as_deref()).await?;
            Ok(ActionResponse::ok(format!("{} trades", trades.len()))
                .value("count", json!(trades.len()))
                .data("trades", serde_json::to_value(&trades).unwrap_or(Value::Null)))
        }

        // --------------------------------------------------------------------
        // Auth & keys: responses carry key ids only, secrets never leave the engine
        // --------------------------------------------------------------------
        ActionRequest::CreateApiKey => {
            let credentials = engine.rest().create_api_key().await?;
            Ok(ActionResponse::ok(format!(
                "API key created: {}...",
                truncate_key(&credentials.api_key)
            ))
            .value("key_id", json!(credentials.api_key)))
        }
        ActionRequest::RevokeApiKey { key_id } => {
            engine.rest().revoke_api_key(&key_id).await?;
            Ok(
                ActionResponse::ok(format!("API key revoked: {}...", truncate_key(&key_id)))
                    .value("key_id", json!(key_id)),
            )
        }
        ActionRequest::GetAllApiKeys => {
            let keys = engine.rest().list_api_keys().await?;
            let records = engine.rest().key_registry().records();
            Ok(ActionResponse::ok(format!("{} API keys", keys.len()))
                .value("count", json!(keys.len()))
                .data("key_ids", json!(keys))
                .data("registry", serde_json::to_value(&records).unwrap_or(Value::Null)))
        }
        ActionRequest::GetAccountAccessStatus => {
            let trading = engine.credentials().trading_enabled();
            let api_auth = engine.credentials().api_auth_enabled();
            let address = engine.credentials().wallet_address();
            let text = match (trading, api_auth) {
                (true, true) => "Full access: wallet signing and API auth available".to_string(),
                (true, false) => "Wallet signing available; API auth not configured".to_string(),
                (false, true) => "API auth available; wallet signing not configured".to_string(),
                (false, false) => "Read-only: no credentials configured".to_string(),
            };
            Ok(ActionResponse::ok(text)
                .value("trading_enabled", json!(trading))
                .value("api_auth_enabled", json!(api_auth))
                .value("wallet_address", json!(address)))
        }
        ActionRequest::HandleAuthentication => {
            let credentials = engine.rest().derive_api_key().await?;
            Ok(ActionResponse::ok(format!(
                "Authenticated; API key {}... active",
                truncate_key(&credentials.api_key)
            ))
            .value("key_id", json!(credentials.api_key)))
        }

        // --------------------------------------------------------------------
        // Realtime
        // --------------------------------------------------------------------
        ActionRequest::SetupWebsocket { asset_ids } => {
            let count = asset_ids.len();
            engine.subscribe_market_feed(asset_ids).await?;
            Ok(
                ActionResponse::ok(format!("Subscribed to {} assets", count))
                    .value("subscribed", json!(count)),
            )
        }
        ActionRequest::HandleRealtimeUpdates => {
            let state = engine.feed_state();
            let assets = engine.books().assets();
            let books: Vec<Value> = assets
                .iter()
                .filter_map(|a| engine.books().snapshot(a))
                .map(|b| {
                    json!({
                        "asset_id": b.asset_id,
                        "seq": b.seq,
                        "best_bid": b.best_bid(),
                        "best_ask": b.best_ask(),
                    })
                })
                .collect();
            Ok(ActionResponse::ok(format!(
                "Feed {:?}, {} books tracked",
                state,
                books.len()
            ))
            .value("state", json!(format!("{:?}", state)))
            .value("books", json!(books.len()))
            .data("books", Value::Array(books)))
        }
    }
}

fn markets_response(verb: &str, page: MarketsPage) -> ActionResponse {
    ActionResponse::ok(format!("{} {} markets", verb, page.markets.len()))
        .value("count", json!(page.markets.len()))
        .value("next_cursor", json!(page.next_cursor))
        .data(
            "markets",
            serde_json::to_value(&page.markets).unwrap_or(Value::Null),
        )
}

fn price_response(token_id: &str, label: &str, value: Option<Decimal>) -> ActionResponse {
    match value {
        Some(price) => ActionResponse::ok(format!("{} for {}: {}", label, token_id, price))
            .value("price", json!(price))
            .value("liquidity", json!(true)),
        None => ActionResponse::ok(format!(
            "No liquidity to derive {} for {}",
            label, token_id
        ))
        .value("liquidity", json!(false)),
    }
}

// Char-based so multibyte key ids never split a UTF-8 boundary
fn truncate_key(key: &str) -> String {
    key.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClobConfig;
    use clob_core::PriceLevel;
    use rust_decimal_macros::dec;

    fn engine_with_book() -> ClobEngine {
        let engine = ClobEngine::new(ClobConfig {
            api_url: "http://localhost:1".into(),
            ..Default::default()
        })
        .unwrap();
        engine
            .books()
            .apply_snapshot(
                "111",
                &[
                    PriceLevel::new(dec!(0.40), dec!(100)),
                    PriceLevel::new(dec!(0.39), dec!(50)),
                ],
                &[PriceLevel::new(dec!(0.42), dec!(50))],
                5,
            )
            .unwrap();
        engine
    }

    #[test]
    fn truncate_key_handles_multibyte_ids() {
        assert_eq!(truncate_key("0123456789abcdef"), "01234567");
        assert_eq!(truncate_key("ab"), "ab");
        assert_eq!(truncate_key("ключ-аутентификации"), "ключ-аут");
    }

    #[tokio::test]
    async fn best_price_midpoint_spread_from_live_book() {
        let engine = engine_with_book();

        let response = dispatch(
            &engine,
            ActionRequest::GetBestPrice {
                token_id: "111".into(),
                side: BookSide::Bid,
            },
        )
        .await;
        assert_eq!(response.values["price"], json!(dec!(0.40)));

        let response =
            dispatch(&engine, ActionRequest::GetMidpointPrice { token_id: "111".into() }).await;
        assert_eq!(response.values["price"], json!(dec!(0.41)));

        let response =
            dispatch(&engine, ActionRequest::GetSpread { token_id: "111".into() }).await;
        assert_eq!(response.values["price"], json!(dec!(0.02)));
    }

    #[tokio::test]
    async fn depth_queries_both_modes() {
        let engine = engine_with_book();

        let response = dispatch(
            &engine,
            ActionRequest::GetOrderBookDepth {
                token_id: "111".into(),
                side: BookSide::Bid,
                price: Some(dec!(0.39)),
                size: None,
            },
        )
        .await;
        assert_eq!(response.values["depth"], json!(dec!(150)));

        let response = dispatch(
            &engine,
            ActionRequest::GetOrderBookDepth {
                token_id: "111".into(),
                side: BookSide::Ask,
                price: None,
                size: Some(dec!(40)),
            },
        )
        .await;
        assert_eq!(response.values["price"], json!(dec!(0.42)));

        // Neither parameter: typed failure rendered, no panic
        let response = dispatch(
            &engine,
            ActionRequest::GetOrderBookDepth {
                token_id: "111".into(),
                side: BookSide::Ask,
                price: None,
                size: None,
            },
        )
        .await;
        assert_eq!(response.values["success"], json!(false));
    }

    #[tokio::test]
    async fn book_summary_renders_top_levels() {
        let engine = engine_with_book();
        let response = dispatch(
            &engine,
            ActionRequest::GetOrderBookSummary {
                token_id: "111".into(),
                depth: 1,
            },
        )
        .await;
        assert_eq!(response.values["seq"], json!(5));
        assert_eq!(response.data["book"]["bids"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn place_order_without_wallet_degrades_without_network() {
        let engine = engine_with_book();
        let response = dispatch(
            &engine,
            ActionRequest::PlaceOrder {
                spec: OrderSpec {
                    condition_id: "0xcond".into(),
                    token_id: "111".into(),
                    side: clob_core::OrderSide::Buy,
                    price: dec!(0.40),
                    size: dec!(10),
                    order_type: clob_core::OrderType::Gtc,
                    expiration: None,
                },
            },
        )
        .await;
        assert_eq!(response.values["degraded"], json!(true));
        assert!(engine.orders().tracked_orders().is_empty());
    }

    #[tokio::test]
    async fn account_access_status_reports_read_only() {
        let engine = engine_with_book();
        let response = dispatch(&engine, ActionRequest::GetAccountAccessStatus).await;
        assert_eq!(response.values["trading_enabled"], json!(false));
        assert_eq!(response.values["api_auth_enabled"], json!(false));
        assert!(response.text.contains("Read-only"));
    }

    #[tokio::test]
    async fn create_api_key_without_wallet_degrades() {
        let engine = engine_with_book();
        let response = dispatch(&engine, ActionRequest::CreateApiKey).await;
        assert_eq!(response.values["degraded"], json!(true));
    }

    #[tokio::test]
    async fn realtime_status_without_feed() {
        let engine = engine_with_book();
        let response = dispatch(&engine, ActionRequest::HandleRealtimeUpdates).await;
        assert_eq!(response.values["state"], json!("Disconnected"));
        assert_eq!(response.values["books"], json!(1));
    }

    #[test]
    fn requests_deserialize_from_tagged_json() {
        let request: ActionRequest = serde_json::from_str(
            r#"{"action":"getBestPrice","token_id":"111","side":"bid"}"#,
        )
        .unwrap();
        assert!(matches!(request, ActionRequest::GetBestPrice { .. }));

        let request: ActionRequest = serde_json::from_str(
            r#"{"action":"placeOrder","condition_id":"0xc","token_id":"1",
                "side":"BUY","price":"0.5","size":"10","order_type":"GTC"}"#,
        )
        .unwrap();
        assert!(matches!(request, ActionRequest::PlaceOrder { .. }));

        let request: ActionRequest =
            serde_json::from_str(r#"{"action":"getAccountAccessStatus"}"#).unwrap();
        assert!(matches!(request, ActionRequest::GetAccountAccessStatus));
    }
}
