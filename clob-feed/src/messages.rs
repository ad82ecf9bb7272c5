//! Websocket wire messages
//!
//! Outbound subscribe payloads and the inbound event envelope. Events are
//! dispatched on the `event_type` field; the venue batches events into JSON
//! arrays, so parsing always yields a list.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use clob_client::OrderUpdate;
use clob_core::{BookSide, ClobError, ClobResult, LevelChange, OrderStatus, PriceLevel, TradeEvent};

// ============================================================================
// Outbound
// ============================================================================

/// Market-channel subscription (no auth required)
#[derive(Debug, Clone, Serialize)]
pub struct MarketSubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl MarketSubscribeMessage {
    pub fn new(asset_ids: Vec<String>) -> Self {
        Self {
            assets_ids: asset_ids,
            msg_type: "market".to_string(),
        }
    }
}

/// User-channel subscription (order/trade events, authenticated)
#[derive(Debug, Clone, Serialize)]
pub struct UserSubscribeMessage {
    pub markets: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub auth: AuthPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

// ============================================================================
// Inbound
// ============================================================================

/// One inbound feed event, dispatched on `event_type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum FeedMessage {
    Book(BookEvent),
    PriceChange(PriceChangeEvent),
    LastTradePrice(LastTradeEvent),
    TickSizeChange(TickSizeEvent),
    Order(OrderEvent),
    Trade(TradeMessage),
}

/// Full book for one asset, sent on subscribe and on venue-side rebuilds.
/// Treated as snapshot-equivalent: it resets the asset's sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct BookEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel {
    pub price: String,
    pub size: String,
}

impl BookEvent {
    pub fn bid_levels(&self) -> ClobResult<Vec<PriceLevel>> {
        self.bids.iter().map(parse_level).collect()
    }

    pub fn ask_levels(&self) -> ClobResult<Vec<PriceLevel>> {
        self.asks.iter().map(parse_level).collect()
    }

    /// Sequence to reset the book to: the wire `seq` when present, falling
    /// back to the event's millisecond timestamp
    pub fn sequence(&self) -> u64 {
        self.seq
            .or_else(|| self.timestamp.as_deref().and_then(|t| t.parse().ok()))
            .unwrap_or(0)
    }
}

fn parse_level(level: &RawLevel) -> ClobResult<PriceLevel> {
    let price = level
        .price
        .parse::<Decimal>()
        .map_err(|e| ClobError::malformed(format!("bad level price {:?}: {}", level.price, e)))?;
    let size = level
        .size
        .parse::<Decimal>()
        .map_err(|e| ClobError::malformed(format!("bad level size {:?}: {}", level.size, e)))?;
    Ok(PriceLevel::new(price, size))
}

/// Level deltas for one asset; sizes are absolute replacements
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: Option<String>,
    pub changes: Vec<PriceChangeLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    /// Per-asset monotonic sequence; a delta without one cannot be chained
    /// and forces a resynchronization
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeLevel {
    pub price: String,
    pub size: String,
    /// "BUY" (bid side) or "SELL" (ask side)
    pub side: String,
}

impl PriceChangeEvent {
    pub fn level_changes(&self) -> ClobResult<Vec<LevelChange>> {
        self.changes
            .iter()
            .map(|c| {
                let side = match c.side.to_ascii_uppercase().as_str() {
                    "BUY" => BookSide::Bid,
                    "SELL" => BookSide::Ask,
                    other => {
                        return Err(ClobError::malformed(format!(
                            "unknown change side {:?}",
                            other
                        )))
                    }
                };
                let price = c.price.parse::<Decimal>().map_err(|e| {
                    ClobError::malformed(format!("bad change price {:?}: {}", c.price, e))
                })?;
                let size = c.size.parse::<Decimal>().map_err(|e| {
                    ClobError::malformed(format!("bad change size {:?}: {}", c.size, e))
                })?;
                Ok(LevelChange { side, price, size })
            })
            .collect()
    }
}

/// Trade print on the market channel
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradeEvent {
    pub asset_id: String,
    pub price: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LastTradeEvent {
    pub fn into_trade_event(self) -> ClobResult<TradeEvent> {
        let price = self
            .price
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad trade price: {}", e)))?;
        let size = self
            .size
            .as_deref()
            .map(|s| {
                s.parse::<Decimal>()
                    .map_err(|e| ClobError::malformed(format!("bad trade size: {}", e)))
            })
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        let timestamp = parse_millis(self.timestamp.as_deref()).unwrap_or_else(Utc::now);

        Ok(TradeEvent {
            id: format!("{}-{}", self.asset_id, timestamp.timestamp_millis()),
            token_id: self.asset_id,
            price,
            size,
            side: self.side,
            timestamp,
        })
    }
}

/// Venue changed an asset's minimum price increment
#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeEvent {
    pub asset_id: String,
    #[serde(rename = "new_tick_size", alias = "tick_size")]
    pub tick_size: String,
}

/// User-channel order lifecycle event
#[derive(Debug, Clone, Deserialize)]
pub struct OrderEvent {
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size_matched: Option<String>,
    /// PLACEMENT / UPDATE / CANCELLATION
    #[serde(default, rename = "type")]
    pub update_kind: Option<String>,
}

impl OrderEvent {
    pub fn to_update(&self) -> OrderUpdate {
        let status = match self.update_kind.as_deref() {
            Some("CANCELLATION") => Some(OrderStatus::Cancelled),
            _ => OrderStatus::from_remote(&self.status),
        };
        OrderUpdate {
            order_id: self.id.clone(),
            status,
            filled_size: self
                .size_matched
                .as_deref()
                .and_then(|s| s.parse::<Decimal>().ok()),
        }
    }
}

/// User-channel trade (fill) event for one of our orders
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMessage {
    pub taker_order_id: String,
    #[serde(default)]
    pub asset_id: String,
    pub price: String,
    pub size: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub match_time: Option<String>,
}

impl TradeMessage {
    pub fn to_update(&self) -> OrderUpdate {
        OrderUpdate {
            order_id: self.taker_order_id.clone(),
            status: OrderStatus::from_remote(&self.status),
            // size here is this fill, not a cumulative total
            filled_size: None,
        }
    }

    pub fn to_trade_event(&self) -> ClobResult<TradeEvent> {
        let price = self
            .price
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad fill price: {}", e)))?;
        let size = self
            .size
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad fill size: {}", e)))?;
        let timestamp = parse_millis(self.match_time.as_deref()).unwrap_or_else(Utc::now);
        Ok(TradeEvent {
            id: format!("{}-{}", self.taker_order_id, timestamp.timestamp_millis()),
            token_id: self.asset_id.clone(),
            price,
            size,
            side: self.side.clone(),
            timestamp,
        })
    }
}

fn parse_millis(raw: Option<&str>) -> Option<chrono::DateTime<Utc>> {
    let ts = raw?.parse::<i64>().ok()?;
    if ts > 10_000_000_000 {
        chrono::DateTime::from_timestamp(ts / 1000, ((ts % 1000) * 1_000_000) as u32)
    } else {
        chrono::DateTime::from_timestamp(ts, 0)
    }
}

/// Parse one inbound frame into zero or more events
///
/// The venue batches events into arrays and answers keepalives with a bare
/// `PONG`; unrecognized event types are logged and dropped rather than
/// failing the connection.
pub fn parse_events(text: &str) -> Vec<FeedMessage> {
    if text.is_empty() || text == "PONG" {
        return Vec::new();
    }

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "unparseable feed frame dropped");
            return Vec::new();
        }
    };

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<FeedMessage>(item.clone()) {
            Ok(msg) => Some(msg),
            Err(_) => {
                let kind = item
                    .get("event_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<missing>");
                debug!(event_type = kind, "unrecognized feed event dropped");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn subscribe_message_shape() {
        let msg = MarketSubscribeMessage::new(vec!["123".into(), "456".into()]);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["assets_ids"][1], "456");
    }

    #[test]
    fn book_event_parses_with_sequence() {
        let events = parse_events(
            r#"{"event_type":"book","asset_id":"123",
                "bids":[{"price":"0.40","size":"100"}],
                "asks":[{"price":"0.42","size":"50"}],
                "timestamp":"1700000000123","seq":7}"#,
        );
        assert_eq!(events.len(), 1);
        let FeedMessage::Book(book) = &events[0] else {
            panic!("expected book event");
        };
        assert_eq!(book.sequence(), 7);
        assert_eq!(book.bid_levels().unwrap()[0].price, dec!(0.40));
        assert_eq!(book.ask_levels().unwrap()[0].size, dec!(50));
    }

    #[test]
    fn book_event_falls_back_to_timestamp_sequence() {
        let events = parse_events(
            r#"{"event_type":"book","asset_id":"123","bids":[],"asks":[],
                "timestamp":"1700000000123"}"#,
        );
        let FeedMessage::Book(book) = &events[0] else {
            panic!("expected book event");
        };
        assert_eq!(book.sequence(), 1_700_000_000_123);
    }

    #[test]
    fn price_change_maps_sides_to_book_sides() {
        let events = parse_events(
            r#"{"event_type":"price_change","asset_id":"123","seq":12,
                "changes":[
                  {"price":"0.40","size":"0","side":"BUY"},
                  {"price":"0.43","size":"25","side":"SELL"}
                ]}"#,
        );
        let FeedMessage::PriceChange(change) = &events[0] else {
            panic!("expected price_change");
        };
        assert_eq!(change.seq, Some(12));
        let changes = change.level_changes().unwrap();
        assert_eq!(changes[0].side, BookSide::Bid);
        assert!(changes[0].size.is_zero());
        assert_eq!(changes[1].side, BookSide::Ask);
        assert_eq!(changes[1].size, dec!(25));
    }

    #[test]
    fn batched_array_yields_every_event() {
        let events = parse_events(
            r#"[
                {"event_type":"last_trade_price","asset_id":"1","price":"0.55","timestamp":"1700000000"},
                {"event_type":"tick_size_change","asset_id":"1","new_tick_size":"0.001"}
            ]"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FeedMessage::LastTradePrice(_)));
        assert!(matches!(events[1], FeedMessage::TickSizeChange(_)));
    }

    #[test]
    fn pong_and_garbage_yield_nothing() {
        assert!(parse_events("PONG").is_empty());
        assert!(parse_events("").is_empty());
        assert!(parse_events("not json").is_empty());
        assert!(parse_events(r#"{"event_type":"mystery"}"#).is_empty());
    }

    #[test]
    fn order_event_maps_to_update() {
        let events = parse_events(
            r#"{"event_type":"order","id":"ord-1","asset_id":"123",
                "status":"LIVE","size_matched":"2.5","type":"UPDATE"}"#,
        );
        let FeedMessage::Order(order) = &events[0] else {
            panic!("expected order event");
        };
        let update = order.to_update();
        assert_eq!(update.order_id, "ord-1");
        assert_eq!(update.status, Some(OrderStatus::Open));
        assert_eq!(update.filled_size, Some(dec!(2.5)));
    }

    #[test]
    fn cancellation_kind_overrides_status() {
        let events = parse_events(
            r#"{"event_type":"order","id":"ord-2","status":"LIVE","type":"CANCELLATION"}"#,
        );
        let FeedMessage::Order(order) = &events[0] else {
            panic!("expected order event");
        };
        assert_eq!(order.to_update().status, Some(OrderStatus::Cancelled));
    }

    #[test]
    fn trade_message_produces_fill_and_event() {
        let events = parse_events(
            r#"{"event_type":"trade","taker_order_id":"ord-3","asset_id":"123",
                "price":"0.50","size":"4","status":"MATCHED","match_time":"1700000000"}"#,
        );
        let FeedMessage::Trade(trade) = &events[0] else {
            panic!("expected trade event");
        };
        assert_eq!(trade.to_update().status, Some(OrderStatus::Filled));
        let event = trade.to_trade_event().unwrap();
        assert_eq!(event.price, dec!(0.50));
        assert_eq!(event.size, dec!(4));
    }
}
