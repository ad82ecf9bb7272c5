//! Wire types for the CLOB REST API
//!
//! Response shapes match the exchange's JSON exactly (string-encoded
//! decimals, camelCase order fields); each carries a conversion into the
//! engine's domain types.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use clob_core::{
    ClobError, ClobResult, Market, MarketStatus, OutcomeToken, PriceHistory, PriceInterval,
    PriceLevel, PricePoint, TradeEvent,
};

// ============================================================================
// Markets
// ============================================================================

/// One market as returned by `GET /markets` and `GET /markets/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ClobMarket {
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub tokens: Vec<ClobToken>,
    /// Minimum price increment, as a string decimal
    #[serde(default)]
    pub minimum_tick_size: Option<String>,
    #[serde(default)]
    pub minimum_order_size: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub neg_risk: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClobToken {
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl ClobMarket {
    /// Convert to the engine's market type
    pub fn into_market(self) -> ClobResult<Market> {
        let tick_size = parse_optional_decimal(self.minimum_tick_size.as_deref(), "0.01")?;
        let min_order_size = parse_optional_decimal(self.minimum_order_size.as_deref(), "5")?;

        let status = if self.closed || !self.active {
            MarketStatus::Closed
        } else {
            MarketStatus::Active
        };

        let end_date = self
            .end_date_iso
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Market {
            condition_id: self.condition_id,
            question: self.question,
            tokens: self
                .tokens
                .into_iter()
                .map(|t| OutcomeToken {
                    token_id: t.token_id,
                    outcome: t.outcome,
                    price: t.price,
                })
                .collect(),
            tick_size,
            min_order_size,
            status,
            category: self.category,
            end_date,
            neg_risk: self.neg_risk,
        })
    }
}

fn parse_optional_decimal(value: Option<&str>, default: &str) -> ClobResult<Decimal> {
    let raw = value.unwrap_or(default);
    raw.parse::<Decimal>()
        .map_err(|e| ClobError::malformed(format!("bad decimal {:?}: {}", raw, e)))
}

/// Cursor-paginated response envelope used by the listing endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Sentinel cursor marking the final page
pub const END_CURSOR: &str = "LTE=";

// ============================================================================
// Order book snapshots
// ============================================================================

/// Level as the exchange encodes it: both fields string decimals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLevel {
    pub price: String,
    pub size: String,
}

impl RawLevel {
    pub fn to_level(&self) -> ClobResult<PriceLevel> {
        let price = self
            .price
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad level price {:?}: {}", self.price, e)))?;
        let size = self
            .size
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad level size {:?}: {}", self.size, e)))?;
        Ok(PriceLevel::new(price, size))
    }
}

/// `GET /book` response
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshotResponse {
    #[serde(default)]
    pub market: Option<String>,
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    /// Millisecond timestamp, string-encoded
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Book content hash
    #[serde(default)]
    pub hash: Option<String>,
    /// Per-asset monotonic sequence number, when the venue supplies one
    #[serde(default)]
    pub seq: Option<u64>,
}

impl BookSnapshotResponse {
    pub fn bid_levels(&self) -> ClobResult<Vec<PriceLevel>> {
        self.bids.iter().map(|l| l.to_level()).collect()
    }

    pub fn ask_levels(&self) -> ClobResult<Vec<PriceLevel>> {
        self.asks.iter().map(|l| l.to_level()).collect()
    }

    /// Sequence to seed the book store with: the wire `seq` when present,
    /// otherwise the snapshot's millisecond timestamp (still monotonic per
    /// asset on this venue)
    pub fn sequence(&self) -> u64 {
        self.seq.or_else(|| {
            self.timestamp
                .as_deref()
                .and_then(|t| t.parse::<u64>().ok())
        })
        .unwrap_or(0)
    }
}

/// Request body entry for `POST /books`
#[derive(Debug, Clone, Serialize)]
pub struct BookParams {
    pub token_id: String,
}

// ============================================================================
// Prices & history
// ============================================================================

/// `GET /prices-history` response
#[derive(Debug, Clone, Deserialize)]
pub struct PriceHistoryResponse {
    #[serde(default)]
    pub history: Vec<PriceHistoryPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceHistoryPoint {
    /// Unix seconds
    pub t: i64,
    pub p: Decimal,
}

impl PriceHistoryResponse {
    pub fn into_history(self, token_id: &str, interval: PriceInterval) -> PriceHistory {
        PriceHistory {
            token_id: token_id.to_string(),
            interval,
            points: self
                .history
                .into_iter()
                .filter_map(|pt| {
                    Utc.timestamp_opt(pt.t, 0).single().map(|timestamp| PricePoint {
                        timestamp,
                        price: pt.p,
                    })
                })
                .collect(),
        }
    }
}

/// `GET /last-trade-price` response
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradePriceResponse {
    pub price: String,
    #[serde(default)]
    pub side: Option<String>,
}

// ============================================================================
// Trades
// ============================================================================

/// Public trade print from `GET /data/trades`
#[derive(Debug, Clone, Deserialize)]
pub struct TradeResponse {
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    pub price: String,
    pub size: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub match_time: Option<String>,
}

impl TradeResponse {
    pub fn into_trade_event(self) -> ClobResult<TradeEvent> {
        let price = self
            .price
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad trade price: {}", e)))?;
        let size = self
            .size
            .parse::<Decimal>()
            .map_err(|e| ClobError::malformed(format!("bad trade size: {}", e)))?;
        let timestamp = self
            .match_time
            .as_deref()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(TradeEvent {
            id: self.id,
            token_id: self.asset_id,
            price,
            size,
            side: self.side,
            timestamp,
        })
    }
}

// ============================================================================
// Orders (submission wire format)
// ============================================================================

/// Serialize U256 as a decimal string (e.g. "1000000", not hex)
fn serialize_u256_as_decimal<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

fn deserialize_u256_from_decimal<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
}

/// Salt goes over the wire as a plain integer, not a string
fn serialize_salt_as_u64<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let salt: u64 = (*value)
        .try_into()
        .map_err(|_| serde::ser::Error::custom("salt too large for u64"))?;
    serializer.serialize_u64(salt)
}

fn deserialize_salt_from_u64<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let n: u64 = Deserialize::deserialize(deserializer)?;
    Ok(U256::from(n))
}

/// Addresses are sent checksummed (mixed case), not lowercased
fn serialize_address_checksum<S>(value: &Address, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_checksum(None))
}

fn deserialize_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn serialize_side_as_string<S>(value: &u8, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        0 => serializer.serialize_str("BUY"),
        1 => serializer.serialize_str("SELL"),
        _ => Err(serde::ser::Error::custom("invalid side value")),
    }
}

fn deserialize_side_from_string<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    match s.as_str() {
        "BUY" => Ok(0),
        "SELL" => Ok(1),
        other => Err(serde::de::Error::custom(format!("invalid side: {}", other))),
    }
}

/// Order structure as the exchange signs and accepts it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrder {
    #[serde(
        serialize_with = "serialize_salt_as_u64",
        deserialize_with = "deserialize_salt_from_u64"
    )]
    pub salt: U256,
    #[serde(
        serialize_with = "serialize_address_checksum",
        deserialize_with = "deserialize_address"
    )]
    pub maker: Address,
    #[serde(
        serialize_with = "serialize_address_checksum",
        deserialize_with = "deserialize_address"
    )]
    pub signer: Address,
    #[serde(
        serialize_with = "serialize_address_checksum",
        deserialize_with = "deserialize_address"
    )]
    pub taker: Address,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub token_id: U256,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub maker_amount: U256,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub taker_amount: U256,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub expiration: U256,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub nonce: U256,
    #[serde(
        serialize_with = "serialize_u256_as_decimal",
        deserialize_with = "deserialize_u256_from_decimal"
    )]
    pub fee_rate_bps: U256,
    #[serde(
        serialize_with = "serialize_side_as_string",
        deserialize_with = "deserialize_side_from_string"
    )]
    pub side: u8,
    pub signature_type: u8,
}

/// Signed order ready for submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    #[serde(flatten)]
    pub order: WireOrder,
    pub signature: String,
}

/// `POST /order` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
    pub order: SignedOrder,
    /// API key id of the submitting account (not the wallet address)
    pub owner: String,
    pub order_type: String,
}

/// `POST /order` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub success: bool,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Open order from `GET /data/orders`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderResponse {
    pub id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ============================================================================
// API keys
// ============================================================================

/// Response from `POST /auth/api-key` and `GET /auth/derive-api-key`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Response from `GET /auth/api-keys`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeysResponse {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn wire_order_json_shape() {
        let order = WireOrder {
            salt: U256::from(12345u64),
            maker: Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap(),
            signer: Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap(),
            taker: Address::ZERO,
            token_id: U256::from(123456789u64),
            maker_amount: U256::from(1_000_000u64),
            taker_amount: U256::from(500_000u64),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            fee_rate_bps: U256::ZERO,
            side: 0,
            signature_type: 0,
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&order).unwrap()).unwrap();

        // Amounts go out as strings, salt as an integer, side as BUY/SELL
        assert_eq!(json["makerAmount"], "1000000");
        assert_eq!(json["tokenId"], "123456789");
        assert_eq!(json["salt"], 12345);
        assert_eq!(json["side"], "BUY");
        // Addresses keep their checksum casing
        assert_eq!(json["maker"], "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    }

    #[test]
    fn market_conversion_defaults_and_status() {
        let market = ClobMarket {
            condition_id: "0xc".into(),
            question: "Q?".into(),
            tokens: vec![ClobToken {
                token_id: "1".into(),
                outcome: "Yes".into(),
                price: None,
            }],
            minimum_tick_size: Some("0.001".into()),
            minimum_order_size: None,
            active: true,
            closed: false,
            category: None,
            end_date_iso: None,
            neg_risk: true,
        };

        let converted = market.into_market().unwrap();
        assert_eq!(converted.tick_size.to_string(), "0.001");
        assert_eq!(converted.min_order_size.to_string(), "5");
        assert_eq!(converted.status, MarketStatus::Active);
        assert!(converted.neg_risk);
    }

    #[test]
    fn closed_market_status() {
        let market = ClobMarket {
            condition_id: "0xc".into(),
            question: String::new(),
            tokens: vec![],
            minimum_tick_size: None,
            minimum_order_size: None,
            active: true,
            closed: true,
            category: None,
            end_date_iso: None,
            neg_risk: false,
        };
        assert_eq!(market.into_market().unwrap().status, MarketStatus::Closed);
    }

    #[test]
    fn snapshot_sequence_prefers_wire_seq() {
        let snap = BookSnapshotResponse {
            market: None,
            asset_id: "a".into(),
            bids: vec![],
            asks: vec![],
            timestamp: Some("1700000000123".into()),
            hash: None,
            seq: Some(42),
        };
        assert_eq!(snap.sequence(), 42);

        let snap_no_seq = BookSnapshotResponse {
            seq: None,
            ..snap
        };
        assert_eq!(snap_no_seq.sequence(), 1_700_000_000_123);
    }

    #[test]
    fn malformed_level_is_reported() {
        let level = RawLevel {
            price: "not-a-number".into(),
            size: "1".into(),
        };
        assert!(matches!(
            level.to_level().unwrap_err(),
            ClobError::Malformed(_)
        ));
    }
}
