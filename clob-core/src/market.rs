//! Market data structures for the CLOB

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Open for trading
    Active,
    /// Closed; no longer accepting orders
    Closed,
}

impl Default for MarketStatus {
    fn default() -> Self {
        MarketStatus::Active
    }
}

/// One tradeable outcome token of a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeToken {
    /// CLOB token id (the asset id used by the book and the feed)
    pub token_id: String,

    /// Outcome label (e.g. "Yes", "No")
    pub outcome: String,

    /// Last known price, when the listing endpoint supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// A CLOB market
///
/// Immutable once fetched except for `status`, which moves Active -> Closed
/// on external refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Condition id identifying the market on the exchange
    pub condition_id: String,

    /// Human-readable question
    pub question: String,

    /// Outcome tokens, each with its own order book
    pub tokens: Vec<OutcomeToken>,

    /// Minimum price increment the market accepts
    pub tick_size: Decimal,

    /// Minimum order size in shares
    pub min_order_size: Decimal,

    /// Current status
    pub status: MarketStatus,

    /// Category (e.g. "Politics", "Crypto")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// When the market closes for trading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    /// Whether the market settles through the neg-risk adapter
    /// (multi-outcome events; affects the order-signing domain)
    #[serde(default)]
    pub neg_risk: bool,
}

impl Market {
    /// Whether orders can currently be placed
    pub fn is_tradeable(&self) -> bool {
        self.status == MarketStatus::Active
    }

    /// Look up an outcome token by asset id
    pub fn token(&self, token_id: &str) -> Option<&OutcomeToken> {
        self.tokens.iter().find(|t| t.token_id == token_id)
    }
}

/// Filter for market listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketFilter {
    /// Only markets with this status
    pub status: Option<MarketStatus>,
    /// Only markets in this category
    pub category: Option<String>,
    /// Page size
    pub limit: Option<u32>,
    /// Pagination cursor from a previous response
    pub cursor: Option<String>,
}

impl MarketFilter {
    /// Filter for open (active, tradeable) markets
    pub fn open() -> Self {
        Self {
            status: Some(MarketStatus::Active),
            ..Default::default()
        }
    }
}

/// A page of markets with the cursor for the next page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsPage {
    pub markets: Vec<Market>,
    /// Cursor for the next page; "LTE=" marks the end on Polymarket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Price History
// ============================================================================

/// Time interval for price-history sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "max")]
    Max,
}

impl PriceInterval {
    /// Sampling fidelity in minutes, as the price-history endpoint expects
    pub fn fidelity_minutes(&self) -> u32 {
        match self {
            PriceInterval::OneMinute => 1,
            PriceInterval::OneHour => 60,
            PriceInterval::SixHours => 360,
            PriceInterval::OneDay => 1440,
            PriceInterval::OneWeek => 10080,
            PriceInterval::Max => 10080,
        }
    }

    /// Wire value for the `interval` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceInterval::OneMinute => "1m",
            PriceInterval::OneHour => "1h",
            PriceInterval::SixHours => "6h",
            PriceInterval::OneDay => "1d",
            PriceInterval::OneWeek => "1w",
            PriceInterval::Max => "max",
        }
    }
}

impl Default for PriceInterval {
    fn default() -> Self {
        PriceInterval::OneHour
    }
}

/// A single (timestamp, price) sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// Price series for one outcome token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub token_id: String,
    pub interval: PriceInterval,
    /// Samples sorted by timestamp ascending
    pub points: Vec<PricePoint>,
}

impl PriceHistory {
    /// Most recent sample
    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Price change from the first to the last sample
    pub fn price_change(&self) -> Option<Decimal> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some(last.price - first.price),
            _ => None,
        }
    }
}

// ============================================================================
// Trades
// ============================================================================

/// A public trade print for an outcome token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Trade id assigned by the exchange
    pub id: String,
    /// Asset (token) that traded
    pub token_id: String,
    pub price: Decimal,
    pub size: Decimal,
    /// "BUY" or "SELL" from the taker's perspective, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            condition_id: "0xabc".into(),
            question: "Will it rain tomorrow?".into(),
            tokens: vec![
                OutcomeToken {
                    token_id: "111".into(),
                    outcome: "Yes".into(),
                    price: Some(dec!(0.62)),
                },
                OutcomeToken {
                    token_id: "222".into(),
                    outcome: "No".into(),
                    price: Some(dec!(0.38)),
                },
            ],
            tick_size: dec!(0.01),
            min_order_size: dec!(5),
            status: MarketStatus::Active,
            category: None,
            end_date: None,
            neg_risk: false,
        }
    }

    #[test]
    fn token_lookup() {
        let m = market();
        assert_eq!(m.token("222").map(|t| t.outcome.as_str()), Some("No"));
        assert!(m.token("333").is_none());
    }

    #[test]
    fn tradeable_follows_status() {
        let mut m = market();
        assert!(m.is_tradeable());
        m.status = MarketStatus::Closed;
        assert!(!m.is_tradeable());
    }

    #[test]
    fn price_history_change() {
        let history = PriceHistory {
            token_id: "111".into(),
            interval: PriceInterval::OneHour,
            points: vec![
                PricePoint {
                    timestamp: Utc::now(),
                    price: dec!(0.40),
                },
                PricePoint {
                    timestamp: Utc::now(),
                    price: dec!(0.55),
                },
            ],
        };
        assert_eq!(history.price_change(), Some(dec!(0.15)));
        assert_eq!(history.latest().map(|p| p.price), Some(dec!(0.55)));
    }
}
