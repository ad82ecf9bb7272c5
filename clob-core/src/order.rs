//! Order model and status machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Time-in-force for submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good-Til-Cancelled - rests in book until filled or cancelled
    Gtc,
    /// Good-Til-Date - expires at specified timestamp
    Gtd,
    /// Fill-Or-Kill - must fill entirely or cancel immediately
    Fok,
    /// Fill-And-Kill - fill what you can, cancel the rest
    Fak,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Gtd => "GTD",
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
        }
    }
}

/// Lifecycle status of a tracked order
///
/// Transitions only move forward through this enum; an update that would
/// move a status backward is ignored by the order manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Submitted, not yet acknowledged as resting
    Pending,
    /// Resting in the book
    Open,
    /// Partially matched, remainder still resting
    PartiallyFilled,
    /// Fully matched
    Filled,
    /// Cancelled by the owner or the exchange
    Cancelled,
    /// Rejected by the exchange
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether moving to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next > *self
    }

    /// Parse the exchange's status strings into the local machine
    pub fn from_remote(status: &str) -> Option<OrderStatus> {
        match status.to_ascii_uppercase().as_str() {
            "LIVE" | "OPEN" => Some(OrderStatus::Open),
            "DELAYED" | "PENDING" | "UNMATCHED" => Some(OrderStatus::Pending),
            "PARTIALLY_FILLED" | "PARTIAL" => Some(OrderStatus::PartiallyFilled),
            "MATCHED" | "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" => Some(OrderStatus::Cancelled),
            "REJECTED" | "INVALID" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

/// Parameters for a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Market the token belongs to
    pub condition_id: String,
    /// Outcome token to trade
    pub token_id: String,
    pub side: OrderSide,
    /// Limit price (0 < price < 1)
    pub price: Decimal,
    /// Size in shares
    pub size: Decimal,
    pub order_type: OrderType,
    /// Expiration timestamp for GTD orders (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
}

/// A locally tracked order
///
/// Created on submission; mutated only by confirmed server responses or
/// feed order events; evicted after a retention window once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedOrder {
    /// Client-generated id, stable across retries
    pub client_id: String,
    /// Exchange-assigned order id, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub condition_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    /// Cumulative matched size
    pub filled_size: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedOrder {
    /// Create a fresh Pending order from its spec
    pub fn from_spec(client_id: String, spec: &OrderSpec) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            order_id: None,
            condition_id: spec.condition_id.clone(),
            token_id: spec.token_id.clone(),
            side: spec.side,
            price: spec.price,
            size: spec.size,
            filled_size: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unfilled remainder
    pub fn remaining_size(&self) -> Decimal {
        self.size - self.filled_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Open));
        assert!(OrderStatus::Open.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::Open.can_transition_to(OrderStatus::Cancelled));

        assert!(!OrderStatus::Open.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Open));
        assert!(!OrderStatus::Rejected.can_transition_to(OrderStatus::Rejected));
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn remote_status_parsing() {
        assert_eq!(OrderStatus::from_remote("LIVE"), Some(OrderStatus::Open));
        assert_eq!(OrderStatus::from_remote("matched"), Some(OrderStatus::Filled));
        assert_eq!(
            OrderStatus::from_remote("CANCELED"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(OrderStatus::from_remote("???"), None);
    }
}
