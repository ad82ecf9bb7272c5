//! Order Book Store
//!
//! Maintains a locally consistent per-asset view of the exchange's book:
//! snapshot loads, sequence-checked delta application, and the derived
//! quantities (best price, midpoint, spread, depth) consulted by every
//! price query.
//!
//! Mutations replace the whole book behind an `Arc`, so readers always see
//! an immutable, internally consistent snapshot and never a torn update.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClobError, ClobResult};

/// One aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    /// Aggregate resting size at this price
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// An absolute-size update to one price level
///
/// Size zero removes the level; a non-zero size replaces (not adds to) the
/// level's aggregate size. This matches the exchange's published
/// `price_change` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub side: BookSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// Immutable book state for one asset
///
/// Ladders are `BTreeMap` keyed by price: bids are read in descending key
/// order, asks ascending, so the best level of each side is O(log n).
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Asset (outcome token) this book belongs to
    pub asset_id: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    /// Feed sequence number of the last applied update
    pub seq: u64,
    /// When the last update was applied
    pub updated_at: DateTime<Utc>,
}

impl OrderBook {
    /// Build a book from snapshot levels, rejecting crossed data
    pub fn from_snapshot(
        asset_id: impl Into<String>,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: u64,
    ) -> ClobResult<Self> {
        let asset_id = asset_id.into();
        let book = Self {
            asset_id,
            bids: bids
                .iter()
                .filter(|l| !l.size.is_zero())
                .map(|l| (l.price, l.size))
                .collect(),
            asks: asks
                .iter()
                .filter(|l| !l.size.is_zero())
                .map(|l| (l.price, l.size))
                .collect(),
            seq,
            updated_at: Utc::now(),
        };
        book.check_not_crossed()?;
        Ok(book)
    }

    fn check_not_crossed(&self) -> ClobResult<()> {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(ClobError::CrossedBook {
                    asset_id: self.asset_id.clone(),
                    bid,
                    ask,
                });
            }
        }
        Ok(())
    }

    /// Highest resting bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest resting ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Mean of best bid and best ask; `None` when either side is empty
    /// (no liquidity to derive a midpoint from)
    pub fn midpoint(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Best ask minus best bid; non-negative for any non-crossed book
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Total resting size at `price` and better
    ///
    /// "Better" is higher for bids and lower for asks.
    pub fn depth_at_price(&self, side: BookSide, price: Decimal) -> Decimal {
        match side {
            BookSide::Bid => self.bids.range(price..).map(|(_, s)| *s).sum(),
            BookSide::Ask => self.asks.range(..=price).map(|(_, s)| *s).sum(),
        }
    }

    /// Worst price needed to fill `size` by walking the ladder from the top;
    /// `None` when the side holds less than `size` in total
    pub fn depth_for_size(&self, side: BookSide, size: Decimal) -> Option<Decimal> {
        let mut remaining = size;
        let levels: Vec<(Decimal, Decimal)> = match side {
            BookSide::Bid => self.bids.iter().rev().map(|(p, s)| (*p, *s)).collect(),
            BookSide::Ask => self.asks.iter().map(|(p, s)| (*p, *s)).collect(),
        };
        for (price, level_size) in levels {
            remaining -= level_size;
            if remaining <= Decimal::ZERO {
                return Some(price);
            }
        }
        None
    }

    /// Bid levels, best first
    pub fn bids(&self) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .collect()
    }

    /// Ask levels, best first
    pub fn asks(&self) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .collect()
    }

    /// Top `depth` levels of each side, for display
    pub fn summary(&self, depth: usize) -> BookSummary {
        BookSummary {
            asset_id: self.asset_id.clone(),
            bids: self.bids().into_iter().take(depth).collect(),
            asks: self.asks().into_iter().take(depth).collect(),
            seq: self.seq,
            updated_at: self.updated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Serializable top-of-book view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSummary {
    pub asset_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub seq: u64,
    pub updated_at: DateTime<Utc>,
}

/// Per-asset book store
///
/// Single source of truth for all price/depth queries. The realtime feed is
/// its sole writer after the initial snapshot load; each mutation builds the
/// next book off to the side and swaps it in atomically, so a failed apply
/// leaves the previous state untouched.
#[derive(Debug, Default)]
pub struct BookStore {
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the book for `asset_id` wholesale and reset the expected
    /// sequence to `seq`
    pub fn apply_snapshot(
        &self,
        asset_id: &str,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: u64,
    ) -> ClobResult<()> {
        let book = OrderBook::from_snapshot(asset_id, bids, asks, seq)?;
        debug!(
            asset_id,
            seq,
            bids = bids.len(),
            asks = asks.len(),
            "applied book snapshot"
        );
        self.books
            .write()
            .insert(asset_id.to_string(), Arc::new(book));
        Ok(())
    }

    /// Apply one delta, enforcing strictly contiguous sequence numbers
    ///
    /// Fails `SequenceGap` unless `seq` is exactly one greater than the
    /// book's current sequence (an already-seen `seq` is rejected the same
    /// way, never double-applied). Callers treat `SequenceGap` as a signal
    /// to request a fresh snapshot; nothing is partially applied.
    pub fn apply_delta(
        &self,
        asset_id: &str,
        changes: &[LevelChange],
        seq: u64,
    ) -> ClobResult<()> {
        let current = self.snapshot(asset_id).ok_or_else(|| ClobError::SequenceGap {
            asset_id: asset_id.to_string(),
            expected: 0,
            received: seq,
        })?;

        let expected = current.seq + 1;
        if seq != expected {
            return Err(ClobError::SequenceGap {
                asset_id: asset_id.to_string(),
                expected,
                received: seq,
            });
        }

        let mut next = (*current).clone();
        for change in changes {
            let ladder = match change.side {
                BookSide::Bid => &mut next.bids,
                BookSide::Ask => &mut next.asks,
            };
            if change.size.is_zero() {
                ladder.remove(&change.price);
            } else {
                ladder.insert(change.price, change.size);
            }
        }
        next.seq = seq;
        next.updated_at = Utc::now();
        next.check_not_crossed()?;

        self.books
            .write()
            .insert(asset_id.to_string(), Arc::new(next));
        Ok(())
    }

    /// Immutable snapshot of the current book, if one has been loaded
    pub fn snapshot(&self, asset_id: &str) -> Option<Arc<OrderBook>> {
        self.books.read().get(asset_id).cloned()
    }

    /// Drop the book for an asset (e.g. pending resynchronization)
    pub fn remove(&self, asset_id: &str) {
        self.books.write().remove(asset_id);
    }

    /// Asset ids with a loaded book
    pub fn assets(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn best_bid(&self, asset_id: &str) -> Option<Decimal> {
        self.snapshot(asset_id).and_then(|b| b.best_bid())
    }

    pub fn best_ask(&self, asset_id: &str) -> Option<Decimal> {
        self.snapshot(asset_id).and_then(|b| b.best_ask())
    }

    pub fn midpoint(&self, asset_id: &str) -> Option<Decimal> {
        self.snapshot(asset_id).and_then(|b| b.midpoint())
    }

    pub fn spread(&self, asset_id: &str) -> Option<Decimal> {
        self.snapshot(asset_id).and_then(|b| b.spread())
    }

    pub fn depth_at_price(
        &self,
        asset_id: &str,
        side: BookSide,
        price: Decimal,
    ) -> Option<Decimal> {
        self.snapshot(asset_id)
            .map(|b| b.depth_at_price(side, price))
    }
}
