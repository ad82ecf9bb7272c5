//! Core types for the Polymarket CLOB engine
//!
//! This crate defines the shared data structures used across the engine:
//! market representations, the order model, the error taxonomy, and the
//! order book store that every price/depth query reads from.

pub mod book;
pub mod error;
pub mod market;
pub mod order;

pub use book::{BookSide, BookStore, BookSummary, LevelChange, OrderBook, PriceLevel};
pub use error::{ClobError, ClobResult};
pub use market::{
    Market, MarketFilter, MarketStatus, MarketsPage, OutcomeToken, PriceHistory, PriceInterval,
    PricePoint, TradeEvent,
};
pub use order::{OrderSide, OrderSpec, OrderStatus, OrderType, TrackedOrder};
