//! Realtime CLOB feed
//!
//! Websocket subscription, snapshot/delta synchronization against the
//! `BookStore`, and re-broadcast of trade/order events.

pub mod feed;
pub mod messages;

pub use feed::{
    FeedChannel, FeedConfig, FeedEvent, FeedState, MarketFeed, DEFAULT_MARKET_WS_URL,
    DEFAULT_USER_WS_URL,
};
pub use messages::{FeedMessage, MarketSubscribeMessage, UserSubscribeMessage};
