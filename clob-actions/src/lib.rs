//! Action facade over the CLOB engine
//!
//! Configuration, component wiring, and the closed set of dispatchable
//! operations. Hosts embed [`ClobEngine`] and feed [`ActionRequest`]s to
//! [`dispatch`]; every request completes with an [`ActionResponse`].

pub mod actions;
pub mod config;
pub mod engine;
pub mod response;

pub use actions::{dispatch, ActionRequest};
pub use config::ClobConfig;
pub use engine::ClobEngine;
pub use response::ActionResponse;
