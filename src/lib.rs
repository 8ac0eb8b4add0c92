//! Streaming market-data synchronization engine.
//!
//! Maintains a live mirror of one traded symbol from a multiplexed exchange
//! websocket (klines, aggregated trades, best bid/ask, depth deltas), seeded
//! by REST bootstrap fetches and kept consistent through reconnects. An
//! optional poller layers derived analytics from a companion service on top,
//! and a detector raises volatility and signal-change notification events.

pub mod engine;
pub mod error;
pub mod market;
pub mod state;

pub use engine::MarketEngine;
pub use error::EngineError;
pub use market::alerts::NotificationEvent;
pub use market::types::{ConnectionStatus, EngineArgs, KlineInterval};
pub use state::MarketSnapshot;
