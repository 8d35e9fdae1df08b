//! Tradebridge - Core Library
//! Multi-venue trading engine: connectors, strategy scheduling, pre-trade risk

// Public modules
pub mod connectors;
pub mod core;
pub mod engine;
pub mod execution;
pub mod risk;
pub mod strategies;

// Re-exports
pub use core::{Config, Connector, Error, Result};
pub use engine::{EngineLifecycle, EngineStatus, MarketSnapshot, TradingEngine};
pub use strategies::{OrderOutcome, PositionChange, Strategy};
