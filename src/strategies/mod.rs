//! Trading strategies - Strategy framework

pub mod scheduler;
pub mod traits;
pub mod trend;

pub use scheduler::{StrategyHealth, StrategyScheduler, StrategyState};
pub use traits::{OrderOutcome, PositionChange, Strategy};
pub use trend::{TrendParams, TrendStrategy};
