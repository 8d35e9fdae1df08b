//! Execution layer - blocking-call bridge and order lifecycle tracking

pub mod bridge;
pub mod orders;

pub use bridge::ExecutionBridge;
pub use orders::{OrderTracker, TrackedOrder};
