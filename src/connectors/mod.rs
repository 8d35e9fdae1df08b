//! Venue connectors
//!
//! `PaperConnector` is native async; synchronous SDKs are adapted through
//! `BridgedConnector`.

pub mod blocking;
pub mod paper;

pub use blocking::{BlockingVenue, BridgedConnector};
pub use paper::PaperConnector;
