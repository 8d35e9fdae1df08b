//! Core module - domain types, the connector seam, config and errors

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{Config, RiskConfig, VenueConfig};
pub use error::{Error, OrderRejectReason, Result};
pub use traits::*;
pub use types::*;
