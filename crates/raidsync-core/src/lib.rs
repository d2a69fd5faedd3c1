//! Shared configuration and error types for the raidsync workspace.

pub mod config;
pub mod error;

pub use config::{GatewayConfig, NotifyConfig, RaidsyncConfig};
pub use error::{RaidsyncError, Result};
