//! HTTP surface of the raidsync notification hub.

pub mod app;
pub mod http;
