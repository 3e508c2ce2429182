//! HTTP surface and process wiring for threadline.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod telemetry;
