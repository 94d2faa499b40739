//! Configuration, wiring and outbound delivery for the cartrack `server`
//! binary.

pub mod app;
pub mod config;
pub mod webhook;

pub use config::ServerConfig;
