//! Core types and trait definitions for the cartrack attribution engine.
//!
//! No HTTP or database dependencies live here.
//! Storage backends implement [`store::CartStore`]; the HTTP layer drives
//! [`engine::Engine`] with typed [`trigger::Trigger`]s.

// Store implementations use `async fn`; the trait spells out `Send` futures.
#![allow(async_fn_in_trait)]

pub mod attribution;
pub mod cart;
pub mod email;
pub mod engine;
pub mod error;
pub mod memory;
pub mod publish;
pub mod session;
pub mod store;
pub mod trigger;
pub mod utm;

pub use error::{Error, Result};
