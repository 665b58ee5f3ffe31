//! Relay HTTP API module.
//!
//! Route handlers for chat history and service health, plus the shared error
//! and payload types used by them.
pub mod error;
pub mod history;
pub mod openapi;
pub mod system;
pub mod types;
