//! Relay service library crate.
//!
//! Consumes every chat channel from the bus into per-channel logs and serves
//! channel history over HTTP. Exposed as a library for the binaries and the
//! integration tests.
pub mod api;
pub mod app;
pub mod config;
pub mod dispatcher;
pub mod history;
pub mod observability;
pub mod runtime;
