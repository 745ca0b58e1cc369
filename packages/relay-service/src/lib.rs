//! Library surface for the relay service binary, split out so the
//! integration tests can build a `RelayContext` without going through
//! `main`.

pub mod config;
pub mod context;
pub mod db;
pub mod http;
pub mod metrics;
