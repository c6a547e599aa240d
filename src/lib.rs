//! Topup service: catalog, vouchers and the transaction lifecycle of a
//! game-topup store.
//!
//! The binary in `main.rs` wires these modules into an axum server; the
//! library target exists so integration tests can drive the services and the
//! router directly.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
