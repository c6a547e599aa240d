//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Service health endpoint
pub mod health;
/// Payment gateway callback
pub mod payments;
/// Catalog endpoints
pub mod products;
/// Customer and admin transaction endpoints
pub mod transactions;
/// Voucher evaluation and management endpoints
pub mod vouchers;
