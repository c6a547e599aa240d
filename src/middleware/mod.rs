//! HTTP middleware components.
//!
//! Middleware run before route handlers. They authenticate requests and
//! reject callers without the required role.

/// API key authentication and admin guard
pub mod auth;
