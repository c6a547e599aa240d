//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

pub mod cache;
pub mod catalog_service;
pub mod messaging;
pub mod payment_gateway;
pub mod quota_ledger;
pub mod state_machine;
pub mod transaction_service;
pub mod voucher_service;
