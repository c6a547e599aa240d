//! Application state shared across handlers.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    services::{
        catalog_service::CatalogCache,
        messaging::{LogMessenger, Messenger, WhatsAppMessenger},
        payment_gateway::{HttpPaymentGateway, PaymentGateway, UnconfiguredGateway},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub messenger: Arc<dyn Messenger>,
    pub catalog: CatalogCache,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: Config,
        payment_gateway: Arc<dyn PaymentGateway>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let catalog = CatalogCache::new(std::time::Duration::from_secs(config.catalog_cache_ttl_secs));
        Self {
            pool,
            config: Arc::new(config),
            payment_gateway,
            messenger,
            catalog,
        }
    }

    /// Build collaborators from configuration. Missing gateway or messaging
    /// settings fall back to stand-ins that never reach the network.
    pub fn from_config(pool: DbPool, config: Config) -> Result<Self, AppError> {
        let timeout = config.outbound_timeout();

        let payment_gateway: Arc<dyn PaymentGateway> =
            match (non_empty(&config.payment_gateway_url), non_empty(&config.payment_server_key)) {
                (Some(url), Some(key)) => {
                    Arc::new(HttpPaymentGateway::new(url.to_string(), key.to_string(), timeout)?)
                }
                _ => {
                    tracing::warn!("payment gateway not configured, payment links will stay pending");
                    Arc::new(UnconfiguredGateway)
                }
            };

        let messenger: Arc<dyn Messenger> =
            match (non_empty(&config.whatsapp_api_url), non_empty(&config.whatsapp_api_key)) {
                (Some(url), Some(key)) => {
                    Arc::new(WhatsAppMessenger::new(url.to_string(), key.to_string(), timeout)?)
                }
                _ => {
                    tracing::warn!("WhatsApp not configured, notifications are only logged");
                    Arc::new(LogMessenger)
                }
            };

        Ok(Self::new(pool, config, payment_gateway, messenger))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
