//! Customer notifications over WhatsApp.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{error::AppError, models::transaction::Transaction};

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `message` to a `62…` phone number.
    async fn notify(&self, phone: &str, message: &str) -> Result<(), AppError>;
}

/// WhatsApp HTTP API client.
pub struct WhatsAppMessenger {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    phone: &'a str,
    message: &'a str,
}

impl WhatsAppMessenger {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::DependencyFailure(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl Messenger for WhatsAppMessenger {
    async fn notify(&self, phone: &str, message: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendMessageBody { phone, message })
            .send()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("messaging unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::DependencyFailure(format!(
                "messaging returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Used when WhatsApp is not configured: the message is only logged.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn notify(&self, phone: &str, message: &str) -> Result<(), AppError> {
        tracing::info!(phone, message, "notification (messaging not configured)");
        Ok(())
    }
}

/// Order confirmation sent after a transaction is created.
pub fn order_created_message(transaction: &Transaction, product_name: &str) -> String {
    let mut message = format!(
        "Order {} received.\nProduct: {}\nAccount: {}\nTotal: Rp {}\n",
        transaction.transaction_code,
        product_name,
        transaction.game_account_data.game_account,
        transaction.total_amount.normalize(),
    );

    match &transaction.payment_url {
        Some(url) => message.push_str(&format!("Pay here: {url}\n")),
        None => message.push_str("Your payment link will follow shortly.\n"),
    }

    message.push_str(&format!(
        "Please pay before {} UTC.",
        transaction.expired_at.format("%Y-%m-%d %H:%M")
    ));
    message
}
