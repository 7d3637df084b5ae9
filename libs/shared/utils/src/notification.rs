use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingPaid,
    RefundIssued,
    GatewayPaymentFailed,
    DepositSettled,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification channel (in-app notifications, email).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        subject: Uuid,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), NotificationError>;
}

/// Fire-and-forget delivery. Failures are logged and dropped; they never
/// reach the booking or ledger operation that triggered them.
pub fn dispatch(notifier: Arc<dyn Notifier>, subject: Uuid, event: NotificationEvent, payload: Value) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(subject, event, payload).await {
            warn!("Dropping {:?} notification for {}: {}", event, subject, e);
        }
    });
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subject: Uuid,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), NotificationError> {
        info!("Notification {:?} for {}: {}", event, subject, payload);
        Ok(())
    }
}

/// Posts notifications to an HTTP endpoint owned by the notification service.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_retry(url, RetryPolicy::default())
    }

    pub fn with_retry(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            retry,
        }
    }

    async fn post_once(&self, body: &Value) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Delivery(format!("webhook returned {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        subject: Uuid,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), NotificationError> {
        let body = json!({
            "subject_id": subject,
            "event": event,
            "payload": payload,
        });

        debug!("Posting {:?} notification for {} to webhook", event, subject);
        self.retry.run(|_| self.post_once(&body), |_| true).await
    }
}
