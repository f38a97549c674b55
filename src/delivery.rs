//! Email and SMS delivery.
//!
//! Flows that need to reach a user (email verification links, one-time codes)
//! build a [`DeliveryMessage`] and hand it to a [`DeliverySender`]. How it gets
//! delivered is up to the sender. `LogSender` only logs and is meant for local
//! development; `HttpDeliverySender` posts the message to a delivery service.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DeliveryMessage {
    pub recipient: String,
    pub template: String,
    pub params: Map<String, Value>,
}

impl DeliveryMessage {
    #[must_use]
    pub fn new(recipient: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            template: template.into(),
            params: Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Delivery abstraction; return an error to report the message as not sent.
#[async_trait]
pub trait DeliverySender: Send + Sync {
    async fn send(&self, message: &DeliveryMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of delivering it.
#[derive(Clone, Debug, Default)]
pub struct LogSender;

#[async_trait]
impl DeliverySender for LogSender {
    async fn send(&self, message: &DeliveryMessage) -> Result<()> {
        let params = Value::Object(message.params.clone());
        info!(
            recipient = %message.recipient,
            template = %message.template,
            params = %params,
            "delivery send stub"
        );
        Ok(())
    }
}

/// Posts messages as JSON to a delivery service.
#[derive(Clone, Debug)]
pub struct HttpDeliverySender {
    client: reqwest::Client,
    url: String,
}

impl HttpDeliverySender {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::config::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliverySender for HttpDeliverySender {
    async fn send(&self, message: &DeliveryMessage) -> Result<()> {
        let span = info_span!("delivery.send", template = %message.template);
        async {
            let response = self
                .client
                .post(&self.url)
                .header("api-version", "0")
                .json(message)
                .send()
                .await
                .map_err(|e| Error::Delivery(format!("request to {} failed: {e}", self.url)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Delivery(format!("{} - {status}, {body}", self.url)));
            }
            debug!("delivered {} to {}", message.template, self.url);
            Ok(())
        }
        .instrument(span)
        .await
    }
}
