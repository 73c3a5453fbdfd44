//! Webhook envelope and the HTTP transport that posts it.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use launchpad_data::{Pool, Trade};
use serde::Serialize;

/// Longest slice of an error response body kept in the error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Pool,
    Trade,
}

/// JSON body posted for every event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_type: EventType,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn pool(pool: &Pool) -> Result<Self> {
        Ok(Self {
            event_type: EventType::Pool,
            event_data: serde_json::to_value(pool).wrap_err("failed to serialize pool")?,
            timestamp: Utc::now(),
        })
    }

    pub fn trade(trade: &Trade) -> Result<Self> {
        Ok(Self {
            event_type: EventType::Trade,
            event_data: serde_json::to_value(trade).wrap_err("failed to serialize trade")?,
            timestamp: Utc::now(),
        })
    }
}

/// Sends one envelope. `Ok` means the receiver acknowledged it with a 2xx.
pub trait Deliver: Send + Sync {
    fn deliver(&self, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send;
}

/// Posts envelopes as JSON with `reqwest`.
pub struct HttpDelivery {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpDelivery {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration, bearer_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Deliver for HttpDelivery {
    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let mut request = self.client.post(&self.url).json(envelope);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .wrap_err_with(|| format!("POST {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(eyre!("webhook returned HTTP {}: {}", status.as_u16(), body));
        }
        Ok(())
    }
}
