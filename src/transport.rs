//! Outbound delivery of envelopes to peer agents through the mailbox relay

use crate::protocol::Envelope;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAILBOX_URL: &str = "https://agentverse.ai";

/// Classification of delivery failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The peer's stream or mailbox is gone; further replies are pointless
    Closed,
    /// Relay unreachable or timed out
    Network,
    /// Relay answered but refused the envelope
    Rejected,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn closed(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Closed,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.kind == DeliveryErrorKind::Closed
    }
}

/// Delivers envelopes with `POST {mailbox_url}/v1/submit`
#[derive(Clone)]
pub struct MailboxTransport {
    client: Client,
    submit_url: String,
    mailbox_key: Option<String>,
}

impl MailboxTransport {
    pub fn new(mailbox_url: &str, mailbox_key: Option<String>) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeliveryError::network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            submit_url: format!("{}/v1/submit", mailbox_url.trim_end_matches('/')),
            mailbox_key: mailbox_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    pub async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.submit_url).json(envelope);
        if let Some(key) = &self.mailbox_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DeliveryError::network(e.to_string())
            } else {
                DeliveryError::closed(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let message = format!("Mailbox returned {status}: {body}");
    match status {
        StatusCode::GONE | StatusCode::NOT_FOUND => DeliveryError::closed(message),
        s if s.is_server_error() => DeliveryError::network(message),
        _ => DeliveryError::rejected(message),
    }
}
