//! Outbound email transport.
//!
//! The processor talks to the provider through [`EmailTransport`]; any
//! error it returns counts as a failed attempt and goes through the retry
//! ladder.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{Attachment, QueuedMessage};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Provider answered with a non-2xx status
    #[error("Email provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Request never produced a response
    #[error("Email provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email transport misconfigured: {0}")]
    Config(String),
}

/// Payload handed to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<OutboundAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundAttachment {
    pub filename: String,
    pub content: String,
    pub content_type: String,
}

impl From<&Attachment> for OutboundAttachment {
    fn from(attachment: &Attachment) -> Self {
        Self {
            filename: attachment.filename.clone(),
            content: attachment.content.clone(),
            content_type: attachment.content_type.clone(),
        }
    }
}

impl OutboundEmail {
    /// Build the payload for `message`, using `default_sender` when it has none
    pub fn from_message(message: &QueuedMessage, default_sender: &str) -> Self {
        Self {
            from: message
                .sender
                .clone()
                .unwrap_or_else(|| default_sender.to_string()),
            to: message.recipient.clone(),
            subject: message.subject.clone(),
            html: message.html_body.clone(),
            attachments: message.attachments.iter().map(OutboundAttachment::from).collect(),
        }
    }
}

/// Provider acknowledgement of an accepted message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorResponse {
    Flat { message: String },
    Nested { error: ErrorDetail },
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// JSON-over-HTTP provider client: `POST {base_url}/emails` with a bearer key
pub struct HttpEmailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmailTransport {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(TransportError::Config("transport.base_url is empty".to_string()));
        }
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(TransportError::Config("transport.api_key is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/emails", base_url),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }

        let body: SendResponse = response.json().await?;
        Ok(TransportReceipt {
            provider_message_id: body.id,
        })
    }
}

/// Pull a readable reason out of a provider error body
fn rejection_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse::Flat { message }) => message,
        Ok(ErrorResponse::Nested { error }) => error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}
