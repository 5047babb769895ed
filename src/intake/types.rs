//! Shared types for the inbound-email intake path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;
use crate::order::{Address, RequestType};

/// A normalized inbound customer email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Channel-native message ID (or a generated one).
    pub message_id: String,
    /// Sender address.
    pub sender: String,
    /// Human-readable sender name, if available.
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    /// Plain-text body.
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Parse a raw MIME message into an `InboundEmail`.
pub fn parse_mime(raw: &[u8]) -> Result<InboundEmail, IntakeError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| IntakeError::Parse("not a parseable MIME message".into()))?;

    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .ok_or_else(|| IntakeError::Parse("missing From header".into()))?;

    let sender = from
        .address()
        .ok_or_else(|| IntakeError::Parse("From header has no address".into()))?
        .to_string();
    let sender_name = from.name().map(|n| n.to_string());

    let body = message
        .body_text(0)
        .map(|t| t.to_string())
        .unwrap_or_default();
    if body.trim().is_empty() {
        return Err(IntakeError::Parse("empty message body".into()));
    }

    let message_id = message
        .message_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let received_at = message
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now);

    Ok(InboundEmail {
        message_id,
        sender,
        sender_name,
        subject: message.subject().map(|s| s.to_string()),
        body,
        received_at,
    })
}

/// Classified intent extracted from a customer email.
///
/// `request_type = None` means the classifier saw no actionable
/// order-modification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedIntent {
    #[serde(default)]
    pub request_type: Option<RequestType>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub requested_address: Option<Address>,
    pub confidence: f32,
}

/// Intent extraction boundary — the classification model lives behind this.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, email: &InboundEmail) -> Result<ExtractedIntent, IntakeError>;
}
