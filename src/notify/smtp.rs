//! SMTP dispatcher — outbound notifications via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::NotifyError;
use crate::notify::{NotificationDispatcher, NotifyContext, Template, render};

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `ORDER_ASSIST_SMTP_HOST` is not set (dispatch disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("ORDER_ASSIST_SMTP_HOST").ok()?;

        let port: u16 = std::env::var("ORDER_ASSIST_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("ORDER_ASSIST_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("ORDER_ASSIST_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("ORDER_ASSIST_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Sends rendered templates over SMTP.
pub struct SmtpDispatcher {
    config: SmtpConfig,
}

impl SmtpDispatcher {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self, template: Template) -> Result<SmtpTransport, NotifyError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        Ok(SmtpTransport::relay(&self.config.host)
            .map_err(|e| NotifyError::Transport {
                template: template.id().into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(self.config.port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    async fn send(
        &self,
        template: Template,
        recipient: &str,
        context: &NotifyContext,
    ) -> Result<(), NotifyError> {
        let (subject, body) = render(template, context);

        let email = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                NotifyError::InvalidRecipient(format!(
                    "invalid from address {}: {e}",
                    self.config.from_address
                ))
            })?)
            .to(recipient
                .parse()
                .map_err(|e| NotifyError::InvalidRecipient(format!("{recipient}: {e}")))?)
            .subject(subject)
            .body(body)
            .map_err(|e| NotifyError::Build {
                template: template.id().into(),
                reason: e.to_string(),
            })?;

        let transport = self.build_transport(template)?;

        // lettre's SMTP transport is blocking; run it off the async runtime.
        let send_result =
            tokio::task::spawn_blocking(move || transport.send(&email))
                .await
                .map_err(|e| NotifyError::Transport {
                    template: template.id().into(),
                    reason: format!("send task panicked: {e}"),
                })?;

        send_result.map_err(|e| NotifyError::Transport {
            template: template.id().into(),
            reason: format!("SMTP send failed: {e}"),
        })?;

        tracing::info!(template = %template, recipient = %recipient, "Email sent");
        Ok(())
    }
}
