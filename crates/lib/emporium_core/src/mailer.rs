//! Outgoing mail.
//!
//! [`SmtpMailer`] delivers through an SMTP relay with a fixed retry policy.
//! [`LogMailer`] only logs, for local runs without a relay.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::{info, warn};

/// Delivery attempts per message.
pub const SEND_ATTEMPTS: u32 = 3;

/// Pause between delivery attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const SMTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("message build failed: {0}")]
    Build(String),

    #[error("smtp delivery failed: {0}")]
    Transport(String),
}

/// SMTP relay settings.
#[derive(Clone)]
pub struct MailerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// `From` header, e.g. `Emporium <no-reply@emporium.shop>`.
    pub sender: String,
}

impl std::fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// A rendered message with plain and HTML alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailerConfig) -> Result<Self, MailError> {
        let sender = config
            .sender
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("{}: {e}", config.sender)))?;
        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self { transport, sender })
    }
}

fn build_message(sender: &Mailbox, email: &Email) -> Result<Message, MailError> {
    let to = email
        .to
        .parse::<Mailbox>()
        .map_err(|e| MailError::Address(format!("{}: {e}", email.to)))?;
    Message::builder()
        .from(sender.clone())
        .to(to)
        .subject(email.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            email.plain_body.clone(),
            email.html_body.clone(),
        ))
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = build_message(&self.sender, &email)?;

        let mut last_error = None;
        for attempt in 1..=SEND_ATTEMPTS {
            let transport = self.transport.clone();
            let message = message.clone();
            let outcome = tokio::task::spawn_blocking(move || transport.send(&message)).await;

            match outcome {
                Ok(Ok(_)) => {
                    info!(to = %email.to, attempt, "email sent");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(to = %email.to, attempt, error = %e, "email delivery failed");
                    last_error = Some(MailError::Transport(e.to_string()));
                }
                Err(e) => {
                    warn!(to = %email.to, attempt, error = %e, "email task failed");
                    last_error = Some(MailError::Transport(e.to_string()));
                }
            }
            if attempt < SEND_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        Err(last_error.unwrap_or_else(|| MailError::Transport("no attempt made".into())))
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "email not sent (no SMTP relay configured)");
        Ok(())
    }
}

/// Welcome message carrying the activation code.
pub fn welcome_email(recipient: &str, name: &str, activation_code: &str) -> Email {
    Email {
        to: recipient.to_string(),
        subject: "Welcome to Emporium!".to_string(),
        plain_body: format!(
            "Hi {name},\n\n\
             Thanks for signing up for an Emporium account.\n\n\
             To activate your account, send a request to\n\
             GET /v1/auth/activate/{activation_code}\n\n\
             Thanks,\nThe Emporium Team\n"
        ),
        html_body: format!(
            "<!doctype html>\n<html>\n<body>\n\
             <p>Hi {name},</p>\n\
             <p>Thanks for signing up for an Emporium account.</p>\n\
             <p>To activate your account, send a request to \
             <code>GET /v1/auth/activate/{activation_code}</code></p>\n\
             <p>Thanks,</p>\n<p>The Emporium Team</p>\n\
             </body>\n</html>\n"
        ),
    }
}
