//! Outgoing mail.
//!
//! Handlers talk to a [`Mailer`]. Production uses [`SmtpMailer`] (STARTTLS
//! relay via lettre); tests and SMTP-less development runs use
//! [`RecordingMailer`], which keeps every message in memory.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Mailbox, MultiPart, SinglePart,
        header::{ContentType, Header, HeaderName, HeaderValue},
    },
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::SmtpConfig;

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Delivery refused (recording mailer).
    #[error("Delivery refused for {0}")]
    Refused(String),
}

/// A message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Sender, `address` or `Name <address>`.
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text: String,
    /// When present the message is `multipart/alternative`.
    pub html: Option<String>,
    /// Value of the `List-Unsubscribe` header, without angle brackets.
    pub list_unsubscribe: Option<String>,
}

/// Something that delivers [`OutgoingEmail`]s.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns `MailError` if the message cannot be built or delivered.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// `List-Unsubscribe: <url>`
#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(
            s.trim().trim_start_matches('<').trim_end_matches('>').to_string(),
        ))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), format!("<{}>", self.0))
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

/// Build a lettre message.
///
/// # Errors
///
/// Returns `MailError` for unparseable addresses or headers.
pub fn build_message(email: &OutgoingEmail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.clone());

    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }
    if let Some(url) = &email.list_unsubscribe {
        builder = builder.header(ListUnsubscribe(url.clone()));
    }

    let message = match &email.html {
        Some(html) => builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(email.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        )?,
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.text.clone())?,
    };
    Ok(message)
}

/// SMTP relay mailer.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Create a mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay host is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        self.transport.send(message).await?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent successfully");
        Ok(())
    }
}

/// In-memory mailer that records every message.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    outbox: Mutex<Vec<OutgoingEmail>>,
    refused: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    /// An empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make delivery to `address` fail.
    pub fn refuse(&self, address: &str) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_lowercase());
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        // Same validation as the SMTP path
        build_message(email)?;

        let refused = self
            .refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&email.to.to_lowercase());
        if refused {
            return Err(MailError::Refused(email.to.clone()));
        }

        tracing::debug!(to = %email.to, subject = %email.subject, "Email recorded");
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "Simone Sixx <journal@simonesixx.com>".into(),
            to: "jane@example.com".into(),
            reply_to: Some("atelier@simonesixx.com".into()),
            subject: "Nouveau Journal — Printemps".into(),
            text: "Bonjour".into(),
            html: Some("<p>Bonjour</p>".into()),
            list_unsubscribe: Some("https://simonesixx.com/api/newsletter/unsubscribe?e=x".into()),
        }
    }

    #[test]
    fn test_build_message_headers() {
        let raw = String::from_utf8(build_message(&email()).unwrap().formatted()).unwrap();
        assert!(raw.contains("List-Unsubscribe: <https://simonesixx.com/api/newsletter/unsubscribe?e=x>"));
        assert!(raw.contains("Reply-To: atelier@simonesixx.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_plain_text_message() {
        let plain = OutgoingEmail {
            html: None,
            list_unsubscribe: None,
            ..email()
        };
        let raw = String::from_utf8(build_message(&plain).unwrap().formatted()).unwrap();
        assert!(!raw.contains("multipart"));
        assert!(!raw.contains("List-Unsubscribe"));
    }

    #[test]
    fn test_invalid_address() {
        let bad = OutgoingEmail {
            to: "not an address".into(),
            ..email()
        };
        assert!(matches!(
            build_message(&bad),
            Err(MailError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        mailer.send(&email()).await.unwrap();

        mailer.refuse("Bounce@example.com");
        let bounced = OutgoingEmail {
            to: "bounce@example.com".into(),
            ..email()
        };
        assert!(matches!(
            mailer.send(&bounced).await,
            Err(MailError::Refused(_))
        ));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "jane@example.com");
    }
}
