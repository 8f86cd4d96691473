//! Contact and return-request forms.
//!
//! Both forms are mailed to the shop as plain text with the visitor as
//! Reply-To. The browser is always redirected back to the form page with
//! `?sent=1` or `?error=1`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use simone_core::Email;
use simone_core::order::SHOP_NAME;
use tracing::{info, instrument, warn};

use crate::config::NotificationConfig;
use crate::services::mailer::{Mailer, OutgoingEmail};

/// Default recipient and sender of form messages.
pub const DEFAULT_CONTACT_ADDRESS: &str = "contact@simonesixx.com";

/// Contact form fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// Return-request form fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReturnForm {
    pub order: String,
    pub email: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub details: String,
    pub confirm: String,
}

/// Who submitted a form.
#[derive(Debug, Clone, Default)]
pub struct Submitter {
    pub ip: String,
    pub user_agent: String,
}

/// Result of a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormOutcome {
    Sent,
    Rejected,
    Failed,
}

impl FormOutcome {
    /// Redirect target on the form page at `page`.
    #[must_use]
    pub fn redirect_to(self, page: &str) -> String {
        match self {
            Self::Sent => format!("{page}?sent=1"),
            Self::Rejected | Self::Failed => format!("{page}?error=1"),
        }
    }
}

/// Mails form submissions to the shop.
#[derive(Clone)]
pub struct ContactService {
    mailer: Arc<dyn Mailer>,
    to: String,
    from: String,
}

impl ContactService {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, notifications: &NotificationConfig) -> Self {
        Self {
            mailer,
            to: notifications
                .contact_to
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTACT_ADDRESS.to_string()),
            from: format!("{SHOP_NAME} <{DEFAULT_CONTACT_ADDRESS}>"),
        }
    }

    /// Handle a contact form submission.
    #[instrument(skip_all)]
    pub async fn contact(
        &self,
        form: ContactForm,
        submitter: &Submitter,
        now: DateTime<Utc>,
    ) -> FormOutcome {
        let name = form.name.trim();
        let message = form.message.trim();
        let Ok(email) = Email::parse(&form.email) else {
            return FormOutcome::Rejected;
        };
        if name.is_empty() || message.is_empty() {
            return FormOutcome::Rejected;
        }

        let mut body = String::from("Nouveau message via le formulaire Contact\n\n");
        body.push_str(&format!("Nom: {name}\n"));
        body.push_str(&format!("Email: {email}\n\n"));
        body.push_str(&format!("Message:\n{message}\n\n"));
        body.push_str(&trailer(submitter, now));

        self.deliver(&format!("Contact — {SHOP_NAME}"), body, &email)
            .await
    }

    /// Handle a return-request form submission.
    #[instrument(skip_all)]
    pub async fn return_request(
        &self,
        form: ReturnForm,
        submitter: &Submitter,
        now: DateTime<Utc>,
    ) -> FormOutcome {
        let order = form.order.trim();
        let name = form.name.trim();
        let kind = form.kind.trim();
        let reason = form.reason.trim();
        let details = form.details.trim();
        let Ok(email) = Email::parse(&form.email) else {
            return FormOutcome::Rejected;
        };
        if [order, name, kind, reason].iter().any(|f| f.is_empty()) || form.confirm.is_empty() {
            return FormOutcome::Rejected;
        }

        let mut body = String::from("Nouvelle demande de retour\n\n");
        body.push_str(&format!("Commande: {order}\n"));
        body.push_str(&format!("Nom: {name}\n"));
        body.push_str(&format!("Email: {email}\n"));
        body.push_str(&format!("Type: {kind}\n"));
        body.push_str(&format!("Motif: {reason}\n"));
        body.push_str(&format!(
            "Precisions: {}\n\n",
            if details.is_empty() { "(aucune)" } else { details }
        ));
        body.push_str("Confirmation: OK\n\n");
        body.push_str(&trailer(submitter, now));

        self.deliver(&format!("Demande de retour — {SHOP_NAME}"), body, &email)
            .await
    }

    async fn deliver(&self, subject: &str, text: String, reply_to: &Email) -> FormOutcome {
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: self.to.clone(),
            reply_to: Some(reply_to.as_str().to_string()),
            subject: subject.to_string(),
            text,
            html: None,
            list_unsubscribe: None,
        };

        match self.mailer.send(&email).await {
            Ok(()) => {
                info!(subject = %subject, "Form message delivered");
                FormOutcome::Sent
            }
            Err(e) => {
                warn!(subject = %subject, error = %e, "Failed to deliver form message");
                FormOutcome::Failed
            }
        }
    }
}

fn trailer(submitter: &Submitter, now: DateTime<Utc>) -> String {
    format!(
        "---\nIP: {}\nUA: {}\nDate (UTC): {}\n",
        submitter.ip,
        submitter.user_agent,
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
