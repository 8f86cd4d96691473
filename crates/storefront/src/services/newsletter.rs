//! Newsletter subscriptions and article announcements.
//!
//! The subscriber list lives in one store document. Announcing an article
//! runs as a resumable [`SendJob`] stored under `newsletter/jobs/{job_id}`;
//! each notify call claims the next batch by advancing the job cursor
//! before sending, so overlapping calls never mail a recipient twice.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use askama::Template;
use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use simone_core::catalog::Article;
use simone_core::newsletter::{
    BatchReport, JobProgress, SendJob, SubscriberList, SubscriptionError, announcement_subject,
    teaser,
};
use simone_core::{ArticleId, Email, JobId};
use tracing::{info, instrument, warn};

use crate::config::NewsletterConfig;
use crate::error::{AppError, Result};
use crate::services::mailer::{Mailer, OutgoingEmail};
use crate::signing::{constant_time_compare, hmac_sha256_hex};
use crate::store::{self, SharedStore};

/// Store key of the subscriber list.
pub const SUBSCRIBERS_KEY: &str = "newsletter/subscribers";

/// Pause between two messages of a batch.
pub const SEND_PAUSE: Duration = Duration::from_millis(35);

static FROM_WITH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+?)\s*<\s*([^>]+?)\s*>\s*$").expect("Invalid regex"));

/// Store key of the send job for an article.
#[must_use]
pub fn job_key(job_id: &JobId) -> String {
    format!("newsletter/jobs/{job_id}")
}

/// Hex HMAC-SHA256 of the normalized address.
#[must_use]
pub fn unsubscribe_signature(secret: &str, email: &Email) -> String {
    hmac_sha256_hex(secret.as_bytes(), email.as_bytes())
}

/// Signed one-click unsubscribe link.
#[must_use]
pub fn unsubscribe_url(base_url: &str, secret: &str, email: &Email) -> String {
    format!(
        "{}/api/newsletter/unsubscribe?e={}&sig={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(email.as_str()),
        unsubscribe_signature(secret, email)
    )
}

/// Resolve the `From` header and envelope address.
///
/// `raw` may be `addr` or `Name <addr>`; a non-empty `name_override`
/// replaces the display name. Returns `None` when no valid address is found.
#[must_use]
pub fn sender_identity(raw: &str, name_override: Option<&str>) -> Option<(String, Email)> {
    let raw = raw.trim();
    let (name, address) = match FROM_WITH_NAME.captures(raw) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().trim().to_string()),
            caps.get(2).map_or("", |m| m.as_str()),
        ),
        None => (None, raw),
    };

    let address = Email::parse(address).ok()?;
    let name = name_override
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(ToString::to_string)
        .or(name)
        .filter(|n| !n.is_empty());

    let header = match name {
        Some(name) => format!("{name} <{address}>"),
        None => address.to_string(),
    };
    Some((header, address))
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Template)]
#[template(path = "email/newsletter_article.txt")]
struct ArticleEmailText<'a> {
    title: &'a str,
    date: &'a str,
    teaser: &'a str,
    url: &'a str,
    unsubscribe_url: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/newsletter_article.html")]
struct ArticleEmailHtml<'a> {
    title: &'a str,
    date: &'a str,
    teaser: &'a str,
    url: &'a str,
    logo_url: &'a str,
    image_url: Option<&'a str>,
    unsubscribe_url: Option<&'a str>,
}

// =============================================================================
// Requests and outcomes
// =============================================================================

/// Article fields sent by the publisher.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArticlePayload {
    pub id: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub excerpt: Option<String>,
    pub image: Option<String>,
}

/// Body of `POST /api/newsletter/notify`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyRequest {
    pub article: ArticlePayload,
    pub url: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub force: bool,
    #[serde(deserialize_with = "flag")]
    pub dry_run: bool,
    /// Token fallback when the header is absent.
    pub token: Option<String>,
}

/// `true`, `"1"` and `1` are set; anything else is unset.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    })
}

/// Result of one notify call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NotifyOutcome {
    /// Nothing to send: no subscribers or the job is finished.
    Idle {
        ok: bool,
        done: bool,
        sent: usize,
        total: usize,
        remaining: usize,
        message: &'static str,
    },
    /// A batch was handled.
    Batch {
        ok: bool,
        done: bool,
        sent_now: usize,
        sent_total: usize,
        errors_total: usize,
        total: usize,
        remaining: usize,
        job_id: String,
        dry_run: bool,
    },
}

impl NotifyOutcome {
    const fn idle(sent: usize, total: usize, message: &'static str) -> Self {
        Self::Idle {
            ok: true,
            done: true,
            sent,
            total,
            remaining: 0,
            message,
        }
    }

    fn batch(job_id: &JobId, sent_now: usize, progress: JobProgress, dry_run: bool) -> Self {
        Self::Batch {
            ok: true,
            done: progress.done,
            sent_now,
            sent_total: progress.sent_total,
            errors_total: progress.errors_total,
            total: progress.total,
            remaining: progress.remaining,
            job_id: job_id.to_string(),
            dry_run,
        }
    }

    /// Whether the job has nothing left.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        match self {
            Self::Idle { done, .. } | Self::Batch { done, .. } => *done,
        }
    }
}

/// Result of an unsubscribe link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    InvalidEmail,
    NotConfigured,
    InvalidSignature,
    Unsubscribed,
    AlreadyUnsubscribed,
}

impl UnsubscribeOutcome {
    /// HTTP status of the page.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::InvalidEmail => 400,
            Self::NotConfigured => 501,
            Self::InvalidSignature => 403,
            Self::Unsubscribed | Self::AlreadyUnsubscribed => 200,
        }
    }

    /// Page heading.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Unsubscribed | Self::AlreadyUnsubscribed => "Désinscription confirmée",
            _ => "Désinscription",
        }
    }

    /// Page message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidEmail => "Adresse e-mail invalide.",
            Self::NotConfigured => "La désinscription n'est pas configurée (secret manquant).",
            Self::InvalidSignature => "Lien de désinscription invalide ou expiré.",
            Self::Unsubscribed => "Vous êtes bien désinscrit(e) du Journal.",
            Self::AlreadyUnsubscribed => "Vous étiez déjà désinscrit(e).",
        }
    }
}

enum Claim {
    Finished { sent: usize, total: usize },
    Batch { job: SendJob, batch: Vec<Email> },
}

// =============================================================================
// Service
// =============================================================================

/// Newsletter operations.
#[derive(Clone)]
pub struct NewsletterService {
    store: SharedStore,
    mailer: Arc<dyn Mailer>,
    config: NewsletterConfig,
    base_url: String,
    pause: Duration,
}

impl NewsletterService {
    /// Create the service. `base_url` is the public site origin.
    #[must_use]
    pub fn new(
        store: SharedStore,
        mailer: Arc<dyn Mailer>,
        config: NewsletterConfig,
        base_url: &str,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            pause: SEND_PAUSE,
        }
    }

    /// Override the pause between two messages.
    #[must_use]
    pub const fn with_send_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Whether the notify endpoint has a token.
    #[must_use]
    pub const fn notify_configured(&self) -> bool {
        self.config.notify_token.is_some()
    }

    /// Add an address to the list.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an invalid address, `Conflict` when already subscribed.
    #[instrument(skip(self, raw_email))]
    pub async fn subscribe(
        &self,
        raw_email: &str,
        source: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let email = Email::parse(raw_email)
            .map_err(|_| AppError::BadRequest("Invalid email".to_string()))?;

        store::update_json(
            Arc::clone(&self.store),
            SUBSCRIBERS_KEY.to_string(),
            move |list: &mut SubscriberList| {
                list.subscribe(email.clone(), source.clone(), now)
                    .map_err(|SubscriptionError::AlreadySubscribed(_)| {
                        AppError::Conflict("Already subscribed".to_string())
                    })
            },
        )
        .await?;

        info!("Newsletter subscription added");
        Ok(())
    }

    /// Handle a signed unsubscribe link.
    ///
    /// # Errors
    ///
    /// Returns a store error if the list cannot be updated.
    #[instrument(skip_all)]
    pub async fn unsubscribe(
        &self,
        raw_email: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<UnsubscribeOutcome> {
        let Ok(email) = Email::parse(raw_email) else {
            return Ok(UnsubscribeOutcome::InvalidEmail);
        };
        let Some(secret) = &self.config.unsubscribe_secret else {
            return Ok(UnsubscribeOutcome::NotConfigured);
        };

        let expected = unsubscribe_signature(secret.expose_secret(), &email);
        let signature = signature.trim();
        if signature.is_empty() || !constant_time_compare(&expected, signature) {
            warn!("Rejected unsubscribe link with a bad signature");
            return Ok(UnsubscribeOutcome::InvalidSignature);
        }

        let removed = store::update_json(
            Arc::clone(&self.store),
            SUBSCRIBERS_KEY.to_string(),
            move |list: &mut SubscriberList| Ok::<_, AppError>(list.unsubscribe(&email, now)),
        )
        .await?;

        if removed == 0 {
            Ok(UnsubscribeOutcome::AlreadyUnsubscribed)
        } else {
            info!(removed, "Newsletter subscription removed");
            Ok(UnsubscribeOutcome::Unsubscribed)
        }
    }

    /// Subscriber list as CSV.
    ///
    /// # Errors
    ///
    /// `NotConfigured` without an export token, `Forbidden` for a wrong token.
    pub async fn export(&self, token: Option<&str>) -> Result<String> {
        let Some(expected) = &self.config.export_token else {
            return Err(AppError::NotConfigured(
                "Export not configured (missing NEWSLETTER_EXPORT_TOKEN)".to_string(),
            ));
        };
        check_token(expected, token)?;

        let list: SubscriberList =
            store::read_json(Arc::clone(&self.store), SUBSCRIBERS_KEY.to_string())
                .await?
                .unwrap_or_default();
        Ok(list.to_csv())
    }

    /// Send the next batch of an article announcement.
    ///
    /// # Errors
    ///
    /// `Forbidden` for a wrong token, `BadRequest` without article id and
    /// title, `NotConfigured` without a valid sender, or a store error.
    #[instrument(skip(self, request, header_token), fields(article_id = tracing::field::Empty, dry_run = request.dry_run))]
    pub async fn notify(
        &self,
        request: NotifyRequest,
        header_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NotifyOutcome> {
        let Some(expected) = &self.config.notify_token else {
            return Err(AppError::Forbidden("Forbidden".to_string()));
        };
        check_token(expected, header_token.or(request.token.as_deref()))?;

        let article = article_from(&request.article)
            .ok_or_else(|| AppError::BadRequest("Missing article id/title".to_string()))?;
        tracing::Span::current().record("article_id", article.id.as_str());

        let url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map_or_else(|| self.article_url(&article.id), ToString::to_string);

        let (from, _) = sender_identity(
            self.config.email_from.as_deref().unwrap_or_default(),
            self.config.email_from_name.as_deref(),
        )
        .ok_or_else(|| {
            AppError::NotConfigured(
                "Newsletter sender not configured (email_from must be a valid email)".to_string(),
            )
        })?;

        let list: SubscriberList =
            store::read_json(Arc::clone(&self.store), SUBSCRIBERS_KEY.to_string())
                .await?
                .unwrap_or_default();
        let recipients = list.recipients();
        if recipients.is_empty() {
            return Ok(NotifyOutcome::idle(0, 0, "No subscribers yet"));
        }

        let job_id = JobId::for_article(article.id.as_str());
        let key = job_key(&job_id);
        let batch_size = self.config.batch_size.max(1);

        if request.dry_run {
            return self
                .dry_run(&key, &job_id, article, url, recipients, request.force, batch_size, now)
                .await;
        }

        if request.force && store::remove(Arc::clone(&self.store), key.clone()).await? {
            info!(job_id = %job_id, "Send job reset");
        }

        let claim = store::update_json(
            Arc::clone(&self.store),
            key.clone(),
            move |slot: &mut Option<SendJob>| {
                let job = slot.get_or_insert_with(|| {
                    SendJob::new(article.clone(), url.clone(), recipients.clone(), now)
                });
                if job.done {
                    return Ok::<_, AppError>(Claim::Finished {
                        sent: job.sent,
                        total: job.emails.len(),
                    });
                }

                let batch = job.next_batch(batch_size).to_vec();
                job.record_batch(
                    BatchReport {
                        processed: batch.len(),
                        ..BatchReport::default()
                    },
                    now,
                );
                Ok(Claim::Batch {
                    job: job.clone(),
                    batch,
                })
            },
        )
        .await?;

        let (job, batch) = match claim {
            Claim::Finished { sent, total } => {
                return Ok(NotifyOutcome::idle(sent, total, "Already sent"));
            }
            Claim::Batch { job, batch } => (job, batch),
        };

        let report = self.send_batch(&job, &batch, &from).await?;
        let sent_now = report.sent;
        let claimed = job.progress();

        let recorded = store::update_json(
            Arc::clone(&self.store),
            key,
            move |slot: &mut Option<SendJob>| {
                let job = slot
                    .as_mut()
                    .ok_or_else(|| AppError::Conflict("Send job was reset".to_string()))?;
                job.record_batch(report.clone(), Utc::now());
                Ok(job.progress())
            },
        )
        .await;

        let progress = match recorded {
            Ok(progress) => progress,
            Err(AppError::Conflict(_)) => {
                warn!(job_id = %job_id, "Send job removed while a batch was sending");
                JobProgress {
                    sent_total: claimed.sent_total + sent_now,
                    ..claimed
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            job_id = %job_id,
            sent_now,
            sent_total = progress.sent_total,
            remaining = progress.remaining,
            "Newsletter batch sent"
        );
        Ok(NotifyOutcome::batch(&job_id, sent_now, progress, false))
    }

    #[allow(clippy::too_many_arguments)]
    async fn dry_run(
        &self,
        key: &str,
        job_id: &JobId,
        article: Article,
        url: String,
        recipients: Vec<Email>,
        force: bool,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<NotifyOutcome> {
        let existing = if force {
            None
        } else {
            store::read_json::<SendJob>(Arc::clone(&self.store), key.to_string()).await?
        };
        let mut job = existing.unwrap_or_else(|| SendJob::new(article, url, recipients, now));
        if job.done {
            return Ok(NotifyOutcome::idle(job.sent, job.emails.len(), "Already sent"));
        }

        // Render every message so template problems surface without sending
        let batch = job.next_batch(batch_size).to_vec();
        for email in &batch {
            self.compose(&job, email, "")?;
        }

        let sent_now = batch.len();
        job.record_batch(
            BatchReport {
                processed: sent_now,
                sent: sent_now,
                ..BatchReport::default()
            },
            now,
        );
        Ok(NotifyOutcome::batch(job_id, sent_now, job.progress(), true))
    }

    async fn send_batch(&self, job: &SendJob, batch: &[Email], from: &str) -> Result<BatchReport> {
        let mut report = BatchReport {
            processed: 0,
            ..BatchReport::default()
        };

        for (i, email) in batch.iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let message = self.compose(job, email, from)?;
            match self.mailer.send(&message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(error = %e, "Newsletter delivery failed");
                    report.errors += 1;
                    report.last_error = Some(e.to_string());
                }
            }
        }
        Ok(report)
    }

    fn compose(&self, job: &SendJob, to: &Email, from: &str) -> Result<OutgoingEmail> {
        let article = &job.article;
        let unsubscribe = self
            .config
            .unsubscribe_secret
            .as_ref()
            .map(|secret| unsubscribe_url(&self.base_url, secret.expose_secret(), to));
        let teaser = teaser(&article.excerpt);
        let logo_url = format!("{}/assets/images/logo.png", self.base_url);
        let image_url = self.asset_url(&article.image);

        let text = ArticleEmailText {
            title: article.title.trim(),
            date: article.date.trim(),
            teaser: &teaser,
            url: &job.url,
            unsubscribe_url: unsubscribe.as_deref(),
        }
        .render()?;
        let html = ArticleEmailHtml {
            title: article.title.trim(),
            date: article.date.trim(),
            teaser: &teaser,
            url: &job.url,
            logo_url: &logo_url,
            image_url: image_url.as_deref(),
            unsubscribe_url: unsubscribe.as_deref(),
        }
        .render()?;

        Ok(OutgoingEmail {
            from: from.to_string(),
            to: to.to_string(),
            reply_to: self.config.reply_to.clone(),
            subject: announcement_subject(&article.title),
            text,
            html: Some(html),
            list_unsubscribe: unsubscribe,
        })
    }

    fn article_url(&self, id: &ArticleId) -> String {
        format!(
            "{}/articles/article.html?id={}",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }

    fn asset_url(&self, path: &str) -> Option<String> {
        let path = path.trim();
        if path.is_empty() {
            None
        } else if path.starts_with("http://") || path.starts_with("https://") {
            Some(path.to_string())
        } else {
            Some(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
        }
    }
}

fn check_token(expected: &SecretString, provided: Option<&str>) -> Result<()> {
    match provided {
        Some(provided)
            if !provided.is_empty() && constant_time_compare(expected.expose_secret(), provided) =>
        {
            Ok(())
        }
        _ => Err(AppError::Forbidden("Forbidden".to_string())),
    }
}

fn article_from(payload: &ArticlePayload) -> Option<Article> {
    let trimmed = |s: &Option<String>| s.as_deref().map(str::trim).unwrap_or_default().to_string();

    let id = trimmed(&payload.id);
    let title = trimmed(&payload.title);
    if id.is_empty() || title.is_empty() {
        return None;
    }

    Some(Article {
        id: ArticleId::new(id),
        title,
        date: trimmed(&payload.date),
        excerpt: trimmed(&payload.excerpt),
        image: trimmed(&payload.image),
        content: None,
    })
}
