//! Newsletter subscribers and resumable send jobs.
//!
//! Announcing a journal article to every subscriber takes longer than one
//! request may run, so the mailing is split into batches. A [`SendJob`]
//! snapshots the recipient list when the announcement starts and remembers
//! how far it got; each call to the notify endpoint sends the next batch.
//! Subscribers who join mid-mailing are not added to a running job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Article;
use crate::types::{ArticleId, Email};

/// Longest teaser quoted in an announcement, in characters.
pub const MAX_TEASER_CHARS: usize = 380;

/// Errors from subscriber list operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The address is already on the list.
    #[error("{0} is already subscribed")]
    AlreadySubscribed(Email),
}

/// A newsletter subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Normalized address.
    pub email: Email,
    /// Sign-up time.
    pub created_at: DateTime<Utc>,
    /// Where the sign-up came from ("footer", "journal").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The subscriber list document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberList {
    /// Document format version.
    pub version: u32,
    /// Last write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Subscribers in sign-up order.
    pub subscribers: Vec<Subscriber>,
}

impl Default for SubscriberList {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: None,
            subscribers: Vec::new(),
        }
    }
}

impl SubscriberList {
    /// Whether `email` is subscribed.
    #[must_use]
    pub fn contains(&self, email: &Email) -> bool {
        self.subscribers.iter().any(|s| &s.email == email)
    }

    /// Add a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::AlreadySubscribed`] for a known address.
    pub fn subscribe(
        &mut self,
        email: Email,
        source: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SubscriptionError> {
        if self.contains(&email) {
            return Err(SubscriptionError::AlreadySubscribed(email));
        }

        self.subscribers.push(Subscriber {
            email,
            created_at: now,
            source: source.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()),
        });
        self.updated_at = Some(now);
        Ok(())
    }

    /// Remove every entry for `email`. Returns how many were removed.
    pub fn unsubscribe(&mut self, email: &Email, now: DateTime<Utc>) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| &s.email != email);
        let removed = before - self.subscribers.len();
        if removed > 0 {
            self.updated_at = Some(now);
        }
        removed
    }

    /// Unique addresses, sorted.
    #[must_use]
    pub fn recipients(&self) -> Vec<Email> {
        let mut emails: Vec<Email> = self.subscribers.iter().map(|s| s.email.clone()).collect();
        emails.sort();
        emails.dedup();
        emails
    }

    /// Export as CSV with a header row, every field quoted.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("email,created_at,source\n");
        for subscriber in &self.subscribers {
            let created_at = subscriber.created_at.to_rfc3339();
            let fields = [
                subscriber.email.as_str(),
                created_at.as_str(),
                subscriber.source.as_deref().unwrap_or(""),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Collapse whitespace and shorten an excerpt for an announcement.
#[must_use]
pub fn teaser(excerpt: &str) -> String {
    let collapsed = excerpt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_TEASER_CHARS {
        return collapsed;
    }
    let mut short: String = collapsed.chars().take(MAX_TEASER_CHARS - 3).collect();
    short.push_str("...");
    short
}

/// Subject line of an article announcement.
#[must_use]
pub fn announcement_subject(title: &str) -> String {
    format!("Nouveau Journal — {}", title.trim())
}

/// What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Recipients handled (sent or failed).
    pub processed: usize,
    /// Recipients that were sent to.
    pub sent: usize,
    /// Recipients that failed.
    pub errors: usize,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Progress counters reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    /// Whether every recipient has been handled.
    pub done: bool,
    /// Recipients sent to so far.
    pub sent_total: usize,
    /// Failures so far.
    pub errors_total: usize,
    /// Recipients in the snapshot.
    pub total: usize,
    /// Recipients left.
    pub remaining: usize,
}

/// Resumable mailing of one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendJob {
    /// Announced article.
    pub article_id: ArticleId,
    /// Article as it was when the job started.
    pub article: Article,
    /// Link to the article.
    pub url: String,
    /// Start time.
    pub created_at: DateTime<Utc>,
    /// Last batch time.
    pub updated_at: DateTime<Utc>,
    /// Whether every recipient has been handled.
    pub done: bool,
    /// Index of the next recipient.
    pub cursor: usize,
    /// Recipient snapshot.
    pub emails: Vec<Email>,
    /// Recipients sent to.
    pub sent: usize,
    /// Failures.
    pub errors: usize,
    /// Last failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SendJob {
    /// Start a job for `article` with a snapshot of `recipients`.
    #[must_use]
    pub fn new(article: Article, url: String, recipients: Vec<Email>, now: DateTime<Utc>) -> Self {
        Self {
            article_id: article.id.clone(),
            article,
            url,
            created_at: now,
            updated_at: now,
            done: recipients.is_empty(),
            cursor: 0,
            emails: recipients,
            sent: 0,
            errors: 0,
            last_error: None,
        }
    }

    /// The next `size` recipients.
    #[must_use]
    pub fn next_batch(&self, size: usize) -> &[Email] {
        let start = self.cursor.min(self.emails.len());
        let end = start.saturating_add(size).min(self.emails.len());
        self.emails.get(start..end).unwrap_or_default()
    }

    /// Advance past a handled batch.
    ///
    /// The cursor only moves forward and never past the snapshot.
    pub fn record_batch(&mut self, report: BatchReport, now: DateTime<Utc>) {
        self.cursor = self
            .cursor
            .saturating_add(report.processed)
            .min(self.emails.len());
        self.sent = self.sent.saturating_add(report.sent);
        self.errors = self.errors.saturating_add(report.errors);
        if report.last_error.is_some() {
            self.last_error = report.last_error;
        }
        self.done = self.cursor >= self.emails.len();
        self.updated_at = now;
    }

    /// Current counters.
    #[must_use]
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            done: self.done,
            sent_total: self.sent,
            errors_total: self.errors,
            total: self.emails.len(),
            remaining: self.emails.len().saturating_sub(self.cursor),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn article() -> Article {
        Article {
            id: ArticleId::from("carnet-ete"),
            title: "Carnet d'été".to_owned(),
            date: "2025-06-01".to_owned(),
            excerpt: "Un été en noir.".to_owned(),
            image: "ete.jpg".to_owned(),
            content: None,
        }
    }

    #[test]
    fn test_subscribe_rejects_duplicates() {
        let mut list = SubscriberList::default();
        list.subscribe(email("a@example.com"), Some("footer".into()), now())
            .unwrap();
        let err = list
            .subscribe(email("A@Example.com"), None, now())
            .unwrap_err();
        assert_eq!(err, SubscriptionError::AlreadySubscribed(email("a@example.com")));
        assert_eq!(list.subscribers.len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mut list = SubscriberList::default();
        list.subscribe(email("a@example.com"), None, now()).unwrap();
        assert_eq!(list.unsubscribe(&email("a@example.com"), now()), 1);
        assert_eq!(list.unsubscribe(&email("a@example.com"), now()), 0);
    }

    #[test]
    fn test_recipients_unique_sorted() {
        let mut list = SubscriberList::default();
        list.subscribe(email("c@example.com"), None, now()).unwrap();
        list.subscribe(email("a@example.com"), None, now()).unwrap();
        list.subscribers.push(list.subscribers[0].clone());
        let recipients: Vec<String> = list.recipients().into_iter().map(Email::into_inner).collect();
        assert_eq!(recipients, vec!["a@example.com", "c@example.com"]);
    }

    #[test]
    fn test_csv_quotes_every_field() {
        let mut list = SubscriberList::default();
        list.subscribe(email("a@example.com"), Some("say \"hi\"".into()), now())
            .unwrap();
        list.subscribe(email("b@example.com"), None, now()).unwrap();
        assert_eq!(
            list.to_csv(),
            "email,created_at,source\n\
             \"a@example.com\",\"2025-06-01T12:00:00+00:00\",\"say \"\"hi\"\"\"\n\
             \"b@example.com\",\"2025-06-01T12:00:00+00:00\",\"\"\n"
        );
    }

    #[test]
    fn test_teaser() {
        assert_eq!(teaser("  Un   été\n en noir. "), "Un été en noir.");
        let long = "é".repeat(500);
        let short = teaser(&long);
        assert_eq!(short.chars().count(), MAX_TEASER_CHARS);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_job_batches_until_done() {
        let recipients: Vec<Email> = (0..5).map(|i| email(&format!("r{i}@example.com"))).collect();
        let mut job = SendJob::new(article(), "https://simonesixx.com/a".into(), recipients, now());

        let batch: Vec<Email> = job.next_batch(2).to_vec();
        assert_eq!(batch.len(), 2);
        job.record_batch(
            BatchReport {
                processed: 2,
                sent: 2,
                ..BatchReport::default()
            },
            now(),
        );
        assert_eq!(job.progress().remaining, 3);
        assert!(!job.done);

        job.record_batch(
            BatchReport {
                processed: 2,
                sent: 1,
                errors: 1,
                last_error: Some("mailbox full".into()),
            },
            now(),
        );
        assert_eq!(job.next_batch(30).len(), 1);
        job.record_batch(
            BatchReport {
                processed: 1,
                sent: 1,
                ..BatchReport::default()
            },
            now(),
        );

        let progress = job.progress();
        assert!(progress.done);
        assert_eq!(progress.sent_total, 4);
        assert_eq!(progress.errors_total, 1);
        assert_eq!(progress.remaining, 0);
        assert_eq!(job.last_error.as_deref(), Some("mailbox full"));
        assert!(job.next_batch(30).is_empty());
    }

    #[test]
    fn test_job_without_recipients_is_done() {
        let job = SendJob::new(article(), String::new(), Vec::new(), now());
        assert!(job.progress().done);
        assert_eq!(job.progress().total, 0);
    }

    #[test]
    fn test_cursor_never_passes_snapshot() {
        let mut job = SendJob::new(article(), String::new(), vec![email("a@example.com")], now());
        job.record_batch(
            BatchReport {
                processed: 10,
                ..BatchReport::default()
            },
            now(),
        );
        assert_eq!(job.cursor, 1);
        assert!(job.done);
    }
}
