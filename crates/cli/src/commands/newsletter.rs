//! Newsletter drain: announce recent articles through the notify endpoint.
//!
//! Meant to run from cron. Each article is a resumable send job on the
//! server; every step sends one batch. A failed step moves on to the next
//! article, the next run resumes where this one stopped.

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use simone_core::catalog::{Article, parse_documents};
use tracing::{error, info, warn};

/// Pause between two steps of the same article.
const STEP_PAUSE: Duration = Duration::from_millis(120);

/// Timeout of one notify call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Default location of the published catalog.
const DEFAULT_CATALOG_DIR: &str = "crates/storefront/content/published";

/// Drain limits.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Newest articles considered, clamped to 1..=10.
    pub max_articles: usize,
    /// Notify calls per article, clamped to 1..=25.
    pub max_steps: usize,
    pub force: bool,
    pub dry_run: bool,
}

/// Where one article got to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleReport {
    pub article_id: String,
    pub steps: usize,
    pub sent_total: u64,
    pub total: u64,
    pub done: bool,
}

/// Progress fields of a notify answer.
///
/// Batch answers carry `sent_total`, idle ones `sent`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NotifyProgress {
    ok: bool,
    done: bool,
    #[serde(alias = "sent")]
    sent_total: u64,
    total: u64,
    remaining: u64,
}

/// Articles of the published catalog (with built-in fallbacks).
pub async fn published_articles() -> Vec<Article> {
    let dir = std::env::var("STOREFRONT_CATALOG_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CATALOG_DIR.to_string());
    simone_storefront::services::catalog::load_catalog(Path::new(&dir))
        .await
        .articles
}

/// Articles from a JSON array file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not an article array.
pub async fn articles_from_file(path: &Path) -> Result<Vec<Article>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Cannot read articles JSON {}: {e}", path.display()))?;
    Ok(parse_documents(&raw)?)
}

/// The `limit` newest articles with an id and a title, newest first.
#[must_use]
pub fn newest(articles: &[Article], limit: usize) -> Vec<&Article> {
    let mut candidates: Vec<&Article> = articles
        .iter()
        .filter(|a| !a.id.is_blank() && !a.title.trim().is_empty())
        .rev()
        .collect();
    // Stable: articles sharing a date keep "last in file first"
    candidates.sort_by(|a, b| b.date.cmp(&a.date));
    candidates.truncate(limit);
    candidates
}

/// Call the notify endpoint for each candidate article.
///
/// # Errors
///
/// Returns an error only if the HTTP client cannot be built. Failed steps
/// are logged and end the current article.
pub async fn drain(
    base_url: &str,
    token: &SecretString,
    articles: &[Article],
    options: &DrainOptions,
) -> Result<Vec<ArticleReport>, Box<dyn std::error::Error>> {
    let max_articles = options.max_articles.clamp(1, 10);
    let max_steps = options.max_steps.clamp(1, 25);
    let endpoint = format!("{}/api/newsletter/notify", base_url.trim_end_matches('/'));

    let candidates = newest(articles, max_articles);
    if candidates.is_empty() {
        info!("No published articles found");
        return Ok(Vec::new());
    }

    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    info!(
        endpoint = %endpoint,
        candidates = candidates.len(),
        steps = max_steps,
        "Draining newsletter"
    );

    let mut reports = Vec::with_capacity(candidates.len());
    for article in candidates {
        let payload = json!({
            "article": {
                "id": article.id,
                "title": article.title.trim(),
                "date": article.date.trim(),
                "excerpt": article.excerpt.trim(),
                "image": article.image.trim(),
            },
            "force": u8::from(options.force),
            "dry_run": u8::from(options.dry_run),
        });
        info!(article_id = %article.id, title = %article.title, "Article");

        let mut report = ArticleReport {
            article_id: article.id.to_string(),
            steps: 0,
            sent_total: 0,
            total: 0,
            done: false,
        };

        while report.steps < max_steps {
            report.steps += 1;
            let Some(progress) = step(&client, &endpoint, token, &payload, report.steps).await
            else {
                break;
            };

            report.done = progress.done;
            report.sent_total = progress.sent_total;
            report.total = progress.total;

            info!(
                step = report.steps,
                sent = report.sent_total,
                total = report.total,
                remaining = progress.remaining,
                done = report.done,
                "Notify step"
            );

            if report.done {
                break;
            }
            tokio::time::sleep(STEP_PAUSE).await;
        }
        reports.push(report);
    }

    Ok(reports)
}

/// One notify call. `None` when the call failed or the answer is not `ok`.
async fn step(
    client: &reqwest::Client,
    endpoint: &str,
    token: &SecretString,
    payload: &Value,
    step: usize,
) -> Option<NotifyProgress> {
    let response = match client
        .post(endpoint)
        .header("X-Newsletter-Token", token.expose_secret())
        .header(reqwest::header::ACCEPT, "application/json")
        .json(payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(step, error = %e, "Notify request failed");
            return None;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status != StatusCode::OK {
        warn!(step, status = status.as_u16(), body = %truncate(&body, 300), "Notify refused");
        return None;
    }

    match serde_json::from_str::<NotifyProgress>(&body) {
        Ok(progress) if progress.ok => Some(progress),
        _ => {
            warn!(step, body = %truncate(&body, 300), "Invalid notify response");
            None
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article(id: &str, date: &str) -> Article {
        serde_json::from_value(json!({"id": id, "title": format!("Titre {id}"), "date": date}))
            .unwrap()
    }

    fn options(max_articles: usize, max_steps: usize) -> DrainOptions {
        DrainOptions {
            max_articles,
            max_steps,
            force: false,
            dry_run: false,
        }
    }

    #[test]
    fn test_newest_first() {
        let articles = vec![
            article("a", "2026-01-10"),
            article("b", "2026-03-02"),
            article("c", "2026-02-14"),
        ];
        let ids: Vec<_> = newest(&articles, 2).iter().map(|a| a.id.to_string()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_steps_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/newsletter/notify"))
            .and(header("x-newsletter-token", "tok_drain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "done": false, "sent_now": 30, "sent_total": 30,
                "errors_total": 0, "total": 45, "remaining": 15,
                "job_id": "a", "dry_run": false
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/newsletter/notify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "done": true, "sent_now": 15, "sent_total": 45,
                "errors_total": 0, "total": 45, "remaining": 0,
                "job_id": "a", "dry_run": false
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let reports = drain(
            &server.uri(),
            &SecretString::from("tok_drain".to_string()),
            &[article("a", "2026-01-10")],
            &options(3, 10),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].steps, 2);
        assert_eq!(reports[0].sent_total, 45);
        assert!(reports[0].done);
    }

    #[tokio::test]
    async fn test_refused_step_moves_on() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/newsletter/notify"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"ok": false, "error": "Forbidden"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let reports = drain(
            &server.uri(),
            &SecretString::from("wrong".to_string()),
            &[article("a", "2026-01-10"), article("b", "2026-01-11")],
            &options(3, 5),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.steps == 1 && !r.done));
    }
}
