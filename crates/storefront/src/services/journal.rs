//! Append-only JSON-lines logs kept next to the document store.
//!
//! - `checkout-log.jsonl` - one line per checkout stage
//! - `orders-YYYY-MM.jsonl` - one line per paid order

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Writer for the shop's JSON-lines logs.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Logs are written under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the logs.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkout log.
    #[must_use]
    pub fn checkout_log_path(&self) -> PathBuf {
        self.dir.join("checkout-log.jsonl")
    }

    /// Path of the orders log for the month of `at`.
    #[must_use]
    pub fn orders_log_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("orders-{}.jsonl", at.format("%Y-%m")))
    }

    /// Append one checkout stage. Failures are logged, never returned.
    pub async fn checkout_stage(&self, req_id: &str, stage: &str, fields: Map<String, Value>) {
        let mut line = Map::new();
        line.insert("ts".into(), Utc::now().to_rfc3339().into());
        line.insert("req_id".into(), req_id.into());
        line.insert("stage".into(), stage.into());
        line.extend(fields);

        if let Err(e) = self
            .append(&self.checkout_log_path(), &Value::Object(line))
            .await
        {
            tracing::warn!(error = %e, stage = %stage, "Failed to append checkout log");
        }
    }

    /// Append a paid order to the monthly log.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the line cannot be written.
    pub async fn order(&self, entry: &Value, at: DateTime<Utc>) -> std::io::Result<()> {
        self.append(&self.orders_log_path(at), entry).await
    }

    async fn append(&self, path: &Path, value: &Value) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        // One write call per line so concurrent appenders do not interleave
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

/// Build a field map from pairs.
#[must_use]
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[tokio::test]
    async fn test_checkout_stages_append() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("logs"));

        journal
            .checkout_stage("req-1", "start", fields([("items", json!(2))]))
            .await;
        journal
            .checkout_stage("req-1", "session_created", fields([("duration_ms", json!(412))]))
            .await;

        let raw = std::fs::read_to_string(journal.checkout_log_path()).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "start");
        assert_eq!(lines[0]["items"], 2);
        assert_eq!(lines[1]["req_id"], "req-1");
        assert_eq!(lines[1]["duration_ms"], 412);
    }

    #[tokio::test]
    async fn test_orders_log_is_monthly() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();

        journal.order(&json!({"session": "cs_1"}), at).await.unwrap();

        let path = dir.path().join("orders-2026-03.jsonl");
        assert_eq!(journal.orders_log_path(at), path);
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "{\"session\":\"cs_1\"}\n"
        );
    }
}
