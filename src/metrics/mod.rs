//! Viral metrics side channel.
//!
//! Events are queued on a bounded channel and written by a background worker.
//! Emitting never waits and never fails the caller: a full queue drops the
//! event, a sink error is logged.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::Config;

const QUEUE_CAPACITY: usize = 256;

/// A single growth event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViralEvent {
    pub kind: String,
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_artifact_id: Option<String>,
    pub at: String,
}

impl ViralEvent {
    pub fn remix(artifact_id: &str, parent_artifact_id: &str, at: &str) -> Self {
        Self {
            kind: "remix".to_string(),
            artifact_id: artifact_id.to_string(),
            parent_artifact_id: Some(parent_artifact_id.to_string()),
            at: at.to_string(),
        }
    }
}

/// Destination for viral events.
#[async_trait]
pub trait ViralSink: Send + Sync {
    async fn record(&self, event: &ViralEvent) -> anyhow::Result<()>;
}

/// Discards everything.
pub struct NoopSink;

#[async_trait]
impl ViralSink for NoopSink {
    async fn record(&self, _event: &ViralEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ViralSink for JsonlSink {
    async fn record(&self, event: &ViralEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Inserts rows into the Supabase `viral_events` table.
pub struct SupabaseSink {
    client: Client,
    url: String,
    service_role_key: String,
}

impl SupabaseSink {
    pub fn new(url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }
}

#[async_trait]
impl ViralSink for SupabaseSink {
    async fn record(&self, event: &ViralEvent) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("{}/rest/v1/viral_events", self.url))
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(event)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Failed to record viral event: {} - {}", status, text);
        }
        Ok(())
    }
}

/// Pick the sink matching the configured artifact backend.
pub fn sink_for_config(config: &Config) -> Arc<dyn ViralSink> {
    if let Some(supabase) = &config.supabase {
        return Arc::new(SupabaseSink::new(&supabase.url, &supabase.service_role_key));
    }
    match &config.data_dir {
        Some(dir) => Arc::new(JsonlSink::new(dir.join("viral-events.jsonl"))),
        None => Arc::new(NoopSink),
    }
}

/// Non-blocking handle for emitting viral events.
#[derive(Clone)]
pub struct ViralEvents {
    tx: mpsc::Sender<ViralEvent>,
}

impl ViralEvents {
    /// Spawn the worker draining into `sink`. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn ViralSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ViralEvent>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.record(&event).await {
                    tracing::warn!(
                        "Failed to record viral event for {}: {}",
                        event.artifact_id,
                        e
                    );
                }
            }
            tracing::debug!("Viral event worker stopped");
        });
        Self { tx }
    }

    /// Handle whose events are silently discarded.
    pub fn disabled() -> Self {
        Self::spawn(Arc::new(NoopSink))
    }

    /// Queue an event without waiting.
    pub fn emit(&self, event: ViralEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("Dropping viral event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<ViralEvent>>,
    }

    #[async_trait]
    impl ViralSink for RecordingSink {
        async fn record(&self, event: &ViralEvent) -> anyhow::Result<()> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ViralSink for FailingSink {
        async fn record(&self, _event: &ViralEvent) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("sink is down")
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_events_reach_sink() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let events = ViralEvents::spawn(sink.clone());
        events.emit(ViralEvent::remix("art_b", "art_a", "2026-01-01T00:00:00.000Z"));

        for _ in 0..100 {
            if !sink.events.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let recorded = sink.events.lock().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].parent_artifact_id.as_deref(), Some("art_a"));
    }

    #[tokio::test]
    async fn test_worker_keeps_draining_after_sink_errors() {
        let sink = Arc::new(FailingSink::default());
        let events = ViralEvents::spawn(sink.clone());
        for i in 0..10 {
            events.emit(ViralEvent::remix(&format!("art_{}", i), "art_root", "t"));
        }

        wait_for(|| sink.attempts.load(Ordering::SeqCst) == 10).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("viral-events.jsonl");
        let events = ViralEvents::spawn(Arc::new(JsonlSink::new(path.clone())));
        events.emit(ViralEvent::remix("art_b", "art_a", "t1"));
        events.emit(ViralEvent::remix("art_c", "art_b", "t2"));

        let read_lines = || {
            std::fs::read_to_string(&path)
                .map(|c| c.lines().count())
                .unwrap_or(0)
        };
        wait_for(|| read_lines() == 2).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let first: ViralEvent = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.artifact_id, "art_b");
        assert_eq!(read_lines(), 2);
    }
}
