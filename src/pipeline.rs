use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::extractor::Extractor;
use crate::fetch::Fetcher;
use crate::ledger::Ledger;
use crate::selectors::SelectorStore;
use crate::store::RecordStore;
use crate::utils::{AppError, FetchError};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Items in flight at once. 1 runs each item to completion before the
    /// next starts.
    pub workers: usize,
    pub fetch_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            fetch_timeout: Duration::from_secs(90),
        }
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            fetch_timeout: Duration::from_secs(config.fetch_timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Extract,
    Persist,
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded { output: PathBuf },
    Skipped,
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub identity: String,
    #[serde(flatten)]
    pub status: ItemStatus,
    pub elapsed_ms: u64,
}

impl ItemOutcome {
    fn skipped(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            status: ItemStatus::Skipped,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub success: bool,
    /// Identities examined: attempted plus skipped.
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub results: Vec<ItemOutcome>,
}

impl BatchSummary {
    fn from_results(results: Vec<ItemOutcome>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for outcome in &results {
            match outcome.status {
                ItemStatus::Succeeded { .. } => summary.succeeded += 1,
                ItemStatus::Skipped => summary.skipped += 1,
                ItemStatus::Failed { .. } => summary.errors += 1,
            }
        }
        summary.attempted = summary.succeeded + summary.errors;
        summary.success = summary.errors == 0;
        summary.results = results;
        summary
    }
}

/// Drives fetch, extract, persist and ledger-append over a list of
/// identities. A failing item is recorded and the batch moves on.
pub struct BatchPipeline {
    fetcher: Arc<dyn Fetcher>,
    selectors: Arc<SelectorStore>,
    records: RecordStore,
    ledger: Mutex<Ledger>,
    options: PipelineOptions,
    progress: watch::Sender<BatchProgress>,
}

impl BatchPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        selectors: Arc<SelectorStore>,
        records: RecordStore,
        ledger: Ledger,
        options: PipelineOptions,
    ) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            fetcher,
            selectors,
            records,
            ledger: Mutex::new(ledger),
            options,
            progress,
        }
    }

    /// Receives `{done, total}` after every attempted item.
    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub async fn processed(&self) -> usize {
        self.ledger.lock().await.len()
    }

    pub async fn process(&self, identities: &[String], limit: Option<usize>) -> BatchSummary {
        let (mut slots, pending) = self.plan(identities, limit).await;
        let total = pending.len();
        info!(total, skipped = slots.len() - total, workers = self.options.workers, "batch started");
        self.progress.send_replace(BatchProgress { done: 0, total });

        let mut items = stream::iter(pending)
            .map(|(slot, identity)| async move {
                let started = Instant::now();
                let status = self.run_item(&identity).await;
                let outcome = ItemOutcome {
                    identity,
                    status,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                (slot, outcome)
            })
            .buffered(self.options.workers.max(1));

        let mut done = 0;
        while let Some((slot, outcome)) = items.next().await {
            done += 1;
            match &outcome.status {
                ItemStatus::Failed { stage, error } => {
                    warn!(identity = %outcome.identity, ?stage, error = %error, "[{}/{}] item failed", done, total)
                }
                _ => info!(identity = %outcome.identity, elapsed_ms = outcome.elapsed_ms, "[{}/{}] item done", done, total),
            }
            slots[slot] = Some(outcome);
            self.progress.send_replace(BatchProgress { done, total });
        }

        let summary = BatchSummary::from_results(slots.into_iter().flatten().collect());
        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            errors = summary.errors,
            "batch finished"
        );
        summary
    }

    /// Runs a single identity through every stage, even when the ledger
    /// already holds it. A success is appended to the ledger only once.
    pub async fn process_one(&self, identity: &str) -> ItemOutcome {
        let identity = identity.trim();
        let started = Instant::now();
        let status = if identity.is_empty() {
            ItemStatus::Failed {
                stage: Stage::Fetch,
                error: "identity is empty".to_string(),
            }
        } else {
            self.run_item(identity).await
        };
        let outcome = ItemOutcome {
            identity: identity.to_string(),
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        match &outcome.status {
            ItemStatus::Failed { stage, error } => warn!(identity, ?stage, error = %error, "item failed"),
            _ => info!(identity, elapsed_ms = outcome.elapsed_ms, "item done"),
        }
        outcome
    }

    /// Returns one slot per examined identity, with skips already filled in,
    /// and the pending work in input order. Scanning stops once `limit`
    /// pending identities have been collected.
    async fn plan(&self, identities: &[String], limit: Option<usize>) -> (Vec<Option<ItemOutcome>>, Vec<(usize, String)>) {
        let ledger = self.ledger.lock().await;
        let mut seen = HashSet::new();
        let mut slots = Vec::new();
        let mut pending = Vec::new();

        for raw in identities {
            if limit.is_some_and(|k| pending.len() >= k) {
                break;
            }
            let identity = raw.trim();
            if identity.is_empty() {
                continue;
            }
            if ledger.contains(identity) || !seen.insert(identity.to_string()) {
                debug!(identity, "already processed, skipping");
                slots.push(Some(ItemOutcome::skipped(identity)));
                continue;
            }
            pending.push((slots.len(), identity.to_string()));
            slots.push(None);
        }

        (slots, pending)
    }

    async fn run_item(&self, identity: &str) -> ItemStatus {
        let failed = |stage: Stage, error: String| ItemStatus::Failed { stage, error };

        let fetched = match tokio::time::timeout(self.options.fetch_timeout, self.fetcher.fetch(identity)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                seconds: self.options.fetch_timeout.as_secs(),
            }),
        };
        let document = match fetched {
            Ok(document) => document,
            Err(e) => return failed(Stage::Fetch, AppError::from(e).to_string()),
        };
        if let Some(observed) = document.observed_identity.as_deref().filter(|o| *o != identity) {
            debug!(identity, observed, "fetch was redirected");
        }

        let config = self.selectors.snapshot().await;
        let record = match Extractor::parse(&document.html, identity, &config) {
            Ok(record) => record,
            Err(e) => return failed(Stage::Extract, e.to_string()),
        };

        let records = self.records.clone();
        let key = identity.to_string();
        let output = match tokio::task::spawn_blocking(move || records.persist(&key, &record)).await {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => return failed(Stage::Persist, e.to_string()),
            Err(e) => return failed(Stage::Persist, format!("persist task failed: {}", e)),
        };

        if let Err(e) = self.ledger.lock().await.append(identity).await {
            return failed(Stage::Ledger, e.to_string());
        }

        ItemStatus::Succeeded { output }
    }
}
