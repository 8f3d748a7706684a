use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::config::ScrapeMode;

#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub mode: &'static str,
    pub active_runs: usize,
    pub total_runs: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunRecord>,
}

#[derive(Default)]
struct Counters {
    active_runs: usize,
    total_runs: u64,
    succeeded: u64,
    failed: u64,
    next_id: u64,
    last_run: Option<(u64, RunRecord)>,
}

/// In-memory bookkeeping of scrape runs for the status endpoint.
#[derive(Clone)]
pub struct RunTracker {
    mode: ScrapeMode,
    inner: Arc<Mutex<Counters>>,
}

/// Handle for one in-flight run. Dropping it unfinished records a failure.
pub struct RunGuard {
    id: u64,
    tracker: RunTracker,
    finished: bool,
}

impl RunTracker {
    pub fn new(mode: ScrapeMode) -> Self {
        Self {
            mode,
            inner: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn start(&self, tags: &[String]) -> RunGuard {
        let mut counters = self.lock();
        counters.next_id += 1;
        counters.active_runs += 1;
        counters.total_runs += 1;
        let id = counters.next_id;
        counters.last_run = Some((
            id,
            RunRecord {
                tags: tags.to_vec(),
                started_at: Utc::now(),
                finished_at: None,
                exit_code: None,
                success: None,
                error: None,
            },
        ));

        RunGuard {
            id,
            tracker: self.clone(),
            finished: false,
        }
    }

    pub fn snapshot(&self) -> RunStatus {
        let counters = self.lock();
        RunStatus {
            mode: self.mode.as_str(),
            active_runs: counters.active_runs,
            total_runs: counters.total_runs,
            succeeded: counters.succeeded,
            failed: counters.failed,
            last_run: counters.last_run.as_ref().map(|(_, record)| record.clone()),
        }
    }

    fn complete(&self, id: u64, exit_code: Option<i32>, error: Option<String>) {
        let success = error.is_none();
        let mut counters = self.lock();
        counters.active_runs = counters.active_runs.saturating_sub(1);
        if success {
            counters.succeeded += 1;
        } else {
            counters.failed += 1;
        }

        // A newer run may already have replaced the record.
        if let Some((last_id, record)) = counters.last_run.as_mut() {
            if *last_id == id {
                record.finished_at = Some(Utc::now());
                record.exit_code = exit_code;
                record.success = Some(success);
                record.error = error;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RunGuard {
    pub fn succeed(self, exit_code: Option<i32>) {
        self.finish(exit_code, None);
    }

    pub fn fail(self, exit_code: Option<i32>, error: String) {
        self.finish(exit_code, Some(error));
    }

    fn finish(mut self, exit_code: Option<i32>, error: Option<String>) {
        self.finished = true;
        self.tracker.complete(self.id, exit_code, error);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.complete(self.id, None, Some("Run abandoned before completion".to_string()));
        }
    }
}
