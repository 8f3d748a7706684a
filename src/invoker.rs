use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::api::models::ScrapeResponse;
use crate::config::{Config, ScrapeMode};
use crate::error::{AppError, Result};
use crate::process::ScraperProcess;
use crate::status::RunTracker;

pub const STUB_NOTE: &str =
    "This is a demo response. No scraper was run; deploy in subprocess mode for real scraping.";

/// Serves a validated tag list in the configured mode.
#[derive(Clone)]
pub struct ScrapeInvoker {
    mode: ScrapeMode,
    process: ScraperProcess,
    permits: Option<Arc<Semaphore>>,
    tracker: RunTracker,
}

impl ScrapeInvoker {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: config.mode,
            process: ScraperProcess::new(config.scraper.clone()),
            permits: config
                .scraper
                .max_concurrent
                .map(|n| Arc::new(Semaphore::new(n))),
            tracker: RunTracker::new(config.mode),
        }
    }

    pub fn mode(&self) -> ScrapeMode {
        self.mode
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    pub async fn invoke(&self, tags: &[String]) -> Result<ScrapeResponse> {
        match self.mode {
            ScrapeMode::Stub => {
                self.tracker.start(tags).succeed(None);
                Ok(stub_response(tags))
            }
            ScrapeMode::Subprocess => self.run_subprocess(tags).await,
        }
    }

    async fn run_subprocess(&self, tags: &[String]) -> Result<ScrapeResponse> {
        // Held until the process has exited.
        let _permit = match &self.permits {
            Some(permits) => Some(permits.clone().try_acquire_owned().map_err(|_| {
                warn!("Rejecting scrape request: concurrency limit reached");
                AppError::Busy
            })?),
            None => None,
        };

        let run = self.tracker.start(tags);
        let output = match self.process.run(tags).await {
            Ok(output) => output,
            Err(err) => {
                run.fail(None, err.run_summary());
                return Err(err);
            }
        };

        if output.success() {
            info!(stdout_bytes = output.stdout.len(), "Scraping completed");
            run.succeed(output.exit_code);
            Ok(ScrapeResponse::completed(output.stdout))
        } else {
            warn!(exit_code = ?output.exit_code, stderr_bytes = output.stderr.len(), "Scraping failed");
            let err = AppError::ProcessFailure {
                stderr: output.stderr,
            };
            run.fail(output.exit_code, err.run_summary());
            Err(err)
        }
    }
}

pub fn stub_response(tags: &[String]) -> ScrapeResponse {
    ScrapeResponse {
        success: true,
        message: format!("Scraping initiated for tags: {}", tags.join(", ")),
        output: None,
        note: Some(STUB_NOTE.to_string()),
    }
}
