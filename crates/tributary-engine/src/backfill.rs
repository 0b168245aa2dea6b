//! Paginated backfill driver.
//!
//! A [`Backfiller`] pages one logical source: fetch a page, hand each
//! item to the handler, continue while a next-token comes back. The
//! driver owns retry (transient page-fetch errors, bounded attempts
//! with backoff) and the flush point that keeps a partial final batch
//! from being lost. Parallelism across independent backfillers goes
//! through [`crate::pool`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::adapter::{BackfillConfig, Page};
use crate::error::{EngineError, EngineResult};
use crate::pool;

/// One unit of pagination.
#[async_trait]
pub trait Backfiller: Send {
    /// Fetches a page. `None` token means the first page.
    ///
    /// # Errors
    ///
    /// [`crate::error::EngineError::TransientHttp`] is retried by the
    /// driver; anything else propagates immediately.
    async fn fetch_page(
        &mut self,
        token: Option<String>,
        last_backfilled: Option<DateTime<Utc>>,
    ) -> EngineResult<Page>;

    /// Handles one item. The default replicator backfiller runs the
    /// full upsert pipeline here, or buffers for a bulk upsert.
    ///
    /// # Errors
    ///
    /// Errors propagate and abort the backfill.
    async fn handle_item(&mut self, item: JsonValue) -> EngineResult<()>;

    /// Called after each page's items, before the next fetch. Bulk
    /// implementations upsert the buffered page here.
    ///
    /// # Errors
    ///
    /// Errors propagate and abort the backfill.
    async fn page_complete(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Called once after the final page. Bulk implementations flush
    /// any remaining partial batch here.
    ///
    /// # Errors
    ///
    /// Errors propagate and abort the backfill.
    async fn flush(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Bookkeeping for one backfill run, owned by the job runner.
#[derive(Debug, Clone, Default)]
pub struct BackfillJob {
    /// Incremental runs feed the last-backfilled watermark to page
    /// fetches; full runs page everything.
    pub incremental: bool,
    /// Adapter-specific criteria narrowing the run.
    pub criteria: Option<JsonValue>,
    /// Set when the run starts.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the run finishes successfully.
    pub finished_at: Option<DateTime<Utc>>,
    /// Parent job, for recursive dependency backfills.
    pub parent_job_id: Option<String>,
}

impl BackfillJob {
    /// A full (non-incremental) run.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// An incremental run.
    #[must_use]
    pub fn incremental() -> Self {
        Self {
            incremental: true,
            ..Self::default()
        }
    }
}

/// Counters for one backfiller run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    /// Pages fetched successfully.
    pub pages: u64,
    /// Items handled.
    pub items: u64,
    /// Page fetches retried after a transient error.
    pub retries: u64,
}

impl BackfillStats {
    /// Sums two runs' counters.
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            pages: self.pages + other.pages,
            items: self.items + other.items,
            retries: self.retries + other.retries,
        }
    }
}

/// Retry schedule for transient fetch errors, shared by the page loop
/// and the enrichment side-call.
///
/// Exponential backoff with deterministic jitter so tests never need a
/// random source.
#[derive(Debug)]
pub(crate) struct RetryState {
    attempt: u32,
    max_attempts: u32,
    current_delay: Duration,
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

impl RetryState {
    pub(crate) fn new(config: &BackfillConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.page_retries,
            current_delay: config.retry_backoff,
        }
    }

    /// Computes the next delay, or `None` when retries are exhausted.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;

        let delay = self.current_delay;

        // Jitter: ±25% of the delay, derived from the attempt number.
        let jitter_range = delay.as_millis() as f64 * 0.25;
        let jitter_offset = (f64::from(self.attempt) * 7.0 % jitter_range.max(1.0)) - (jitter_range / 2.0);
        let jittered_ms = (delay.as_millis() as f64 + jitter_offset).max(1.0);

        self.current_delay = Duration::from_millis(
            (self.current_delay.as_millis() as f64 * 2.0) as u64,
        )
        .min(MAX_RETRY_DELAY);

        Some(Duration::from_millis(jittered_ms as u64))
    }

    fn reset(&mut self, config: &BackfillConfig) {
        self.attempt = 0;
        self.current_delay = config.retry_backoff;
    }
}

/// Drives one backfiller to completion.
///
/// # Errors
///
/// Propagates the first handler error, or a page-fetch error once
/// retries are exhausted.
pub async fn run_backfiller(
    backfiller: &mut dyn Backfiller,
    config: &BackfillConfig,
    last_backfilled: Option<DateTime<Utc>>,
) -> EngineResult<BackfillStats> {
    let mut stats = BackfillStats::default();
    let mut token: Option<String> = None;
    let mut retry = RetryState::new(config);

    loop {
        let page = loop {
            let fetched = tokio::time::timeout(
                config.fetch_timeout,
                backfiller.fetch_page(token.clone(), last_backfilled),
            )
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::TransientHttp {
                    status: 0,
                    message: format!("page fetch exceeded {:?}", config.fetch_timeout),
                })
            });
            match fetched {
                Ok(page) => {
                    retry.reset(config);
                    break page;
                }
                Err(err) if err.is_transient() => match retry.next_backoff() {
                    Some(delay) => {
                        stats.retries += 1;
                        warn!(
                            error = %err,
                            attempt = retry.attempt,
                            delay_ms = delay.as_millis(),
                            "transient page-fetch error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(error = %err, "page-fetch retries exhausted");
                        return Err(err);
                    }
                },
                Err(err) => return Err(err),
            }
        };

        stats.pages += 1;
        for item in page.items {
            backfiller.handle_item(item).await?;
            stats.items += 1;
        }
        backfiller.page_complete().await?;

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    backfiller.flush().await?;
    debug!(pages = stats.pages, items = stats.items, "backfiller finished");
    Ok(stats)
}

/// Runs several independent backfillers, respecting the configured
/// parallelism degree.
///
/// # Errors
///
/// Returns the first backfiller error; queued backfillers never start
/// after a failure (see [`crate::pool`]).
pub async fn run_backfillers(
    backfillers: Vec<Box<dyn Backfiller>>,
    config: &BackfillConfig,
    last_backfilled: Option<DateTime<Utc>>,
) -> EngineResult<()> {
    let tasks: Vec<_> = backfillers
        .into_iter()
        .map(|mut backfiller| {
            let config = config.clone();
            async move {
                run_backfiller(backfiller.as_mut(), &config, last_backfilled)
                    .await
                    .map(|_| ())
            }
        })
        .collect();
    pool::run_all(tasks, config.parallelism).await
}
