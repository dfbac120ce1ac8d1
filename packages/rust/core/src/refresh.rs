//! Periodic re-scraping of tracked products.
//!
//! Each tick selects the products whose last update fell in the previous
//! whole minute and runs the registration pipeline against their stored
//! source URL. Because every upsert moves `updated_at` forward, a refreshed
//! product becomes due again on a later tick. The scheduler remembers where
//! its last window ended, so minutes skipped by a slow tick are still covered.

use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use url::Url;
use uuid::Uuid;

use pricewatch_shared::{PriceWatchError, Product, ProductId, RefreshConfig, Result};

use crate::pipeline::{ProductTracker, ProgressReporter, SilentProgress};

/// Page size used when walking every stored product.
const FULL_REFRESH_PAGE: u32 = 100;

/// Longest span, in hours, a single scheduler tick catches up on.
const MAX_CATCH_UP_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Policy & outcome
// ---------------------------------------------------------------------------

/// What a batch refresh does when one product fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Log the failure, keep going, report it in the outcome.
    #[default]
    ContinueOnError,
    /// Stop the batch and return the first failure.
    AbortOnError,
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(config: &RefreshConfig) -> Self {
        if config.continue_on_error {
            Self::ContinueOnError
        } else {
            Self::AbortOnError
        }
    }
}

/// A product whose re-scrape failed.
#[derive(Debug)]
pub struct RefreshFailure {
    pub product_id: ProductId,
    pub url: String,
    pub error: PriceWatchError,
}

/// Aggregate result of one batch refresh.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Products selected for refresh.
    pub attempted: usize,
    /// Products re-scraped and stored.
    pub refreshed: usize,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshOutcome {
    /// Whether every attempted product was refreshed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The previous whole minute relative to `now`, as a half-open `[start, end)`.
pub fn refresh_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let minute = TimeDelta::minutes(1);
    let current = now.duration_trunc(minute).unwrap_or(now);
    (current - minute, current)
}

/// End of the last window the scheduler refreshed.
///
/// Each tick covers `[last_end, trunc_minute(now))`, so a tick that runs long
/// or wakes late leaves no minute unvisited.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshCursor {
    last_end: Option<DateTime<Utc>>,
}

impl RefreshCursor {
    /// The window due at `now`, or `None` when it was already refreshed.
    pub fn window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (start, end) = refresh_window(now);
        let start = match self.last_end {
            Some(last_end) => {
                let floor = end - TimeDelta::hours(MAX_CATCH_UP_HOURS);
                if last_end < floor {
                    warn!(%last_end, %floor, "refresh backlog truncated");
                }
                last_end.max(floor)
            }
            None => start,
        };
        (start < end).then_some((start, end))
    }

    /// Record that everything before `end` has been refreshed.
    pub fn advance(&mut self, end: DateTime<Utc>) {
        self.last_end = Some(end);
    }
}

// ---------------------------------------------------------------------------
// Refresh entry points
// ---------------------------------------------------------------------------

impl ProductTracker {
    /// Refresh the products due at the current time.
    pub async fn refresh_due(
        &self,
        policy: RefreshPolicy,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        self.refresh_due_at(Utc::now(), policy, cancel, &SilentProgress)
            .await
    }

    /// Refresh the products whose last update falls in [`refresh_window`] of `now`.
    ///
    /// No due products is an empty outcome, not an error.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn refresh_due_at(
        &self,
        now: DateTime<Utc>,
        policy: RefreshPolicy,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RefreshOutcome> {
        let (start, end) = refresh_window(now);
        self.refresh_between(start, end, policy, cancel, progress)
            .await
    }

    /// Refresh the products whose last update falls in `[start, end)`.
    pub async fn refresh_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        policy: RefreshPolicy,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RefreshOutcome> {
        let due = self.storage().products_updated_between(start, end).await?;

        if due.is_empty() {
            debug!(%start, %end, "no products due for refresh");
            return Ok(RefreshOutcome::default());
        }

        info!(%start, %end, due = due.len(), "refreshing due products");
        self.refresh_products(&due, policy, cancel, progress).await
    }

    /// Re-scrape every stored product.
    #[instrument(skip_all)]
    pub async fn refresh_all(
        &self,
        policy: RefreshPolicy,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RefreshOutcome> {
        progress.phase("Loading products");

        let mut products = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .storage()
                .list_products(offset, FULL_REFRESH_PAGE)
                .await?;
            let fetched = page.len() as u32;
            products.extend(page);
            if fetched < FULL_REFRESH_PAGE {
                break;
            }
            offset += fetched;
        }

        info!(products = products.len(), "refreshing all products");
        self.refresh_products(&products, policy, cancel, progress)
            .await
    }

    async fn refresh_products(
        &self,
        products: &[Product],
        policy: RefreshPolicy,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RefreshOutcome> {
        let total = products.len();
        let mut outcome = RefreshOutcome {
            attempted: total,
            ..RefreshOutcome::default()
        };

        progress.phase("Refreshing products");
        for (i, product) in products.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PriceWatchError::Cancelled);
            }

            let result = match Url::parse(&product.source_url) {
                Ok(url) => self.register_product(&url, cancel).await,
                Err(e) => Err(PriceWatchError::validation(format!(
                    "stored URL {:?} is invalid: {e}",
                    product.source_url
                ))),
            };
            progress.product_refreshed(&product.source_url, i + 1, total);

            match result {
                Ok(_) => outcome.refreshed += 1,
                Err(PriceWatchError::Cancelled) => return Err(PriceWatchError::Cancelled),
                Err(e) if policy == RefreshPolicy::AbortOnError => return Err(e),
                Err(e) => {
                    warn!(
                        product_id = product.id.0,
                        url = %product.source_url,
                        error = %e,
                        "product refresh failed"
                    );
                    outcome.failures.push(RefreshFailure {
                        product_id: product.id,
                        url: product.source_url.clone(),
                        error: e,
                    });
                }
            }
        }

        info!(
            attempted = outcome.attempted,
            refreshed = outcome.refreshed,
            failed = outcome.failures.len(),
            "refresh finished"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// One scheduler tick: refresh the window `cursor` reports as due at `now`.
    ///
    /// The cursor only advances when the window was processed, so a failed
    /// tick is retried in full on the next one.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn refresh_tick(
        &self,
        cursor: &mut RefreshCursor,
        now: DateTime<Utc>,
        policy: RefreshPolicy,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        let Some((start, end)) = cursor.window(now) else {
            debug!("window already refreshed");
            return Ok(RefreshOutcome::default());
        };
        let outcome = self
            .refresh_between(start, end, policy, cancel, &SilentProgress)
            .await?;
        cursor.advance(end);
        Ok(outcome)
    }

    /// Run [`refresh_tick`](Self::refresh_tick) every `interval` until cancelled.
    ///
    /// Ticks run one after another on this task; a tick that overruns the
    /// interval makes the scheduler skip the missed ticks instead of bursting,
    /// and the next tick catches up on the minutes they would have covered.
    pub async fn run_scheduler(
        &self,
        interval: Duration,
        policy: RefreshPolicy,
        cancel: CancellationToken,
    ) {
        // A zero period would panic inside tokio.
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs_f64(), ?policy, "refresh scheduler started");

        let mut cursor = RefreshCursor::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let span = info_span!("refresh_tick", tick_id = %Uuid::now_v7());
            let tick = self.refresh_tick(&mut cursor, Utc::now(), policy, &cancel);
            match tick.instrument(span).await {
                Ok(outcome) if !outcome.is_clean() => {
                    warn!(failed = outcome.failures.len(), "refresh tick had failures");
                }
                Ok(_) => {}
                Err(PriceWatchError::Cancelled) => break,
                Err(e) => error!(error = %e, "refresh tick failed"),
            }
        }

        info!("refresh scheduler stopped");
    }
}
