//! Queue runner: claims items, hands them to a handler, retires them.
//!
//! The store never waits for work, so the runner does the polling. A drain
//! processes whatever is eligible right now; `run` repeats drains until
//! shutdown, sleeping between empty polls.

use crate::config::Config;
use crate::error::Result;
use crate::model::Item;
use crate::queue::QueueStore;
use crate::telemetry::item::{record_result, start_item_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

/// What the handler wants done with the item it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed. The item is deleted.
    Done,
    /// Failed, try again later. The item is released once the current drain
    /// ends, or deleted if it has used up its attempts.
    Retry(String),
    /// The queue cannot make progress right now (a dependency is down, say).
    /// The item is released and the current drain stops.
    Suspend(String),
}

/// Processes one item at a time.
pub trait Handler<T>: Send + Sync {
    fn handle(&self, item: &Item<T>) -> impl Future<Output = Disposition> + Send;
}

/// Configuration for a runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Lease per claim. `None` uses the queue's default.
    ///
    /// A retried item is held until its drain ends. If its lease runs out
    /// first, the drain claims it back and stops there rather than running
    /// the handler on it again.
    pub lease: Option<Duration>,
    /// Sleep between polls that found nothing.
    pub poll_interval: Duration,
    /// Claims allowed before a retried item is dropped.
    pub max_attempts: u32,
    /// Upper bound on one drain. Checked between items.
    pub time_limit: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            lease: Some(config.lease),
            poll_interval: config.poll_interval,
            max_attempts: config.max_attempts,
            time_limit: None,
        }
    }
}

/// Tally of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub retried: usize,
    pub abandoned: usize,
    pub suspended: bool,
}

impl DrainReport {
    /// Nothing was claimed.
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.retried == 0 && self.abandoned == 0 && !self.suspended
    }
}

/// Worker loop over one queue.
pub struct Runner<T, H> {
    id: Uuid,
    queue: Arc<dyn QueueStore<T>>,
    handler: Arc<H>,
    config: RunnerConfig,
    stopping: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl<T, H> Clone for Runner<T, H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            stopping: Arc::clone(&self.stopping),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<T, H> Runner<T, H>
where
    T: Send + Sync,
    H: Handler<T>,
{
    pub fn new(queue: Arc<dyn QueueStore<T>>, handler: Arc<H>, config: RunnerConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            handler,
            config,
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask every clone of this runner to stop after its current item.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run drains until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(runner = %self.id, queue = self.queue.name(), "runner started");

        while !self.is_stopping() {
            // Back off after an empty, suspended or retrying drain. Retried
            // items are released as the drain ends and would otherwise be
            // claimed straight back.
            let idle = match self.drain().await {
                Ok(report) => report.processed == 0 || report.suspended || report.retried > 0,
                Err(e) => {
                    error!(runner = %self.id, "drain error: {e}");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = self.shutdown.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(runner = %self.id, queue = self.queue.name(), "runner stopped");
        Ok(())
    }

    /// Process items until none is eligible, the time limit passes, the
    /// handler suspends the queue, or shutdown is requested.
    pub async fn drain(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let mut report = DrainReport::default();
        // Held until the drain ends so the same item is not retried in a loop.
        let mut to_release: Vec<Item<T>> = Vec::new();

        let outcome = self.drain_into(started, &mut report, &mut to_release).await;

        for item in &to_release {
            if let Err(e) = self.queue.release_item(item) {
                warn!(runner = %self.id, id = %item.id, "release after retry failed: {e}");
            }
        }
        outcome?;

        if !report.is_idle() {
            info!(
                runner = %self.id,
                queue = self.queue.name(),
                processed = report.processed,
                retried = report.retried,
                abandoned = report.abandoned,
                suspended = report.suspended,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "drain finished"
            );
        }
        Ok(report)
    }

    async fn drain_into(
        &self,
        started: Instant,
        report: &mut DrainReport,
        to_release: &mut Vec<Item<T>>,
    ) -> Result<()> {
        loop {
            if self.is_stopping() {
                return Ok(());
            }
            if let Some(limit) = self.config.time_limit
                && started.elapsed() >= limit
            {
                info!(runner = %self.id, queue = self.queue.name(), "drain time limit reached");
                return Ok(());
            }

            let claimed = match self.config.lease {
                Some(lease) => self.queue.claim_item(lease)?,
                None => self.queue.claim_default()?,
            };
            let Some(item) = claimed else {
                return Ok(());
            };

            if let Some(held) = to_release
                .iter_mut()
                .find(|held| held.epoch == item.epoch && held.id == item.id)
            {
                debug!(
                    runner = %self.id,
                    id = %item.id,
                    claims = item.claims,
                    "retried item reclaimed before release, ending drain"
                );
                // The new claim owns the lease now; release through it.
                *held = item;
                return Ok(());
            }

            let span = start_item_span(self.queue.name(), item.id, item.claims);
            let keep_going = self
                .process(item, report, to_release)
                .instrument(span)
                .await?;
            if !keep_going {
                return Ok(());
            }
        }
    }

    /// Handle one claimed item. Returns `false` when the drain should stop.
    async fn process(
        &self,
        item: Item<T>,
        report: &mut DrainReport,
        to_release: &mut Vec<Item<T>>,
    ) -> Result<bool> {
        let span = tracing::Span::current();
        let handler_start = Instant::now();
        let disposition = self.handler.handle(&item).await;
        metrics::handler_duration_ms().record(
            handler_start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("queue", self.queue.name().to_string())],
        );

        let (result, keep_going) = match disposition {
            Disposition::Done => {
                self.queue.delete_item(&item)?;
                report.processed += 1;
                ("done", true)
            }
            Disposition::Retry(reason) if item.claims >= self.config.max_attempts => {
                warn!(
                    id = %item.id,
                    claims = item.claims,
                    %reason,
                    "item out of attempts, dropping"
                );
                self.queue.delete_item(&item)?;
                report.abandoned += 1;
                ("abandoned", true)
            }
            Disposition::Retry(reason) => {
                warn!(id = %item.id, claims = item.claims, %reason, "item will be retried");
                to_release.push(item);
                report.retried += 1;
                ("retry", true)
            }
            Disposition::Suspend(reason) => {
                warn!(id = %item.id, %reason, "queue suspended");
                self.queue.release_item(&item)?;
                report.suspended = true;
                ("suspended", false)
            }
        };

        record_result(&span, result);
        metrics::items_processed().add(
            1,
            &[
                KeyValue::new("queue", self.queue.name().to_string()),
                KeyValue::new("result", result),
            ],
        );
        Ok(keep_going)
    }
}
