//! Polling loop over the document store.
//!
//! One tick lists fresh descriptors, skips revisions already seen in this
//! process, runs the pipeline on the rest and appends one log record each.
//! Ticks never overlap and descriptors inside a tick run one after another.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::model::{LogSource, LogStatus};
use crate::pipeline::Pipeline;
use crate::sync_log::SyncLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Polling,
    Dispatching,
    Stopped,
}

/// Source of tick events. `None` means stop.
#[async_trait]
pub trait Ticker: Send {
    async fn next_tick(&mut self) -> Option<()>;
}

/// Fires immediately, then every `period`, until the token is cancelled.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
    cancel: CancellationToken,
}

impl IntervalTicker {
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = interval(period);
        // A slow tick pushes the schedule back instead of bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, cancel }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn next_tick(&mut self) -> Option<()> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            _ = self.interval.tick() => Some(()),
        }
    }
}

/// Ticks on demand; stops when every sender is dropped.
pub struct ManualTicker {
    rx: mpsc::Receiver<()>,
}

impl ManualTicker {
    pub fn channel(buffer: usize) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn next_tick(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Revision keys already dispatched by this process.
pub trait ProcessedSet: Send {
    fn contains(&self, key: &str) -> bool;
    /// Returns false when the key was already present.
    fn insert(&mut self, key: String) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProcessedSet {
    keys: HashSet<String>,
}

impl ProcessedSet for InMemoryProcessedSet {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub listed: usize,
    pub dispatched: usize,
    pub already_processed: usize,
    pub success: usize,
    pub partial: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct WatchLoop {
    pipeline: Arc<Pipeline>,
    log: Arc<dyn SyncLog>,
    page_size: u32,
    state: WatchState,
    /// Last photo count per descriptor id, used to warn when a revision drops
    /// photos. Like the processed set it lives for the whole process and is
    /// never pruned: one small entry per descriptor id ever dispatched.
    photo_counts: HashMap<String, usize>,
}

impl WatchLoop {
    pub fn new(pipeline: Arc<Pipeline>, log: Arc<dyn SyncLog>, page_size: u32) -> Self {
        Self {
            pipeline,
            log,
            page_size,
            state: WatchState::Idle,
            photo_counts: HashMap::new(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// One polling pass. Errors only when the listing itself fails.
    #[instrument(skip_all)]
    pub async fn tick(&mut self, processed: &mut dyn ProcessedSet) -> Result<TickReport> {
        self.state = WatchState::Polling;
        let entries = match self.pipeline.discover(self.page_size).await {
            Ok(entries) => entries,
            Err(err) => {
                self.state = WatchState::Idle;
                return Err(err);
            }
        };

        let mut report = TickReport {
            listed: entries.len(),
            ..Default::default()
        };
        let fresh: Vec<_> = entries
            .into_iter()
            .filter(|e| !processed.contains(&e.revision_key()))
            .collect();
        report.already_processed = report.listed - fresh.len();
        if fresh.is_empty() {
            debug!(listed = report.listed, "no new descriptors");
            self.state = WatchState::Idle;
            return Ok(report);
        }

        self.state = WatchState::Dispatching;
        info!(count = fresh.len(), "processing new descriptors");
        for entry in fresh {
            // Inserted before dispatch so a failing descriptor is not retried every tick.
            if !processed.insert(entry.revision_key()) {
                continue;
            }
            report.dispatched += 1;

            let outcome = self.pipeline.process(&entry).await;
            if outcome.sync_triggered() {
                let previous = self
                    .photo_counts
                    .insert(outcome.descriptor_id.clone(), outcome.photo_count);
                if let Some(previous) = previous.filter(|&p| p > outcome.photo_count) {
                    warn!(
                        product_id = %outcome.descriptor_id,
                        previous,
                        current = outcome.photo_count,
                        "photo list shrank; remote objects beyond the new count are left in place"
                    );
                }
            }

            match outcome.log_status() {
                LogStatus::Success => report.success += 1,
                LogStatus::Partial => report.partial += 1,
                LogStatus::Skipped => report.skipped += 1,
                LogStatus::Error => report.errors += 1,
            }
            let record = outcome.to_record(LogSource::Watch);
            if let Err(err) = self.log.append(&record).await {
                error!(?err, product_id = %record.descriptor_id, "failed to append sync log record");
            }
            info!(
                product_id = %outcome.descriptor_id,
                status = record.status.as_str(),
                message = %outcome.message,
                "descriptor processed"
            );
        }

        self.state = WatchState::Idle;
        Ok(report)
    }

    /// Tick until the ticker stops. A tick in flight always completes first.
    pub async fn run(&mut self, mut ticker: impl Ticker, processed: &mut dyn ProcessedSet) {
        info!(page_size = self.page_size, "watch loop started");
        while ticker.next_tick().await.is_some() {
            match self.tick(processed).await {
                Ok(report) if report.dispatched > 0 => info!(
                    listed = report.listed,
                    dispatched = report.dispatched,
                    success = report.success,
                    partial = report.partial,
                    skipped = report.skipped,
                    errors = report.errors,
                    "tick complete"
                ),
                Ok(_) => {}
                Err(err) => error!(error = %format!("{:#}", err), "listing failed; retrying next tick"),
            }
        }
        self.state = WatchState::Stopped;
        info!(processed = processed.len(), "watch loop stopped");
    }
}
