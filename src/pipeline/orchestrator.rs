use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use super::dedup::FetcherFilter;
use crate::error::{ErrorSink, FetchError};
use crate::fetcher::{Fetcher, FetcherSet};
use crate::image::ImageDescriptor;

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
}

/// What one batch produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub scheduled: usize,
    pub handed_off: usize,
    pub failed: usize,
}

/// Runs the fetcher set in batches: filter, fetch concurrently, join, sleep.
pub struct FetchOrchestrator {
    fetchers: Arc<FetcherSet>,
    handoff: mpsc::Sender<ImageDescriptor>,
    errors: ErrorSink,
    interval: Duration,
    permits: Arc<Semaphore>,
    running: AtomicBool,
}

impl FetchOrchestrator {
    pub fn new(
        fetchers: Arc<FetcherSet>,
        handoff: mpsc::Sender<ImageDescriptor>,
        errors: ErrorSink,
        interval: Duration,
        fetch_workers: usize,
    ) -> Self {
        Self {
            fetchers,
            handoff,
            errors,
            interval,
            permits: Arc::new(Semaphore::new(fetch_workers.max(1))),
            running: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> BatchState {
        if self.running.load(Ordering::SeqCst) {
            BatchState::Running
        } else {
            BatchState::Idle
        }
    }

    /// Run one batch and wait for every fetch task in it to finish.
    /// Batches never overlap: a call made while one is running does nothing.
    pub async fn run_cycle(&self, filter: &dyn FetcherFilter) -> BatchSummary {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous fetch batch still running, skipping");
            return BatchSummary::default();
        }
        let selected = filter.select(self.fetchers.fetchers()).await;
        info!(count = selected.len(), "starting fetch batch");

        let tasks: Vec<_> = selected
            .into_iter()
            .map(|fetcher| {
                tokio::spawn(fetch_one(
                    fetcher,
                    Arc::clone(&self.permits),
                    self.handoff.clone(),
                    self.errors.clone(),
                ))
            })
            .collect();

        let mut summary = BatchSummary {
            scheduled: tasks.len(),
            ..BatchSummary::default()
        };
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(true) => summary.handed_off += 1,
                Ok(false) => summary.failed += 1,
                Err(err) => {
                    warn!(error = %err, "fetch task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            scheduled = summary.scheduled,
            handed_off = summary.handed_off,
            failed = summary.failed,
            "fetch batch complete"
        );
        self.running.store(false, Ordering::SeqCst);
        summary
    }

    /// Batch forever, sleeping `interval` between batches.
    pub async fn run(&self, filter: &dyn FetcherFilter) {
        loop {
            self.run_cycle(filter).await;
            debug!(seconds = self.interval.as_secs(), "sleeping until next batch");
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Fetch one image and hand it over. Returns whether it reached the handoff.
async fn fetch_one(
    fetcher: Arc<Fetcher>,
    permits: Arc<Semaphore>,
    handoff: mpsc::Sender<ImageDescriptor>,
    errors: ErrorSink,
) -> bool {
    let identity = fetcher.identity();
    // The semaphore is never closed.
    let _permit = permits.acquire().await;

    let image = match fetcher.fetch().await {
        Ok(image) => image,
        Err(err) => {
            errors.report(identity, err);
            return false;
        }
    };

    if handoff.send(image).await.is_err() {
        errors.report(identity, FetchError::HandoffClosed);
        return false;
    }
    debug!(fetcher = %identity, "image handed off for upload");
    true
}
