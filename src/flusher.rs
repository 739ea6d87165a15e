// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic background drain of the write-back cache.
//!
//! Only a write-mode process runs one. The task sleeps for the configured
//! interval, checks the cancellation flag, drains, and repeats.
//! [`FlushScheduler::stop`] sets the flag and waits for the task to exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::WriteBackCache;
use crate::registry::HandleRegistry;

/// Default drain interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the running flush task.
pub struct FlushScheduler {
    cancel: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl FlushScheduler {
    /// Spawn the flush task on the current tokio runtime.
    pub fn start(cache: Arc<WriteBackCache>, handles: Arc<HandleRegistry>, interval: Duration) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run(cache, handles, interval, cancel_rx));
        info!(interval_ms = interval.as_millis() as u64, "Flush scheduler started");
        Self { cancel, task }
    }

    /// Request cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait until the task has exited. Returns the number of
    /// drain cycles it ran.
    pub async fn stop(self) -> u64 {
        self.cancel();
        match self.task.await {
            Ok(cycles) => {
                info!(cycles, "Flush scheduler stopped");
                cycles
            }
            Err(e) => {
                warn!(error = %e, "Flush task ended abnormally");
                0
            }
        }
    }
}

async fn run(
    cache: Arc<WriteBackCache>,
    handles: Arc<HandleRegistry>,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> u64 {
    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = cancel.changed() => {
                // Sender dropped counts as cancellation too
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
        }

        if *cancel.borrow() {
            break;
        }

        let report = cache.drain_pending(&handles).await;
        cycles += 1;
        if !report.is_clean() {
            warn!(
                cycle = cycles,
                failed = report.failed(),
                "Some values could not be flushed, retrying next cycle"
            );
        } else {
            debug!(cycle = cycles, flushed = report.flushed(), "Flush cycle complete");
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::traits::{Backend, OpenMode};

    async fn setup() -> (MemoryBackend, Arc<WriteBackCache>, Arc<HandleRegistry>) {
        let backend = MemoryBackend::new();
        let handle = backend.open("services", OpenMode::Write).await.unwrap();
        (
            backend,
            Arc::new(WriteBackCache::new()),
            Arc::new(HandleRegistry::new([handle])),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_after_interval() {
        let (backend, cache, handles) = setup().await;
        let scheduler = FlushScheduler::start(cache.clone(), handles, Duration::from_secs(5));

        cache.buffer_append("services", "user1", "login").unwrap();
        assert_eq!(backend.append_count(), 0);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(backend.append_count(), 1);
        assert_eq!(cache.pending_count(), 0);

        let cycles = scheduler.stop().await;
        assert_eq!(cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick_runs_no_drain() {
        let (backend, cache, handles) = setup().await;
        let scheduler = FlushScheduler::start(cache.clone(), handles, Duration::from_secs(5));

        cache.buffer_append("services", "k", "v").unwrap();
        let cycles = scheduler.stop().await;

        assert_eq!(cycles, 0);
        assert_eq!(backend.append_count(), 0);
        assert_eq!(cache.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (_backend, cache, handles) = setup().await;
        let scheduler = FlushScheduler::start(cache, handles, Duration::from_secs(5));

        scheduler.cancel();
        scheduler.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_finished());
        scheduler.stop().await;
    }
}
