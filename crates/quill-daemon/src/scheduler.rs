//! Periodic jobs.
//!
//! Every tick the scheduler distributes the subscription pool of the last
//! elapsed period and retries queued content purchase distributions.
//! Periods are aligned to multiples of `pool_period_secs` from the Unix epoch.
//! A period that was already distributed replays cheaply, so ticks may repeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::DaemonState;

/// Allows one run of a job at a time within this process.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Held while a job runs; releases the flight on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    running: &'a AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight, or `None` if a run is in progress.
    pub fn try_start(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                running: &self.running,
            })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// The most recent period that ended at or before `now`.
pub fn previous_period(now: u64, period_secs: u64) -> Option<(u64, u64)> {
    if period_secs == 0 {
        return None;
    }
    let end = now / period_secs * period_secs;
    let start = end.checked_sub(period_secs)?;
    Some((start, end))
}

/// Run until a shutdown signal arrives.
pub async fn run(state: Arc<DaemonState>, mut shutdown: broadcast::Receiver<()>) {
    let tick_secs = state.config.scheduler.tick_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
    info!(tick_secs, period_secs = state.config.scheduler.pool_period_secs, "scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => tick(&state).await,
            _ = shutdown.recv() => break,
        }
    }
    info!("scheduler stopped");
}

async fn tick(state: &Arc<DaemonState>) {
    let now = state.clock.now();
    if let Some((start, end)) = previous_period(now, state.config.scheduler.pool_period_secs) {
        run_pool(state, start, end).await;
    }
    reconcile(state).await;
}

async fn run_pool(state: &Arc<DaemonState>, start: u64, end: u64) {
    let Some(flight) = state.pool_job.try_start() else {
        debug!(period_start = start, "pool job already running");
        return;
    };
    let job = state.clone();
    let result =
        tokio::task::spawn_blocking(move || job.revenue.distribute_subscription_pool(start, end)).await;
    drop(flight);

    match result {
        Ok(Ok(dist)) if dist.replayed => {
            debug!(period_start = start, "pool period already distributed");
        }
        Ok(Ok(dist)) => {
            info!(
                period_start = start,
                period_end = end,
                gross_pool = %dist.gross_pool,
                writers = dist.splits.len(),
                "scheduled pool distribution finished"
            );
        }
        Ok(Err(e)) => {
            warn!(period_start = start, error = %e, retryable = e.is_retryable(), "scheduled pool distribution failed");
        }
        Err(e) => error!(error = %e, "pool job panicked"),
    }
}

async fn reconcile(state: &Arc<DaemonState>) {
    let job = state.clone();
    let batch = state.config.scheduler.reconcile_batch;
    match tokio::task::spawn_blocking(move || job.revenue.reconcile_pending(batch)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "reconciliation pass failed"),
        Err(e) => error!(error = %e, "reconciliation job panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::DAY_SECS;

    #[test]
    fn test_previous_period() {
        let now = 20_000 * DAY_SECS + 3_600;
        assert_eq!(
            previous_period(now, DAY_SECS),
            Some((19_999 * DAY_SECS, 20_000 * DAY_SECS))
        );
        assert_eq!(previous_period(DAY_SECS - 1, DAY_SECS), None);
        assert_eq!(previous_period(now, 0), None);
    }

    #[test]
    fn test_single_flight() {
        let flight = SingleFlight::new();
        let guard = flight.try_start().expect("first");
        assert!(flight.try_start().is_none());
        drop(guard);
        assert!(flight.try_start().is_some());
    }
}
