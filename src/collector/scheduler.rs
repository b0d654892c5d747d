//! Fixed-cadence scheduler.
//!
//! Wake times sit on the grid `start + k * interval`. A cycle that overruns
//! one or more grid points skips them instead of firing late, so drift never
//! accumulates.

use std::time::Duration;

use tokio::time::Instant;

use super::cycle::{CollectionCycle, CycleError};
use crate::bus::BusTransport;
use crate::config::ConfigSource;

/// Completed iterations between two progress log lines.
pub const PROGRESS_LOG_EVERY: u64 = 1000;

/// Stand-in deadline distance when an interval does not fit in `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `at + d`, saturating to a far-future instant instead of overflowing.
fn add_or_far_future(at: Instant, d: Duration) -> Instant {
    at.checked_add(d)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

/// Something the scheduler runs once per tick.
#[async_trait::async_trait]
pub trait PollCycle: Send {
    /// Run one cycle. Errors are contained by the scheduler.
    async fn run_cycle(&mut self) -> Result<(), CycleError>;
}

#[async_trait::async_trait]
impl<T, S> PollCycle for CollectionCycle<T, S>
where
    T: BusTransport,
    S: ConfigSource,
{
    async fn run_cycle(&mut self) -> Result<(), CycleError> {
        self.run_once().await.map(|_| ())
    }
}

/// Deadline accumulator on a fixed grid.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    next: Instant,
}

impl Cadence {
    /// First deadline is `start + interval`.
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next: add_or_far_future(start, interval),
        }
    }

    /// Next wake time.
    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Move to the next grid point not before `now`.
    ///
    /// Returns how many grid points were already in the past and skipped.
    pub fn advance(&mut self, now: Instant) -> u64 {
        self.next = add_or_far_future(self.next, self.interval);
        if self.interval.is_zero() || self.next >= now {
            return 0;
        }

        let behind = (now - self.next).as_nanos();
        let skipped = behind.div_ceil(self.interval.as_nanos());
        let catch_up = self.interval.as_nanos() * skipped;
        let catch_up = Duration::from_nanos(u64::try_from(catch_up).unwrap_or(u64::MAX));
        self.next = add_or_far_future(self.next, catch_up);
        u64::try_from(skipped).unwrap_or(u64::MAX)
    }
}

/// Whether `iterations` completed cycles call for a progress log line.
fn is_progress_point(iterations: u64) -> bool {
    iterations > 0 && iterations % PROGRESS_LOG_EVERY == 0
}

/// Counters reported when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles run.
    pub iterations: u64,
    /// Cycles that returned an error.
    pub failures: u64,
    /// Failures since the last successful cycle.
    pub consecutive_failures: u64,
    /// Grid points skipped because a cycle overran.
    pub skipped_ticks: u64,
}

/// Runs a cycle at a fixed interval.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    max_iterations: Option<u64>,
}

impl Scheduler {
    /// Run forever, one cycle per `interval`.
    ///
    /// A zero interval runs cycles back-to-back.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_iterations: None,
        }
    }

    /// Stop after exactly `max` cycles.
    pub fn with_max_iterations(mut self, max: Option<u64>) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `cycle` until the iteration bound is reached.
    ///
    /// Without a bound this never returns; callers race it against a
    /// shutdown signal.
    pub async fn run<C: PollCycle + ?Sized>(&self, cycle: &mut C) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        if self.max_iterations == Some(0) {
            return stats;
        }

        let mut cadence = Cadence::new(Instant::now(), self.interval);
        tracing::info!(interval = ?self.interval, max_iterations = ?self.max_iterations, "Scheduler started");

        loop {
            if self.interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep_until(cadence.deadline()).await;
            }

            let result = cycle.run_cycle().await;
            stats.iterations += 1;
            match result {
                Ok(()) => stats.consecutive_failures = 0,
                Err(e) => {
                    stats.failures += 1;
                    stats.consecutive_failures += 1;
                    tracing::error!(
                        iteration = stats.iterations,
                        consecutive_failures = stats.consecutive_failures,
                        error = %e,
                        "Cycle failed"
                    );
                }
            }

            if is_progress_point(stats.iterations) {
                tracing::info!(failures = stats.failures, "{} cycles completed", stats.iterations);
            }

            if self
                .max_iterations
                .is_some_and(|max| stats.iterations >= max)
            {
                break;
            }

            let skipped = cadence.advance(Instant::now());
            if skipped > 0 {
                stats.skipped_ticks += skipped;
                tracing::warn!(
                    skipped,
                    interval = ?self.interval,
                    "Cycle overran its interval, skipping missed ticks"
                );
            }
        }

        tracing::info!(
            iterations = stats.iterations,
            failures = stats.failures,
            skipped_ticks = stats.skipped_ticks,
            "Scheduler stopped"
        );
        stats
    }
}
