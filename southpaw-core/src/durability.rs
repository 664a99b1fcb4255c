//! Durability controller (spec §4.6): commit/backup cadence and the bounded
//! `runTime` used by tests, driven by three stopwatches checked only at
//! transaction boundaries or when the scheduler is idle.

use std::time::{Duration, Instant};

/// `commitWatch`/`backupWatch`/`runWatch` plus the thresholds configured
/// via `commit.time.s`/`backup.time.s` and an externally supplied run
/// budget. A zero threshold disables that trigger, per spec §6's
/// configuration table.
pub struct DurabilityController {
    commit_interval: Duration,
    backup_interval: Duration,
    run_budget: Duration,
    commit_watch: Instant,
    backup_watch: Instant,
    run_watch: Instant,
}

impl DurabilityController {
    pub fn new(commit_interval: Duration, backup_interval: Duration, run_budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            commit_interval,
            backup_interval,
            run_budget,
            commit_watch: now,
            backup_watch: now,
            run_watch: now,
        }
    }

    pub fn should_backup(&self) -> bool {
        !self.backup_interval.is_zero() && self.backup_watch.elapsed() >= self.backup_interval
    }

    pub fn should_commit(&self) -> bool {
        !self.commit_interval.is_zero() && self.commit_watch.elapsed() >= self.commit_interval
    }

    pub fn should_terminate(&self) -> bool {
        !self.run_budget.is_zero() && self.run_watch.elapsed() >= self.run_budget
    }

    pub fn reset_commit(&mut self) {
        self.commit_watch = Instant::now();
    }

    pub fn reset_backup(&mut self) {
        self.backup_watch = Instant::now();
        // A backup subsumes a commit.
        self.commit_watch = Instant::now();
    }

    /// Restarts the run budget. Called at the top of each bounded run, so
    /// a driver that is invoked repeatedly (as the test suite does) gets a
    /// fresh `runTime` window each time rather than one shared across calls.
    pub fn reset_run(&mut self) {
        self.run_watch = Instant::now();
    }
}
