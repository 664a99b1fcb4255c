//! Metrics/observability (spec §4.7): counters and gauges for lag, pending
//! work, emits, and backups, recorded through the process-wide `metrics`
//! registry so any compatible exporter (Prometheus, statsd, ...) can be
//! wired in by the binary without this crate knowing about it.

use metrics::{describe_counter, describe_gauge, describe_histogram, gauge, histogram, increment_counter, Label};

const CONSUMED_TOTAL: &str = "southpaw_consumed_total";
const LAG: &str = "southpaw_lag";
const LAG_TOTAL: &str = "southpaw_lag_total";
const PENDING: &str = "southpaw_pending";
const PENDING_TOTAL: &str = "southpaw_pending_total";
const EMITTED_TOTAL: &str = "southpaw_emitted_total";
const COMMITS_TOTAL: &str = "southpaw_commits_total";
const COMMIT_SECONDS: &str = "southpaw_commit_seconds";
const BACKUPS_CREATED_TOTAL: &str = "southpaw_backups_created_total";
const BACKUPS_RESTORED_TOTAL: &str = "southpaw_backups_restored_total";
const BACKUPS_DELETED_TOTAL: &str = "southpaw_backups_deleted_total";
const BACKUP_SECONDS: &str = "southpaw_backup_seconds";

/// A handle the engine owns and threads explicitly into every component
/// that reports a measurement, rather than reaching for a global singleton
/// (spec §9, "Global metrics registry singleton in source"). The handle
/// itself is just a set of label-bearing wrappers around the `metrics`
/// crate's free functions, so cloning it is free.
#[derive(Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        describe_counter!(CONSUMED_TOTAL, "Records consumed per input stream");
        describe_gauge!(LAG, "Records behind, per input stream");
        describe_gauge!(LAG_TOTAL, "Records behind, summed across every input stream");
        describe_gauge!(PENDING, "Pending root records waiting to be denormalized, per output");
        describe_gauge!(PENDING_TOTAL, "Pending root records, summed across every output");
        describe_counter!(EMITTED_TOTAL, "Denormalized records emitted per output");
        describe_counter!(COMMITS_TOTAL, "State store commits performed");
        describe_histogram!(COMMIT_SECONDS, "Time spent per commit");
        describe_counter!(BACKUPS_CREATED_TOTAL, "Backups created");
        describe_counter!(BACKUPS_RESTORED_TOTAL, "Backups restored from");
        describe_counter!(BACKUPS_DELETED_TOTAL, "Backups deleted");
        describe_histogram!(BACKUP_SECONDS, "Time spent per backup");
        Self
    }

    pub fn record_consumed(&self, input: &str) {
        increment_counter!(CONSUMED_TOTAL, vec![Label::new("input", input.to_string())]);
    }

    pub fn set_lag(&self, input: &str, value: u64) {
        gauge!(LAG, value as f64, vec![Label::new("input", input.to_string())]);
    }

    pub fn set_total_lag(&self, value: u64) {
        gauge!(LAG_TOTAL, value as f64);
    }

    pub fn set_pending(&self, output: &str, value: usize) {
        gauge!(PENDING, value as f64, vec![Label::new("output", output.to_string())]);
    }

    pub fn set_total_pending(&self, value: usize) {
        gauge!(PENDING_TOTAL, value as f64);
    }

    pub fn record_emit(&self, output: &str) {
        increment_counter!(EMITTED_TOTAL, vec![Label::new("output", output.to_string())]);
    }

    pub fn record_commit(&self, elapsed: std::time::Duration) {
        increment_counter!(COMMITS_TOTAL);
        histogram!(COMMIT_SECONDS, elapsed.as_secs_f64());
    }

    pub fn record_backup_created(&self, elapsed: std::time::Duration) {
        increment_counter!(BACKUPS_CREATED_TOTAL);
        histogram!(BACKUP_SECONDS, elapsed.as_secs_f64());
    }

    pub fn record_backup_restored(&self) {
        increment_counter!(BACKUPS_RESTORED_TOTAL);
    }

    pub fn record_backup_deleted(&self) {
        increment_counter!(BACKUPS_DELETED_TOTAL);
    }
}
