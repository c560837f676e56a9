//! Metrics for queues and workers.
//!
//! Recorded through the `metrics` facade; install any exporter to collect them.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Total publishes, labelled with whether the log reported a duplicate.
    pub const JOBS_PUBLISHED_TOTAL: &str = "tributary_jobs_published_total";
    /// Total jobs fetched from a cursor.
    pub const JOBS_FETCHED_TOTAL: &str = "tributary_jobs_fetched_total";
    /// Total jobs acknowledged.
    pub const JOBS_ACKNOWLEDGED_TOTAL: &str = "tributary_jobs_acknowledged_total";
    /// Total jobs terminated.
    pub const JOBS_TERMINATED_TOTAL: &str = "tributary_jobs_terminated_total";
    /// Total fetch failures swallowed by the poll loop.
    pub const FETCH_ERRORS_TOTAL: &str = "tributary_fetch_errors_total";

    /// Jobs currently being processed.
    pub const JOBS_IN_FLIGHT: &str = "tributary_jobs_in_flight";

    /// Processor duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "tributary_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_PUBLISHED_TOTAL,
        "Total number of jobs published"
    );
    describe_counter!(
        names::JOBS_FETCHED_TOTAL,
        "Total number of jobs fetched for processing"
    );
    describe_counter!(
        names::JOBS_ACKNOWLEDGED_TOTAL,
        "Total number of jobs acknowledged after successful processing"
    );
    describe_counter!(
        names::JOBS_TERMINATED_TOTAL,
        "Total number of jobs terminated after failed processing"
    );
    describe_counter!(
        names::FETCH_ERRORS_TOTAL,
        "Total number of failed fetches treated as empty"
    );

    describe_gauge!(
        names::JOBS_IN_FLIGHT,
        "Current number of jobs being processed"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job processing duration in seconds"
    );
}

/// Producer-side metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a publish.
    pub fn job_published(queue: &str, job_name: &str, duplicate: bool) {
        counter!(
            names::JOBS_PUBLISHED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "duplicate" => duplicate.to_string()
        )
        .increment(1);
    }
}

/// Worker-side metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a fetched batch.
    pub fn jobs_fetched(queue: &str, count: usize) {
        counter!(
            names::JOBS_FETCHED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(count as u64);
    }

    /// Record a swallowed fetch failure.
    pub fn fetch_failed(queue: &str) {
        counter!(
            names::FETCH_ERRORS_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    /// Record a job acknowledged.
    pub fn job_acknowledged(queue: &str, duration: Duration) {
        counter!(
            names::JOBS_ACKNOWLEDGED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "acknowledged"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job terminated. `reason` is `failed` or `panicked`.
    pub fn job_terminated(queue: &str, reason: &'static str, duration: Duration) {
        counter!(
            names::JOBS_TERMINATED_TOTAL,
            "queue" => queue.to_string(),
            "reason" => reason
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "terminated"
        )
        .record(duration.as_secs_f64());
    }

    /// Update the in-flight gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_in_flight(queue: &str, in_flight: usize) {
        gauge!(
            names::JOBS_IN_FLIGHT,
            "queue" => queue.to_string()
        )
        .set(in_flight as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // No recorder installed: registration must still be a no-op.
        register_metrics();
    }

    #[test]
    fn test_recorders_without_exporter() {
        JobMetrics::job_published("emails", "send", false);
        WorkerMetrics::jobs_fetched("emails", 3);
        WorkerMetrics::fetch_failed("emails");
        WorkerMetrics::job_acknowledged("emails", Duration::from_millis(5));
        WorkerMetrics::job_terminated("emails", "failed", Duration::from_millis(5));
        WorkerMetrics::update_in_flight("emails", 2);
    }
}
