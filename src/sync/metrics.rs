use crate::sync::poller::JobKind;
use crate::sync::rate_gate::RateBucket;
use metrics::{
    counter, describe_counter, describe_histogram, histogram, Counter, Histogram,
};

const REMOTE_CALLS: &str = "tablesync_remote_calls_total";
const REMOTE_RETRIES: &str = "tablesync_remote_retries_total";
const REMOTE_FAILURES: &str = "tablesync_remote_failures_total";
const JOB_POLLS: &str = "tablesync_job_polls_total";
const JOB_OUTCOMES: &str = "tablesync_jobs_total";
const JOB_TIME: &str = "tablesync_job_time_seconds";
const RATE_GATE_WAIT: &str = "tablesync_rate_gate_wait_seconds";
const SCHEMA_REJECTIONS: &str = "tablesync_schema_rejections_total";
const SCHEMA_CHANGES: &str = "tablesync_schema_changes_total";

#[derive(Clone)]
pub struct SyncMetrics {
    pub schema_rejections: Counter,
    pub schema_changes: Counter,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    fn new() -> Self {
        describe_counter!(REMOTE_CALLS, "The number of calls issued to the remote service");
        describe_counter!(
            REMOTE_RETRIES,
            "The number of remote calls repeated after a retryable failure"
        );
        describe_counter!(
            REMOTE_FAILURES,
            "The number of remote calls that failed after exhausting retries"
        );
        describe_counter!(JOB_POLLS, "The number of polls issued for asynchronous jobs");
        describe_counter!(
            JOB_OUTCOMES,
            "The number of asynchronous jobs that reached a terminal state"
        );
        describe_histogram!(
            JOB_TIME,
            "The time between starting to poll a job and its terminal state"
        );
        describe_histogram!(
            RATE_GATE_WAIT,
            "The time spent waiting for a rate gate token"
        );
        describe_counter!(
            SCHEMA_REJECTIONS,
            "The number of schema changes rejected as destructive or incompatible"
        );
        describe_counter!(
            SCHEMA_CHANGES,
            "The number of schema change jobs submitted to the remote service"
        );

        Self {
            schema_rejections: counter!(SCHEMA_REJECTIONS),
            schema_changes: counter!(SCHEMA_CHANGES),
        }
    }

    pub fn remote_call(call: &'static str) {
        counter!(REMOTE_CALLS, "call" => call).increment(1);
    }

    pub fn remote_retry(call: &'static str) {
        counter!(REMOTE_RETRIES, "call" => call).increment(1);
    }

    pub fn remote_failure(call: &'static str) {
        counter!(REMOTE_FAILURES, "call" => call).increment(1);
    }

    pub fn job_poll(kind: JobKind) {
        counter!(JOB_POLLS, "kind" => kind.to_string()).increment(1);
    }

    pub fn job_finished(kind: JobKind, outcome: &'static str, seconds: f64) {
        counter!(JOB_OUTCOMES, "kind" => kind.to_string(), "outcome" => outcome).increment(1);
        let job_time: Histogram = histogram!(JOB_TIME, "kind" => kind.to_string());
        job_time.record(seconds);
    }

    pub fn rate_gate_wait(bucket: RateBucket, seconds: f64) {
        histogram!(RATE_GATE_WAIT, "bucket" => bucket.to_string()).record(seconds);
    }
}
