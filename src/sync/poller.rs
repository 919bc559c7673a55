use std::future::Future;
use std::time::Duration;

use strum_macros::{Display, EnumString};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::schema::PollConfig;
use crate::data_types::JobToken;
use crate::remote::PollOutcome;
use crate::sync::metrics::SyncMetrics;
use crate::sync::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    SchemaChange,
    TsvUpload,
    RowAppend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSchedule {
    Fixed(Duration),
    // Consumed one entry per "not ready" answer; the last entry is reused once
    // the schedule runs out
    Backoff(Vec<Duration>),
}

impl PollSchedule {
    // Delay following the n-th (zero-based) "not ready" answer
    pub fn delay(&self, n: usize) -> Duration {
        match self {
            PollSchedule::Fixed(interval) => *interval,
            PollSchedule::Backoff(delays) => delays
                .get(n)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// Upper bound on how long we wait for a job: at most `max_polls` polls, spaced
/// according to `schedule`. There's no wall-clock deadline beyond that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBudget {
    pub max_polls: u32,
    pub schedule: PollSchedule,
}

impl PollBudget {
    pub fn fixed(max_polls: u32, interval: Duration) -> Self {
        Self {
            max_polls,
            schedule: PollSchedule::Fixed(interval),
        }
    }

    pub fn backoff(max_polls: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_polls,
            schedule: PollSchedule::Backoff(delays),
        }
    }
}

impl From<&PollConfig> for PollBudget {
    fn from(config: &PollConfig) -> Self {
        match &config.backoff_ms {
            Some(delays) => Self::backoff(
                config.max_polls,
                delays.iter().copied().map(Duration::from_millis).collect(),
            ),
            None => Self::fixed(config.max_polls, Duration::from_millis(config.interval_ms)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Started,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

/// A remote asynchronous job, from the moment its start call handed back a
/// token until it succeeds, fails or runs out of polls.
#[derive(Debug)]
pub struct AsyncJob {
    kind: JobKind,
    token: JobToken,
    budget: PollBudget,
    poll_count: u32,
    state: JobState,
}

impl AsyncJob {
    pub fn new(kind: JobKind, token: JobToken, budget: PollBudget) -> Self {
        Self {
            kind,
            token,
            budget,
            poll_count: 0,
            state: JobState::Started,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn token(&self) -> &JobToken {
        &self.token
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Drive the job to a terminal state. `poll` performs one poll call: a
    /// "not ready" answer schedules another poll (budget permitting), a value
    /// finishes the job and any error is a remote failure that is handed back
    /// as-is.
    pub async fn poll_until_done<T, F, Fut>(&mut self, mut poll: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<PollOutcome<T>>>,
    {
        let max_polls = self.budget.max_polls.max(1);
        let started = Instant::now();
        self.state = JobState::Polling;

        loop {
            self.poll_count += 1;
            SyncMetrics::job_poll(self.kind);

            match poll().await {
                Ok(PollOutcome::Ready(result)) => {
                    self.finish(JobState::Succeeded, started);
                    info!(
                        "{} job {} succeeded after {} poll(s)",
                        self.kind, self.token, self.poll_count
                    );
                    return Ok(result);
                }
                Ok(PollOutcome::NotReady) if self.poll_count >= max_polls => {
                    self.finish(JobState::TimedOut, started);
                    warn!(
                        "{} job {} still running after {} poll(s), giving up",
                        self.kind, self.token, self.poll_count
                    );
                    return Err(SyncError::JobTimedOut {
                        kind: self.kind,
                        token: self.token.clone(),
                        polls: self.poll_count,
                    });
                }
                Ok(PollOutcome::NotReady) => {
                    let delay = self.budget.schedule.delay(self.poll_count as usize - 1);
                    debug!(
                        "{} job {} not ready (poll {}/{max_polls}), next poll in {delay:?}",
                        self.kind, self.token, self.poll_count
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.finish(JobState::Failed, started);
                    warn!("{} job {} failed: {err}", self.kind, self.token);
                    return Err(err);
                }
            }
        }
    }

    fn finish(&mut self, state: JobState, started: Instant) {
        self.state = state;
        SyncMetrics::job_finished(
            self.kind,
            match state {
                JobState::Succeeded => "succeeded",
                JobState::TimedOut => "timed_out",
                _ => "failed",
            },
            started.elapsed().as_secs_f64(),
        );
    }
}
