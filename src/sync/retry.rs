use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::schema::RetryConfig;
use crate::remote::{RemoteError, RemoteErrorKind, RemoteResult};
use crate::sync::metrics::SyncMetrics;

/// How a single remote call is retried: at most `attempts` invocations in
/// total, `delay` apart, and only for errors whose kind is in `retryable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub retryable: BTreeSet<RemoteErrorKind>,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            retryable: RemoteErrorKind::default_retryable(),
        }
    }

    pub fn metadata() -> Self {
        Self::new(2, Duration::from_millis(100))
    }

    pub fn upload() -> Self {
        Self::new(2, Duration::from_secs(1))
    }

    pub fn with_retryable(
        mut self,
        kinds: impl IntoIterator<Item = RemoteErrorKind>,
    ) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, error: &RemoteError) -> bool {
        self.retryable.contains(&error.kind)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let policy = Self::new(config.attempts, Duration::from_millis(config.delay_ms));
        match &config.retryable {
            Some(kinds) => policy.with_retryable(kinds.iter().copied()),
            None => policy,
        }
    }
}

/// Invoke `f` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out; the last error is returned in the latter cases.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    call: &'static str,
    mut f: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < attempts && policy.is_retryable(&err) => {
                warn!(
                    "{call}: attempt {attempt}/{attempts} failed, retrying in {:?}: {err}",
                    policy.delay
                );
                SyncMetrics::remote_retry(call);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                SyncMetrics::remote_failure(call);
                return Err(err);
            }
        }
    }
}
