use crate::data_types::{JobToken, PrincipalId};
use crate::remote::{RemoteError, RemoteErrorKind};

pub mod driver;
pub(crate) mod metrics;
pub mod poller;
pub mod rate_gate;
pub mod reconcile;
pub mod retry;

pub use driver::{DriverConfig, SchemaChangeOutcome, TableDriver};
pub use poller::{AsyncJob, JobKind, PollBudget, PollSchedule};
pub use rate_gate::{Rate, RateBucket, RateGate};
pub use reconcile::{is_compatible, reconcile, Reconciliation, SchemaDiff};
pub use retry::{with_retry, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    // Destructive or incompatible change; resubmitting the same request
    // reproduces it
    #[error("Schema change rejected for column(s) {columns:?}: {reason}")]
    SchemaRejected {
        reason: String,
        columns: Vec<String>,
    },

    #[error("Inconsistent definition for column {column:?}: {reason}")]
    SchemaInconsistent { column: String, reason: String },

    #[error("Column {name:?} is defined more than once")]
    DuplicateColumn { name: String },

    // The job may still complete remotely
    #[error("{kind} job {token} did not complete within the allotted {polls} polls")]
    JobTimedOut {
        kind: JobKind,
        token: JobToken,
        polls: u32,
    },

    #[error("Expected exactly {expected} {what}, got {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Import job {token} succeeded without reporting a row count")]
    MissingRowCount { token: JobToken },

    #[error("Principal(s) {principals:?} requested with both read and admin access")]
    OverlappingPrincipals { principals: Vec<PrincipalId> },
}

impl SyncError {
    /// Whether a caller may resubmit: true only for a remote failure whose kind
    /// is in [`RemoteErrorKind::default_retryable`]. This is independent of any
    /// `retry.*.retryable` override the failed call ran with. Every other error
    /// reproduces on resubmission or, for timeouts, needs a fresh poll.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(RemoteError { kind, .. })
                if RemoteErrorKind::default_retryable().contains(kind)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::JobTimedOut { .. })
    }
}

pub type SyncResult<T, E = SyncError> = Result<T, E>;
