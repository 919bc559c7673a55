use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::data_types::{
    ColumnId, FileHandleId, JobToken, ParentId, PrincipalId, RowId, RowVersion, TableId,
};
use crate::schema::ColumnDef;

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemoteErrorKind {
    // Connection reset, DNS failure, request timeout...
    Network,
    // The service asked us to slow down
    Throttled,
    // 5xx-equivalent
    Unavailable,
    BadRequest,
    NotFound,
    Conflict,
    Forbidden,
}

impl RemoteErrorKind {
    pub fn default_retryable() -> BTreeSet<RemoteErrorKind> {
        BTreeSet::from([
            RemoteErrorKind::Network,
            RemoteErrorKind::Throttled,
            RemoteErrorKind::Unavailable,
        ])
    }
}

/// A failed call against the remote table service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Remote call failed ({kind}): {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result of a single poll of an asynchronous job. "Not ready" is an expected
/// answer while the job is running and is kept apart from failures, which come
/// back as the `Err` side of the surrounding `RemoteResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    NotReady,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> PollOutcome<U> {
        match self {
            PollOutcome::Ready(value) => PollOutcome::Ready(f(value)),
            PollOutcome::NotReady => PollOutcome::NotReady,
        }
    }
}

/// Replace `old_id` with `new_id` in the table's column list; no `old_id`
/// means the column is being added.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub old_id: Option<ColumnId>,
    pub new_id: ColumnId,
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    Read,
    Download,
    Create,
    Update,
    Delete,
    ChangePermissions,
    ChangeSettings,
    Moderate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ReadOnly,
    Admin,
}

impl Permission {
    pub fn access_types(&self) -> BTreeSet<AccessType> {
        match self {
            Permission::ReadOnly => BTreeSet::from([AccessType::Read, AccessType::Download]),
            Permission::Admin => BTreeSet::from([
                AccessType::Read,
                AccessType::Download,
                AccessType::Create,
                AccessType::Update,
                AccessType::Delete,
                AccessType::ChangePermissions,
                AccessType::ChangeSettings,
                AccessType::Moderate,
            ]),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub principal_id: PrincipalId,
    pub permission: Permission,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableEntity {
    pub id: TableId,
    pub name: String,
    pub parent_id: ParentId,
    pub column_ids: Vec<ColumnId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeResponse {
    pub table_id: TableId,
    pub columns: Vec<ColumnDef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub has_header: bool,
    pub delimiter: char,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: '\t',
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportResult {
    pub rows_processed: Option<u64>,
    pub etag: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub values: Vec<Option<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSet {
    // Column ids, in the same order as each row's values
    pub headers: Vec<ColumnId>,
    pub rows: Vec<Row>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RowReference {
    pub row_id: RowId,
    pub version: RowVersion,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RowReferenceSet {
    pub table_id: TableId,
    pub etag: Option<String>,
    pub rows: Vec<RowReference>,
}

/// Typed client for the remote table service. Implementations own the wire
/// protocol and authentication; everything here is a single remote call with
/// no retrying or throttling of its own.
#[async_trait]
pub trait RemoteTableService: Send + Sync + Debug {
    async fn create_columns(&self, columns: Vec<ColumnDef>) -> RemoteResult<Vec<ColumnDef>>;

    async fn create_table(
        &self,
        name: &str,
        parent_id: &ParentId,
        column_ids: Vec<ColumnId>,
    ) -> RemoteResult<TableEntity>;

    async fn create_acl(&self, table_id: &TableId, grants: Vec<AccessGrant>) -> RemoteResult<()>;

    async fn get_columns(&self, table_id: &TableId) -> RemoteResult<Vec<ColumnDef>>;

    async fn start_schema_change_job(
        &self,
        table_id: &TableId,
        changes: Vec<ColumnChange>,
        ordered_column_ids: Vec<ColumnId>,
    ) -> RemoteResult<JobToken>;

    async fn poll_schema_change_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<SchemaChangeResponse>>;

    async fn upload_file(&self, path: &Path) -> RemoteResult<FileHandleId>;

    async fn start_tsv_import_job(
        &self,
        table_id: &TableId,
        file_handle_id: &FileHandleId,
        options: ImportOptions,
    ) -> RemoteResult<JobToken>;

    async fn poll_tsv_import_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<ImportResult>>;

    async fn start_append_job(&self, table_id: &TableId, rows: RowSet) -> RemoteResult<JobToken>;

    async fn poll_append_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<RowReferenceSet>>;
}
