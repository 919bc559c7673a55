//! An in-memory [`RemoteTableService`] for exercising the drivers without a
//! live service. Calls are recorded, failures can be injected per call and
//! jobs can be made to report "not ready" a set number of times.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::data_types::{ColumnId, FileHandleId, JobToken, ParentId, RowId, TableId};
use crate::remote::{
    AccessGrant, ColumnChange, ImportOptions, ImportResult, PollOutcome, RemoteError,
    RemoteErrorKind, RemoteResult, RemoteTableService, RowReference, RowReferenceSet, RowSet,
    SchemaChangeResponse, TableEntity,
};
use crate::schema::ColumnDef;
use crate::sync::JobKind;

// Calls that only read remote state
const READ_CALLS: [&str; 4] = [
    "get_columns",
    "poll_schema_change_job",
    "poll_tsv_import_job",
    "poll_append_job",
];

#[derive(Debug, Clone)]
enum JobPayload {
    SchemaChange { ordered_column_ids: Vec<ColumnId> },
    TsvImport { rows: u64 },
    Append { rows: usize },
}

#[derive(Debug, Clone)]
struct FakeJob {
    table_id: TableId,
    not_ready: u32,
    payload: JobPayload,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    next_row_id: RowId,
    columns: HashMap<ColumnId, ColumnDef>,
    tables: HashMap<TableId, TableEntity>,
    acls: HashMap<TableId, Vec<AccessGrant>>,
    files: HashMap<FileHandleId, String>,
    jobs: HashMap<JobToken, FakeJob>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    not_ready_polls: HashMap<JobKind, u32>,
    dropped_columns: usize,
    omit_row_count: bool,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn resolve(&self, column_ids: &[ColumnId]) -> RemoteResult<Vec<ColumnDef>> {
        column_ids
            .iter()
            .map(|id| {
                self.columns.get(id).cloned().ok_or_else(|| {
                    RemoteError::new(RemoteErrorKind::NotFound, format!("No column {id}"))
                })
            })
            .collect()
    }

    fn table(&self, table_id: &TableId) -> RemoteResult<&TableEntity> {
        self.tables.get(table_id).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::NotFound, format!("No table {table_id}"))
        })
    }

    fn start_job(&mut self, kind: JobKind, table_id: &TableId, payload: JobPayload) -> JobToken {
        let token = self.next_id("job");
        let not_ready = self.not_ready_polls.get(&kind).copied().unwrap_or_default();
        self.jobs.insert(
            token.clone(),
            FakeJob {
                table_id: table_id.clone(),
                not_ready,
                payload,
            },
        );
        token
    }

    // None while the job still has "not ready" answers to give
    fn poll_job(&mut self, token: &JobToken, table_id: &TableId) -> RemoteResult<Option<FakeJob>> {
        let job = self
            .jobs
            .get_mut(token)
            .filter(|job| &job.table_id == table_id)
            .ok_or_else(|| {
                RemoteError::new(RemoteErrorKind::NotFound, format!("No job {token}"))
            })?;

        if job.not_ready > 0 {
            job.not_ready -= 1;
            return Ok(None);
        }
        Ok(self.jobs.remove(token))
    }
}

#[derive(Debug, Default)]
pub struct FakeRemoteService {
    state: Mutex<FakeState>,
}

impl FakeRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table directly, bypassing call recording. Returns its id.
    pub fn seed_table(&self, name: &str, columns: Vec<ColumnDef>) -> TableId {
        let mut state = self.state.lock();
        let column_ids = columns
            .into_iter()
            .map(|column| {
                let id = state.next_id("col");
                state
                    .columns
                    .insert(id.clone(), column.with_remote_id(id.clone()));
                id
            })
            .collect();

        let id = state.next_id("syn");
        state.tables.insert(
            id.clone(),
            TableEntity {
                id: id.clone(),
                name: name.to_string(),
                parent_id: "project".to_string(),
                column_ids,
            },
        );
        id
    }

    /// Fail the next invocation of `call` with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, call: &'static str, error: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Jobs of `kind` started from now on answer "not ready" `polls` times
    /// before completing.
    pub fn set_not_ready_polls(&self, kind: JobKind, polls: u32) {
        self.state.lock().not_ready_polls.insert(kind, polls);
    }

    /// Leave the last `count` columns out of every `create_columns` response.
    pub fn drop_created_columns(&self, count: usize) {
        self.state.lock().dropped_columns = count;
    }

    /// Report imports without a processed row count.
    pub fn omit_row_count(&self) {
        self.state.lock().omit_row_count = true;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Recorded calls that create or change anything remotely
    pub fn write_calls(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| !READ_CALLS.contains(c))
            .collect()
    }

    pub fn table(&self, table_id: &TableId) -> Option<TableEntity> {
        self.state.lock().tables.get(table_id).cloned()
    }

    pub fn acl(&self, table_id: &TableId) -> Option<Vec<AccessGrant>> {
        self.state.lock().acls.get(table_id).cloned()
    }

    pub fn table_columns(&self, table_id: &TableId) -> Vec<ColumnDef> {
        let state = self.state.lock();
        state
            .tables
            .get(table_id)
            .and_then(|t| state.resolve(&t.column_ids).ok())
            .unwrap_or_default()
    }

    // Record the call and hand out any failure queued for it
    fn record(&self, call: &'static str) -> RemoteResult<parking_lot::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.get_mut(call).and_then(|f| f.pop_front()) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl RemoteTableService for FakeRemoteService {
    async fn create_columns(&self, columns: Vec<ColumnDef>) -> RemoteResult<Vec<ColumnDef>> {
        let mut state = self.record("create_columns")?;
        let keep = columns.len().saturating_sub(state.dropped_columns);

        Ok(columns
            .into_iter()
            .take(keep)
            .map(|column| {
                let id = state.next_id("col");
                let column = column.with_remote_id(id.clone());
                state.columns.insert(id, column.clone());
                column
            })
            .collect())
    }

    async fn create_table(
        &self,
        name: &str,
        parent_id: &ParentId,
        column_ids: Vec<ColumnId>,
    ) -> RemoteResult<TableEntity> {
        let mut state = self.record("create_table")?;
        state.resolve(&column_ids)?;

        let table = TableEntity {
            id: state.next_id("syn"),
            name: name.to_string(),
            parent_id: parent_id.clone(),
            column_ids,
        };
        state.tables.insert(table.id.clone(), table.clone());
        Ok(table)
    }

    async fn create_acl(&self, table_id: &TableId, grants: Vec<AccessGrant>) -> RemoteResult<()> {
        let mut state = self.record("create_acl")?;
        state.table(table_id)?;
        state.acls.insert(table_id.clone(), grants);
        Ok(())
    }

    async fn get_columns(&self, table_id: &TableId) -> RemoteResult<Vec<ColumnDef>> {
        let state = self.record("get_columns")?;
        let table = state.table(table_id)?;
        state.resolve(&table.column_ids)
    }

    async fn start_schema_change_job(
        &self,
        table_id: &TableId,
        changes: Vec<ColumnChange>,
        ordered_column_ids: Vec<ColumnId>,
    ) -> RemoteResult<JobToken> {
        let mut state = self.record("start_schema_change_job")?;
        let live = state.table(table_id)?.column_ids.clone();

        for change in &changes {
            if let Some(old_id) = &change.old_id {
                if !live.contains(old_id) {
                    return Err(RemoteError::new(
                        RemoteErrorKind::BadRequest,
                        format!("Column {old_id} is not part of table {table_id}"),
                    ));
                }
            }
        }
        state.resolve(&ordered_column_ids)?;

        Ok(state.start_job(
            JobKind::SchemaChange,
            table_id,
            JobPayload::SchemaChange { ordered_column_ids },
        ))
    }

    async fn poll_schema_change_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<SchemaChangeResponse>> {
        let mut state = self.record("poll_schema_change_job")?;
        let Some(job) = state.poll_job(token, table_id)? else {
            return Ok(PollOutcome::NotReady);
        };
        let JobPayload::SchemaChange { ordered_column_ids } = job.payload else {
            return Err(RemoteError::new(
                RemoteErrorKind::BadRequest,
                format!("Job {token} is not a schema change"),
            ));
        };

        let columns = state.resolve(&ordered_column_ids)?;
        if let Some(table) = state.tables.get_mut(table_id) {
            table.column_ids = ordered_column_ids;
        }
        Ok(PollOutcome::Ready(SchemaChangeResponse {
            table_id: table_id.clone(),
            columns,
        }))
    }

    async fn upload_file(&self, path: &Path) -> RemoteResult<FileHandleId> {
        let mut state = self.record("upload_file")?;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RemoteError::new(
                RemoteErrorKind::BadRequest,
                format!("Couldn't read {}: {e}", path.display()),
            )
        })?;

        let id = state.next_id("file");
        state.files.insert(id.clone(), contents);
        Ok(id)
    }

    async fn start_tsv_import_job(
        &self,
        table_id: &TableId,
        file_handle_id: &FileHandleId,
        options: ImportOptions,
    ) -> RemoteResult<JobToken> {
        let mut state = self.record("start_tsv_import_job")?;
        state.table(table_id)?;
        let contents = state.files.get(file_handle_id).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("No file handle {file_handle_id}"),
            )
        })?;

        let lines = contents.lines().filter(|l| !l.is_empty()).count();
        let rows = if options.has_header {
            lines.saturating_sub(1)
        } else {
            lines
        };
        Ok(state.start_job(
            JobKind::TsvUpload,
            table_id,
            JobPayload::TsvImport { rows: rows as u64 },
        ))
    }

    async fn poll_tsv_import_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<ImportResult>> {
        let mut state = self.record("poll_tsv_import_job")?;
        let Some(job) = state.poll_job(token, table_id)? else {
            return Ok(PollOutcome::NotReady);
        };
        let JobPayload::TsvImport { rows } = job.payload else {
            return Err(RemoteError::new(
                RemoteErrorKind::BadRequest,
                format!("Job {token} is not an import"),
            ));
        };

        Ok(PollOutcome::Ready(ImportResult {
            rows_processed: (!state.omit_row_count).then_some(rows),
            etag: Some(format!("etag-{token}")),
        }))
    }

    async fn start_append_job(&self, table_id: &TableId, rows: RowSet) -> RemoteResult<JobToken> {
        let mut state = self.record("start_append_job")?;
        let table = state.table(table_id)?;

        if let Some(header) = rows.headers.iter().find(|h| !table.column_ids.contains(h)) {
            return Err(RemoteError::new(
                RemoteErrorKind::BadRequest,
                format!("Column {header} is not part of table {table_id}"),
            ));
        }
        if rows.rows.iter().any(|r| r.values.len() != rows.headers.len()) {
            return Err(RemoteError::new(
                RemoteErrorKind::BadRequest,
                "Row width doesn't match the headers",
            ));
        }

        Ok(state.start_job(
            JobKind::RowAppend,
            table_id,
            JobPayload::Append {
                rows: rows.rows.len(),
            },
        ))
    }

    async fn poll_append_job(
        &self,
        token: &JobToken,
        table_id: &TableId,
    ) -> RemoteResult<PollOutcome<RowReferenceSet>> {
        let mut state = self.record("poll_append_job")?;
        let Some(job) = state.poll_job(token, table_id)? else {
            return Ok(PollOutcome::NotReady);
        };
        let JobPayload::Append { rows } = job.payload else {
            return Err(RemoteError::new(
                RemoteErrorKind::BadRequest,
                format!("Job {token} is not an append"),
            ));
        };

        let first = state.next_row_id + 1;
        state.next_row_id += rows as RowId;
        Ok(PollOutcome::Ready(RowReferenceSet {
            table_id: table_id.clone(),
            etag: Some(format!("etag-{token}")),
            rows: (first..first + rows as RowId)
                .map(|row_id| RowReference { row_id, version: 1 })
                .collect(),
        }))
    }
}
