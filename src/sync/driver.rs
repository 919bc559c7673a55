use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use crate::config::schema::TableSyncConfig;
use crate::data_types::{ColumnId, ParentId, PrincipalId, TableId};
use crate::remote::{
    AccessGrant, ImportOptions, Permission, RemoteResult, RemoteTableService, RowReferenceSet,
    RowSet, SchemaChangeResponse, TableEntity,
};
use crate::schema::{ColumnDef, TableSchema};
use crate::sync::metrics::SyncMetrics;
use crate::sync::poller::{AsyncJob, JobKind, PollBudget};
use crate::sync::rate_gate::{RateBucket, RateGate};
use crate::sync::reconcile::reconcile;
use crate::sync::retry::{with_retry, RetryPolicy};
use crate::sync::{SyncError, SyncResult};

/// Per-call-site tuning for the drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    // Everything except the file upload itself
    pub metadata_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
    pub schema_change_polls: PollBudget,
    pub tsv_upload_polls: PollBudget,
    pub row_append_polls: PollBudget,
    pub import_options: ImportOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&TableSyncConfig::default())
    }
}

impl From<&TableSyncConfig> for DriverConfig {
    fn from(config: &TableSyncConfig) -> Self {
        Self {
            metadata_retry: RetryPolicy::from(&config.retry.metadata),
            upload_retry: RetryPolicy::from(&config.retry.upload),
            schema_change_polls: PollBudget::from(&config.polling.schema_change),
            tsv_upload_polls: PollBudget::from(&config.polling.tsv_upload),
            row_append_polls: PollBudget::from(&config.polling.row_append),
            import_options: ImportOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeOutcome {
    // Live columns already match; nothing was submitted
    Unchanged,
    Applied(SchemaChangeResponse),
}

// One grant per distinct principal. A principal in both lists would need a
// precedence rule we don't want to guess at, so it's rejected.
pub(crate) fn access_grants(
    readers: &[PrincipalId],
    admins: &[PrincipalId],
) -> SyncResult<Vec<AccessGrant>> {
    let admin_set: HashSet<_> = admins.iter().collect();
    let overlapping = readers
        .iter()
        .filter(|p| admin_set.contains(p))
        .unique()
        .sorted()
        .copied()
        .collect_vec();
    if !overlapping.is_empty() {
        return Err(SyncError::OverlappingPrincipals {
            principals: overlapping,
        });
    }

    let grant = |permission| {
        move |principal_id: &PrincipalId| AccessGrant {
            principal_id: *principal_id,
            permission,
        }
    };
    Ok(readers
        .iter()
        .unique()
        .map(grant(Permission::ReadOnly))
        .chain(admins.iter().unique().map(grant(Permission::Admin)))
        .collect())
}

fn created_ids(created: &[ColumnDef]) -> SyncResult<Vec<ColumnId>> {
    created
        .iter()
        .map(|c| {
            c.remote_id.clone().ok_or_else(|| SyncError::SchemaInconsistent {
                column: c.name.clone(),
                reason: "no remote id was assigned to the column".to_string(),
            })
        })
        .collect()
}

/// Drives table creation, schema changes, bulk uploads and row appends against
/// the remote service. Every remote call goes through the shared rate gate and
/// a retry policy; asynchronous jobs are polled to completion.
///
/// Holds no per-table state, so one driver can serve concurrent callers working
/// on different tables.
pub struct TableDriver {
    service: Arc<dyn RemoteTableService>,
    rate_gate: Arc<RateGate>,
    config: DriverConfig,
    metrics: SyncMetrics,
}

impl TableDriver {
    pub fn new(
        service: Arc<dyn RemoteTableService>,
        rate_gate: Arc<RateGate>,
        config: DriverConfig,
    ) -> Self {
        Self {
            service,
            rate_gate,
            config,
            metrics: SyncMetrics::default(),
        }
    }

    pub fn from_config(service: Arc<dyn RemoteTableService>, config: &TableSyncConfig) -> Self {
        Self::new(
            service,
            Arc::new(RateGate::new(&config.rate_limits)),
            DriverConfig::from(config),
        )
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        &self.rate_gate
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    // A single remote call: throttled by `bucket` and retried per `policy`
    async fn call<T, F, Fut>(
        &self,
        call: &'static str,
        bucket: RateBucket,
        policy: &RetryPolicy,
        mut f: F,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let rate_gate = &self.rate_gate;
        let result = with_retry(policy, call, move || {
            let request = f();
            async move {
                rate_gate.acquire(bucket).await;
                SyncMetrics::remote_call(call);
                request.await
            }
        })
        .await?;

        Ok(result)
    }

    async fn create_columns(&self, columns: &[ColumnDef]) -> SyncResult<Vec<ColumnDef>> {
        let service = &self.service;
        let created = self
            .call(
                "create_columns",
                RateBucket::General,
                &self.config.metadata_retry,
                move || service.create_columns(columns.to_vec()),
            )
            .await?;

        if created.len() != columns.len() {
            return Err(SyncError::CountMismatch {
                what: "created columns",
                expected: columns.len(),
                actual: created.len(),
            });
        }
        Ok(created)
    }

    /// Create the columns, then the table referencing them, then its ACL:
    /// read-only access for `readers` and admin access for `admins`.
    pub async fn create_table(
        &self,
        name: &str,
        parent_id: &ParentId,
        schema: &TableSchema,
        readers: &[PrincipalId],
        admins: &[PrincipalId],
    ) -> SyncResult<TableEntity> {
        let grants = access_grants(readers, admins)?;
        let service = &self.service;
        let policy = &self.config.metadata_retry;

        let created = self.create_columns(schema.columns()).await?;
        let column_ids = &created_ids(&created)?;
        debug!("Created {} column(s) for table {name:?}", column_ids.len());

        let table = self
            .call("create_table", RateBucket::General, policy, move || {
                service.create_table(name, parent_id, column_ids.clone())
            })
            .await?;

        let table_id = &table.id;
        let grants = &grants;
        self.call("create_acl", RateBucket::General, policy, move || {
            service.create_acl(table_id, grants.clone())
        })
        .await?;

        info!(
            "Created table {name:?} ({}) with {} column(s) and {} grant(s)",
            table.id,
            table.column_ids.len(),
            grants.len()
        );
        Ok(table)
    }

    /// Bring the live columns of `table_id` in line with `desired`. Destructive
    /// or incompatible changes are rejected before anything is written.
    pub async fn apply_schema(
        &self,
        table_id: &TableId,
        desired: &TableSchema,
    ) -> SyncResult<SchemaChangeOutcome> {
        let service = &self.service;
        let policy = &self.config.metadata_retry;

        let live = self
            .call("get_columns", RateBucket::Metadata, policy, move || {
                service.get_columns(table_id)
            })
            .await?;

        let reconciliation = reconcile(&live, desired.columns()).map_err(|e| {
            if matches!(e, SyncError::SchemaRejected { .. }) {
                self.metrics.schema_rejections.increment(1);
            }
            e
        })?;

        if !reconciliation.requires_change() {
            info!("Table {table_id} already has the desired columns");
            return Ok(SchemaChangeOutcome::Unchanged);
        }

        let to_create = reconciliation.columns_to_create();
        let created = if to_create.is_empty() {
            vec![]
        } else {
            self.create_columns(&to_create).await?
        };
        let plan = &reconciliation.plan(&created)?;
        info!(
            "Changing schema of table {table_id}: {} column change(s), {} column(s) in total",
            plan.changes.len(),
            plan.ordered_column_ids.len()
        );

        let token = self
            .call(
                "start_schema_change_job",
                RateBucket::General,
                policy,
                move || {
                    service.start_schema_change_job(
                        table_id,
                        plan.changes.clone(),
                        plan.ordered_column_ids.clone(),
                    )
                },
            )
            .await?;
        self.metrics.schema_changes.increment(1);

        let mut job = AsyncJob::new(
            JobKind::SchemaChange,
            token.clone(),
            self.config.schema_change_polls.clone(),
        );
        let token = &token;
        let response = job
            .poll_until_done(move || {
                self.call(
                    "poll_schema_change_job",
                    RateBucket::General,
                    policy,
                    move || service.poll_schema_change_job(token, table_id),
                )
            })
            .await?;

        Ok(SchemaChangeOutcome::Applied(response))
    }

    /// Upload a delimited text file and import it into `table_id`, returning
    /// the number of rows the service processed.
    pub async fn upload_tsv(&self, table_id: &TableId, path: &Path) -> SyncResult<u64> {
        let service = &self.service;
        let policy = &self.config.metadata_retry;

        let file_handle_id = self
            .call(
                "upload_file",
                RateBucket::General,
                &self.config.upload_retry,
                move || service.upload_file(path),
            )
            .await?;
        debug!("Uploaded {} as file handle {file_handle_id}", path.display());

        let file_handle_id = &file_handle_id;
        let options = &self.config.import_options;
        let token = self
            .call("start_tsv_import_job", RateBucket::General, policy, move || {
                service.start_tsv_import_job(table_id, file_handle_id, options.clone())
            })
            .await?;

        let mut job = AsyncJob::new(
            JobKind::TsvUpload,
            token.clone(),
            self.config.tsv_upload_polls.clone(),
        );
        let token = &token;
        let result = job
            .poll_until_done(move || {
                self.call(
                    "poll_tsv_import_job",
                    RateBucket::General,
                    policy,
                    move || async move {
                        service
                            .poll_tsv_import_job(token, table_id)
                            .await
                            .map(|outcome| outcome.map(|r| r.rows_processed))
                    },
                )
            })
            .await?;

        let rows = result.ok_or_else(|| SyncError::MissingRowCount {
            token: token.clone(),
        })?;
        info!("Imported {rows} row(s) from {} into table {table_id}", path.display());
        Ok(rows)
    }

    /// Append `rows` to `table_id`, returning references to the stored rows.
    pub async fn append_rows(
        &self,
        table_id: &TableId,
        rows: RowSet,
    ) -> SyncResult<RowReferenceSet> {
        let service = &self.service;
        let policy = &self.config.metadata_retry;
        let row_count = rows.rows.len();

        let rows = &rows;
        let token = self
            .call("start_append_job", RateBucket::General, policy, move || {
                service.start_append_job(table_id, rows.clone())
            })
            .await?;

        let mut job = AsyncJob::new(
            JobKind::RowAppend,
            token.clone(),
            self.config.row_append_polls.clone(),
        );
        let token = &token;
        let references = job
            .poll_until_done(move || {
                self.call("poll_append_job", RateBucket::General, policy, move || {
                    service.poll_append_job(token, table_id)
                })
            })
            .await?;

        info!(
            "Appended {row_count} row(s) to table {table_id}, {} reference(s) returned",
            references.rows.len()
        );
        Ok(references)
    }
}
