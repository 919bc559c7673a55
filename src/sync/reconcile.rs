use std::collections::HashMap;

use itertools::Itertools;
use tracing::{debug, info};

use crate::data_types::ColumnId;
use crate::remote::ColumnChange;
use crate::schema::{ensure_unique_names, ColumnDef, ColumnType, DEFAULT_MAX_STRING_LENGTH};
use crate::sync::{SyncError, SyncResult};

// Type changes the remote service can apply by reinterpreting stored values.
// Anything else (besides keeping the type) loses data.
const ALLOWED_TYPE_CHANGES: &[(ColumnType, ColumnType)] = &[
    (ColumnType::Integer, ColumnType::Double),
    (ColumnType::Date, ColumnType::Integer),
    (ColumnType::Date, ColumnType::Double),
    (ColumnType::Integer, ColumnType::Date),
    (ColumnType::Double, ColumnType::String),
    (ColumnType::Integer, ColumnType::String),
];

fn is_allowed_type_change(from: ColumnType, to: ColumnType) -> bool {
    ALLOWED_TYPE_CHANGES.contains(&(from, to))
}

// Length a new string-like column ends up with once created
fn new_max_length(column: &ColumnDef) -> u32 {
    column.max_length.unwrap_or(DEFAULT_MAX_STRING_LENGTH)
}

fn effective_max_length(column: &ColumnDef) -> SyncResult<u32> {
    column
        .max_length
        .or_else(|| column.column_type.default_max_length())
        .ok_or_else(|| SyncError::SchemaInconsistent {
            column: column.name.clone(),
            reason: format!(
                "no max length recorded for {} column and the type has no default",
                column.column_type
            ),
        })
}

/// Whether values stored under `old` can be reinterpreted under `new` without
/// loss. Errors only if `old` lacks a max length where one is required.
pub fn is_compatible(old: &ColumnDef, new: &ColumnDef) -> SyncResult<bool> {
    let type_changed = old.column_type != new.column_type;
    if type_changed && !is_allowed_type_change(old.column_type, new.column_type) {
        return Ok(false);
    }

    if !new.column_type.is_string_like() {
        return Ok(true);
    }

    let new_length = new_max_length(new);
    if !type_changed && old.max_length == Some(new_length) {
        return Ok(true);
    }

    Ok(new_length >= effective_max_length(old)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptColumn {
    pub old: ColumnDef,
    pub new: ColumnDef,
}

impl KeptColumn {
    // Max length only matters for string-like columns
    pub fn is_modified(&self) -> bool {
        self.old.column_type != self.new.column_type
            || (self.new.column_type.is_string_like()
                && self.old.max_length != Some(new_max_length(&self.new)))
    }
}

/// Name-based classification of live vs. desired columns. `added` and `kept`
/// follow the desired order, `deleted` the live one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaDiff {
    pub added: Vec<ColumnDef>,
    pub deleted: Vec<String>,
    pub kept: Vec<KeptColumn>,
}

impl SchemaDiff {
    pub fn between(live: &[ColumnDef], desired: &[ColumnDef]) -> Self {
        let live_by_name: HashMap<&str, &ColumnDef> =
            live.iter().map(|c| (c.name.as_str(), c)).collect();
        let desired_by_name: HashMap<&str, &ColumnDef> =
            desired.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut diff = SchemaDiff::default();
        for column in desired {
            match live_by_name.get(column.name.as_str()) {
                Some(old) => diff.kept.push(KeptColumn {
                    old: (*old).clone(),
                    new: column.clone(),
                }),
                None => diff.added.push(column.clone()),
            }
        }
        diff.deleted = live
            .iter()
            .filter(|c| !desired_by_name.contains_key(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();

        diff
    }

    pub fn kept(&self, name: &str) -> Option<&KeptColumn> {
        self.kept.iter().find(|k| k.new.name == name)
    }

    pub fn modified(&self) -> impl Iterator<Item = &KeptColumn> {
        self.kept.iter().filter(|k| k.is_modified())
    }
}

/// What has to be submitted as a single schema-change job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub changes: Vec<ColumnChange>,
    pub ordered_column_ids: Vec<ColumnId>,
}

/// An accepted reconciliation of live and desired columns.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    diff: SchemaDiff,
    desired: Vec<ColumnDef>,
}

impl Reconciliation {
    pub fn diff(&self) -> &SchemaDiff {
        &self.diff
    }

    /// A reorder of existing, unmodified columns alone doesn't warrant a job
    pub fn requires_change(&self) -> bool {
        !self.diff.added.is_empty() || self.diff.modified().next().is_some()
    }

    // The remote id a desired column resolves to without creating anything. A
    // modified column always needs a fresh remote column, whatever id it carries.
    fn known_id(&self, column: &ColumnDef) -> Option<ColumnId> {
        match self.diff.kept(&column.name) {
            Some(kept) if kept.is_modified() => None,
            Some(kept) => column
                .remote_id
                .clone()
                .or_else(|| kept.old.remote_id.clone()),
            None => column.remote_id.clone(),
        }
    }

    /// Desired columns that don't exist remotely yet, in desired order and
    /// without any remote id they were supplied with
    pub fn columns_to_create(&self) -> Vec<ColumnDef> {
        self.desired
            .iter()
            .filter(|c| self.known_id(c).is_none())
            .map(|c| ColumnDef {
                remote_id: None,
                ..c.clone()
            })
            .collect()
    }

    /// Build the column changes and the final column order, given the columns
    /// the remote service created for [`Self::columns_to_create`]. Columns whose
    /// id doesn't change are left out of the change list.
    pub fn plan(&self, created: &[ColumnDef]) -> SyncResult<ChangePlan> {
        let created_ids: HashMap<&str, &ColumnId> = created
            .iter()
            .filter_map(|c| c.remote_id.as_ref().map(|id| (c.name.as_str(), id)))
            .collect();

        let mut changes = vec![];
        let mut ordered_column_ids = Vec::with_capacity(self.desired.len());

        for column in &self.desired {
            let new_id = match self.known_id(column) {
                Some(id) => id,
                None => created_ids
                    .get(column.name.as_str())
                    .map(|id| (*id).clone())
                    .ok_or_else(|| SyncError::SchemaInconsistent {
                        column: column.name.clone(),
                        reason: "no remote id was assigned to the column".to_string(),
                    })?,
            };

            let old_id = self
                .diff
                .kept(&column.name)
                .and_then(|k| k.old.remote_id.clone());

            if old_id.as_ref() != Some(&new_id) {
                changes.push(ColumnChange {
                    old_id,
                    new_id: new_id.clone(),
                });
            }
            ordered_column_ids.push(new_id);
        }

        Ok(ChangePlan {
            changes,
            ordered_column_ids,
        })
    }
}

/// Decide whether moving a live table from `live` to `desired` columns is safe.
/// Dropping a column or an incompatible change to a kept one rejects the whole
/// reconciliation; nothing is partially applied.
pub fn reconcile(live: &[ColumnDef], desired: &[ColumnDef]) -> SyncResult<Reconciliation> {
    ensure_unique_names(live)?;
    ensure_unique_names(desired)?;
    if let Some(column) = live.iter().find(|c| c.remote_id.is_none()) {
        return Err(SyncError::SchemaInconsistent {
            column: column.name.clone(),
            reason: "live column has no remote id".to_string(),
        });
    }

    let diff = SchemaDiff::between(live, desired);
    debug!(
        "Schema diff: added {:?}, deleted {:?}, kept {:?}",
        diff.added.iter().map(|c| &c.name).collect_vec(),
        diff.deleted,
        diff.kept.iter().map(|k| &k.new.name).collect_vec(),
    );

    if !diff.deleted.is_empty() {
        return Err(SyncError::SchemaRejected {
            reason: "existing columns would be dropped".to_string(),
            columns: diff.deleted,
        });
    }

    let mut incompatible = vec![];
    for kept in diff.modified() {
        if !is_compatible(&kept.old, &kept.new)? {
            info!(
                "Column {:?} can't change from {} ({:?}) to {} ({:?})",
                kept.new.name,
                kept.old.column_type,
                kept.old.max_length,
                kept.new.column_type,
                kept.new.max_length
            );
            incompatible.push(kept.new.name.clone());
        }
    }

    if !incompatible.is_empty() {
        return Err(SyncError::SchemaRejected {
            reason: "incompatible column type or length changes".to_string(),
            columns: incompatible,
        });
    }

    Ok(Reconciliation {
        diff,
        desired: desired.to_vec(),
    })
}
