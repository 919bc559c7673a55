use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::data_types::{ColumnId, TableId};
use crate::sync::{SyncError, SyncResult};

// Max length the remote service assigns to a string-like column created
// without an explicit one
pub const DEFAULT_MAX_STRING_LENGTH: u32 = 50;

#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, EnumString, Display, Clone, Copy,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Integer,
    Double,
    String,
    Date,
    Boolean,
    FileReference,
    EntityId,
    UserId,
    Link,
    LargeText,
}

impl ColumnType {
    // Whether a max length is meaningful for values of this type
    pub fn is_string_like(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Link)
    }

    // Longest textual rendering of a value of this type, used as the effective
    // max length of a column that doesn't declare one. String-like types have
    // no ceiling: the service always reports their length explicitly.
    pub fn default_max_length(&self) -> Option<u32> {
        match self {
            ColumnType::Integer | ColumnType::Date => Some(20),
            // -1.7976931348623157e308
            ColumnType::Double => Some(23),
            ColumnType::Boolean => Some(5),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<ColumnId>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            max_length: None,
            remote_id: None,
        }
    }

    pub fn string(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, ColumnType::String).with_max_length(max_length)
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<ColumnId>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    // Two definitions describe the same remote column model if they agree on
    // everything except the remote identifier
    pub fn same_definition(&self, other: &ColumnDef) -> bool {
        self.name == other.name
            && self.column_type == other.column_type
            && self.max_length == other.max_length
    }
}

/// An ordered, name-unique list of column definitions. Insertion order is the
/// column display order on the remote table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
    table_id: Option<TableId>,
}

impl TableSchema {
    pub fn try_new(columns: Vec<ColumnDef>) -> SyncResult<Self> {
        ensure_unique_names(&columns)?;
        Ok(Self {
            columns,
            table_id: None,
        })
    }

    pub fn builder() -> TableSchemaBuilder {
        TableSchemaBuilder::default()
    }

    pub fn with_table_id(mut self, table_id: impl Into<TableId>) -> Self {
        self.table_id = Some(table_id.into());
        self
    }

    pub fn table_id(&self) -> Option<&TableId> {
        self.table_id.as_ref()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_columns(self) -> Vec<ColumnDef> {
        self.columns
    }
}

// Name uniqueness is a precondition of every schema we hand to the reconciler
// or the drivers
pub(crate) fn ensure_unique_names(columns: &[ColumnDef]) -> SyncResult<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(SyncError::DuplicateColumn {
                name: column.name.clone(),
            });
        }
    }
    Ok(())
}

/// Declarative description of a table's desired columns.
///
/// ```
/// use tablesync::schema::{ColumnType, TableSchema};
///
/// let schema = TableSchema::builder()
///     .string("name", 100)
///     .column("age", ColumnType::Integer)
///     .build()
///     .unwrap();
/// assert_eq!(schema.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct TableSchemaBuilder {
    columns: Vec<ColumnDef>,
}

impl TableSchemaBuilder {
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, column_type));
        self
    }

    pub fn string(mut self, name: impl Into<String>, max_length: u32) -> Self {
        self.columns.push(ColumnDef::string(name, max_length));
        self
    }

    pub fn def(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn build(self) -> SyncResult<TableSchema> {
        TableSchema::try_new(self.columns)
    }
}
