// Identifiers handed out by the remote table service. They are opaque to us: we
// only ever store, compare and pass them back.
pub type ColumnId = String;
pub type TableId = String;
pub type ParentId = String;
pub type FileHandleId = String;
pub type PrincipalId = i64;
pub type JobToken = String;
pub type RowId = i64;
pub type RowVersion = i64;
