//! Warehouse access
//!
//! DDL and bulk-load primitives behind the [`Warehouse`] trait: Postgres in
//! production, an in-memory table model for tests. All mutations are scoped
//! to a single table and run inside one transaction; no global lock is held
//! across a load.

use crate::error::WarehouseError;
use crate::manifest::ColumnType;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::PostgresWarehouse;

/// A column as observed in the warehouse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// One DDL change for a table, pre-validated by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    /// Create the table with these columns; the key column becomes primary.
    CreateTable { columns: Vec<TableColumn> },
    AddColumn { column: TableColumn },
    DropColumn { column: String },
    RenameColumn { from: String, to: String },
    AlterColumnType { column: String, column_type: ColumnType },
}

/// A data row as read from an extract CSV; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Warehouse DDL and load primitives.
///
/// Implementations guarantee: `apply_table_changes` is atomic per call;
/// `replace_rows` leaves the table holding exactly the given rows;
/// `merge_rows` is idempotent by key; `delete_rows` ignores missing keys.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the target schema if it does not yet exist.
    async fn ensure_schema(&self) -> Result<(), WarehouseError>;

    /// Snapshot a table's columns; `None` when the table does not exist.
    async fn table_columns(&self, table: &str)
        -> Result<Option<Vec<TableColumn>>, WarehouseError>;

    /// Apply all changes for one table inside a single transaction.
    async fn apply_table_changes(
        &self,
        table: &str,
        changes: &[TableChange],
    ) -> Result<(), WarehouseError>;

    /// Truncate `table` and insert `rows`, atomically. Returns rows written.
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64, WarehouseError>;

    /// Merge `rows` into `table` keyed on `key`: existing keys are replaced,
    /// new keys inserted. Returns rows merged.
    async fn merge_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &str,
    ) -> Result<u64, WarehouseError>;

    /// Delete rows whose `key` column matches any of `keys`. Missing keys are
    /// ignored. Returns rows actually deleted.
    async fn delete_rows(
        &self,
        table: &str,
        key: &str,
        keys: &[String],
    ) -> Result<u64, WarehouseError>;

    /// Count rows currently in `table`.
    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError>;
}
