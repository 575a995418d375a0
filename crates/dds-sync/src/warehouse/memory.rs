//! In-memory warehouse for tests
//!
//! Models tables as column lists plus rows of named values, with the same
//! atomicity and idempotence guarantees the Postgres backend provides. Unit
//! and integration tests run the full pipeline against this backend.

use crate::error::WarehouseError;
use crate::warehouse::{Row, TableChange, TableColumn, Warehouse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<TableColumn>,
    rows: Vec<HashMap<String, Option<String>>>,
}

#[derive(Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, MemTable>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of a table, for assertions.
    pub fn rows(&self, table: &str) -> Vec<HashMap<String, Option<String>>> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).map(|t| t.rows.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Value of `column` in the row whose `key` column holds `key_value`.
    pub fn value(&self, table: &str, key: &str, key_value: &str, column: &str) -> Option<String> {
        self.rows(table)
            .into_iter()
            .find(|row| row.get(key) == Some(&Some(key_value.to_string())))
            .and_then(|row| row.get(column).cloned().flatten())
    }

    fn named_rows(
        columns: &[String],
        rows: &[Row],
    ) -> Vec<HashMap<String, Option<String>>> {
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<HashMap<_, _>>()
            })
            .collect()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| WarehouseError::Constraint("warehouse lock poisoned".to_string()))?;
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
        f(mem)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&self) -> Result<(), WarehouseError> {
        Ok(())
    }

    async fn table_columns(
        &self,
        table: &str,
    ) -> Result<Option<Vec<TableColumn>>, WarehouseError> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| WarehouseError::Constraint("warehouse lock poisoned".to_string()))?;
        Ok(tables.get(table).map(|t| t.columns.clone()))
    }

    async fn apply_table_changes(
        &self,
        table: &str,
        changes: &[TableChange],
    ) -> Result<(), WarehouseError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| WarehouseError::Constraint("warehouse lock poisoned".to_string()))?;

        for change in changes {
            match change {
                TableChange::CreateTable { columns } => {
                    tables.entry(table.to_string()).or_insert_with(|| MemTable {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
                },
                TableChange::AddColumn { column } => {
                    let mem = tables
                        .get_mut(table)
                        .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
                    if !mem.columns.iter().any(|c| c.name == column.name) {
                        mem.columns.push(column.clone());
                        for row in &mut mem.rows {
                            row.insert(column.name.clone(), None);
                        }
                    }
                },
                TableChange::DropColumn { column } => {
                    let mem = tables
                        .get_mut(table)
                        .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
                    mem.columns.retain(|c| &c.name != column);
                    for row in &mut mem.rows {
                        row.remove(column);
                    }
                },
                TableChange::RenameColumn { from, to } => {
                    let mem = tables
                        .get_mut(table)
                        .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
                    let col = mem
                        .columns
                        .iter_mut()
                        .find(|c| &c.name == from)
                        .ok_or_else(|| WarehouseError::NoSuchColumn {
                            table: table.to_string(),
                            column: from.clone(),
                        })?;
                    col.name = to.clone();
                    for row in &mut mem.rows {
                        if let Some(value) = row.remove(from) {
                            row.insert(to.clone(), value);
                        }
                    }
                },
                TableChange::AlterColumnType {
                    column,
                    column_type,
                } => {
                    let mem = tables
                        .get_mut(table)
                        .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
                    let col = mem
                        .columns
                        .iter_mut()
                        .find(|c| &c.name == column)
                        .ok_or_else(|| WarehouseError::NoSuchColumn {
                            table: table.to_string(),
                            column: column.clone(),
                        })?;
                    col.column_type = *column_type;
                },
            }
        }

        Ok(())
    }

    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64, WarehouseError> {
        let named = Self::named_rows(columns, rows);
        self.with_table(table, |mem| {
            mem.rows = named;
            Ok(rows.len() as u64)
        })
    }

    async fn merge_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &str,
    ) -> Result<u64, WarehouseError> {
        if !columns.iter().any(|c| c == key) {
            return Err(WarehouseError::NoSuchColumn {
                table: table.to_string(),
                column: key.to_string(),
            });
        }

        let named = Self::named_rows(columns, rows);
        self.with_table(table, |mem| {
            for row in named {
                let row_key = row.get(key).cloned().flatten();
                mem.rows
                    .retain(|existing| existing.get(key).cloned().flatten() != row_key);
                mem.rows.push(row);
            }
            Ok(rows.len() as u64)
        })
    }

    async fn delete_rows(
        &self,
        table: &str,
        key: &str,
        keys: &[String],
    ) -> Result<u64, WarehouseError> {
        self.with_table(table, |mem| {
            let before = mem.rows.len();
            mem.rows.retain(|row| {
                !matches!(row.get(key), Some(Some(value)) if keys.contains(value))
            });
            Ok((before - mem.rows.len()) as u64)
        })
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        self.with_table(table, |mem| Ok(mem.rows.len() as u64))
    }
}
