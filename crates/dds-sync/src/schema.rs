//! Schema reconciliation
//!
//! Brings warehouse tables in line with the manifest's schema deltas. Deltas
//! are grouped per table and validated against a snapshot of the live
//! columns; already-satisfied deltas become no-ops so re-running after a
//! partial failure is safe. All checked changes for one table commit in a
//! single transaction, so a table is never left half migrated.

use crate::error::SchemaError;
use crate::manifest::{DeltaOp, Manifest, SchemaDelta};
use crate::storage::{self, ObjectStore};
use crate::warehouse::{TableChange, TableColumn, Warehouse};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What reconciliation did, per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Changes actually applied to the warehouse
    pub applied: usize,
    /// Deltas that were already satisfied
    pub skipped: usize,
}

pub struct SchemaReconciler {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
}

impl SchemaReconciler {
    pub fn new(warehouse: Arc<dyn Warehouse>, store: Arc<dyn ObjectStore>) -> Self {
        Self { warehouse, store }
    }

    /// Apply the manifest's schema deltas. `prefix` is the unpacked extract
    /// location, used to inspect data file headers before dropping columns.
    pub async fn reconcile(
        &self,
        prefix: &str,
        manifest: &Manifest,
    ) -> Result<SchemaReport, SchemaError> {
        let mut report = SchemaReport::default();
        let mut header_cache: HashMap<String, Vec<String>> = HashMap::new();

        for (table, deltas) in group_by_table(&manifest.deltas) {
            let snapshot = self.warehouse.table_columns(&table).await?;
            let mut changes = Vec::new();
            let mut columns = snapshot.clone().unwrap_or_default();
            let table_exists = snapshot.is_some();

            for delta in deltas {
                match self
                    .check_delta(prefix, manifest, &table, delta, &mut columns, &mut header_cache)
                    .await?
                {
                    Some(change) => changes.push(change),
                    None => report.skipped += 1,
                }
            }

            if changes.is_empty() {
                continue;
            }

            // A table seen for the first time is created with all its added
            // columns at once rather than column-by-column.
            if !table_exists {
                changes = vec![collapse_into_create(&table, changes)?];
            }

            report.applied += changes.len();
            debug!(table = %table, changes = changes.len(), "Committing schema changes");
            self.warehouse.apply_table_changes(&table, &changes).await?;
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            "Schema reconciliation complete"
        );
        Ok(report)
    }

    /// Validate one delta against the evolving column snapshot. Returns the
    /// change to apply, or `None` when the delta is already satisfied.
    async fn check_delta(
        &self,
        prefix: &str,
        manifest: &Manifest,
        table: &str,
        delta: &DeltaOp,
        columns: &mut Vec<TableColumn>,
        header_cache: &mut HashMap<String, Vec<String>>,
    ) -> Result<Option<TableChange>, SchemaError> {
        match delta {
            DeltaOp::AddColumn {
                column,
                column_type,
            } => {
                if let Some(existing) = columns.iter_mut().find(|c| &c.name == column) {
                    if existing.column_type.warehouse_type() == column_type.warehouse_type() {
                        return Ok(None);
                    }
                    // Redeclared with a different type: treat like change_type.
                    if !existing.column_type.widens_to(column_type) {
                        return Err(SchemaError::NarrowingTypeChange {
                            table: table.to_string(),
                            column: column.clone(),
                            from: existing.column_type.warehouse_type(),
                            to: column_type.warehouse_type(),
                        });
                    }
                    existing.column_type = *column_type;
                    return Ok(Some(TableChange::AlterColumnType {
                        column: column.clone(),
                        column_type: *column_type,
                    }));
                }
                columns.push(TableColumn {
                    name: column.clone(),
                    column_type: *column_type,
                });
                Ok(Some(TableChange::AddColumn {
                    column: TableColumn {
                        name: column.clone(),
                        column_type: *column_type,
                    },
                }))
            },
            DeltaOp::DropColumn { column } => {
                if !columns.iter().any(|c| &c.name == column) {
                    return Ok(None);
                }
                // Refuse when a pending data file in this manifest still
                // carries the column; dropping it would lose incoming data.
                for entry in manifest.entries.iter().filter(|e| e.table == table) {
                    if !header_cache.contains_key(&entry.file) {
                        let header = self.data_file_header(prefix, &entry.file).await?;
                        header_cache.insert(entry.file.clone(), header);
                    }
                    let referenced = header_cache
                        .get(&entry.file)
                        .is_some_and(|h| h.iter().any(|c| c == column));
                    if referenced {
                        return Err(SchemaError::DroppedColumnReferenced {
                            table: table.to_string(),
                            column: column.clone(),
                        });
                    }
                }
                columns.retain(|c| &c.name != column);
                Ok(Some(TableChange::DropColumn {
                    column: column.clone(),
                }))
            },
            DeltaOp::RenameColumn { from, to } => {
                let from_exists = columns.iter().any(|c| &c.name == from);
                let to_exists = columns.iter().any(|c| &c.name == to);
                if !from_exists && to_exists {
                    return Ok(None);
                }
                if !from_exists {
                    return Err(SchemaError::Warehouse(
                        crate::error::WarehouseError::NoSuchColumn {
                            table: table.to_string(),
                            column: from.clone(),
                        },
                    ));
                }
                for c in columns.iter_mut() {
                    if &c.name == from {
                        c.name = to.clone();
                    }
                }
                Ok(Some(TableChange::RenameColumn {
                    from: from.clone(),
                    to: to.clone(),
                }))
            },
            DeltaOp::ChangeType {
                column,
                column_type,
            } => {
                let existing = columns
                    .iter_mut()
                    .find(|c| &c.name == column)
                    .ok_or_else(|| crate::error::WarehouseError::NoSuchColumn {
                        table: table.to_string(),
                        column: column.clone(),
                    })?;
                if existing.column_type.warehouse_type() == column_type.warehouse_type() {
                    return Ok(None);
                }
                if !existing.column_type.widens_to(column_type) {
                    return Err(SchemaError::NarrowingTypeChange {
                        table: table.to_string(),
                        column: column.clone(),
                        from: existing.column_type.warehouse_type(),
                        to: column_type.warehouse_type(),
                    });
                }
                existing.column_type = *column_type;
                Ok(Some(TableChange::AlterColumnType {
                    column: column.clone(),
                    column_type: *column_type,
                }))
            },
        }
    }

    async fn data_file_header(
        &self,
        prefix: &str,
        file: &str,
    ) -> Result<Vec<String>, SchemaError> {
        let data = self.store.get(&storage::join_key(prefix, file)).await?;
        let mut reader = csv::Reader::from_reader(data.as_slice());
        let header = reader
            .headers()
            .map(|h| h.iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();
        Ok(header)
    }
}

/// Group deltas per table, preserving first-appearance order of tables and
/// declared order of deltas within each.
fn group_by_table(deltas: &[SchemaDelta]) -> Vec<(String, Vec<&DeltaOp>)> {
    let mut grouped: Vec<(String, Vec<&DeltaOp>)> = Vec::new();
    for delta in deltas {
        match grouped.iter_mut().find(|(table, _)| table == &delta.table) {
            Some((_, ops)) => ops.push(&delta.op),
            None => grouped.push((delta.table.clone(), vec![&delta.op])),
        }
    }
    grouped
}

/// Fold add-column changes for a brand new table into one create.
fn collapse_into_create(
    table: &str,
    changes: Vec<TableChange>,
) -> Result<TableChange, SchemaError> {
    let mut columns = Vec::with_capacity(changes.len());
    for change in changes {
        match change {
            TableChange::AddColumn { column } => columns.push(column),
            other => {
                return Err(SchemaError::Warehouse(
                    crate::error::WarehouseError::NoSuchTable(format!(
                        "{table}: cannot apply {other:?} to a table that does not exist"
                    )),
                ))
            },
        }
    }
    Ok(TableChange::CreateTable { columns })
}
