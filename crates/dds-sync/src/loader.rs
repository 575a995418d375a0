//! Data loading
//!
//! Applies the manifest's data change entries to the warehouse, in declared
//! order. A failure inside any file aborts that file's load as a unit; no
//! partially applied file is ever committed, so re-invocation restarts the
//! file safely.

use crate::error::LoadError;
use crate::manifest::{CatalogRow, LoadOp, Manifest, KEY_COLUMN};
use crate::storage::{self, ObjectStore};
use crate::warehouse::{Row, TableChange, TableColumn, Warehouse};
use dds_common::ExtractType;
use std::sync::Arc;
use tracing::{debug, info};

/// Warehouse table holding the source column catalog.
const CATALOG_TABLE: &str = "metadata";

/// What one load pass applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub rows_applied: u64,
}

pub struct DataLoader {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
}

impl DataLoader {
    pub fn new(store: Arc<dyn ObjectStore>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { store, warehouse }
    }

    /// Load every data entry of `manifest` from the unpacked `prefix`.
    pub async fn load(&self, prefix: &str, manifest: &Manifest) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport::default();

        for entry in &manifest.entries {
            let (columns, rows) = self.read_data_file(prefix, &entry.file).await?;

            debug!(
                table = %entry.table,
                op = entry.op.as_str(),
                file = %entry.file,
                rows = rows.len(),
                "Loading data file"
            );

            let applied = match entry.op {
                LoadOp::FullReplace => {
                    let written = self
                        .warehouse
                        .replace_rows(&entry.table, &columns, &rows)
                        .await?;
                    // A full extract's table must equal the dump exactly.
                    let count = self.warehouse.row_count(&entry.table).await?;
                    if count != entry.records {
                        return Err(LoadError::RowCountMismatch {
                            table: entry.table.clone(),
                            expected: entry.records,
                            actual: count,
                        });
                    }
                    written
                },
                LoadOp::InsertOrUpdate => {
                    require_key(&columns, &entry.file, "insert_or_update")?;
                    self.warehouse
                        .merge_rows(&entry.table, &columns, &rows, KEY_COLUMN)
                        .await?
                },
                LoadOp::Delete => {
                    let key_index = require_key(&columns, &entry.file, "delete")?;
                    let keys: Vec<String> = rows
                        .iter()
                        .filter_map(|row| row.get(key_index).cloned().flatten())
                        .collect();
                    self.warehouse
                        .delete_rows(&entry.table, KEY_COLUMN, &keys)
                        .await?
                },
            };

            report.files_loaded += 1;
            report.rows_applied += applied;
        }

        // Full extracts ship a complete column catalog; keep the warehouse
        // copy current so downstream consumers can inspect source types.
        if manifest.extract_type == ExtractType::Full && !manifest.catalog.is_empty() {
            self.sync_catalog(&manifest.catalog).await?;
        }

        info!(
            files = report.files_loaded,
            rows = report.rows_applied,
            "Data load complete"
        );
        Ok(report)
    }

    async fn read_data_file(
        &self,
        prefix: &str,
        file: &str,
    ) -> Result<(Vec<String>, Vec<Row>), LoadError> {
        let data = self.store.get(&storage::join_key(prefix, file)).await?;
        let mut reader = csv::Reader::from_reader(data.as_slice());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| LoadError::Csv {
                file: file.to_string(),
                message: e.to_string(),
            })?
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| LoadError::Csv {
                file: file.to_string(),
                message: e.to_string(),
            })?;
            rows.push(
                record
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            None
                        } else {
                            Some(field.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Ok((columns, rows))
    }

    async fn sync_catalog(&self, catalog: &[CatalogRow]) -> Result<(), LoadError> {
        use crate::manifest::{ColumnType, SourceKind};

        if self.warehouse.table_columns(CATALOG_TABLE).await?.is_none() {
            self.warehouse
                .apply_table_changes(
                    CATALOG_TABLE,
                    &[TableChange::CreateTable {
                        columns: vec![
                            TableColumn {
                                name: "extract".to_string(),
                                column_type: ColumnType::new(SourceKind::String, None),
                            },
                            TableColumn {
                                name: "column_name".to_string(),
                                column_type: ColumnType::new(SourceKind::String, None),
                            },
                            TableColumn {
                                name: "type".to_string(),
                                column_type: ColumnType::new(SourceKind::String, Some(64)),
                            },
                            TableColumn {
                                name: "length".to_string(),
                                column_type: ColumnType::new(SourceKind::Number, None),
                            },
                        ],
                    }],
                )
                .await?;
        }

        let columns = vec![
            "extract".to_string(),
            "column_name".to_string(),
            "type".to_string(),
            "length".to_string(),
        ];
        let rows: Vec<Row> = catalog
            .iter()
            .map(|row| {
                vec![
                    Some(row.extract.clone()),
                    Some(row.column_name.clone()),
                    Some(row.column_type.clone()),
                    row.length.map(|l| l.to_string()),
                ]
            })
            .collect();

        self.warehouse
            .replace_rows(CATALOG_TABLE, &columns, &rows)
            .await?;
        debug!(rows = rows.len(), "Column catalog refreshed");
        Ok(())
    }
}

fn require_key(columns: &[String], file: &str, operation: &str) -> Result<usize, LoadError> {
    columns
        .iter()
        .position(|c| c == KEY_COLUMN)
        .ok_or_else(|| LoadError::MissingKeyColumn {
            file: file.to_string(),
            key: KEY_COLUMN.to_string(),
            operation: operation.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::manifest::{ColumnType, DataChangeEntry, SourceKind};
    use crate::storage::LocalStore;
    use crate::warehouse::MemoryWarehouse;

    async fn fixture() -> (DataLoader, Arc<MemoryWarehouse>, Arc<LocalStore>, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let warehouse = Arc::new(MemoryWarehouse::new());

        warehouse
            .apply_table_changes(
                "account",
                &[TableChange::CreateTable {
                    columns: vec![
                        TableColumn {
                            name: "id".to_string(),
                            column_type: ColumnType::new(SourceKind::Id, Some(40)),
                        },
                        TableColumn {
                            name: "name__v".to_string(),
                            column_type: ColumnType::new(SourceKind::String, None),
                        },
                    ],
                }],
            )
            .await
            .unwrap();

        let loader = DataLoader::new(store.clone(), warehouse.clone());
        (loader, warehouse, store, dir)
    }

    fn manifest(extract_type: ExtractType, entries: Vec<DataChangeEntry>) -> Manifest {
        Manifest {
            extract_type,
            deltas: Vec::new(),
            entries,
            catalog: Vec::new(),
        }
    }

    fn entry(op: LoadOp, file: &str, records: u64) -> DataChangeEntry {
        DataChangeEntry {
            table: "account".to_string(),
            op,
            file: file.to_string(),
            records,
        }
    }

    #[tokio::test]
    async fn test_full_replace_leaves_table_equal_to_dump() {
        let (loader, warehouse, store, _dir) = fixture().await;
        store
            .put(
                "p/Object/account.csv",
                b"id,name__v\na,Alpha\nb,Beta\n".to_vec(),
            )
            .await
            .unwrap();

        // Seed residual state that must disappear.
        warehouse
            .replace_rows(
                "account",
                &["id".to_string(), "name__v".to_string()],
                &[vec![Some("stale".to_string()), Some("Old".to_string())]],
            )
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Full,
            vec![entry(LoadOp::FullReplace, "Object/account.csv", 2)],
        );
        let report = loader.load("p", &m).await.unwrap();

        assert_eq!(report.files_loaded, 1);
        assert_eq!(warehouse.row_count("account").await.unwrap(), 2);
        assert!(warehouse.value("account", "id", "stale", "name__v").is_none());
    }

    #[tokio::test]
    async fn test_full_replace_row_count_mismatch_fails() {
        let (loader, _warehouse, store, _dir) = fixture().await;
        store
            .put("p/Object/account.csv", b"id,name__v\na,Alpha\n".to_vec())
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Full,
            vec![entry(LoadOp::FullReplace, "Object/account.csv", 5)],
        );
        assert!(matches!(
            loader.load("p", &m).await,
            Err(LoadError::RowCountMismatch {
                expected: 5,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_merge_twice_matches_merge_once() {
        let (loader, warehouse, store, _dir) = fixture().await;
        store
            .put(
                "p/Object/account.csv",
                b"id,name__v\na,Alpha\nb,Beta\n".to_vec(),
            )
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Incremental,
            vec![entry(LoadOp::InsertOrUpdate, "Object/account.csv", 2)],
        );
        loader.load("p", &m).await.unwrap();
        loader.load("p", &m).await.unwrap();

        assert_eq!(warehouse.row_count("account").await.unwrap(), 2);
        assert_eq!(
            warehouse.value("account", "id", "a", "name__v"),
            Some("Alpha".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_key_is_a_noop() {
        let (loader, warehouse, store, _dir) = fixture().await;
        store
            .put(
                "p/Object/account_deletes.csv",
                b"id,deleted_date\nghost,2024-03-07\n".to_vec(),
            )
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Incremental,
            vec![entry(LoadOp::Delete, "Object/account_deletes.csv", 1)],
        );
        let report = loader.load("p", &m).await.unwrap();
        assert_eq!(report.files_loaded, 1);
        assert_eq!(warehouse.row_count("account").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_without_key_column_fails() {
        let (loader, _warehouse, store, _dir) = fixture().await;
        store
            .put("p/Object/account.csv", b"name__v\nAlpha\n".to_vec())
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Incremental,
            vec![entry(LoadOp::InsertOrUpdate, "Object/account.csv", 1)],
        );
        assert!(matches!(
            loader.load("p", &m).await,
            Err(LoadError::MissingKeyColumn { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_values_become_null() {
        let (loader, warehouse, store, _dir) = fixture().await;
        store
            .put("p/Object/account.csv", b"id,name__v\na,\n".to_vec())
            .await
            .unwrap();

        let m = manifest(
            ExtractType::Incremental,
            vec![entry(LoadOp::InsertOrUpdate, "Object/account.csv", 1)],
        );
        loader.load("p", &m).await.unwrap();
        assert!(warehouse.value("account", "id", "a", "name__v").is_none());
    }

    #[tokio::test]
    async fn test_full_extract_refreshes_catalog() {
        let (loader, warehouse, _store, _dir) = fixture().await;

        let mut m = manifest(ExtractType::Full, Vec::new());
        m.catalog = vec![CatalogRow {
            extract: "Object.account".to_string(),
            column_name: "id".to_string(),
            column_type: "id".to_string(),
            length: Some(40),
        }];

        loader.load("p", &m).await.unwrap();
        assert_eq!(warehouse.row_count(CATALOG_TABLE).await.unwrap(), 1);
        assert_eq!(
            warehouse.value(CATALOG_TABLE, "extract", "Object.account", "length"),
            Some("40".to_string())
        );
    }
}
