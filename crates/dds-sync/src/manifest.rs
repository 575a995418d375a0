//! Manifest parsing
//!
//! Every archive carries `manifest.csv` (what data changed), a metadata file
//! describing column additions and type changes (`metadata.csv`, or
//! `metadata_full.csv` on full extracts), and optionally
//! `metadata_deletes.csv` (columns removed at the source). The parser turns
//! these into an ordered [`Manifest`] of schema deltas and data change
//! entries; row order is preserved, consumers decide application order.

use crate::error::ManifestError;
use crate::storage::{self, ObjectStore};
use dds_common::ExtractType;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Default string length when the metadata omits one.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Key column used for merges and deletes.
pub const KEY_COLUMN: &str = "id";

// ============================================================================
// Manifest domain types
// ============================================================================

/// Source type system of the extract metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Id,
    String,
    Number,
    Boolean,
    Date,
    Datetime,
}

impl SourceKind {
    fn parse(value: &str) -> Option<SourceKind> {
        match value.to_lowercase().as_str() {
            "id" => Some(SourceKind::Id),
            "string" => Some(SourceKind::String),
            "number" => Some(SourceKind::Number),
            "boolean" => Some(SourceKind::Boolean),
            "date" => Some(SourceKind::Date),
            "datetime" => Some(SourceKind::Datetime),
            _ => None,
        }
    }
}

/// A column type in the source system, with its warehouse mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub kind: SourceKind,
    /// Length limit; meaningful for `id` and `string` columns only
    pub length: u32,
}

impl ColumnType {
    pub fn new(kind: SourceKind, length: Option<u32>) -> Self {
        Self {
            kind,
            length: length.unwrap_or(DEFAULT_STRING_LENGTH),
        }
    }

    /// Warehouse DDL type for this column.
    pub fn warehouse_type(&self) -> String {
        match self.kind {
            SourceKind::Id | SourceKind::String => format!("VARCHAR({})", self.length),
            SourceKind::Number => "NUMERIC".to_string(),
            SourceKind::Boolean => "BOOLEAN".to_string(),
            SourceKind::Date => "DATE".to_string(),
            SourceKind::Datetime => "TIMESTAMPTZ".to_string(),
        }
    }

    /// Whether changing a column from `self` to `to` preserves all values.
    ///
    /// Safe widenings: string length increase, `date` to `datetime`, and
    /// `id` to `string` at the same or greater length. Everything else would
    /// narrow and is rejected by the reconciler.
    pub fn widens_to(&self, to: &ColumnType) -> bool {
        match (self.kind, to.kind) {
            (SourceKind::Id, SourceKind::Id)
            | (SourceKind::String, SourceKind::String)
            | (SourceKind::Id, SourceKind::String) => to.length >= self.length,
            (SourceKind::Date, SourceKind::Datetime) => true,
            (from, to_kind) => from == to_kind,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.warehouse_type())
    }
}

/// One schema change declared by the archive metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDelta {
    /// Target warehouse table (already normalized, see [`table_name`])
    pub table: String,
    pub op: DeltaOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    AddColumn { column: String, column_type: ColumnType },
    DropColumn { column: String },
    RenameColumn { from: String, to: String },
    ChangeType { column: String, column_type: ColumnType },
}

/// How a data file applies to its target table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    InsertOrUpdate,
    Delete,
    FullReplace,
}

impl LoadOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadOp::InsertOrUpdate => "insert_or_update",
            LoadOp::Delete => "delete",
            LoadOp::FullReplace => "full_replace",
        }
    }
}

/// One data file to load, in manifest order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChangeEntry {
    pub table: String,
    pub op: LoadOp,
    /// Data CSV path relative to the unpacked prefix
    pub file: String,
    /// Row count declared by the manifest
    pub records: u64,
}

/// One raw column-metadata row, kept for the warehouse-side catalog table.
/// Full extracts ship a complete dump and replace the catalog wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub extract: String,
    pub column_name: String,
    pub column_type: String,
    pub length: Option<u32>,
}

/// Parsed archive manifest. Read-only after parsing.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub extract_type: ExtractType,
    pub deltas: Vec<SchemaDelta>,
    pub entries: Vec<DataChangeEntry>,
    pub catalog: Vec<CatalogRow>,
}

impl Manifest {
    /// Zero deltas and zero entries is a valid no-op window.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.entries.is_empty()
    }
}

/// Normalize a qualified extract name (`Object.account`) into a warehouse
/// table name: the part after the dot, lowercased, with an `n_` prefix when
/// it would otherwise start with a digit.
pub fn table_name(extract: &str) -> String {
    let bare = extract.rsplit('.').next().unwrap_or(extract).to_lowercase();
    if bare.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("n_{bare}")
    } else {
        bare
    }
}

// ============================================================================
// CSV row shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ManifestRow {
    extract: String,
    #[serde(rename = "type")]
    change_type: String,
    records: u64,
    file: String,
}

#[derive(Debug, Deserialize)]
struct MetadataRow {
    extract: String,
    column_name: String,
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    length: Option<u32>,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    new_column_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataDeleteRow {
    extract: String,
    column_name: String,
}

// ============================================================================
// Parser
// ============================================================================

/// Reads manifest and metadata files from an unpacked extract prefix
pub struct ManifestParser {
    store: Arc<dyn ObjectStore>,
}

impl ManifestParser {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Parse the manifest under `prefix` for an archive of `extract_type`.
    pub async fn parse(
        &self,
        prefix: &str,
        extract_type: ExtractType,
    ) -> Result<Manifest, ManifestError> {
        let manifest_data = match self
            .store
            .get(&storage::join_key(prefix, "manifest.csv"))
            .await
        {
            Ok(data) => data,
            Err(crate::error::StorageError::NotFound(_)) => {
                return Err(ManifestError::MissingManifest(prefix.to_string()))
            },
            Err(e) => return Err(e.into()),
        };

        let entries = parse_manifest_rows(&manifest_data, extract_type)?;
        let (mut deltas, catalog) = self.parse_metadata(prefix, extract_type).await?;
        deltas.extend(self.parse_metadata_deletes(prefix).await?);

        info!(
            prefix = %prefix,
            deltas = deltas.len(),
            entries = entries.len(),
            "Manifest parsed"
        );

        Ok(Manifest {
            extract_type,
            deltas,
            entries,
            catalog,
        })
    }

    /// Column metadata. Full extracts name the file `metadata_full.csv`;
    /// either name is accepted. An absent file on incremental/log extracts
    /// means no schema changes; a full extract without metadata cannot
    /// create its tables and is fatal.
    async fn parse_metadata(
        &self,
        prefix: &str,
        extract_type: ExtractType,
    ) -> Result<(Vec<SchemaDelta>, Vec<CatalogRow>), ManifestError> {
        for filename in ["metadata.csv", "metadata_full.csv"] {
            match self.store.get(&storage::join_key(prefix, filename)).await {
                Ok(data) => {
                    debug!(file = %filename, "Reading column metadata");
                    return parse_metadata_rows(&data);
                },
                Err(crate::error::StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if extract_type == ExtractType::Full {
            return Err(ManifestError::MissingMetadata(prefix.to_string()));
        }
        Ok((Vec::new(), Vec::new()))
    }

    async fn parse_metadata_deletes(
        &self,
        prefix: &str,
    ) -> Result<Vec<SchemaDelta>, ManifestError> {
        let data = match self
            .store
            .get(&storage::join_key(prefix, "metadata_deletes.csv"))
            .await
        {
            Ok(data) => data,
            Err(crate::error::StorageError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut deltas = Vec::new();
        let mut reader = csv::Reader::from_reader(data.as_slice());
        for result in reader.deserialize() {
            let row: MetadataDeleteRow = result?;
            deltas.push(SchemaDelta {
                table: table_name(&row.extract),
                op: DeltaOp::DropColumn {
                    column: row.column_name,
                },
            });
        }
        Ok(deltas)
    }
}

fn parse_manifest_rows(
    data: &[u8],
    extract_type: ExtractType,
) -> Result<Vec<DataChangeEntry>, ManifestError> {
    let mut entries = Vec::new();
    let mut reader = csv::Reader::from_reader(data);

    for (index, result) in reader.deserialize().enumerate() {
        let row: ManifestRow = result?;

        let op = match row.change_type.as_str() {
            "updates" if extract_type == ExtractType::Full => LoadOp::FullReplace,
            "updates" => LoadOp::InsertOrUpdate,
            "deletes" => LoadOp::Delete,
            other => {
                return Err(ManifestError::InvalidRow {
                    row: index + 1,
                    message: format!("unknown change type '{other}'"),
                })
            },
        };

        // An empty incremental file carries nothing to load; a full extract
        // still replaces, since the table must equal the dump.
        if row.records == 0 && op != LoadOp::FullReplace {
            continue;
        }

        entries.push(DataChangeEntry {
            table: table_name(&row.extract),
            op,
            file: row.file,
            records: row.records,
        });
    }

    Ok(entries)
}

fn parse_metadata_rows(
    data: &[u8],
) -> Result<(Vec<SchemaDelta>, Vec<CatalogRow>), ManifestError> {
    let mut deltas = Vec::new();
    let mut catalog = Vec::new();
    let mut reader = csv::Reader::from_reader(data);

    for (index, result) in reader.deserialize().enumerate() {
        let row: MetadataRow = result?;
        let table = table_name(&row.extract);
        let row_number = index + 1;

        let column_type = || -> Result<ColumnType, ManifestError> {
            let kind = SourceKind::parse(&row.column_type).ok_or_else(|| {
                ManifestError::InvalidRow {
                    row: row_number,
                    message: format!("unknown column type '{}'", row.column_type),
                }
            })?;
            Ok(ColumnType::new(kind, row.length))
        };

        let op = match row.operation.as_deref().unwrap_or("add_column") {
            "add_column" => DeltaOp::AddColumn {
                column: row.column_name.clone(),
                column_type: column_type()?,
            },
            "drop_column" => DeltaOp::DropColumn {
                column: row.column_name.clone(),
            },
            "rename_column" => DeltaOp::RenameColumn {
                from: row.column_name.clone(),
                to: row.new_column_name.clone().ok_or_else(|| {
                    ManifestError::InvalidRow {
                        row: row_number,
                        message: "rename_column requires new_column_name".to_string(),
                    }
                })?,
            },
            "change_type" => DeltaOp::ChangeType {
                column: row.column_name.clone(),
                column_type: column_type()?,
            },
            other => {
                return Err(ManifestError::InvalidRow {
                    row: row_number,
                    message: format!("unknown operation '{other}'"),
                })
            },
        };

        catalog.push(CatalogRow {
            extract: row.extract,
            column_name: row.column_name,
            column_type: row.column_type,
            length: row.length,
        });
        deltas.push(SchemaDelta { table, op });
    }

    Ok((deltas, catalog))
}
