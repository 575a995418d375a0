//! Typed error hierarchy for the sync pipeline
//!
//! Each pipeline concern owns a dedicated error enum; failures are reported
//! as typed results and never used to drive normal control flow. The umbrella
//! [`SyncError`] is what crosses the orchestrator boundary and names which
//! step failed.

use dds_common::{ExtractType, ProfileKey};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors from the remote extract API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Fatal: requires operator intervention, never retried automatically
    #[error("Authentication with the extract API failed: {0}")]
    Authentication(String),

    #[error("Extract API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Extract API returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Extract API reported failure: {0}")]
    Api(String),

    #[error("Exhausted {attempts} download attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Malformed API response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Authentication failures must not be retried; everything else is
    /// transient at the point of occurrence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }
}

/// Errors from durable object storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error for '{key}': {message}")]
    Backend { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while retrieving and reassembling archives
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Part {part} of '{name}' has {actual} bytes, descriptor declared {expected}")]
    PartSizeMismatch {
        name: String,
        part: u32,
        expected: u64,
        actual: u64,
    },

    #[error("Descriptor '{name}' declares {expected} parts but {actual} were downloaded")]
    MissingParts {
        name: String,
        expected: u32,
        actual: u32,
    },
}

/// Errors while unpacking archives or parsing manifests
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found under '{0}'")]
    MissingManifest(String),

    #[error("Metadata not found under '{0}'")]
    MissingMetadata(String),

    #[error("Malformed manifest row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from warehouse primitives (shared by schema and load paths)
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Warehouse error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table '{0}' does not exist")]
    NoSuchTable(String),

    #[error("Column '{column}' does not exist on table '{table}'")]
    NoSuchColumn { table: String, column: String },

    #[error("Warehouse constraint violation: {0}")]
    Constraint(String),
}

/// Errors while reconciling warehouse schema
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(
        "Refusing to narrow {table}.{column} from {from} to {to}: change would lose data"
    )]
    NarrowingTypeChange {
        table: String,
        column: String,
        from: String,
        to: String,
    },

    #[error(
        "Refusing to drop {table}.{column}: a pending data entry in this manifest still references it"
    )]
    DroppedColumnReferenced { table: String, column: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors while loading data files
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("CSV error in '{file}': {message}")]
    Csv { file: String, message: String },

    #[error("Data file '{file}' has no '{key}' column required for {operation}")]
    MissingKeyColumn {
        file: String,
        key: String,
        operation: String,
    },

    #[error("Loaded {actual} rows into '{table}' but manifest declared {expected}")]
    RowCountMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },
}

/// Errors from the cursor store
#[derive(Error, Debug)]
pub enum CursorError {
    #[error("Cursor store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from the run lease
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Run lease error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Umbrella error crossing the orchestrator boundary
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("retrieve step failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("unzip step failed: {0}")]
    Manifest(#[from] ManifestError),

    #[error("load_data step failed during schema reconciliation: {0}")]
    Schema(#[from] SchemaError),

    #[error("load_data step failed: {0}")]
    Load(#[from] LoadError),

    #[error("cursor commit failed: {0}")]
    Cursor(#[from] CursorError),

    #[error("run lease failed: {0}")]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(
        "A pipeline run is already in flight for profile '{profile_key}' and extract type '{extract_type}'"
    )]
    AlreadyRunning {
        profile_key: ProfileKey,
        extract_type: ExtractType,
    },

    #[error("Invalid step state: {0}")]
    InvalidState(String),

    #[error("Failed to dispatch next step: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
