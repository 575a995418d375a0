//! DDS Sync - Main entry point
//!
//! Thin binary around the orchestrator: parses a step request from arguments
//! or environment, wires up the production backends, runs the chain, and
//! prints the step outcomes as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use dds_common::logging::{init_logging, LogConfig};
use dds_common::{ExtractType, ProfileKey, WindowTime};
use dds_sync::cursor::PostgresCursorStore;
use dds_sync::dispatch::LocalDispatcher;
use dds_sync::lease::PostgresRunLease;
use dds_sync::storage::S3Store;
use dds_sync::warehouse::PostgresWarehouse;
use dds_sync::{Orchestrator, Step, StepState, SyncConfig};
use std::sync::Arc;
use tracing::{error, info};

/// Run one step of the direct data sync pipeline
#[derive(Debug, Parser)]
#[command(name = "dds-sync", version, about)]
struct Args {
    /// Step to execute: retrieve, unzip, or load_data
    #[arg(long, env = "DDS_STEP", default_value = "retrieve")]
    step: Step,

    /// Extract type: full, incremental, or log
    #[arg(long, env = "DDS_EXTRACT_TYPE", default_value = "incremental")]
    extract_type: ExtractType,

    /// Window start (`2024-04-19T00:00Z`); resolved from the cursor if omitted
    #[arg(long, env = "DDS_START_TIME")]
    start_time: Option<WindowTime>,

    /// Window stop; defaulted per extract type if omitted
    #[arg(long, env = "DDS_STOP_TIME")]
    stop_time: Option<WindowTime>,

    /// Chain into the next step on success
    #[arg(long, env = "DDS_CONTINUE_PROCESSING", default_value_t = true)]
    continue_processing: bool,

    /// Credential/target profile for this run
    #[arg(long, env = "DDS_PROFILE_KEY")]
    profile_key: String,

    /// Archive key (unzip) or unpacked prefix (load_data)
    #[arg(long, env = "DDS_SOURCE_FILEPATH")]
    source_filepath: Option<String>,

    /// Destination prefix for unzip
    #[arg(long, env = "DDS_TARGET_FILEPATH")]
    target_filepath: Option<String>,

    /// Expected SHA-256 of the source archive (unzip)
    #[arg(long, env = "DDS_SOURCE_CHECKSUM")]
    source_checksum: Option<String>,

    /// Whether a successful load_data may advance the cursor
    #[arg(long, env = "DDS_ADVANCE_CURSOR", default_value_t = true)]
    advance_cursor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().unwrap_or_default();
    init_logging(&log_config)?;

    let config = SyncConfig::load()?;

    let state = StepState {
        step: args.step,
        extract_type: args.extract_type,
        start_time: args.start_time,
        stop_time: args.stop_time,
        continue_processing: args.continue_processing,
        profile_key: ProfileKey::new(args.profile_key),
        source_filepath: args.source_filepath,
        target_filepath: args.target_filepath,
        source_checksum: args.source_checksum,
        advance_cursor: args.advance_cursor,
    };

    info!(
        step = %state.step,
        extract_type = %state.extract_type,
        profile_key = %state.profile_key,
        "Starting pipeline invocation"
    );

    let store = Arc::new(S3Store::new(&config.storage).await?);
    let warehouse = Arc::new(
        PostgresWarehouse::connect(
            &config.warehouse,
            state.profile_key.as_str(),
            config.loader.batch_size,
        )
        .await?,
    );
    let cursor = Arc::new(PostgresCursorStore::connect(&config.warehouse).await?);
    let lease = Arc::new(PostgresRunLease::connect(&config.warehouse).await?);
    let dispatcher = Arc::new(LocalDispatcher::new());

    let orchestrator = Orchestrator::new(config, store, warehouse, cursor, dispatcher, lease);

    match orchestrator.run(state).await {
        Ok(outcomes) => {
            let report =
                serde_json::to_string_pretty(&outcomes).context("Failed to encode outcomes")?;
            println!("{report}");
            Ok(())
        },
        Err(e) => {
            error!(error = %e, "Pipeline invocation failed");
            Err(e.into())
        },
    }
}
