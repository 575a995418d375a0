//! Step orchestration
//!
//! Drives the `retrieve -> unzip -> load_data` chain. Entry may start at any
//! step, so a failed invocation can be retried mid-chain with the same
//! `StepState`. The cursor advances only after a `load_data` step fully
//! commits; failures halt the chain at the failing step and leave the cursor
//! untouched.

use crate::api::ExtractApiClient;
use crate::config::SyncConfig;
use crate::cursor::CursorStore;
use crate::dispatch::StepDispatcher;
use crate::error::{Result, SyncError};
use crate::lease::RunLease;
use crate::loader::DataLoader;
use crate::manifest::ManifestParser;
use crate::retrieve::Retriever;
use crate::schema::SchemaReconciler;
use crate::state::{Step, StepOutcome, StepState};
use crate::storage::ObjectStore;
use crate::unpack::Unpacker;
use crate::warehouse::Warehouse;
use chrono::Duration;
use dds_common::{ExtractType, WindowTime};
use std::sync::Arc;
use tracing::{info, warn};

/// Lag and span of the default window when a request omits both bounds.
fn default_window_span(extract_type: ExtractType) -> Option<Duration> {
    match extract_type {
        ExtractType::Incremental => Some(Duration::minutes(15)),
        ExtractType::Log => Some(Duration::days(1)),
        // A full extract window is a deliberate operator choice.
        ExtractType::Full => None,
    }
}

pub struct Orchestrator {
    config: SyncConfig,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    cursor: Arc<dyn CursorStore>,
    dispatcher: Arc<dyn StepDispatcher>,
    lease: Arc<dyn RunLease>,
}

impl Orchestrator {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        cursor: Arc<dyn CursorStore>,
        dispatcher: Arc<dyn StepDispatcher>,
        lease: Arc<dyn RunLease>,
    ) -> Self {
        Self {
            config,
            store,
            warehouse,
            cursor,
            dispatcher,
            lease,
        }
    }

    /// Run the chain starting from `initial`, executing locally-queued
    /// successor steps until the dispatcher has nothing left in process.
    ///
    /// At most one chain may be in flight per (profile, extract type) across
    /// all compute units; a second invocation for the same key is rejected.
    /// The lease is given back however the chain finishes.
    pub async fn run(&self, initial: StepState) -> Result<Vec<StepOutcome>> {
        let profile_key = initial.profile_key.clone();
        let extract_type = initial.extract_type;

        if !self.lease.acquire(&profile_key, extract_type).await? {
            return Err(SyncError::AlreadyRunning {
                profile_key,
                extract_type,
            });
        }

        let result = self.run_chain(initial).await;

        if let Err(e) = self.lease.release(&profile_key, extract_type).await {
            warn!(
                profile_key = %profile_key,
                extract_type = %extract_type,
                error = %e,
                "Failed to release run lease"
            );
        }
        result
    }

    async fn run_chain(&self, initial: StepState) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::new();
        let mut next = Some(initial);

        while let Some(state) = next {
            info!(
                step = %state.step,
                extract_type = %state.extract_type,
                profile_key = %state.profile_key,
                "Executing pipeline step"
            );

            let (outcome, successors) = self.execute_step(state).await?;
            outcomes.push(outcome);

            for successor in successors {
                self.dispatcher.dispatch(successor).await?;
            }
            next = self.dispatcher.next_local().await;
        }

        Ok(outcomes)
    }

    async fn execute_step(
        &self,
        state: StepState,
    ) -> Result<(StepOutcome, Vec<StepState>)> {
        match state.step {
            Step::Retrieve => self.run_retrieve(state).await,
            Step::Unzip => self.run_unzip(state).await,
            Step::LoadData => self.run_load(state).await,
        }
    }

    // ========================================================================
    // retrieve
    // ========================================================================

    async fn run_retrieve(
        &self,
        mut state: StepState,
    ) -> Result<(StepOutcome, Vec<StepState>)> {
        let (start, stop) = self.resolve_window(&state).await?;
        state.start_time = Some(start);
        state.stop_time = Some(stop);

        let mut api = ExtractApiClient::new(self.config.api.clone())?;
        api.authenticate().await?;

        let descriptors = api
            .list_extract_files(state.extract_type, start, stop)
            .await?;

        if descriptors.is_empty() {
            info!(
                start = %start,
                stop = %stop,
                "No extracts available for window"
            );
            return Ok((
                StepOutcome {
                    completed_step: Step::Retrieve,
                    dispatched: Vec::new(),
                    produced: Vec::new(),
                },
                Vec::new(),
            ));
        }

        let retriever = Retriever::new(
            self.store.clone(),
            &self.config.storage.base_prefix,
            self.config.api.part_concurrency,
        );

        let mut produced = Vec::new();
        let mut successors = Vec::new();
        let last = descriptors.len() - 1;

        // Every listed archive is processed, in listing order; a gap here
        // would silently lose a window's changes.
        for (index, descriptor) in descriptors.iter().enumerate() {
            let archive = retriever.retrieve(&api, descriptor).await?;
            let unpack_prefix = archive.unpack_prefix();
            produced.push(archive.storage_key.clone());

            if state.continue_processing {
                let mut successor = state.advance(
                    Step::Unzip,
                    Some(archive.storage_key),
                    Some(unpack_prefix),
                );
                successor.source_checksum = Some(archive.checksum);
                // Only the window's final archive may move the cursor; an
                // earlier commit would let a later failure be skipped.
                successor.advance_cursor = index == last;
                successors.push(successor);
            }
        }

        Ok((
            StepOutcome {
                completed_step: Step::Retrieve,
                dispatched: successors.iter().map(|s| s.step).collect(),
                produced,
            },
            successors,
        ))
    }

    /// Resolve window bounds: explicit bounds win, a missing start comes from
    /// the cursor, and a fully absent window falls back to the extract type's
    /// default span lagged behind now.
    async fn resolve_window(&self, state: &StepState) -> Result<(WindowTime, WindowTime)> {
        let span = default_window_span(state.extract_type);

        let stop = match state.stop_time {
            Some(stop) => stop,
            None => {
                let span = span.ok_or_else(|| {
                    SyncError::InvalidState(
                        "full extract requests must carry explicit window bounds".to_string(),
                    )
                })?;
                WindowTime::new(WindowTime::now().as_datetime() - span)
            },
        };

        let start = match state.start_time {
            Some(start) => start,
            None => {
                let cursor = self
                    .cursor
                    .read(&state.profile_key, state.extract_type)
                    .await?;
                match (cursor, span) {
                    (Some(cursor), _) => cursor,
                    (None, Some(span)) => {
                        warn!(
                            extract_type = %state.extract_type,
                            "No cursor recorded yet, defaulting window start"
                        );
                        WindowTime::new(stop.as_datetime() - span)
                    },
                    (None, None) => {
                        return Err(SyncError::InvalidState(
                            "full extract requests must carry explicit window bounds"
                                .to_string(),
                        ))
                    },
                }
            },
        };

        Ok((start, stop))
    }

    // ========================================================================
    // unzip
    // ========================================================================

    async fn run_unzip(&self, state: StepState) -> Result<(StepOutcome, Vec<StepState>)> {
        let source = state.source_filepath.clone().ok_or_else(|| {
            SyncError::InvalidState("unzip requires a source archive path".to_string())
        })?;
        let target = state
            .target_filepath
            .clone()
            .unwrap_or_else(|| source.trim_end_matches(".tar.gz").to_string());

        let unpacker = Unpacker::new(self.store.clone());
        let unpacked = unpacker
            .unpack(&source, &target, state.source_checksum.as_deref())
            .await?;

        let successors = if state.continue_processing {
            vec![state.advance(Step::LoadData, Some(unpacked.target_prefix.clone()), None)]
        } else {
            Vec::new()
        };

        Ok((
            StepOutcome {
                completed_step: Step::Unzip,
                dispatched: successors.iter().map(|s| s.step).collect(),
                produced: vec![unpacked.target_prefix],
            },
            successors,
        ))
    }

    // ========================================================================
    // load_data
    // ========================================================================

    async fn run_load(&self, state: StepState) -> Result<(StepOutcome, Vec<StepState>)> {
        let prefix = state.source_filepath.clone().ok_or_else(|| {
            SyncError::InvalidState("load_data requires an unpacked extract path".to_string())
        })?;
        let stop_time = state.stop_time.ok_or_else(|| {
            SyncError::InvalidState("load_data requires a resolved stop_time".to_string())
        })?;

        let parser = ManifestParser::new(self.store.clone());
        let manifest = parser.parse(&prefix, state.extract_type).await?;

        self.warehouse
            .ensure_schema()
            .await
            .map_err(crate::error::SchemaError::from)?;

        // Schema commits before any data load for the same tables.
        let reconciler = SchemaReconciler::new(self.warehouse.clone(), self.store.clone());
        reconciler.reconcile(&prefix, &manifest).await?;

        let loader = DataLoader::new(self.store.clone(), self.warehouse.clone());
        let report = loader.load(&prefix, &manifest).await?;

        // The window's final archive advances the watermark once every
        // earlier archive has already loaded. Regressions are ignored by
        // the store.
        if state.advance_cursor {
            self.cursor
                .commit(&state.profile_key, state.extract_type, stop_time)
                .await?;
        }

        info!(
            files = report.files_loaded,
            rows = report.rows_applied,
            stop_time = %stop_time,
            cursor_advanced = state.advance_cursor,
            "Load complete"
        );

        Ok((
            StepOutcome {
                completed_step: Step::LoadData,
                dispatched: Vec::new(),
                produced: vec![prefix],
            },
            Vec::new(),
        ))
    }
}
