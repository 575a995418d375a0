//! Cross-invocation step state
//!
//! `StepState` is the only payload that crosses an execution-unit boundary.
//! It is created at orchestrator entry, passed by value to each step, and
//! discarded on terminal success or failure. No shared in-memory state exists
//! between steps.

use dds_common::{ExtractType, ProfileKey, WindowTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline step identifiers, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Retrieve,
    Unzip,
    LoadData,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Retrieve => "retrieve",
            Step::Unzip => "unzip",
            Step::LoadData => "load_data",
        }
    }

    /// The step that follows this one in the chain, if any.
    pub fn successor(&self) -> Option<Step> {
        match self {
            Step::Retrieve => Some(Step::Unzip),
            Step::Unzip => Some(Step::LoadData),
            Step::LoadData => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retrieve" => Ok(Step::Retrieve),
            "unzip" => Ok(Step::Unzip),
            "load_data" => Ok(Step::LoadData),
            other => Err(format!(
                "unknown step '{other}', expected retrieve, unzip, or load_data"
            )),
        }
    }
}

/// Request envelope consumed by the orchestrator.
///
/// Window bounds are optional on entry: discovery resolves a missing
/// `start_time` from the cursor store and applies per-type defaults when both
/// bounds are absent. Steps after `retrieve` always carry resolved bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub step: Step,
    pub extract_type: ExtractType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<WindowTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<WindowTime>,
    pub continue_processing: bool,
    pub profile_key: ProfileKey,
    /// Archive key (`unzip`) or unpacked prefix (`load_data`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filepath: Option<String>,
    /// Destination prefix for `unzip`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_filepath: Option<String>,
    /// Expected SHA-256 of the source archive, set by retrieval and checked
    /// before unpacking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
    /// Whether a successful `load_data` may commit the cursor. Retrieval
    /// clears this on every archive but the window's last, so the watermark
    /// never moves past an archive that has not loaded yet.
    #[serde(default = "default_true")]
    pub advance_cursor: bool,
}

fn default_true() -> bool {
    true
}

impl StepState {
    /// Successor state carrying forward the window and profile, with the
    /// step-specific paths replaced.
    pub fn advance(
        &self,
        step: Step,
        source_filepath: Option<String>,
        target_filepath: Option<String>,
    ) -> StepState {
        StepState {
            step,
            extract_type: self.extract_type,
            start_time: self.start_time,
            stop_time: self.stop_time,
            continue_processing: self.continue_processing,
            profile_key: self.profile_key.clone(),
            source_filepath,
            target_filepath,
            source_checksum: None,
            advance_cursor: self.advance_cursor,
        }
    }
}

/// Result of one completed step invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub completed_step: Step,
    /// Steps handed to the dispatcher as a consequence of this one
    pub dispatched: Vec<Step>,
    /// Storage paths produced by the step (archives, unpacked prefixes)
    pub produced: Vec<String>,
}
