//! Wire types for the extract API

use serde::{Deserialize, Serialize};

/// Envelope shared by all API responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(rename = "responseStatus")]
    pub response_status: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> ApiEnvelope<T> {
    pub fn is_successful(&self) -> bool {
        self.response_status == "SUCCESS"
    }

    /// First error message, or a placeholder when the vendor omitted details.
    pub fn error_message(&self) -> String {
        self.errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| format!("response status {}", self.response_status))
    }
}

/// Error detail object in API responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

/// Body of an authentication response
#[derive(Debug, Clone, Deserialize)]
pub struct AuthBody {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// Body of a descriptor-list response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilesBody {
    #[serde(default)]
    pub data: Vec<ExtractFileDescriptor>,
    #[serde(rename = "responseDetails", default)]
    pub response_details: Option<ResponseDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseDetails {
    #[serde(default)]
    pub total: u64,
}

/// Metadata identifying one extract archive and its parts.
///
/// Produced by discovery, consumed once by retrieval. `filepart_details` is
/// ordered as listed by the vendor; retrieval re-orders strictly by
/// `filepart` index during reassembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractFileDescriptor {
    pub name: String,
    pub filename: String,
    #[serde(default)]
    pub extract_type: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub fileparts: u32,
    #[serde(default)]
    pub filepart_details: Vec<FilePartDetail>,
}

/// One downloadable part of an extract archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePartDetail {
    pub name: String,
    pub filename: String,
    /// 1-based part index; reassembly concatenates in ascending order
    pub filepart: u32,
    #[serde(default)]
    pub size: u64,
    pub url: String,
}
