//! Remote extract API
//!
//! The vendor offers change-capture extracts through an authenticated HTTP
//! API: a list endpoint describing archives available for a time window, and
//! per-part download URLs. Authentication failures are fatal; transient
//! network failures are retried with bounded backoff at the call site.

pub mod client;
pub mod types;

pub use client::ExtractApiClient;
pub use types::{ExtractFileDescriptor, FilePartDetail};
