//! DDS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the DDS workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all DDS workspace
//! members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Archive integrity verification utilities
//! - **Logging**: Environment-driven tracing initialization
//! - **Types**: Shared domain types (extract types, window timestamps,
//!   profile keys)

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DdsError, Result};
pub use types::{ExtractType, ProfileKey, WindowTime};
