//! HTTP client for the extract API
//!
//! Session-based authentication: `authenticate` exchanges credentials for a
//! session id that is sent as the `Authorization` header on subsequent
//! requests. Transient failures (connect errors, timeouts, 5xx, 429) are
//! retried with exponential backoff; HTTP 401/403 and vendor-reported
//! authentication failures are fatal and surface immediately.

use crate::api::types::{ApiEnvelope, AuthBody, ExtractFileDescriptor, ListFilesBody};
use crate::config::ApiConfig;
use crate::error::ApiError;
use dds_common::{ExtractType, WindowTime};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Authenticated client for descriptor listing and part downloads
pub struct ExtractApiClient {
    client: Client,
    config: ApiConfig,
    session_id: Option<String>,
}

impl ExtractApiClient {
    /// Create a new client; no network traffic until `authenticate`.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("dds-sync/0.1")
            .build()?;

        Ok(Self {
            client,
            config,
            session_id: None,
        })
    }

    /// Exchange credentials for a session id.
    ///
    /// Fatal on rejection; the operator must fix credentials before re-running.
    pub async fn authenticate(&mut self) -> Result<(), ApiError> {
        let url = format!("{}/auth", self.config.base_url);
        info!(url = %url, "Authenticating with extract API");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(ApiError::Authentication(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let envelope: ApiEnvelope<AuthBody> = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        if !envelope.is_successful() {
            return Err(ApiError::Authentication(envelope.error_message()));
        }

        match envelope.body.session_id {
            Some(session_id) => {
                debug!("Extract API session established");
                self.session_id = Some(session_id);
                Ok(())
            },
            None => Err(ApiError::Authentication(
                "authentication succeeded but no session id was returned".to_string(),
            )),
        }
    }

    /// List extract descriptors for a window.
    ///
    /// An empty list is a valid "nothing new" result. Descriptors with a zero
    /// declared size are placeholders and are filtered out.
    pub async fn list_extract_files(
        &self,
        extract_type: ExtractType,
        start_time: WindowTime,
        stop_time: WindowTime,
    ) -> Result<Vec<ExtractFileDescriptor>, ApiError> {
        let url = format!("{}/services/directdata/files", self.config.base_url);

        info!(
            extract_type = %extract_type,
            start_time = %start_time,
            stop_time = %stop_time,
            "Listing available extract files"
        );

        let response = self
            .with_retry(|| {
                Ok(self
                    .client
                    .get(&url)
                    .header("Authorization", self.session_header()?)
                    .query(&[
                        ("extract_type", extract_type.api_value().to_string()),
                        ("start_time", start_time.to_string()),
                        ("stop_time", stop_time.to_string()),
                    ])
                    .send())
            })
            .await?;

        let envelope: ApiEnvelope<ListFilesBody> = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        if !envelope.is_successful() {
            return Err(ApiError::Api(envelope.error_message()));
        }

        let descriptors: Vec<ExtractFileDescriptor> = envelope
            .body
            .data
            .into_iter()
            .filter(|d| d.size > 0)
            .collect();

        info!(count = descriptors.len(), "Extract file listing complete");

        Ok(descriptors)
    }

    /// Download one archive part, returning its bytes.
    pub async fn download_part(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        debug!(url = %url, "Downloading archive part");

        let response = self
            .with_retry(|| {
                Ok(self
                    .client
                    .get(url)
                    .header("Authorization", self.session_header()?)
                    .send())
            })
            .await?;

        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "Part download complete");

        Ok(bytes.to_vec())
    }

    fn session_header(&self) -> Result<String, ApiError> {
        self.session_id
            .clone()
            .ok_or_else(|| ApiError::Authentication("client is not authenticated".to_string()))
    }

    /// Run a request with bounded exponential backoff.
    ///
    /// Retries connect errors, timeouts, 429 and 5xx responses; 401/403 map to
    /// the fatal authentication error and are never retried.
    async fn with_retry<F, Fut>(&self, mut make_request: F) -> Result<reqwest::Response, ApiError>
    where
        F: FnMut() -> Result<Fut, ApiError>,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            match make_request()?.await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(ApiError::Authentication(format!("HTTP {}", status)));
                    }

                    if !retryable_status(status) {
                        return Err(ApiError::Status {
                            status: status.as_u16(),
                            url: response.url().to_string(),
                        });
                    }

                    last_error = format!("HTTP {}", status);
                },
                Err(e) => {
                    if e.is_builder() {
                        return Err(ApiError::Http(e));
                    }
                    last_error = e.to_string();
                },
            }

            if attempt < self.config.max_retries {
                let backoff_secs = 2u64.pow(attempt);
                warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_secs,
                    error = %last_error,
                    "Transient API failure, retrying"
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }
        }

        Err(ApiError::RetriesExhausted {
            attempts: self.config.max_retries,
            last_error,
        })
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
