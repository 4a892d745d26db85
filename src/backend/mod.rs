//! Processing backend client.

use async_trait::async_trait;
use thiserror::Error;

use crate::jobs::{ReportType, SourceFile};

/// reqwest implementation of the backend endpoints.
pub mod client;
/// JSON payloads exchanged with the backend.
pub mod models;

pub use client::HttpBackend;
pub use models::{StatusResponse, SubmitResponse};

/// Errors returned by backend calls.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with a non-2xx status.
    #[error("HTTP status {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status {
        status: u16,
        message: Option<String>,
    },
    /// The response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// The two endpoints the upload controller depends on.
#[async_trait]
pub trait ReportBackend: Send + Sync + 'static {
    /// Submit a report file as multipart; returns the backend job acknowledgement.
    async fn submit_report(
        &self,
        report_type: ReportType,
        file: SourceFile,
    ) -> Result<SubmitResponse, BackendError>;

    /// Fetch the processing status of a job.
    async fn job_status(&self, job_id: &str) -> Result<StatusResponse, BackendError>;
}
