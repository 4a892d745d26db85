//! HTTP client for the processing backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::{
    BackendError, ReportBackend,
    models::{Page, ProcessedRecord, StatusResponse, SubmitResponse, Summary, Transaction},
};
use crate::jobs::{ReportType, SourceFile};

/// reqwest-backed client bound to one backend base URL.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One page of settled transactions.
    pub async fn transactions(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Page<Transaction>, BackendError> {
        let url = self.url(&format!("/transactions?page={page}&size={size}"));
        self.get_json(url).await
    }

    /// A single transaction by order id.
    pub async fn transaction(&self, order_id: &str) -> Result<Transaction, BackendError> {
        let url = self.url(&format!(
            "/transaction/{}",
            urlencoding::encode(order_id)
        ));
        self.get_json(url).await
    }

    /// Processed uploads with their per-type breakdown.
    pub async fn processed(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Page<ProcessedRecord>, BackendError> {
        let url = self.url(&format!("/processed?page={page}&size={size}"));
        self.get_json(url).await
    }

    /// Raw records the backend could not reconcile yet.
    pub async fn unprocessed(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Page<serde_json::Value>, BackendError> {
        let url = self.url(&format!("/unprocessed?page={page}&size={size}"));
        self.get_json(url).await
    }

    /// Aggregate KPIs for an inclusive date range.
    pub async fn summary(&self, start: NaiveDate, end: NaiveDate) -> Result<Summary, BackendError> {
        let url = self.url(&format!(
            "/api/summary?start_date={}&end_date={}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ));
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, BackendError> {
        tracing::debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ReportBackend for HttpBackend {
    async fn submit_report(
        &self,
        report_type: ReportType,
        file: SourceFile,
    ) -> Result<SubmitResponse, BackendError> {
        let SourceFile {
            file_name,
            media_type,
            bytes,
        } = file;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&media_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self.url(report_type.upload_path());
        tracing::debug!("POST {url}");
        let resp = self.http.post(url).multipart(form).send().await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json::<SubmitResponse>().await?)
    }

    async fn job_status(&self, job_id: &str) -> Result<StatusResponse, BackendError> {
        let url = self.url(&format!("/status/{}", urlencoding::encode(job_id)));
        self.get_json(url).await
    }
}

/// Convert non-2xx responses into `BackendError::Status`, keeping the body's message.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Pull a human message out of an error body (`message`, then `detail`, then `error`).
fn error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"].iter().find_map(|k| {
        v[*k]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_then_detail() {
        // エラー本文はmessage、次にdetailを採用することを検証する。
        assert_eq!(
            error_message(r#"{"message":"bad csv","detail":"x"}"#).as_deref(),
            Some("bad csv")
        );
        assert_eq!(
            error_message(r#"{"detail":"Invalid file format"}"#).as_deref(),
            Some("Invalid file format")
        );
        assert_eq!(error_message(r#"{"message":"  "}"#), None);
        assert_eq!(
            error_message(r#"{"message":"","detail":"Missing column"}"#).as_deref(),
            Some("Missing column")
        );
        assert_eq!(error_message("Internal Server Error"), None);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        // ベースURL末尾のスラッシュを取り除くことを検証する。
        let b = HttpBackend::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(b.base_url(), "http://localhost:8000");
        assert_eq!(b.url("/status/j1"), "http://localhost:8000/status/j1");
    }
}
