//! Backend response models.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Acknowledgement returned by the upload endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Processing status reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Waiting,
    Completed,
    Failed,
    /// Anything the backend sends that we do not know about.
    #[serde(other)]
    Unknown,
}

/// Response of `GET /status/{job_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Paginated listing wrapper shared by the listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub pages: u32,
}

fn first_page() -> u32 {
    1
}

/// A single settled transaction row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transaction {
    #[serde(rename = "date/time", default)]
    pub date_time: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub invoice_amount: Option<f64>,
    #[serde(default)]
    pub net_amount: Option<f64>,
}

/// Count and amount aggregated for one transaction type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TypeTotals {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub total_amount: f64,
}

/// One processed upload, as listed by `/processed`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessedRecord {
    #[serde(default)]
    pub processing_timestamp: String,
    #[serde(default)]
    pub summary: Option<RecordSummary>,
}

/// Per-upload breakdown embedded in a processed record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordSummary {
    #[serde(default)]
    pub transaction_types: BTreeMap<String, TypeTotals>,
}

/// Date-ranged aggregate returned by `/api/summary`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub transaction_types: BTreeMap<String, TypeTotals>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Summary {
    /// Totals for a named type, zero when the backend omitted it.
    pub fn type_totals(&self, name: &str) -> TypeTotals {
        self.transaction_types.get(name).copied().unwrap_or_default()
    }
}
