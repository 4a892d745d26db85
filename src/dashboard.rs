//! Dashboard data: date range, KPI summary, chart rows and pagination helpers.

use anyhow::{Result, anyhow, bail};
use chrono::{Days, NaiveDate, NaiveDateTime};

use crate::backend::models::{Page, ProcessedRecord, Summary, Transaction};

/// Inclusive summary date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` days ending at `today`.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Parse `YYYY-MM-DD..YYYY-MM-DD`.
    pub fn parse(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| anyhow!("expected YYYY-MM-DD..YYYY-MM-DD"))?;
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")?;
        if start > end {
            bail!("start date {start} is after end date {end}");
        }
        Ok(Self { start, end })
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// One bar of the transaction chart.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartRow {
    pub date_time: String,
    pub kind: String,
    pub total: f64,
    pub count: u64,
}

/// Everything the dashboard screen shows after a refresh.
#[derive(Clone, Debug, Default)]
pub struct DashboardData {
    pub summary: Summary,
    pub chart: Vec<ChartRow>,
    /// Number of processed uploads known to the backend.
    pub processed_total: u64,
    /// Records still waiting for reconciliation.
    pub unprocessed: Page<serde_json::Value>,
}

/// Flatten processed uploads into `Order` / `Return` chart rows.
///
/// Every record with a breakdown yields an `Order` row; a `Return` row is
/// added only when returns were counted.
pub fn chart_rows(records: &[ProcessedRecord]) -> Vec<ChartRow> {
    let mut rows = Vec::new();
    for record in records {
        let Some(summary) = &record.summary else {
            continue;
        };
        let order = summary
            .transaction_types
            .get("Order")
            .copied()
            .unwrap_or_default();
        rows.push(ChartRow {
            date_time: record.processing_timestamp.clone(),
            kind: "Order".into(),
            total: order.total_amount,
            count: order.count,
        });
        if let Some(ret) = summary.transaction_types.get("Return")
            && ret.count > 0
        {
            rows.push(ChartRow {
                date_time: record.processing_timestamp.clone(),
                kind: "Return".into(),
                total: ret.total_amount,
                count: ret.count,
            });
        }
    }
    rows
}

/// Up to five page numbers around `current`, 1-based.
pub fn page_window(current: u32, pages: u32) -> Vec<u32> {
    let shown = pages.min(5);
    (0..shown)
        .map(|i| {
            if pages <= 5 || current <= 3 {
                i + 1
            } else if current + 2 >= pages {
                pages - 4 + i
            } else {
                current - 2 + i
            }
        })
        .collect()
}

/// "Showing a to b of n transactions".
pub fn showing_range(page: &Page<Transaction>) -> String {
    if page.total == 0 {
        return "No transactions found".into();
    }
    let size = u64::from(page.size.max(1));
    let page_no = u64::from(page.page.max(1));
    let from = (page_no - 1) * size + 1;
    let to = (page_no * size).min(page.total);
    format!("Showing {from} to {to} of {} transactions", page.total)
}

/// US-dollar formatting with thousands separators, e.g. `-$1,234.50`.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Short date such as `Jan 5, 2024`; unparseable input is returned as-is.
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    let date = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.date())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive())
        });
    match date {
        Ok(d) => d.format("%b %-d, %Y").to_string(),
        Err(_) => raw.to_string(),
    }
}
