//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::controller::PollPolicy;

/// Environment variable that overrides `backend.base_url`.
pub const API_URL_ENV: &str = "REIMBURSEMENT_API_URL";

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Processing backend connection.
    pub backend: BackendCfg,
    /// Status polling bounds.
    pub polling: PollingCfg,
    /// Dashboard listing and summary defaults.
    pub dashboard: DashboardCfg,
}

/// Processing backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCfg {
    /// Base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Bounds for the job status loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingCfg {
    /// Delay between status requests.
    pub interval_ms: u64,
    /// `waiting` answers tolerated before timing out.
    pub max_attempts: u32,
    /// Overall ceiling in seconds; 0 disables it.
    pub max_elapsed_secs: u64,
}

/// Dashboard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCfg {
    /// Rows per transactions page (backend caps it at 1000).
    pub page_size: u32,
    /// Length of the default summary window in days.
    pub summary_days: u32,
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// Apply environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV)
            && !url.trim().is_empty()
        {
            tracing::info!("backend url overridden by {API_URL_ENV}");
            self.backend.base_url = url.trim().to_string();
        }
        self
    }

    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs.max(1))
    }

    /// Polling bounds for the upload controller.
    pub fn poll_policy(&self) -> PollPolicy {
        let p = &self.polling;
        PollPolicy {
            interval: Duration::from_millis(p.interval_ms),
            max_attempts: p.max_attempts.max(1),
            max_elapsed: (p.max_elapsed_secs > 0).then(|| Duration::from_secs(p.max_elapsed_secs)),
        }
    }

    /// Page size clamped to what the backend accepts.
    pub fn page_size(&self) -> u32 {
        self.dashboard.page_size.clamp(1, 1000)
    }
}

impl Default for Config {
    /// Defaults match a backend running locally.
    fn default() -> Self {
        Self {
            backend: BackendCfg {
                base_url: "http://localhost:8000".into(),
                request_timeout_secs: 30,
            },
            polling: PollingCfg {
                interval_ms: 2000,
                max_attempts: 150,
                max_elapsed_secs: 600,
            },
            dashboard: DashboardCfg {
                page_size: 50,
                summary_days: 30,
            },
        }
    }
}
