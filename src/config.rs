//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::regen::{DisabledRegenerator, HttpRegenerator, Regenerator};

/// Default bound on a single regeneration request.
pub const DEFAULT_REGEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct CascadeConfig {
    /// Database file (from PLAN_CASCADE_DB). Platform data dir when unset.
    pub db_path: Option<PathBuf>,
    /// Regeneration endpoint (from PLAN_CASCADE_REGEN_URL).
    pub regen_url: Option<String>,
    /// Per-document regeneration timeout (from PLAN_CASCADE_REGEN_TIMEOUT_MS).
    pub regen_timeout: Duration,
}

impl CascadeConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("PLAN_CASCADE_DB").ok().map(PathBuf::from);

        let regen_url = std::env::var("PLAN_CASCADE_REGEN_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let regen_timeout = std::env::var("PLAN_CASCADE_REGEN_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REGEN_TIMEOUT);

        Self {
            db_path,
            regen_url,
            regen_timeout,
        }
    }

    /// The regenerator this configuration points at.
    pub fn regenerator(&self) -> Arc<dyn Regenerator> {
        match &self.regen_url {
            Some(url) => Arc::new(HttpRegenerator::new(url.clone())),
            None => {
                tracing::warn!(
                    "PLAN_CASCADE_REGEN_URL not set; cascades will be flagged for manual attention"
                );
                Arc::new(DisabledRegenerator)
            }
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            regen_url: None,
            regen_timeout: DEFAULT_REGEN_TIMEOUT,
        }
    }
}
