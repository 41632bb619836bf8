//! Configuration surface for the pipeline (spec §6): values only, no naming
//! of the external systems that supply them. Schema refresh policy belongs
//! to the external introspector; the field exists here only so a caller has
//! one settings object to load and log at startup.

use serde::{Deserialize, Serialize};

const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HARD_ROW_CAP: u32 = 100;
const DEFAULT_SCHEMA_REFRESH_PERIOD_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-statement timeout inside the read-only transaction (§4.H).
    pub statement_timeout_ms: u64,
    /// Hard row cap applied on top of the caller's page size (§4.F).
    pub hard_row_cap: u32,
    /// Owned by the external schema introspector, not the core; carried
    /// here so it has a single place to live alongside the other settings.
    pub schema_refresh_period_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            hard_row_cap: DEFAULT_HARD_ROW_CAP,
            schema_refresh_period_ms: DEFAULT_SCHEMA_REFRESH_PERIOD_MS,
        }
    }
}

impl PipelineConfig {
    /// Loads settings from the environment, falling back to defaults for any
    /// variable that is unset or fails to parse.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            statement_timeout_ms: env_u64("SQG_STATEMENT_TIMEOUT_MS", default.statement_timeout_ms),
            hard_row_cap: env_u32("SQG_HARD_ROW_CAP", default.hard_row_cap),
            schema_refresh_period_ms: env_u64(
                "SQG_SCHEMA_REFRESH_PERIOD_MS",
                default.schema_refresh_period_ms,
            ),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.statement_timeout_ms, 5_000);
        assert_eq!(cfg.hard_row_cap, 100);
    }

    #[test]
    fn from_env_falls_back_on_missing_var() {
        std::env::remove_var("SQG_HARD_ROW_CAP_TEST_UNSET");
        assert_eq!(env_u32("SQG_HARD_ROW_CAP_TEST_UNSET", 42), 42);
    }
}
