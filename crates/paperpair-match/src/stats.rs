//! Persisted usage accounting for the judgment service. Counters only —
//! limits from config produce log warnings, never hard failures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use paperpair_core::config::LimitsConfig;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Calls per day, keyed `YYYY-MM-DD`.
    #[serde(default)]
    pub daily_calls: BTreeMap<String, u64>,
    /// Estimated spend per month, keyed `YYYY-MM`.
    #[serde(default)]
    pub monthly_cost: BTreeMap<String, f64>,
}

impl UsageStats {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Account for one completed call and warn when a soft limit is hit.
    pub fn record_call(&mut self, tokens: u64, limits: &LimitsConfig) {
        let now = Utc::now();
        let day = now.format("%Y-%m-%d").to_string();
        let month = now.format("%Y-%m").to_string();
        let cost = tokens as f64 / 1000.0 * limits.cost_per_1k_tokens;

        self.total_calls += 1;
        self.total_tokens += tokens;
        self.total_cost += cost;
        let today = self.daily_calls.entry(day).or_insert(0);
        *today += 1;
        let this_month = self.monthly_cost.entry(month).or_insert(0.0);
        *this_month += cost;

        if limits.daily_api_calls > 0 && *today > limits.daily_api_calls {
            warn!(calls = *today, limit = limits.daily_api_calls, "daily API call limit exceeded");
        }
        if limits.monthly_budget > 0.0 && *this_month > limits.monthly_budget {
            warn!(
                spent = *this_month,
                budget = limits.monthly_budget,
                "monthly budget exceeded"
            );
        }
    }

    pub fn calls_today(&self) -> u64 {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.daily_calls.get(&day).copied().unwrap_or(0)
    }

    pub fn cost_this_month(&self) -> f64 {
        let month = Utc::now().format("%Y-%m").to_string();
        self.monthly_cost.get(&month).copied().unwrap_or(0.0)
    }
}

/// Default stats location, next to the response cache.
pub fn stats_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("paperpair")
        .join("usage.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            daily_api_calls: 500,
            monthly_budget: 10.0,
            cost_per_1k_tokens: 0.002,
        }
    }

    #[test]
    fn record_call_accumulates() {
        let mut stats = UsageStats::default();
        stats.record_call(1000, &limits());
        stats.record_call(500, &limits());

        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_tokens, 1500);
        assert!((stats.total_cost - 0.003).abs() < 1e-12);
        assert_eq!(stats.calls_today(), 2);
        assert!(stats.cost_this_month() > 0.0);
    }

    #[test]
    fn stats_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usage.json");

        let mut stats = UsageStats::default();
        stats.record_call(2000, &limits());
        stats.save_to(&path).unwrap();

        let loaded = UsageStats::load_from(&path).unwrap();
        assert_eq!(loaded.total_calls, 1);
        assert_eq!(loaded.total_tokens, 2000);
    }

    #[test]
    fn missing_file_loads_default() {
        let stats = UsageStats::load_from(Path::new("/tmp/nonexistent_paperpair_usage.json"))
            .unwrap();
        assert_eq!(stats.total_calls, 0);
    }
}
