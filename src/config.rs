use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::models::HealthScale;

/// Thresholds shared by tiering, ranking and the insight cohorts.
/// `low_health_threshold` is on the canonical 0-100 health scale.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub high_risk_score: f64,
    pub medium_risk_score: f64,
    pub low_health_threshold: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_risk_score: 70.0,
            medium_risk_score: 40.0,
            low_health_threshold: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Customers whose last login is further back than this count as inactive.
    pub inactive_after_days: u32,
    pub early_tenure_months: f64,
    /// Logins per week separating low from high early engagement.
    pub login_frequency_threshold: f64,
    /// Reported as `InsightValue::Fallback` when a cohort is empty. `None` reports
    /// `InsufficientData` instead.
    pub early_engagement_fallback: Option<f64>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            inactive_after_days: 30,
            early_tenure_months: 3.0,
            login_frequency_threshold: 2.0,
            early_engagement_fallback: Some(3.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Percentage points a retention period must fall by to be flagged as a drop.
    pub retention_drop_threshold: f64,
    pub top_risk_limit: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            retention_drop_threshold: 3.0,
            top_risk_limit: 10,
        }
    }
}

/// Polling policy injected into every refresh scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    pub interval_secs: u64,
    pub jitter_secs: u64,
    pub backoff_factor: f64,
    pub max_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            jitter_secs: 0,
            backoff_factor: 2.0,
            max_backoff_secs: 300,
            request_timeout_secs: 10,
        }
    }
}

impl SchedulePolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Delay before the next tick after `consecutive_errors` failures in a row,
    /// before jitter is added.
    pub fn backoff_delay(&self, consecutive_errors: u32) -> Duration {
        let base = self.interval().as_secs_f64();
        let cap = (self.max_backoff_secs as f64).max(base);
        let factor = self.backoff_factor.max(1.0).powi(consecutive_errors.min(32) as i32);
        Duration::from_secs_f64((base * factor).min(cap))
    }

    pub fn next_delay<R: rand::Rng>(&self, consecutive_errors: u32, rng: &mut R) -> Duration {
        let jitter = if self.jitter_secs == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rng.gen_range(0.0..=self.jitter_secs as f64))
        };
        self.backoff_delay(consecutive_errors) + jitter
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub health_scale: HealthScale,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            health_scale: HealthScale::Hundred,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub risk: RiskThresholds,
    pub insights: InsightConfig,
    pub aggregation: AggregationConfig,
    pub schedule: SchedulePolicy,
    pub source: SourceConfig,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
