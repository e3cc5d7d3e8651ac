use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedRecord;

/// Opaque customer identifier. The data service sends integers or strings;
/// integers order before strings, each kind in its natural order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomerId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerId::Numeric(value) => write!(f, "{value}"),
            CustomerId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for CustomerId {
    fn from(value: i64) -> Self {
        CustomerId::Numeric(value)
    }
}

impl From<&str> for CustomerId {
    fn from(value: &str) -> Self {
        CustomerId::Text(value.to_string())
    }
}

impl CustomerId {
    /// Parses a CLI argument: all-digit input is numeric, anything else is text.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(value) => CustomerId::Numeric(value),
            Err(_) => CustomerId::Text(raw.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Active,
    Churned,
}

impl Status {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Status::Active),
            "churned" => Some(Status::Churned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "Active",
            Status::Churned => "Churned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
        }
    }
}

/// Scale a source reports health scores on. Records always carry the
/// canonical 0-100 value; the source scale is kept alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HealthScale {
    Ten,
    Hundred,
}

impl HealthScale {
    pub fn max(&self) -> f64 {
        match self {
            HealthScale::Ten => 10.0,
            HealthScale::Hundred => 100.0,
        }
    }

    /// 0-10 values are multiplied by ten; 0-100 values pass through.
    pub fn to_canonical(&self, value: f64) -> f64 {
        value * (100.0 / self.max())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChurnReason {
    Price,
    LowUsage,
    PoorSupport,
    Competition,
}

impl ChurnReason {
    pub const ALL: [ChurnReason; 4] = [
        ChurnReason::Price,
        ChurnReason::LowUsage,
        ChurnReason::PoorSupport,
        ChurnReason::Competition,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ChurnReason::Price => "Price",
            ChurnReason::LowUsage => "Low Usage",
            ChurnReason::PoorSupport => "Poor Support",
            ChurnReason::Competition => "Competition",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "price" => Some(ChurnReason::Price),
            "lowusage" => Some(ChurnReason::LowUsage),
            "poorsupport" => Some(ChurnReason::PoorSupport),
            "competition" => Some(ChurnReason::Competition),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ChurnReason::Price => 0,
            ChurnReason::LowUsage => 1,
            ChurnReason::PoorSupport => 2,
            ChurnReason::Competition => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecord {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub status: Status,
    /// Canonical 0-100 scale.
    pub health_score: f64,
    pub health_source_scale: HealthScale,
    pub last_login: Option<NaiveDate>,
    pub last_login_days_ago: u32,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub tenure_months: Option<f64>,
    pub login_frequency: Option<f64>,
    pub unresolved_tickets: u32,
    pub monthly_revenue: Option<f64>,
    pub churn_reason: Option<ChurnReason>,
}

impl CustomerRecord {
    pub fn health_out_of_ten(&self) -> f64 {
        self.health_score / 10.0
    }

    pub fn is_churned(&self) -> bool {
        self.status == Status::Churned
    }
}

/// Immutable result of one successful fetch. Superseded, never mutated.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    pub payload: T,
}

/// Normalized customers plus the records that were dropped on the way in.
#[derive(Debug, Clone, Default)]
pub struct CustomerBatch {
    pub records: Vec<CustomerRecord>,
    pub dropped: Vec<MalformedRecord>,
}

pub type CustomerSnapshot = Snapshot<CustomerBatch>;

impl CustomerSnapshot {
    pub fn records(&self) -> &[CustomerRecord] {
        &self.payload.records
    }
}

/// A metric that may have no meaningful value, e.g. a ratio over an empty set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Measure {
    Known(f64),
    Unavailable,
}

impl Measure {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measure::Known(value) => Some(*value),
            Measure::Unavailable => None,
        }
    }

    pub fn display_with(&self, render: impl Fn(f64) -> String) -> String {
        self.value().map(render).unwrap_or_else(|| "N/A".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_sort_before_text_ids() {
        let mut ids = vec![
            CustomerId::from("b"),
            CustomerId::from(10),
            CustomerId::from("a"),
            CustomerId::from(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                CustomerId::from(2),
                CustomerId::from(10),
                CustomerId::from("a"),
                CustomerId::from("b"),
            ]
        );
    }

    #[test]
    fn ten_point_health_is_scaled_up() {
        assert_eq!(HealthScale::Ten.to_canonical(7.5), 75.0);
        assert_eq!(HealthScale::Hundred.to_canonical(78.0), 78.0);
    }

    #[test]
    fn churn_reason_parse_is_forgiving() {
        assert_eq!(ChurnReason::parse("Low Usage"), Some(ChurnReason::LowUsage));
        assert_eq!(ChurnReason::parse("poor_support"), Some(ChurnReason::PoorSupport));
        assert_eq!(ChurnReason::parse("weather"), None);
    }

    #[test]
    fn unavailable_measure_renders_na() {
        assert_eq!(Measure::Unavailable.display_with(|v| format!("{v:.1}")), "N/A");
        assert_eq!(Measure::Unavailable.value(), None);
        assert_eq!(Measure::Known(2.5).display_with(|v| format!("{v:.1}")), "2.5");
    }
}
