use serde::Serialize;

use crate::config::RiskThresholds;
use crate::models::{ChurnReason, CustomerRecord, CustomerSnapshot, Measure, RiskTier, Status};
use crate::risk;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub total: usize,
    pub churned: usize,
    pub active_users: usize,
    pub high_risk: usize,
    /// Fraction in [0, 1].
    pub churn_rate: Measure,
    /// Fraction in [0, 1]; `1 - churn_rate`.
    pub retention_rate: Measure,
    /// Mean health on the canonical 0-100 scale.
    pub health_score: Measure,
    /// Sum of `monthly_revenue` over churned customers that report it.
    pub loss_from_churn: Measure,
}

pub fn kpis(records: &[CustomerRecord], thresholds: &RiskThresholds) -> KpiSummary {
    let total = records.len();
    let churned = records.iter().filter(|record| record.is_churned()).count();
    let active_users = records
        .iter()
        .filter(|record| record.status == Status::Active)
        .count();
    let high_risk = records
        .iter()
        .filter(|record| risk::risk_tier(record, thresholds) == RiskTier::High)
        .count();

    let (churn_rate, retention_rate, health_score) = if total == 0 {
        (Measure::Unavailable, Measure::Unavailable, Measure::Unavailable)
    } else {
        let churn = churned as f64 / total as f64;
        let health_total: f64 = records.iter().map(|record| record.health_score).sum();
        (
            Measure::Known(churn),
            Measure::Known(1.0 - churn),
            Measure::Known(health_total / total as f64),
        )
    };

    let revenues: Vec<f64> = records
        .iter()
        .filter(|record| record.is_churned())
        .filter_map(|record| record.monthly_revenue)
        .collect();
    let loss_from_churn = if revenues.is_empty() {
        Measure::Unavailable
    } else {
        Measure::Known(revenues.iter().sum())
    };

    KpiSummary {
        total,
        churned,
        active_users,
        high_risk,
        churn_rate,
        retention_rate,
        health_score,
        loss_from_churn,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonShare {
    pub reason: ChurnReason,
    pub weight: f64,
    pub percent: u32,
}

/// Percentages over the fixed reason taxonomy. They always sum to exactly 100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonDistribution {
    pub shares: Vec<ReasonShare>,
}

#[cfg(test)]
impl ReasonDistribution {
    pub fn total_percent(&self) -> u32 {
        self.shares.iter().map(|share| share.percent).sum()
    }

    pub fn percent_of(&self, reason: ChurnReason) -> u32 {
        self.shares
            .iter()
            .find(|share| share.reason == reason)
            .map(|share| share.percent)
            .unwrap_or(0)
    }
}

/// Distribution over churned customers that carry a reason. `None` when none do.
pub fn churn_reasons(records: &[CustomerRecord]) -> Option<ReasonDistribution> {
    let mut weights = [0.0; 4];
    for reason in records
        .iter()
        .filter(|record| record.is_churned())
        .filter_map(|record| record.churn_reason)
    {
        weights[reason.index()] += 1.0;
    }
    distribute(weights)
}

/// Rounds each weight's share to a whole percent and gives the rounding
/// remainder to the heaviest bucket (earliest in taxonomy order on ties).
pub fn distribute(weights: [f64; 4]) -> Option<ReasonDistribution> {
    let weights = weights.map(|weight| if weight.is_finite() { weight.max(0.0) } else { 0.0 });
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let mut percents: Vec<i64> = weights
        .iter()
        .map(|weight| (weight / total * 100.0).round() as i64)
        .collect();

    let mut largest = 0;
    for (index, weight) in weights.iter().enumerate() {
        if *weight > weights[largest] {
            largest = index;
        }
    }
    let remainder = 100 - percents.iter().sum::<i64>();
    percents[largest] += remainder;

    Some(ReasonDistribution {
        shares: ChurnReason::ALL
            .iter()
            .zip(weights.iter().zip(percents))
            .map(|(reason, (weight, percent))| ReasonShare {
                reason: *reason,
                weight: *weight,
                percent: percent.max(0) as u32,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodRetention {
    pub period: String,
    pub retention_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionPoint {
    pub period: String,
    pub retention_percent: f64,
    /// Retention fell by more than the drop threshold since the previous period.
    pub drop: bool,
}

pub fn retention_series(history: &[PeriodRetention], drop_threshold: f64) -> Vec<RetentionPoint> {
    let mut previous: Option<f64> = None;
    history
        .iter()
        .map(|entry| {
            let drop = previous
                .map(|prior| prior - entry.retention_percent > drop_threshold)
                .unwrap_or(false);
            previous = Some(entry.retention_percent);
            RetentionPoint {
                period: entry.period.clone(),
                retention_percent: entry.retention_percent,
                drop,
            }
        })
        .collect()
}

/// Retention of one snapshot as a history entry; `None` for an empty snapshot.
pub fn snapshot_retention(snapshot: &CustomerSnapshot) -> Option<PeriodRetention> {
    let records = snapshot.records();
    if records.is_empty() {
        return None;
    }
    let churned = records.iter().filter(|record| record.is_churned()).count();
    Some(PeriodRetention {
        period: snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        retention_percent: 100.0 * (1.0 - churned as f64 / records.len() as f64),
    })
}
