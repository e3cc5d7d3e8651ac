use serde::Serialize;

use crate::config::RiskThresholds;
use crate::models::{CustomerId, CustomerRecord, RiskTier};

/// One row of the top-risk ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskEntry {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub risk_score: f64,
    pub health_score: f64,
    pub tier: RiskTier,
    pub last_login_days_ago: u32,
    /// Set when the customer has been away longer than the inactivity cutoff.
    pub inactive_days: Option<u32>,
}

pub fn classify(risk_score: f64, health_score: f64, thresholds: &RiskThresholds) -> RiskTier {
    if risk_score > thresholds.high_risk_score || health_score < thresholds.low_health_threshold {
        RiskTier::High
    } else if risk_score > thresholds.medium_risk_score {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

pub fn risk_tier(record: &CustomerRecord, thresholds: &RiskThresholds) -> RiskTier {
    classify(record.risk_score, record.health_score, thresholds)
}

/// High-tier customers by descending risk score, ties by ascending id, at most `limit`.
pub fn top_risk(
    records: &[CustomerRecord],
    limit: usize,
    thresholds: &RiskThresholds,
    inactive_after_days: u32,
) -> Vec<RiskEntry> {
    let mut high: Vec<&CustomerRecord> = records
        .iter()
        .filter(|record| risk_tier(record, thresholds) == RiskTier::High)
        .collect();

    high.sort_by(|a, b| {
        b.risk_score
            .total_cmp(&a.risk_score)
            .then_with(|| a.id.cmp(&b.id))
    });

    high.into_iter()
        .take(limit)
        .map(|record| RiskEntry {
            id: record.id.clone(),
            name: record.name.clone(),
            email: record.email.clone(),
            risk_score: record.risk_score,
            health_score: record.health_score,
            tier: RiskTier::High,
            last_login_days_ago: record.last_login_days_ago,
            inactive_days: (record.last_login_days_ago > inactive_after_days)
                .then_some(record.last_login_days_ago),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use crate::testing::customer;

    #[test]
    fn tiers_follow_configured_boundaries() {
        let thresholds = RiskThresholds::default();
        assert_eq!(classify(71.0, 80.0, &thresholds), RiskTier::High);
        assert_eq!(classify(70.0, 80.0, &thresholds), RiskTier::Medium);
        assert_eq!(classify(40.5, 80.0, &thresholds), RiskTier::Medium);
        assert_eq!(classify(40.0, 80.0, &thresholds), RiskTier::Low);
        assert_eq!(classify(5.0, 39.9, &thresholds), RiskTier::High);
        assert_eq!(classify(5.0, 40.0, &thresholds), RiskTier::Low);
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let thresholds = RiskThresholds {
            high_risk_score: 90.0,
            medium_risk_score: 50.0,
            low_health_threshold: 20.0,
        };
        assert_eq!(classify(85.0, 30.0, &thresholds), RiskTier::Medium);
        assert_eq!(classify(45.0, 30.0, &thresholds), RiskTier::Low);
    }

    #[test]
    fn top_risk_orders_by_score_then_id() {
        let records = vec![
            customer(5, Status::Active, 60.0, 80.0, 3),
            customer(2, Status::Active, 60.0, 95.0, 3),
            customer(9, Status::Churned, 60.0, 80.0, 50),
            customer(1, Status::Active, 60.0, 80.0, 3),
            customer(4, Status::Active, 60.0, 30.0, 3),
            customer(7, Status::Active, 15.0, 10.0, 3),
        ];

        let ranked = top_risk(&records, 10, &RiskThresholds::default(), 30);
        let ids: Vec<String> = ranked.iter().map(|entry| entry.id.to_string()).collect();

        assert_eq!(ids, vec!["2", "1", "5", "9", "7"]);
        assert!(ranked.iter().all(|entry| entry.tier == RiskTier::High));
        assert_eq!(ranked[3].inactive_days, Some(50));
        assert_eq!(ranked[0].inactive_days, None);
    }

    #[test]
    fn top_risk_respects_limit_and_is_idempotent() {
        let records: Vec<_> = (0..25)
            .map(|id| customer(id, Status::Active, 60.0, 71.0 + (id % 4) as f64, 1))
            .collect();
        let thresholds = RiskThresholds::default();

        let first = top_risk(&records, 10, &thresholds, 30);
        let second = top_risk(&records, 10, &thresholds, 30);

        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
        assert!(first
            .windows(2)
            .all(|pair| pair[0].risk_score >= pair[1].risk_score));
    }

    #[test]
    fn top_risk_on_empty_input_is_empty() {
        assert!(top_risk(&[], 10, &RiskThresholds::default(), 30).is_empty());
    }
}
