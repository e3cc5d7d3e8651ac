//! Comparative ratios between customer cohorts.
//!
//! Every ratio guards its denominator: an empty cohort (or a cohort whose mean
//! risk is zero) yields `InsufficientData`, never `inf` or `NaN`.

use serde::Serialize;

use crate::config::{InsightConfig, RiskThresholds};
use crate::models::{CustomerRecord, RiskTier, Status};
use crate::risk;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum InsightValue {
    Measured(f64),
    /// Configured default reported in place of a measurement.
    Fallback(f64),
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub inactive_risk_multiplier: InsightValue,
    /// Whole percent.
    pub low_health_churn_probability: InsightValue,
    pub early_engagement_multiplier: InsightValue,
    /// Percent of active customers in the high tier.
    pub high_risk_active_share: InsightValue,
}

pub fn compute(records: &[CustomerRecord], thresholds: &RiskThresholds, config: &InsightConfig) -> Insights {
    Insights {
        inactive_risk_multiplier: inactive_risk_multiplier(records, config.inactive_after_days),
        low_health_churn_probability: low_health_churn_probability(records, thresholds),
        early_engagement_multiplier: early_engagement_multiplier(records, config),
        high_risk_active_share: high_risk_active_share(records, thresholds),
    }
}

pub fn inactive_risk_multiplier(records: &[CustomerRecord], inactive_after_days: u32) -> InsightValue {
    let inactive = mean_risk(records.iter().filter(|r| r.last_login_days_ago > inactive_after_days));
    let active = mean_risk(records.iter().filter(|r| r.last_login_days_ago <= inactive_after_days));
    ratio(inactive, active)
}

pub fn low_health_churn_probability(records: &[CustomerRecord], thresholds: &RiskThresholds) -> InsightValue {
    let low_health: Vec<&CustomerRecord> = records
        .iter()
        .filter(|record| record.health_score < thresholds.low_health_threshold)
        .collect();
    if low_health.is_empty() {
        return InsightValue::InsufficientData;
    }
    let likely = low_health
        .iter()
        .filter(|record| record.risk_score > thresholds.high_risk_score)
        .count();
    InsightValue::Measured((100.0 * likely as f64 / low_health.len() as f64).round())
}

pub fn early_engagement_multiplier(records: &[CustomerRecord], config: &InsightConfig) -> InsightValue {
    let early: Vec<(&CustomerRecord, f64)> = records
        .iter()
        .filter_map(|record| match (record.tenure_months, record.login_frequency) {
            (Some(tenure), Some(frequency)) if tenure <= config.early_tenure_months => {
                Some((record, frequency))
            }
            _ => None,
        })
        .collect();

    let low = mean_risk(
        early
            .iter()
            .filter(|(_, frequency)| *frequency <= config.login_frequency_threshold)
            .map(|(record, _)| *record),
    );
    let high = mean_risk(
        early
            .iter()
            .filter(|(_, frequency)| *frequency > config.login_frequency_threshold)
            .map(|(record, _)| *record),
    );

    match ratio(low, high) {
        InsightValue::InsufficientData => match config.early_engagement_fallback {
            Some(default) => InsightValue::Fallback(default),
            None => InsightValue::InsufficientData,
        },
        measured => measured,
    }
}

pub fn high_risk_active_share(records: &[CustomerRecord], thresholds: &RiskThresholds) -> InsightValue {
    let active: Vec<&CustomerRecord> = records
        .iter()
        .filter(|record| record.status == Status::Active)
        .collect();
    if active.is_empty() {
        return InsightValue::InsufficientData;
    }
    let high = active
        .iter()
        .filter(|record| risk::risk_tier(record, thresholds) == RiskTier::High)
        .count();
    InsightValue::Measured(100.0 * high as f64 / active.len() as f64)
}

fn mean_risk<'a>(cohort: impl Iterator<Item = &'a CustomerRecord>) -> Option<f64> {
    let (sum, count) = cohort.fold((0.0, 0usize), |(sum, count), record| {
        (sum + record.risk_score, count + 1)
    });
    (count > 0).then(|| sum / count as f64)
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> InsightValue {
    match (numerator, denominator) {
        (Some(top), Some(bottom)) if bottom > 0.0 => InsightValue::Measured(top / bottom),
        _ => InsightValue::InsufficientData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::customer;

    fn early(id: i64, risk_score: f64, tenure: f64, frequency: f64) -> CustomerRecord {
        CustomerRecord {
            tenure_months: Some(tenure),
            login_frequency: Some(frequency),
            ..customer(id, Status::Active, 70.0, risk_score, 1)
        }
    }

    #[test]
    fn inactive_customers_compared_to_active() {
        let records = vec![
            customer(1, Status::Active, 70.0, 60.0, 45),
            customer(2, Status::Active, 70.0, 80.0, 31),
            customer(3, Status::Active, 70.0, 20.0, 30),
            customer(4, Status::Active, 70.0, 40.0, 2),
        ];
        assert_eq!(inactive_risk_multiplier(&records, 30), InsightValue::Measured(70.0 / 30.0));
    }

    #[test]
    fn inactive_ratio_without_either_cohort_is_insufficient() {
        let all_recent = vec![customer(1, Status::Active, 70.0, 60.0, 3)];
        assert_eq!(inactive_risk_multiplier(&all_recent, 30), InsightValue::InsufficientData);

        let all_away = vec![customer(1, Status::Active, 70.0, 60.0, 90)];
        assert_eq!(inactive_risk_multiplier(&all_away, 30), InsightValue::InsufficientData);

        let zero_risk_actives = vec![
            customer(1, Status::Active, 70.0, 60.0, 90),
            customer(2, Status::Active, 70.0, 0.0, 1),
        ];
        assert_eq!(
            inactive_risk_multiplier(&zero_risk_actives, 30),
            InsightValue::InsufficientData
        );
    }

    #[test]
    fn low_health_probability_is_rounded_percent() {
        let records = vec![
            customer(1, Status::Active, 20.0, 90.0, 1),
            customer(2, Status::Churned, 35.0, 75.0, 1),
            customer(3, Status::Active, 10.0, 50.0, 1),
            customer(4, Status::Active, 90.0, 95.0, 1),
        ];
        let value = low_health_churn_probability(&records, &RiskThresholds::default());
        assert_eq!(value, InsightValue::Measured(67.0));
    }

    #[test]
    fn low_health_probability_without_low_health_customers() {
        let records = vec![customer(1, Status::Active, 90.0, 95.0, 1)];
        assert_eq!(
            low_health_churn_probability(&records, &RiskThresholds::default()),
            InsightValue::InsufficientData
        );
    }

    #[test]
    fn early_engagement_compares_low_and_high_frequency() {
        let records = vec![
            early(1, 90.0, 2.0, 1.0),
            early(2, 60.0, 3.0, 2.0),
            early(3, 25.0, 1.0, 6.0),
            early(4, 5.0, 24.0, 0.5),
        ];
        let value = early_engagement_multiplier(&records, &InsightConfig::default());
        assert_eq!(value, InsightValue::Measured(3.0));
    }

    #[test]
    fn early_engagement_falls_back_visibly() {
        let records = vec![early(1, 90.0, 2.0, 1.0), customer(2, Status::Active, 70.0, 10.0, 1)];
        let value = early_engagement_multiplier(&records, &InsightConfig::default());
        assert_eq!(value, InsightValue::Fallback(3.0));

        let config = InsightConfig {
            early_engagement_fallback: None,
            ..InsightConfig::default()
        };
        assert_eq!(
            early_engagement_multiplier(&records, &config),
            InsightValue::InsufficientData
        );
    }

    #[test]
    fn high_risk_share_of_active_customers() {
        let records = vec![
            customer(1, Status::Active, 20.0, 10.0, 1),
            customer(2, Status::Active, 80.0, 10.0, 1),
            customer(3, Status::Active, 80.0, 10.0, 1),
            customer(4, Status::Active, 80.0, 10.0, 1),
            customer(5, Status::Churned, 10.0, 99.0, 1),
        ];
        let value = high_risk_active_share(&records, &RiskThresholds::default());
        assert_eq!(value, InsightValue::Measured(25.0));

        let churned_only = vec![customer(1, Status::Churned, 10.0, 99.0, 1)];
        assert_eq!(
            high_risk_active_share(&churned_only, &RiskThresholds::default()),
            InsightValue::InsufficientData
        );
    }

    #[test]
    fn empty_dataset_yields_no_numbers() {
        let insights = compute(&[], &RiskThresholds::default(), &InsightConfig::default());
        assert_eq!(insights.inactive_risk_multiplier, InsightValue::InsufficientData);
        assert_eq!(insights.low_health_churn_probability, InsightValue::InsufficientData);
        assert_eq!(insights.early_engagement_multiplier, InsightValue::Fallback(3.0));
        assert_eq!(insights.high_risk_active_share, InsightValue::InsufficientData);
    }
}
