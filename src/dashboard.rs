use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{self, KpiSummary, PeriodRetention, ReasonDistribution, RetentionPoint};
use crate::config::Settings;
use crate::insights::{self, Insights};
use crate::models::{ChurnReason, CustomerSnapshot};
use crate::risk::{self, RiskEntry};
use crate::source::DashboardStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provenance {
    /// Computed from the customer snapshot.
    Snapshot,
    /// Taken from the service's reported dashboard stats.
    Reported,
}

/// Everything the dashboard shows, recomputed in full from one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedView {
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    pub dropped_records: usize,
    pub kpis: KpiSummary,
    pub churn_reasons: Option<(ReasonDistribution, Provenance)>,
    pub retention_series: Vec<RetentionPoint>,
    pub top_risk: Vec<RiskEntry>,
    pub insights: Insights,
}

impl DerivedView {
    /// `history` is the retention of earlier periods, oldest first. When it is
    /// empty the reported retention curve is used, then the snapshot alone.
    pub fn compute(
        snapshot: &CustomerSnapshot,
        history: &[PeriodRetention],
        stats: Option<&DashboardStats>,
        settings: &Settings,
    ) -> Self {
        let records = snapshot.records();

        let churn_reasons = aggregate::churn_reasons(records)
            .map(|distribution| (distribution, Provenance::Snapshot))
            .or_else(|| {
                stats
                    .and_then(reported_reasons)
                    .map(|distribution| (distribution, Provenance::Reported))
            });

        let retention_history: Vec<PeriodRetention> = if !history.is_empty() {
            history.to_vec()
        } else if let Some(reported) = stats.filter(|stats| !stats.retention_data.is_empty()) {
            reported
                .retention_data
                .iter()
                .map(|datum| PeriodRetention {
                    period: datum.month.clone(),
                    retention_percent: datum.retention,
                })
                .collect()
        } else {
            aggregate::snapshot_retention(snapshot).into_iter().collect()
        };

        DerivedView {
            generation: snapshot.generation,
            fetched_at: snapshot.fetched_at,
            dropped_records: snapshot.payload.dropped.len(),
            kpis: aggregate::kpis(records, &settings.risk),
            churn_reasons,
            retention_series: aggregate::retention_series(
                &retention_history,
                settings.aggregation.retention_drop_threshold,
            ),
            top_risk: risk::top_risk(
                records,
                settings.aggregation.top_risk_limit,
                &settings.risk,
                settings.insights.inactive_after_days,
            ),
            insights: insights::compute(records, &settings.risk, &settings.insights),
        }
    }
}

fn reported_reasons(stats: &DashboardStats) -> Option<ReasonDistribution> {
    let mut weights = [0.0; 4];
    for reported in &stats.churn_reasons {
        match ChurnReason::parse(&reported.reason) {
            Some(reason) => weights[reason.index()] += reported.value,
            None => tracing::debug!(reason = %reported.reason, "reported churn reason outside taxonomy"),
        }
    }
    aggregate::distribute(weights)
}
