use std::fmt::Write;

use crate::config::Settings;
use crate::dashboard::{DerivedView, Provenance};
use crate::insights::InsightValue;
use crate::models::{CustomerRecord, Measure};
use crate::source::{AnalyticsReport, ReportedKpis, ReportedValue};

fn percent(measure: &Measure) -> String {
    measure.display_with(|fraction| format!("{:.1}%", fraction * 100.0))
}

fn insight_text(value: &InsightValue, render: impl Fn(f64) -> String) -> String {
    match value {
        InsightValue::Measured(number) => render(*number),
        InsightValue::Fallback(number) => format!("{} (default, not enough data to measure)", render(*number)),
        InsightValue::InsufficientData => "not enough data".to_string(),
    }
}

pub fn build_report(
    view: &DerivedView,
    reported: Option<&ReportedKpis>,
    analytics: Option<&AnalyticsReport>,
    settings: &Settings,
) -> String {
    let mut output = String::new();
    let kpis = &view.kpis;

    let _ = writeln!(output, "# Customer Retention Report");
    let _ = writeln!(
        output,
        "Snapshot generation {} fetched {}",
        view.generation,
        view.fetched_at.format("%Y-%m-%d %H:%M UTC")
    );
    if view.dropped_records > 0 {
        let _ = writeln!(
            output,
            "{} malformed customer records were dropped from this snapshot.",
            view.dropped_records
        );
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Key Metrics");
    let _ = writeln!(output, "- Churn rate: {}", percent(&kpis.churn_rate));
    let _ = writeln!(output, "- Retention rate: {}", percent(&kpis.retention_rate));
    let _ = writeln!(output, "- Active users: {}", kpis.active_users);
    let _ = writeln!(
        output,
        "- Health score: {}",
        kpis.health_score.display_with(|mean| format!("{:.1}/10", mean / 10.0))
    );
    let _ = writeln!(
        output,
        "- Loss from churn: {}",
        kpis.loss_from_churn.display_with(|amount| format!("{amount:.2}"))
    );
    let _ = writeln!(output);

    if let Some(reported) = reported {
        write_reported(&mut output, reported);
    }

    let _ = writeln!(output, "## Retention Curve");
    if view.retention_series.is_empty() {
        let _ = writeln!(output, "No retention history yet.");
    } else {
        for point in &view.retention_series {
            let marker = if point.drop { " (drop)" } else { "" };
            let _ = writeln!(output, "- {}: {:.1}%{}", point.period, point.retention_percent, marker);
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Churn Reasons");
    match &view.churn_reasons {
        None => {
            let _ = writeln!(output, "No churn reasons recorded.");
        }
        Some((distribution, provenance)) => {
            for share in &distribution.shares {
                let _ = writeln!(output, "- {}: {}%", share.reason.label(), share.percent);
            }
            if *provenance == Provenance::Reported {
                let _ = writeln!(output, "(as reported by the data service)");
            }
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Top Risk Customers");
    if view.top_risk.is_empty() {
        let _ = writeln!(output, "No high risk customers.");
    } else {
        for entry in &view.top_risk {
            let inactive = entry
                .inactive_days
                .map(|days| format!(" [inactive {days}d]"))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- {} ({}) risk {:.0}, health {:.1}/10, last login {}d ago{}",
                entry.name,
                entry.email,
                entry.risk_score,
                entry.health_score / 10.0,
                entry.last_login_days_ago,
                inactive
            );
        }
    }
    let _ = writeln!(output);

    let insights = &view.insights;
    let _ = writeln!(output, "## Insight Summary");
    let _ = writeln!(
        output,
        "- Customers inactive for more than {} days carry {} the churn risk of active users.",
        settings.insights.inactive_after_days,
        insight_text(&insights.inactive_risk_multiplier, |ratio| format!("{ratio:.1}x"))
    );
    let _ = writeln!(
        output,
        "- Customers below {:.1}/10 health: {} are likely to churn.",
        settings.risk.low_health_threshold / 10.0,
        insight_text(&insights.low_health_churn_probability, |pct| format!("{pct:.0}%"))
    );
    let _ = writeln!(
        output,
        "- Low early engagement carries {} the churn risk of engaged new customers.",
        insight_text(&insights.early_engagement_multiplier, |ratio| format!("{ratio:.1}x"))
    );
    let _ = writeln!(
        output,
        "- High risk share of active customers: {}.",
        insight_text(&insights.high_risk_active_share, |pct| format!("{pct:.0}%"))
    );

    if let Some(analytics) = analytics {
        write_analytics(&mut output, analytics);
    }

    output
}

fn write_reported(output: &mut String, reported: &ReportedKpis) {
    let rows: [(&str, &Option<ReportedValue>); 5] = [
        ("Churn rate", &reported.churn_rate),
        ("Retention rate", &reported.retention_rate),
        ("Active users", &reported.active_users),
        ("Health score", &reported.health_score),
        ("Loss from churn", &reported.loss_from_churn),
    ];
    if rows.iter().all(|(_, value)| value.is_none()) {
        return;
    }
    let _ = writeln!(output, "## Service-Reported Metrics");
    for (label, value) in rows {
        if let Some(value) = value {
            let _ = writeln!(output, "- {label}: {value}");
        }
    }
    let _ = writeln!(output);
}

fn write_analytics(output: &mut String, analytics: &AnalyticsReport) {
    if let Some(overview) = analytics
        .churn_risk_overview
        .as_ref()
        .filter(|overview| !overview.description.is_empty())
    {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Churn Risk Overview");
        let _ = writeln!(output, "{}", overview.description);
    }

    let drivers = analytics.drivers_by_rank();
    if !drivers.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Top Churn Drivers");
        for driver in drivers {
            let _ = writeln!(output, "{}. {}: {}", driver.rank, driver.title, driver.description);
        }
    }

    if !analytics.predictive_insights.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Predictive Insights");
        for insight in &analytics.predictive_insights {
            let _ = writeln!(output, "- {}: {}", insight.title, insight.description);
        }
    }

    if !analytics.recommended_actions.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Recommended Actions");
        for action in &analytics.recommended_actions {
            let _ = writeln!(output, "- {}", action.title);
        }
    }
}

/// One line per customer for the list view; the selected row is starred.
pub fn customer_rows(rows: &[&CustomerRecord], selected: Option<&CustomerRecord>) -> String {
    let mut output = String::new();
    if rows.is_empty() {
        let _ = writeln!(output, "No customers match.");
        return output;
    }
    for record in rows {
        let marker = if selected.map(|s| s.id == record.id).unwrap_or(false) { "*" } else { " " };
        let _ = writeln!(
            output,
            "{} {:<24} {:<30} {:<8} {:>4.1}/10  {:>4}d  {}",
            marker,
            record.name,
            record.email,
            record.status.as_str(),
            record.health_out_of_ten(),
            record.last_login_days_ago,
            record.risk_tier.as_str()
        );
    }
    output
}

pub fn customer_detail(record: &CustomerRecord) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{} <{}>", record.name, record.email);
    let _ = writeln!(output, "  id: {}", record.id);
    let _ = writeln!(output, "  status: {}", record.status.as_str());
    let _ = writeln!(output, "  risk: {} ({:.0})", record.risk_tier.as_str(), record.risk_score);
    let _ = writeln!(output, "  health: {:.1}/10", record.health_out_of_ten());
    match record.last_login {
        Some(date) => {
            let _ = writeln!(output, "  last login: {} ({}d ago)", date, record.last_login_days_ago);
        }
        None => {
            let _ = writeln!(output, "  last login: {}d ago", record.last_login_days_ago);
        }
    }
    if record.unresolved_tickets > 0 {
        let _ = writeln!(output, "  unresolved tickets: {}", record.unresolved_tickets);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerBatch, Snapshot, Status};
    use crate::source::{ChurnDriver, Narrative};
    use crate::testing::customer;
    use chrono::Utc;

    fn view(records: Vec<CustomerRecord>) -> DerivedView {
        let snapshot = Snapshot {
            generation: 1,
            fetched_at: Utc::now(),
            payload: CustomerBatch {
                records,
                dropped: Vec::new(),
            },
        };
        DerivedView::compute(&snapshot, &[], None, &Settings::default())
    }

    #[test]
    fn empty_snapshot_renders_na_instead_of_numbers() {
        let report = build_report(&view(Vec::new()), None, None, &Settings::default());
        assert!(report.contains("- Churn rate: N/A"));
        assert!(report.contains("- Health score: N/A"));
        assert!(report.contains("No high risk customers."));
        assert!(report.contains("not enough data"));
        assert!(!report.contains("NaN"));
    }

    #[test]
    fn report_lists_risk_and_inactivity() {
        let records = vec![
            customer(1, Status::Active, 80.0, 10.0, 1),
            customer(2, Status::Churned, 20.0, 95.0, 45),
        ];
        let report = build_report(&view(records), None, None, &Settings::default());
        assert!(report.contains("- Churn rate: 50.0%"));
        assert!(report.contains("Customer 2 (customer2@example.com) risk 95"));
        assert!(report.contains("[inactive 45d]"));
        assert!(report.contains("(default, not enough data to measure)"));
    }

    #[test]
    fn analytics_sections_follow_rank() {
        let analytics = AnalyticsReport {
            churn_risk_overview: Some(Narrative {
                description: "18% of active customers are at high risk.".into(),
            }),
            churn_drivers: vec![
                ChurnDriver { rank: 2, title: "Long Inactivity".into(), description: "Away too long.".into() },
                ChurnDriver { rank: 1, title: "Low Engagement".into(), description: "Core features unused.".into() },
            ],
            ..AnalyticsReport::default()
        };
        let report = build_report(&view(Vec::new()), None, Some(&analytics), &Settings::default());
        let first = report.find("1. Low Engagement").unwrap();
        let second = report.find("2. Long Inactivity").unwrap();
        assert!(first < second);
        assert!(report.contains("## Churn Risk Overview"));
        assert!(!report.contains("## Recommended Actions"));
    }

    #[test]
    fn reported_metrics_are_shown_verbatim() {
        let reported = ReportedKpis {
            churn_rate: Some(ReportedValue::Text("12.5%".into())),
            active_users: Some(ReportedValue::Number(8450.0)),
            ..ReportedKpis::default()
        };
        let report = build_report(&view(Vec::new()), Some(&reported), None, &Settings::default());
        let reported_section = report
            .split("## Service-Reported Metrics")
            .nth(1)
            .and_then(|rest| rest.split("## Retention Curve").next())
            .unwrap();
        assert!(reported_section.contains("- Churn rate: 12.5%"));
        assert!(reported_section.contains("- Active users: 8450"));
        assert!(!reported_section.contains("- Loss from churn"));
        assert!(report.contains("- Loss from churn: N/A"));

        let silent = build_report(&view(Vec::new()), Some(&ReportedKpis::default()), None, &Settings::default());
        assert!(!silent.contains("Service-Reported"));
    }

    #[test]
    fn selected_row_is_marked() {
        let records = vec![customer(1, Status::Active, 80.0, 10.0, 1), customer(2, Status::Active, 60.0, 10.0, 3)];
        let rows: Vec<&CustomerRecord> = records.iter().collect();
        let listing = customer_rows(&rows, records.get(1));
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("  Customer 1"));
        assert!(lines[1].starts_with("* Customer 2"));
    }
}
