use crate::config::RiskThresholds;
use crate::models::{CustomerId, CustomerRecord, HealthScale, Status};
use crate::risk;

pub fn customer(id: i64, status: Status, health: f64, risk_score: f64, days_ago: u32) -> CustomerRecord {
    CustomerRecord {
        id: CustomerId::Numeric(id),
        name: format!("Customer {id}"),
        email: format!("customer{id}@example.com"),
        status,
        health_score: health,
        health_source_scale: HealthScale::Hundred,
        last_login: None,
        last_login_days_ago: days_ago,
        risk_score,
        risk_tier: risk::classify(risk_score, health, &RiskThresholds::default()),
        tenure_months: None,
        login_frequency: None,
        unresolved_tickets: 0,
        monthly_revenue: None,
        churn_reason: None,
    }
}

pub fn named(id: i64, name: &str, email: &str) -> CustomerRecord {
    CustomerRecord {
        name: name.to_string(),
        email: email.to_string(),
        ..customer(id, Status::Active, 70.0, 20.0, 1)
    }
}
