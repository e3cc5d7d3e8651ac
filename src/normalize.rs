use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::config::RiskThresholds;
use crate::error::{FetchError, MalformedRecord, RecordDefect};
use crate::models::{ChurnReason, CustomerBatch, CustomerId, CustomerRecord, HealthScale, Status};
use crate::risk;

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Scale the source reports `health_score` on.
    pub health_scale: HealthScale,
    pub thresholds: RiskThresholds,
    /// Day `last_login` dates are measured against when `last_login_days` is absent.
    pub reference_date: NaiveDate,
}

/// Shapes a raw customers payload into canonical records.
///
/// A payload that is not an array fails the whole batch. Individual bad
/// records are dropped and reported in `CustomerBatch::dropped`.
pub fn normalize_customers(
    payload: &Value,
    options: &NormalizeOptions,
) -> Result<CustomerBatch, FetchError> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(map) => {
            let detail = map
                .get("error")
                .and_then(Value::as_str)
                .map(|message| format!("service reported an error: {message}"))
                .unwrap_or_else(|| "expected an array of customers, got an object".to_string());
            return Err(FetchError::MalformedPayload(detail));
        }
        other => {
            return Err(FetchError::MalformedPayload(format!(
                "expected an array of customers, got {}",
                kind_of(other)
            )))
        }
    };

    let mut batch = CustomerBatch::default();
    let mut seen: HashSet<CustomerId> = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        match normalize_record(item, options) {
            Ok(record) => {
                if seen.insert(record.id.clone()) {
                    batch.records.push(record);
                } else {
                    batch.dropped.push(MalformedRecord {
                        index,
                        id: Some(record.id.to_string()),
                        defect: RecordDefect::DuplicateId(record.id.to_string()),
                    });
                }
            }
            Err(defect) => batch.dropped.push(MalformedRecord {
                index,
                id: item
                    .as_object()
                    .and_then(|obj| field(obj, ID_KEYS))
                    .map(|value| match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    }),
                defect,
            }),
        }
    }

    if !batch.dropped.is_empty() {
        tracing::warn!(
            dropped = batch.dropped.len(),
            kept = batch.records.len(),
            "dropped malformed customer records"
        );
        for dropped in &batch.dropped {
            tracing::debug!(index = dropped.index, id = ?dropped.id, defect = %dropped.defect, "record dropped");
        }
    }

    Ok(batch)
}

const ID_KEYS: &[&str] = &["customer_id", "id"];

fn normalize_record(item: &Value, options: &NormalizeOptions) -> Result<CustomerRecord, RecordDefect> {
    let obj = item.as_object().ok_or(RecordDefect::WrongType {
        field: "record",
        expected: "object",
    })?;

    let id = match field(obj, ID_KEYS) {
        None => return Err(RecordDefect::MissingField("customer_id")),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(CustomerId::Numeric)
            .ok_or(RecordDefect::WrongType {
                field: "customer_id",
                expected: "integer or string",
            })?,
        Some(Value::String(text)) if !text.trim().is_empty() => CustomerId::Text(text.clone()),
        Some(_) => {
            return Err(RecordDefect::WrongType {
                field: "customer_id",
                expected: "integer or string",
            })
        }
    };

    let name = required_str(obj, &["customer_name", "name"], "customer_name")?.to_string();
    let email = optional_str(obj, &["email_address", "email"], "email_address")?
        .unwrap_or_default()
        .to_string();

    let status_raw = required_str(obj, &["status"], "status")?;
    let status = Status::parse(status_raw).ok_or(RecordDefect::WrongType {
        field: "status",
        expected: "Active or Churned",
    })?;

    let raw_health = required_number(obj, &["health_score", "healthScore"], "health_score")?;
    if raw_health < 0.0 || raw_health > options.health_scale.max() {
        return Err(RecordDefect::OutOfRange {
            field: "health_score",
            value: raw_health,
        });
    }
    let health_score = options.health_scale.to_canonical(raw_health);

    let risk_score = required_number(obj, &["risk_score", "riskScore"], "risk_score")?;
    non_negative("risk_score", risk_score)?;

    let last_login = match field(obj, &["last_login", "lastLogin"]) {
        None => None,
        Some(Value::String(text)) => Some(parse_date(text).ok_or(RecordDefect::WrongType {
            field: "last_login",
            expected: "YYYY-MM-DD date",
        })?),
        Some(_) => {
            return Err(RecordDefect::WrongType {
                field: "last_login",
                expected: "YYYY-MM-DD date",
            })
        }
    };

    let last_login_days_ago = match optional_count(obj, &["last_login_days", "lastLoginDays"], "last_login_days")? {
        Some(days) => days,
        None => match last_login {
            Some(date) => (options.reference_date - date).num_days().clamp(0, u32::MAX as i64) as u32,
            None => return Err(RecordDefect::MissingField("last_login_days")),
        },
    };

    let tenure_months = optional_number(obj, &["tenure_months", "tenureMonths"], "tenure_months")?;
    let login_frequency = optional_number(obj, &["login_frequency", "loginFrequency"], "login_frequency")?;
    let monthly_revenue = optional_number(obj, &["monthly_revenue", "monthlyRevenue"], "monthly_revenue")?;
    let unresolved_tickets =
        optional_count(obj, &["unresolved_tickets", "unresolvedTickets"], "unresolved_tickets")?.unwrap_or(0);

    let churn_reason = match optional_str(obj, &["churn_reason", "churnReason"], "churn_reason")? {
        None => None,
        Some(raw) => {
            let parsed = ChurnReason::parse(raw);
            if parsed.is_none() {
                tracing::debug!(id = %id, reason = raw, "churn reason outside taxonomy ignored");
            }
            parsed
        }
    };

    Ok(CustomerRecord {
        risk_tier: risk::classify(risk_score, health_score, &options.thresholds),
        id,
        name,
        email,
        status,
        health_score,
        health_source_scale: options.health_scale,
        last_login,
        last_login_days_ago,
        risk_score,
        tenure_months,
        login_frequency,
        unresolved_tickets,
        monthly_revenue,
        churn_reason,
    })
}

/// First present, non-null value among the accepted spellings of a field.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<&'a str, RecordDefect> {
    optional_str(obj, keys, name)?.ok_or(RecordDefect::MissingField(name))
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<Option<&'a str>, RecordDefect> {
    match field(obj, keys) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.as_str())),
        Some(_) => Err(RecordDefect::WrongType {
            field: name,
            expected: "string",
        }),
    }
}

fn required_number(
    obj: &Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<f64, RecordDefect> {
    optional_number_raw(obj, keys, name)?.ok_or(RecordDefect::MissingField(name))
}

fn optional_number(
    obj: &Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<Option<f64>, RecordDefect> {
    let value = optional_number_raw(obj, keys, name)?;
    if let Some(number) = value {
        non_negative(name, number)?;
    }
    Ok(value)
}

fn optional_number_raw(
    obj: &Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<Option<f64>, RecordDefect> {
    match field(obj, keys) {
        None => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or(RecordDefect::WrongType {
                field: name,
                expected: "number",
            }),
        Some(_) => Err(RecordDefect::WrongType {
            field: name,
            expected: "number",
        }),
    }
}

fn optional_count(
    obj: &Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<Option<u32>, RecordDefect> {
    match optional_number_raw(obj, keys, name)? {
        None => Ok(None),
        Some(value) if value.fract() != 0.0 => Err(RecordDefect::WrongType {
            field: name,
            expected: "whole number",
        }),
        Some(value) if value < 0.0 || value > u32::MAX as f64 => {
            Err(RecordDefect::OutOfRange { field: name, value })
        }
        Some(value) => Ok(Some(value as u32)),
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), RecordDefect> {
    if value < 0.0 {
        return Err(RecordDefect::OutOfRange { field: name, value });
    }
    Ok(())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|stamp| stamp.date_naive())
        })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskTier;
    use serde_json::json;

    fn options() -> NormalizeOptions {
        NormalizeOptions {
            health_scale: HealthScale::Hundred,
            thresholds: RiskThresholds::default(),
            reference_date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
        }
    }

    fn api_record(id: i64) -> Value {
        json!({
            "customer_id": id,
            "customer_name": "Sarah Johnson",
            "email_address": "sarah.j@company.com",
            "status": "Active",
            "health_score": 85,
            "last_login": "2024-02-01",
            "last_login_days": 2,
            "risk_score": 12,
            "risk_level": "Low Risk",
            "tenure_months": 14,
            "login_frequency": 5.5,
            "unresolved_tickets": 0
        })
    }

    #[test]
    fn non_array_payload_rejects_whole_batch() {
        let err = normalize_customers(&json!({"customers": []}), &options()).unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));

        let err = normalize_customers(&json!("oops"), &options()).unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));
    }

    #[test]
    fn service_error_object_surfaces_its_message() {
        let err = normalize_customers(&json!({"error": "model not loaded"}), &options()).unwrap_err();
        assert_eq!(
            err,
            FetchError::MalformedPayload("service reported an error: model not loaded".to_string())
        );
    }

    #[test]
    fn bad_records_are_dropped_and_counted() {
        let mut missing_name = api_record(2);
        missing_name.as_object_mut().unwrap().remove("customer_name");
        let mut wrong_health = api_record(3);
        wrong_health["health_score"] = json!("high");

        let payload = json!([api_record(1), missing_name, wrong_health, 42, api_record(4)]);
        let batch = normalize_customers(&payload, &options()).unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.dropped.len(), 3);
        assert_eq!(batch.dropped[0].index, 1);
        assert_eq!(batch.dropped[0].defect, RecordDefect::MissingField("customer_name"));
        assert_eq!(batch.dropped[0].id.as_deref(), Some("2"));
        assert!(matches!(
            batch.dropped[1].defect,
            RecordDefect::WrongType { field: "health_score", .. }
        ));
        assert_eq!(batch.dropped[2].index, 3);
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let payload = json!([api_record(1), api_record(1)]);
        let batch = normalize_customers(&payload, &options()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.dropped[0].defect, RecordDefect::DuplicateId("1".to_string()));
    }

    #[test]
    fn mock_spelling_on_ten_point_scale_is_canonicalised() {
        let payload = json!([{
            "id": 3,
            "name": "Emily Rodriguez",
            "email": "emily.r@enterprise.com",
            "status": "Active",
            "healthScore": 3.8,
            "lastLogin": "2024-01-15",
            "riskScore": 65
        }]);
        let opts = NormalizeOptions {
            health_scale: HealthScale::Ten,
            ..options()
        };
        let batch = normalize_customers(&payload, &opts).unwrap();
        let record = &batch.records[0];

        assert!((record.health_score - 38.0).abs() < 1e-9);
        assert_eq!(record.health_source_scale, HealthScale::Ten);
        assert_eq!(record.last_login_days_ago, 19);
        assert_eq!(record.risk_tier, RiskTier::High);
        assert_eq!(record.tenure_months, None);
        assert_eq!(record.unresolved_tickets, 0);
    }

    #[test]
    fn health_beyond_declared_scale_is_out_of_range() {
        let opts = NormalizeOptions {
            health_scale: HealthScale::Ten,
            ..options()
        };
        let batch = normalize_customers(&json!([api_record(1)]), &opts).unwrap();
        assert!(batch.records.is_empty());
        assert!(matches!(
            batch.dropped[0].defect,
            RecordDefect::OutOfRange { field: "health_score", .. }
        ));
    }

    #[test]
    fn missing_login_information_is_malformed() {
        let mut record = api_record(1);
        let obj = record.as_object_mut().unwrap();
        obj.remove("last_login");
        obj.remove("last_login_days");
        let batch = normalize_customers(&json!([record]), &options()).unwrap();
        assert_eq!(batch.dropped[0].defect, RecordDefect::MissingField("last_login_days"));
    }

    #[test]
    fn optional_fields_take_documented_defaults() {
        let payload = json!([{
            "customer_id": "cus_9",
            "customer_name": "Kevin Brown",
            "status": "churned",
            "health_score": 18,
            "last_login_days": 55,
            "risk_score": 91,
            "churn_reason": "Price"
        }]);
        let batch = normalize_customers(&payload, &options()).unwrap();
        let record = &batch.records[0];
        assert_eq!(record.id, CustomerId::from("cus_9"));
        assert_eq!(record.email, "");
        assert_eq!(record.status, Status::Churned);
        assert_eq!(record.churn_reason, Some(ChurnReason::Price));
        assert_eq!(record.monthly_revenue, None);
        assert_eq!(record.login_frequency, None);
    }
}
