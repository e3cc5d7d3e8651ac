use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::error::{FetchError, FetchResult};

pub const CUSTOMERS_PATH: &str = "/api/customers";
pub const DASHBOARD_STATS_PATH: &str = "/api/dashboard-stats";
pub const ANALYTICS_PATH: &str = "/api/analytics";

/// Read-only view of the retention data service.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Raw customers payload, unvalidated.
    async fn customers(&self) -> FetchResult<Value>;

    /// Whether `dashboard_stats` can return anything; only such sources get a stats poller.
    fn serves_dashboard_stats(&self) -> bool {
        false
    }

    async fn dashboard_stats(&self) -> FetchResult<Option<DashboardStats>> {
        Ok(None)
    }

    async fn analytics(&self) -> FetchResult<Option<AnalyticsReport>> {
        Ok(None)
    }
}

/// A KPI as the service reports it: a bare number or preformatted text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReportedValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for ReportedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportedValue::Number(value) => write!(f, "{value}"),
            ReportedValue::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportedKpis {
    pub churn_rate: Option<ReportedValue>,
    pub retention_rate: Option<ReportedValue>,
    pub active_users: Option<ReportedValue>,
    pub health_score: Option<ReportedValue>,
    pub loss_from_churn: Option<ReportedValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetentionDatum {
    pub month: String,
    pub retention: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportedReason {
    pub reason: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardStats {
    pub kpi_metrics: Option<ReportedKpis>,
    pub retention_data: Vec<RetentionDatum>,
    pub churn_reasons: Vec<ReportedReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Narrative {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChurnDriver {
    pub rank: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictiveInsight {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecommendedAction {
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsReport {
    pub churn_risk_overview: Option<Narrative>,
    pub churn_drivers: Vec<ChurnDriver>,
    pub predictive_insights: Vec<PredictiveInsight>,
    pub recommended_actions: Vec<RecommendedAction>,
}

impl AnalyticsReport {
    pub fn drivers_by_rank(&self) -> Vec<&ChurnDriver> {
        let mut drivers: Vec<&ChurnDriver> = self.churn_drivers.iter().collect();
        drivers.sort_by_key(|driver| driver.rank);
        drivers
    }
}

/// The data service over HTTP. Every request is bounded by the client timeout.
pub struct HttpSource {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn get_json(&self, path: &str) -> FetchResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        resp.json::<Value>().await.map_err(|err| self.classify(err))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::from(err)
        }
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn customers(&self) -> FetchResult<Value> {
        self.get_json(CUSTOMERS_PATH).await
    }

    fn serves_dashboard_stats(&self) -> bool {
        true
    }

    async fn dashboard_stats(&self) -> FetchResult<Option<DashboardStats>> {
        let body = self.get_json(DASHBOARD_STATS_PATH).await?;
        parse_typed(body, "dashboard stats").map(Some)
    }

    async fn analytics(&self) -> FetchResult<Option<AnalyticsReport>> {
        let body = self.get_json(ANALYTICS_PATH).await?;
        parse_typed(body, "analytics").map(Some)
    }
}

fn parse_typed<T: serde::de::DeserializeOwned>(body: Value, what: &str) -> FetchResult<T> {
    serde_json::from_value(body).map_err(|err| FetchError::MalformedPayload(format!("{what}: {err}")))
}

/// A local export of the customers endpoint: a JSON array, or a CSV file with
/// the same column names.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for FileSource {
    async fn customers(&self) -> FetchResult<Value> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_customers_file(&path))
            .await
            .map_err(|err| FetchError::Transport(format!("file reader stopped: {err}")))?
    }
}

pub fn load_customers_file(path: &Path) -> FetchResult<Value> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        let reader = csv::Reader::from_path(path)
            .map_err(|err| FetchError::Transport(format!("{}: {err}", path.display())))?;
        return csv_to_payload(reader);
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|err| FetchError::Transport(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&raw).map_err(|err| FetchError::MalformedPayload(format!("{}: {err}", path.display())))
}

const NUMERIC_COLUMNS: &[&str] = &[
    "customer_id",
    "health_score",
    "last_login_days",
    "risk_score",
    "tenure_months",
    "login_frequency",
    "unresolved_tickets",
    "monthly_revenue",
];

/// Turns CSV rows into the JSON shape of the customers endpoint. Empty cells
/// become absent fields; numeric columns that fail to parse stay text so the
/// normalizer reports them against the offending record.
fn csv_to_payload<R: std::io::Read>(mut reader: csv::Reader<R>) -> FetchResult<Value> {
    let mut rows = Vec::new();
    for result in reader.deserialize::<HashMap<String, String>>() {
        let row = result.map_err(|err| FetchError::MalformedPayload(format!("csv: {err}")))?;
        let mut obj = Map::new();
        for (column, cell) in row {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let value = if NUMERIC_COLUMNS.contains(&column.as_str()) {
                numeric_cell(cell)
            } else {
                Value::String(cell.to_string())
            };
            obj.insert(column, value);
        }
        rows.push(Value::Object(obj));
    }
    Ok(Value::Array(rows))
}

fn numeric_cell(cell: &str) -> Value {
    if let Ok(whole) = cell.parse::<i64>() {
        return Value::Number(whole.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}
