use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod dashboard;
mod error;
mod insights;
mod models;
mod normalize;
mod report;
mod risk;
mod scheduler;
mod source;
#[cfg(test)]
mod testing;
mod view;

use crate::aggregate::PeriodRetention;
use crate::config::Settings;
use crate::dashboard::DerivedView;
use crate::models::{CustomerSnapshot, HealthScale, Snapshot};
use crate::scheduler::{CustomerFeed, Feed, Phase, StatsFeed};
use crate::source::{DataSource, FileSource, HttpSource};
use crate::view::{ListViewState, SortKey};

const HISTORY_LIMIT: usize = 12;

#[derive(Parser)]
#[command(name = "retention-pulse")]
#[command(about = "Customer retention analytics over the retention data service", long_about = None)]
struct Cli {
    /// Base URL of the retention data service
    #[arg(long, env = "RETENTION_API_URL", global = true)]
    api_url: Option<String>,
    /// Read customers from a local JSON or CSV export instead of the service
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Scale the source reports health scores on
    #[arg(long, value_enum, global = true)]
    health_scale: Option<HealthScale>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the highest risk customers
    Score {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate a dashboard report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
    },
    /// Browse the customer list
    Customers {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, value_enum, default_value_t = SortKey::Name)]
        sort: SortKey,
        /// Customer id to show in detail
        #[arg(long)]
        select: Option<String>,
    },
    /// Keep refreshing and print every new snapshot; press Enter to refresh now
    Watch {
        /// Stop after this many snapshots
        #[arg(long)]
        cycles: Option<u64>,
        /// Customer id to follow across refreshes
        #[arg(long)]
        select: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(url) = &cli.api_url {
        settings.source.base_url = url.clone();
    }
    if let Some(scale) = cli.health_scale {
        settings.source.health_scale = scale;
    }

    let source: Arc<dyn DataSource> = match &cli.input {
        Some(path) => Arc::new(FileSource::new(path)),
        None => Arc::new(HttpSource::new(
            settings.source.base_url.clone(),
            settings.schedule.request_timeout(),
        )),
    };

    match cli.command {
        Commands::Score { limit } => {
            let snapshot = load_snapshot(&source, &settings).await?;
            let limit = limit.unwrap_or(settings.aggregation.top_risk_limit);
            let ranked = risk::top_risk(
                snapshot.records(),
                limit,
                &settings.risk,
                settings.insights.inactive_after_days,
            );

            if ranked.is_empty() {
                println!("No high risk customers in this snapshot.");
                return Ok(());
            }

            println!("Top customers by risk score:");
            for entry in &ranked {
                let inactive = entry
                    .inactive_days
                    .map(|days| format!(" inactive {days}d"))
                    .unwrap_or_default();
                println!(
                    "- {} ({}) score {:.0}, health {:.1}/10{}",
                    entry.name,
                    entry.email,
                    entry.risk_score,
                    entry.health_score / 10.0,
                    inactive
                );
            }
        }
        Commands::Report { out, format } => {
            let snapshot = load_snapshot(&source, &settings).await?;
            let stats = optional(source.dashboard_stats().await, "dashboard stats");
            let analytics = optional(source.analytics().await, "analytics");
            let view = DerivedView::compute(&snapshot, &[], stats.as_ref(), &settings);

            let body = match format {
                ReportFormat::Markdown => report::build_report(
                    &view,
                    stats.as_ref().and_then(|stats| stats.kpi_metrics.as_ref()),
                    analytics.as_ref(),
                    &settings,
                ),
                ReportFormat::Json => serde_json::to_string_pretty(&view).context("failed to encode report")?,
            };
            std::fs::write(&out, body).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Customers { search, sort, select } => {
            let snapshot = load_snapshot(&source, &settings).await?;
            let mut state = ListViewState::default();
            state.set_search(search);
            state.set_sort(sort);
            if let Some(raw) = select {
                state.select_typed(&raw, snapshot.records());
                if state.reconcile(snapshot.records()) {
                    println!("Customer {raw} is not in this snapshot.");
                }
            }

            let rows = state.derive_view(snapshot.records());
            let selected = state.selected(snapshot.records());
            print!("{}", report::customer_rows(&rows, selected));
            if let Some(record) = selected {
                println!();
                print!("{}", report::customer_detail(record));
            }
        }
        Commands::Watch { cycles, select } => watch(source, &settings, cycles, select).await?,
    }

    Ok(())
}

fn customer_feed(source: &Arc<dyn DataSource>, settings: &Settings) -> CustomerFeed<dyn DataSource> {
    CustomerFeed::new(source.clone(), settings.source.health_scale, settings.risk)
}

async fn load_snapshot(source: &Arc<dyn DataSource>, settings: &Settings) -> anyhow::Result<CustomerSnapshot> {
    let batch = customer_feed(source, settings)
        .load()
        .await
        .context("failed to load customers")?;
    Ok(Snapshot {
        generation: 1,
        fetched_at: Utc::now(),
        payload: batch,
    })
}

/// Secondary endpoints degrade to "not shown" instead of failing the command.
fn optional<T>(result: error::FetchResult<Option<T>>, what: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "{what} unavailable");
            None
        }
    }
}

/// One message per line typed on stdin, read on a detached thread outside the runtime.
fn enter_presses() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

async fn watch(
    source: Arc<dyn DataSource>,
    settings: &Settings,
    cycles: Option<u64>,
    select: Option<String>,
) -> anyhow::Result<()> {
    let customers = scheduler::spawn(customer_feed(&source, settings), settings.schedule, "customers");
    let stats = if source.serves_dashboard_stats() {
        Some(scheduler::spawn(
            StatsFeed::new(source.clone()),
            settings.schedule,
            "dashboard-stats",
        ))
    } else {
        None
    };

    let mut rx = customers.subscribe();
    let mut list = ListViewState::default();
    let mut pending_select = select;
    let mut refresh_requests = enter_presses();
    let mut history: VecDeque<PeriodRetention> = VecDeque::with_capacity(HISTORY_LIMIT + 1);
    let mut last_generation = 0;
    let mut shown = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(()) = refresh_requests.recv() => {
                customers.refresh_now();
                if let Some(handle) = &stats {
                    handle.refresh_now();
                }
                continue;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let state = rx.borrow_and_update().clone();
        if state.phase == Phase::Error {
            let serving = state.snapshot.as_ref().map(|s| s.generation).unwrap_or(0);
            eprintln!(
                "refresh failed ({}); serving generation {}",
                state.last_error.map(|err| err.to_string()).unwrap_or_default(),
                serving
            );
            continue;
        }

        let Some(snapshot) = state.snapshot else { continue };
        if snapshot.generation == last_generation {
            continue;
        }
        last_generation = snapshot.generation;

        let reported = stats.as_ref().and_then(|handle| handle.latest());
        if let Some(point) = aggregate::snapshot_retention(&snapshot) {
            history.push_back(point);
            if history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        let history_or_reported: &[PeriodRetention] = if history.len() > 1 {
            history.make_contiguous()
        } else {
            &[]
        };
        let view = DerivedView::compute(
            &snapshot,
            history_or_reported,
            reported.as_ref().map(|s| &s.payload),
            settings,
        );

        println!(
            "[gen {}] {} customers, churn {}, retention {}, {} high risk, {} dropped",
            view.generation,
            view.kpis.total,
            view.kpis.churn_rate.display_with(|v| format!("{:.1}%", v * 100.0)),
            view.kpis.retention_rate.display_with(|v| format!("{:.1}%", v * 100.0)),
            view.kpis.high_risk,
            view.dropped_records
        );

        if let Some(raw) = pending_select.take() {
            list.select_typed(&raw, snapshot.records());
        }
        let followed = list.selected_id.clone();
        if list.reconcile(snapshot.records()) {
            if let Some(id) = followed {
                println!("  customer {id} is not in this snapshot; selection cleared");
            }
        } else if let Some(record) = list.selected(snapshot.records()) {
            println!(
                "  {}: health {:.1}/10, risk {:.0} ({}), last login {}d ago",
                record.name,
                record.health_out_of_ten(),
                record.risk_score,
                record.risk_tier.as_str(),
                record.last_login_days_ago
            );
        }

        shown += 1;
        if cycles.map(|limit| shown >= limit).unwrap_or(false) {
            break;
        }
    }

    customers.shutdown().await;
    if let Some(handle) = stats {
        handle.shutdown().await;
    }
    Ok(())
}
