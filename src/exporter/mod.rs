//! Exporter: periodically fetches the published report blob and serves it
//! as Prometheus metrics plus raw JSON/markdown/HTML over `axum`.
//!
//! Shared state is one record behind a single `std::sync::Mutex`: only the
//! refresher writes; handlers read a cloned snapshot.
//! No async mutex is needed since the critical section is a cheap clone,
//! never held across an `.await`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::publish::blob::BlobStore;
use crate::report::{markdown::wrap_html, Report};

/// `{last_fetch_at, last_fetch_ok, last_error, report, latest_json,
/// latest_md, mode, last_run_at}`.
#[derive(Debug, Clone, Default)]
pub struct ExporterState {
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_fetch_ok: bool,
    pub last_error: Option<String>,
    pub report: Option<Report>,
    pub latest_json: Option<String>,
    pub latest_md: Option<String>,
    pub mode: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

type Shared = Arc<Mutex<ExporterState>>;

async fn refresh_once(state: &Shared, blob: &BlobStore) {
    let now = Utc::now();
    let result = blob.fetch().await;
    let mut st = state.lock().expect("exporter state mutex poisoned");
    st.last_fetch_at = Some(now);
    match result {
        Ok(Some(data)) => {
            let latest_json = data.get("latest.json").cloned();
            let report: Option<Report> = latest_json.as_deref().and_then(|s| serde_json::from_str(s).ok());
            st.last_fetch_ok = true;
            st.last_error = None;
            st.latest_md = data.get("latest.md").cloned();
            st.mode = data.get("mode").cloned();
            st.last_run_at = data
                .get("lastRunAt")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            st.report = report;
            st.latest_json = latest_json;
        }
        Ok(None) => {
            st.last_fetch_ok = false;
            st.last_error = Some("published report blob not found".to_string());
        }
        Err(e) => {
            st.last_fetch_ok = false;
            st.last_error = Some(format!("{:#}", e));
        }
    }
}

async fn refresher_loop(state: Shared, blob: BlobStore, refresh_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(refresh_seconds.max(5)));
    loop {
        interval.tick().await;
        refresh_once(&state, &blob).await;
    }
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let resp = next.run(req).await;
    log::info!("{} {} -> {}", method, uri, resp.status());
    resp
}

fn prom_line(name: &str, labels: &[(&str, &str)], value: f64) -> String {
    if labels.is_empty() {
        format!("{} {}\n", name, value)
    } else {
        let mut sorted = labels.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        let rendered = sorted
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}} {}\n", name, rendered, value)
    }
}

fn build_metrics(snapshot: &ExporterState) -> String {
    let mut out = String::new();

    out.push_str("# HELP resource_advisor_exporter_up Exporter process is running.\n");
    out.push_str("# TYPE resource_advisor_exporter_up gauge\n");
    out.push_str(&prom_line("resource_advisor_exporter_up", &[], 1.0));

    out.push_str("# HELP resource_advisor_report_fetch_success Whether the last blob fetch succeeded.\n");
    out.push_str("# TYPE resource_advisor_report_fetch_success gauge\n");
    out.push_str(&prom_line(
        "resource_advisor_report_fetch_success",
        &[],
        if snapshot.last_fetch_ok { 1.0 } else { 0.0 },
    ));

    out.push_str("# HELP resource_advisor_last_fetch_timestamp_seconds Unix timestamp of the last blob fetch.\n");
    out.push_str("# TYPE resource_advisor_last_fetch_timestamp_seconds gauge\n");
    out.push_str(&prom_line(
        "resource_advisor_last_fetch_timestamp_seconds",
        &[],
        snapshot.last_fetch_at.map(|t| t.timestamp() as f64).unwrap_or(0.0),
    ));

    let Some(report) = &snapshot.report else {
        return out;
    };

    out.push_str("# HELP resource_advisor_last_run_timestamp_seconds Unix timestamp when the report was generated.\n");
    out.push_str("# TYPE resource_advisor_last_run_timestamp_seconds gauge\n");
    out.push_str(&prom_line(
        "resource_advisor_last_run_timestamp_seconds",
        &[("mode", &report.mode)],
        report.generated_at.timestamp() as f64,
    ));

    if let Some(days) = report.coverage_days {
        out.push_str("# HELP resource_advisor_metrics_coverage_days Estimated telemetry data coverage in days.\n");
        out.push_str("# TYPE resource_advisor_metrics_coverage_days gauge\n");
        out.push_str(&prom_line("resource_advisor_metrics_coverage_days", &[], days));
    }

    out.push_str("# HELP resource_advisor_recommendations_total Total recommendations in the latest report.\n");
    out.push_str("# TYPE resource_advisor_recommendations_total gauge\n");
    out.push_str(&prom_line("resource_advisor_recommendations_total", &[], report.recommendations.len() as f64));

    let mut by_action: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for r in &report.recommendations {
        *by_action.entry(r.action.as_str()).or_insert(0) += 1;
    }
    out.push_str("# HELP resource_advisor_recommendations_by_action Recommendations grouped by action.\n");
    out.push_str("# TYPE resource_advisor_recommendations_by_action gauge\n");
    for (action, count) in by_action {
        out.push_str(&prom_line("resource_advisor_recommendations_by_action", &[("action", action)], count as f64));
    }

    let b = &report.budget;
    out.push_str("# HELP resource_advisor_allocatable_cpu_m Cluster allocatable CPU in millicores.\n");
    out.push_str("# TYPE resource_advisor_allocatable_cpu_m gauge\n");
    out.push_str(&prom_line("resource_advisor_allocatable_cpu_m", &[], b.allocatable_cpu_m as f64));
    out.push_str("# HELP resource_advisor_allocatable_memory_mi Cluster allocatable memory in MiB.\n");
    out.push_str("# TYPE resource_advisor_allocatable_memory_mi gauge\n");
    out.push_str(&prom_line("resource_advisor_allocatable_memory_mi", &[], b.allocatable_mem_mi as f64));

    if let Some(p) = b.cpu_percent.current {
        out.push_str("# HELP resource_advisor_current_requests_percent_cpu Current CPU requests as % of allocatable.\n");
        out.push_str("# TYPE resource_advisor_current_requests_percent_cpu gauge\n");
        out.push_str(&prom_line("resource_advisor_current_requests_percent_cpu", &[], p));
    }
    if let Some(p) = b.mem_percent.current {
        out.push_str("# HELP resource_advisor_current_requests_percent_memory Current memory requests as % of allocatable.\n");
        out.push_str("# TYPE resource_advisor_current_requests_percent_memory gauge\n");
        out.push_str(&prom_line("resource_advisor_current_requests_percent_memory", &[], p));
    }
    if let Some(p) = b.cpu_percent.recommended {
        out.push_str("# HELP resource_advisor_recommended_requests_percent_cpu Recommended CPU requests as % of allocatable.\n");
        out.push_str("# TYPE resource_advisor_recommended_requests_percent_cpu gauge\n");
        out.push_str(&prom_line("resource_advisor_recommended_requests_percent_cpu", &[], p));
    }
    if let Some(p) = b.mem_percent.recommended {
        out.push_str("# HELP resource_advisor_recommended_requests_percent_memory Recommended memory requests as % of allocatable.\n");
        out.push_str("# TYPE resource_advisor_recommended_requests_percent_memory gauge\n");
        out.push_str(&prom_line("resource_advisor_recommended_requests_percent_memory", &[], p));
    }

    out
}

async fn metrics_handler(State(state): State<Shared>) -> Response {
    let snapshot = state.lock().expect("exporter state mutex poisoned").clone();
    let body = build_metrics(&snapshot);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn latest_json_handler(State(state): State<Shared>) -> Response {
    let snapshot = state.lock().expect("exporter state mutex poisoned").clone();
    match snapshot.latest_json {
        Some(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json; charset=utf-8")], body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no report fetched yet\n").into_response(),
    }
}

async fn latest_md_handler(State(state): State<Shared>) -> Response {
    let snapshot = state.lock().expect("exporter state mutex poisoned").clone();
    match snapshot.latest_md {
        Some(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no report fetched yet\n").into_response(),
    }
}

async fn index_handler(State(state): State<Shared>) -> Response {
    let snapshot = state.lock().expect("exporter state mutex poisoned").clone();
    let md = snapshot.latest_md.unwrap_or_else(|| "No report markdown has been fetched yet.".to_string());
    let last_run_iso = snapshot
        .last_run_at
        .or(snapshot.report.as_ref().map(|r| r.generated_at))
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default();
    Html(wrap_html(&md, &last_run_iso)).into_response()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Runs the exporter: spawns the background refresher and serves the HTTP
/// routes until the process is killed.
pub async fn serve(cfg: &Config) -> anyhow::Result<()> {
    let client = kube::Client::try_default().await?;
    let blob = BlobStore::new(client, cfg.configmap_namespace.clone(), cfg.configmap_name.clone());
    let state: Shared = Arc::new(Mutex::new(ExporterState::default()));

    refresh_once(&state, &blob).await;
    log::info!(
        "Exporter refresher starting (refresh={}s, configmap={}/{})",
        cfg.refresh_seconds,
        cfg.configmap_namespace,
        cfg.configmap_name
    );
    tokio::spawn(refresher_loop(state.clone(), blob, cfg.refresh_seconds));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/latest.json", get(latest_json_handler))
        .route("/latest.md", get(latest_md_handler))
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .layer(middleware::from_fn(log_requests))
        .with_state(state);

    let addr = format!("{}:{}", cfg.listen_addr, cfg.port);
    log::info!("Exporter listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
