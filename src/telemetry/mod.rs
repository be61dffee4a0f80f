//! Telemetry gateway: Prometheus-compatible metrics queries.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::AdvisorError;
use crate::inventory::WorkloadKind;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    value: (f64, String),
}

/// Thin wrapper over a Prometheus-compatible `/api/v1/query` endpoint.
#[derive(Clone)]
pub struct PrometheusGateway {
    base_url: String,
    client: reqwest::Client,
}

impl PrometheusGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(45))
            .build()
            .expect("reqwest client with static config never fails to build");
        Self { base_url: base_url.into(), client }
    }

    /// Runs one instant query and reduces the result vector by `f64::max`.
    /// Returns `None` on transport error, a non-`success` envelope, an empty
    /// result set, or an unparseable sample value. Callers treat all of
    /// these as "no data" rather than distinguishing the cause.
    pub async fn query_scalar(&self, expr: &str) -> Option<f64> {
        let url = format!("{}/api/v1/query", self.base_url.trim_end_matches('/'));
        let resp = match self.client.get(&url).query(&[("query", expr)]).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!(
                    "{}",
                    AdvisorError::TransientNetwork { endpoint: url, detail: e.to_string() }
                );
                return None;
            }
        };
        if !resp.status().is_success() {
            log::warn!(
                "{}",
                AdvisorError::TransientNetwork { endpoint: url, detail: format!("status {}", resp.status()) }
            );
            return None;
        }
        let parsed: QueryResponse = resp.json().await.ok()?;
        if parsed.status != "success" {
            log::warn!(
                "{}",
                AdvisorError::TransientNetwork { endpoint: url, detail: format!("envelope status {:?}", parsed.status) }
            );
            return None;
        }
        parsed
            .data
            .result
            .iter()
            .filter_map(|r| r.value.1.parse::<f64>().ok())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }
}

/// p95 CPU usage rate over the configured window, in cores. The inner
/// `rate()` window is fixed at `5m` regardless of resolution; `[W:R]`
/// subqueries that window at the configured resolution.
pub fn cpu_p95_query(namespace: &str, pod_regex: &str, container: &str, window: &str, resolution: &str) -> String {
    format!(
        "quantile_over_time(0.95, rate(container_cpu_usage_seconds_total{{namespace=\"{ns}\",pod=~\"{pod}\",container=\"{c}\",image!=\"\"}}[5m])[{win}:{res}])",
        ns = namespace,
        pod = pod_regex,
        c = container,
        win = window,
        res = resolution,
    )
}

/// p95 working-set memory over the configured window/resolution, in bytes.
pub fn mem_p95_query(namespace: &str, pod_regex: &str, container: &str, window: &str, resolution: &str) -> String {
    format!(
        "quantile_over_time(0.95, container_memory_working_set_bytes{{namespace=\"{ns}\",pod=~\"{pod}\",container=\"{c}\",image!=\"\"}}[{win}:{res}])",
        ns = namespace,
        pod = pod_regex,
        c = container,
        win = window,
        res = resolution,
    )
}

/// Container restart count increase over the configured window.
pub fn restarts_query(namespace: &str, pod_regex: &str, container: &str, window: &str) -> String {
    format!(
        "sum(increase(kube_pod_container_status_restarts_total{{namespace=\"{ns}\",pod=~\"{pod}\",container=\"{c}\"}}[{win}]))",
        ns = namespace,
        pod = pod_regex,
        c = container,
        win = window,
    )
}

/// Coverage in days: primary expression based on the TSDB's lowest retained
/// sample, falling back to the Prometheus process start time when that
/// series is absent. Both expressions are in seconds and divided by 86400
/// by the caller once evaluated. Returns `(primary, fallback)`.
pub fn coverage_days_query() -> (String, String) {
    let primary = "time() - (max(prometheus_tsdb_lowest_timestamp) / 1000)".to_string();
    let fallback = "time() - max(process_start_time_seconds{job=~\".*prometheus.*\"})".to_string();
    (primary, fallback)
}

/// Build the pod-name regex matching live pods for a workload, for use in
/// PromQL label matchers.
pub fn pod_regex(kind: WorkloadKind, workload_name: &str) -> String {
    kind.pod_regex(workload_name)
}
