//! Explicit configuration record, read from the environment exactly once per
//! run, so the rest of the crate never re-reads `std::env` directly.

use std::collections::HashSet;

fn env_list(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_float(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Publish the report only.
    Report,
    /// Publish the report, compute a Plan, and open/update a pull request.
    ApplyPr,
    /// Reserved, no-op.
    Pr,
}

impl Mode {
    fn from_env(s: &str) -> Mode {
        match s.trim().to_lowercase().as_str() {
            "apply-pr" => Mode::ApplyPr,
            "pr" => Mode::Pr,
            _ => Mode::Report,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Report => "report",
            Mode::ApplyPr => "apply-pr",
            Mode::Pr => "pr",
        }
    }
}

/// Recommender policy knobs.
#[derive(Debug, Clone)]
pub struct RecommenderConfig {
    pub target_namespaces: Vec<String>,
    pub downscale_exclude: HashSet<String>,
    pub max_step_percent: f64,
    pub request_buffer_percent: f64,
    pub limit_buffer_percent: f64,
    pub min_cpu_m: f64,
    pub min_mem_mi: f64,
    pub deadband_percent: f64,
    pub deadband_cpu_m: f64,
    pub deadband_mem_mi: f64,
    pub metrics_window: String,
    pub metrics_resolution: String,
    /// Bounded worker pool size for concurrent telemetry queries (typically 8-16).
    pub concurrency: usize,
}

/// Apply planner policy knobs.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_requests_percent_cpu: f64,
    pub max_requests_percent_memory: f64,
    pub max_apply_changes_per_run: usize,
    pub min_data_days_for_upsize: f64,
    pub min_data_days_for_downsize: f64,
    pub apply_allowlist: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub github_token: Option<String>,
    pub github_repository: String,
    pub github_base_branch: String,
    pub github_apply_head_branch: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub prometheus_url: String,
    pub configmap_namespace: String,
    pub configmap_name: String,
    pub output_dir: String,
    pub recommender: RecommenderConfig,
    pub planner: PlannerConfig,
    pub publish: PublishConfig,
    pub listen_addr: String,
    pub port: u16,
    pub refresh_seconds: u64,
}

impl Config {
    /// Build from the process environment exactly once; never re-read
    /// downstream of this call.
    pub fn from_env() -> Config {
        let mode = Mode::from_env(&env_string("MODE", "report"));

        let recommender = RecommenderConfig {
            target_namespaces: env_list("TARGET_NAMESPACES", "default,monitoring"),
            downscale_exclude: env_list("DOWNSCALE_EXCLUDE", "").into_iter().collect(),
            max_step_percent: env_float("MAX_STEP_PERCENT", 25.0),
            request_buffer_percent: env_float("REQUEST_BUFFER_PERCENT", 30.0),
            limit_buffer_percent: env_float("LIMIT_BUFFER_PERCENT", 60.0),
            min_cpu_m: env_float("MIN_CPU_M", 25.0),
            min_mem_mi: env_float("MIN_MEM_MI", 64.0),
            deadband_percent: env_float("DEADBAND_PERCENT", 10.0),
            deadband_cpu_m: env_float("DEADBAND_CPU_M", 25.0),
            deadband_mem_mi: env_float("DEADBAND_MEM_MI", 64.0),
            metrics_window: env_string("METRICS_WINDOW", "14d"),
            metrics_resolution: env_string("METRICS_RESOLUTION", "1h"),
            concurrency: env_usize("RECOMMENDER_CONCURRENCY", 12),
        };

        let planner = PlannerConfig {
            max_requests_percent_cpu: env_float("MAX_REQUESTS_PERCENT_CPU", 60.0),
            max_requests_percent_memory: env_float("MAX_REQUESTS_PERCENT_MEMORY", 65.0),
            max_apply_changes_per_run: env_usize("MAX_APPLY_CHANGES_PER_RUN", 5),
            min_data_days_for_upsize: env_float("MIN_DATA_DAYS_FOR_UPSIZE", 14.0),
            min_data_days_for_downsize: env_float("MIN_DATA_DAYS_FOR_DOWNSIZE", 14.0),
            apply_allowlist: env_list("APPLY_ALLOWLIST", "").into_iter().collect(),
        };

        let publish = PublishConfig {
            github_token: std::env::var("GITHUB_TOKEN").ok().filter(|s| !s.trim().is_empty()),
            github_repository: env_string("GITHUB_REPOSITORY", ""),
            github_base_branch: env_string("GITHUB_BASE_BRANCH", "main"),
            github_apply_head_branch: env_string("GITHUB_APPLY_HEAD_BRANCH", "resource-advisor/apply"),
        };

        Config {
            mode,
            prometheus_url: env_string("PROMETHEUS_URL", "http://localhost:9090"),
            configmap_namespace: env_string("CONFIGMAP_NAMESPACE", "monitoring"),
            configmap_name: env_string("CONFIGMAP_NAME", "resource-advisor-latest"),
            output_dir: env_string("OUTPUT_DIR", "/tmp/resource-advisor"),
            recommender,
            planner,
            publish,
            listen_addr: env_string("LISTEN_ADDR", "0.0.0.0"),
            port: env_usize("PORT", 8081) as u16,
            refresh_seconds: env_usize("REFRESH_SECONDS", 30).max(5) as u64,
        }
    }
}
