//! Thin process entry point: parse CLI, build [`Config`]
//! once, dispatch to a single advisor run or the long-running exporter.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};

use resource_advisor::cli::{Args, Commands};
use resource_advisor::config::{Config, Mode};
use resource_advisor::errors::AdvisorError;
use resource_advisor::exporter;
use resource_advisor::inventory::{node_request_footprint, placement_index, K8sClient, NodeInfo};
use resource_advisor::planner::{self, Budgets};
use resource_advisor::publish::blob::{write_local_mirror, BlobStore};
use resource_advisor::publish::github::GitHubPublisher;
use resource_advisor::publish::{self as publish_mod};
use resource_advisor::recommender::{self, flatten_targets, Recommendation};
use resource_advisor::report;
use resource_advisor::telemetry::{self, PrometheusGateway};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Run => run_once().await,
        Commands::Serve => run_serve().await,
    };

    if let Err(e) = result {
        log::error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_serve() -> Result<()> {
    let cfg = Config::from_env();
    exporter::serve(&cfg).await
}

/// Coverage in days, trying the primary expression then the fallback
///; `None` if neither Prometheus query returns a sample.
async fn query_coverage_days(gateway: &PrometheusGateway) -> Option<f64> {
    let (primary, fallback) = telemetry::coverage_days_query();
    let seconds = match gateway.query_scalar(&primary).await {
        Some(v) => Some(v),
        None => gateway.query_scalar(&fallback).await,
    }?;
    Some(seconds / 86400.0)
}

async fn run_once() -> Result<()> {
    let cfg = Config::from_env();
    info!("Starting resource advisor in mode={}", cfg.mode.as_str());

    let client = K8sClient::new().await.context("connecting to cluster")?;
    let gateway = PrometheusGateway::new(cfg.prometheus_url.clone());

    let mut workloads = Vec::new();
    for ns in &cfg.recommender.target_namespaces {
        match client.list_workloads(ns).await {
            Ok(mut w) => workloads.append(&mut w),
            Err(e) => warn!("listing workloads in namespace {}: {:#}", ns, e),
        }
    }
    info!(
        "Enumerated {} workload template(s) across {} namespace(s)",
        workloads.len(),
        cfg.recommender.target_namespaces.len()
    );

    let targets = flatten_targets(&workloads);
    let outcomes = recommender::run(targets, &gateway, &cfg.recommender).await;
    info!("Recommender evaluated {} container target(s)", outcomes.len());

    let coverage_days = query_coverage_days(&gateway).await;
    let nodes = client.list_nodes().await.context("listing nodes")?;
    let now = Utc::now();

    let (report, emitted) = report::assemble(outcomes, &nodes, cfg.mode.as_str(), coverage_days, now);
    info!("Assembled report {} with {} recommendation(s)", report.id, report.recommendations.len());

    let latest_json = report::render_json(&report).context("rendering report JSON")?;
    let latest_md = report::render_markdown(&report);
    write_local_mirror(&cfg.output_dir, &latest_json, &latest_md).context("writing local report mirror")?;

    let blob = BlobStore::new(client.raw_client(), cfg.configmap_namespace.clone(), cfg.configmap_name.clone());
    let last_run_at = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    blob.publish(&latest_json, &latest_md, &last_run_at, cfg.mode.as_str())
        .await
        .context("publishing report blob")?;

    match cfg.mode {
        Mode::ApplyPr => run_apply_pr(&cfg, &client, &nodes, &emitted, coverage_days, now).await?,
        Mode::Report => {}
        Mode::Pr => info!("mode=pr is reserved and currently a no-op"),
    }

    info!("Resource advisor run completed");
    Ok(())
}

async fn run_apply_pr(
    cfg: &Config,
    client: &K8sClient,
    nodes: &[NodeInfo],
    emitted: &[Recommendation],
    coverage_days: Option<f64>,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let Some(token) = cfg.publish.github_token.clone() else {
        let err = AdvisorError::Authorization {
            detail: "GITHUB_TOKEN is not set; skipping apply-pr publish step".to_string(),
        };
        warn!("{}", err);
        return Ok(());
    };

    let pods = client.list_pods().await.context("listing pods")?;
    let current_by_node = node_request_footprint(&pods);
    let placement = placement_index(&pods);
    let budgets = Budgets::compute(nodes, &cfg.planner);

    let (upsizes, downsizes, pre_skipped) = planner::filter_candidates(emitted, &placement, coverage_days, &cfg.planner);
    info!(
        "Planner candidate pools: {} upsize(s), {} downsize(s), {} pre-filtered",
        upsizes.len(),
        downsizes.len(),
        pre_skipped.len()
    );

    let plan = planner::select(upsizes, downsizes, pre_skipped, current_by_node, &budgets, &cfg.planner);
    info!("Planner selected {} change(s), skipped {}", plan.selected.len(), plan.skipped.len());

    if plan.selected.is_empty() {
        info!("No changes selected this run; skipping pull request");
        return Ok(());
    }

    let gh = GitHubPublisher::new(&cfg.publish.github_repository, token).context("constructing GitHub publisher")?;
    match publish_mod::publish_plan(&gh, &cfg.publish, &plan, now).await {
        Ok(Some(number)) => info!("Opened/updated pull request #{}", number),
        Ok(None) => info!("Nothing to publish"),
        Err(e) => warn!("publishing plan: {:#}", e),
    }

    Ok(())
}
