//! Recommender: turns raw usage quantiles into per-container
//! target requests/limits under policy.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};

use crate::config::RecommenderConfig;
use crate::inventory::{ContainerCurrent, WorkloadKind, WorkloadTemplate};
use crate::quantity::{CpuMillis, MemMebis};
use crate::telemetry::{cpu_p95_query, mem_p95_query, pod_regex, restarts_query, PrometheusGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Note {
    DownscaleExcluded,
    RestartGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upsize,
    Downsize,
    NoChange,
}

/// A single (workload, container) this recommender evaluates.
#[derive(Debug, Clone)]
pub struct ContainerTarget {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub workload: String,
    pub release: String,
    pub container: String,
    pub replicas: u32,
    pub current: ContainerCurrent,
}

/// Usage over the configured window/resolution. Any field may be absent.
#[derive(Debug, Clone, Default)]
pub struct UsageSample {
    pub cpu_p95_m: Option<f64>,
    pub mem_p95_mi: Option<f64>,
    pub restarts_in_window: Option<f64>,
}

/// Percent and absolute deltas against current, one pair per target dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deltas {
    pub req_cpu_percent: f64,
    pub req_cpu_abs: f64,
    pub req_mem_percent: f64,
    pub req_mem_abs: f64,
    pub lim_cpu_percent: f64,
    pub lim_cpu_abs: f64,
    pub lim_mem_percent: f64,
    pub lim_mem_abs: f64,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub target: ContainerTarget,
    pub usage: UsageSample,
    pub rec_request_cpu_m: CpuMillis,
    pub rec_request_mem_mi: MemMebis,
    pub rec_limit_cpu_m: CpuMillis,
    pub rec_limit_mem_mi: MemMebis,
    pub action: Action,
    pub notes: BTreeSet<Note>,
    pub deltas: Deltas,
    /// False when none of the four dimensions cleared the deadband; the
    /// cluster totals still count this recommendation, it just isn't shown.
    pub emit: bool,
}

/// Per-item outcome of step 1-8: either the container had no usable
/// telemetry at all (step 2), or a full recommendation was computed.
pub enum RecommendOutcome {
    NoMetrics { target: ContainerTarget },
    Computed(Recommendation),
}

fn delta_percent(current: f64, rec: f64) -> f64 {
    if current == 0.0 {
        if rec == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (rec - current) / current * 100.0
    }
}

fn is_material(percent: f64, abs: f64, cfg: &RecommenderConfig, abs_threshold: f64) -> bool {
    percent.abs() >= cfg.deadband_percent || abs.abs() >= abs_threshold
}

/// Step 4: clamp `target` to within `MAX_STEP_PERCENT` of `current`, unless
/// `current` is zero in which case the raw target passes through unclamped.
fn step_limit(current: f64, target: f64, max_step_percent: f64) -> f64 {
    if current == 0.0 {
        return target;
    }
    let lo = current * (1.0 - max_step_percent / 100.0);
    let hi = current * (1.0 + max_step_percent / 100.0);
    target.clamp(lo, hi)
}

/// Steps 3-8 for one container, given its already-queried usage sample.
pub fn recommend_one(target: ContainerTarget, usage: UsageSample, cfg: &RecommenderConfig) -> RecommendOutcome {
    if usage.cpu_p95_m.is_none() && usage.mem_p95_mi.is_none() {
        return RecommendOutcome::NoMetrics { target };
    }

    let cpu_p95 = usage.cpu_p95_m.unwrap_or(0.0);
    let mem_p95 = usage.mem_p95_mi.unwrap_or(0.0);
    let restarts = usage.restarts_in_window.unwrap_or(0.0);

    let cur_req_cpu = target.current.request_cpu_m.as_f64();
    let cur_req_mem = target.current.request_mem_mi.as_f64();
    let cur_lim_cpu = target.current.limit_cpu_m.as_f64();
    let cur_lim_mem = target.current.limit_mem_mi.as_f64();

    // Step 3: raw targets.
    let raw_req_cpu = f64::max(cfg.min_cpu_m, cpu_p95 * (1.0 + cfg.request_buffer_percent / 100.0));
    let raw_req_mem = f64::max(cfg.min_mem_mi, mem_p95 * (1.0 + cfg.request_buffer_percent / 100.0));
    let raw_lim_cpu = f64::max(raw_req_cpu * 2.0, cpu_p95 * (1.0 + cfg.limit_buffer_percent / 100.0));
    let raw_lim_mem = f64::max(raw_req_mem * 1.5, mem_p95 * (1.0 + cfg.limit_buffer_percent / 100.0));

    // Step 4: step-limit against current.
    let mut req_cpu = step_limit(cur_req_cpu, raw_req_cpu, cfg.max_step_percent);
    let mut req_mem = step_limit(cur_req_mem, raw_req_mem, cfg.max_step_percent);
    let mut lim_cpu = step_limit(cur_lim_cpu, raw_lim_cpu, cfg.max_step_percent);
    let mut lim_mem = step_limit(cur_lim_mem, raw_lim_mem, cfg.max_step_percent);

    // Step 5: guardrails.
    let mut notes = BTreeSet::new();
    if restarts > 0.0 {
        notes.insert(Note::RestartGuard);
        req_mem = req_mem.max(cur_req_mem);
        lim_mem = lim_mem.max(cur_lim_mem);
    }
    if cfg.downscale_exclude.contains(&target.release) {
        notes.insert(Note::DownscaleExcluded);
        req_cpu = req_cpu.max(cur_req_cpu);
        req_mem = req_mem.max(cur_req_mem);
        lim_cpu = lim_cpu.max(cur_lim_cpu);
        lim_mem = lim_mem.max(cur_lim_mem);
    }

    let deltas = Deltas {
        req_cpu_percent: delta_percent(cur_req_cpu, req_cpu),
        req_cpu_abs: req_cpu - cur_req_cpu,
        req_mem_percent: delta_percent(cur_req_mem, req_mem),
        req_mem_abs: req_mem - cur_req_mem,
        lim_cpu_percent: delta_percent(cur_lim_cpu, lim_cpu),
        lim_cpu_abs: lim_cpu - cur_lim_cpu,
        lim_mem_percent: delta_percent(cur_lim_mem, lim_mem),
        lim_mem_abs: lim_mem - cur_lim_mem,
    };

    // Step 6: deadband. Emit iff at least one of the four dimensions is material.
    let req_cpu_material = is_material(deltas.req_cpu_percent, deltas.req_cpu_abs, cfg, cfg.deadband_cpu_m);
    let req_mem_material = is_material(deltas.req_mem_percent, deltas.req_mem_abs, cfg, cfg.deadband_mem_mi);
    let lim_cpu_material = is_material(deltas.lim_cpu_percent, deltas.lim_cpu_abs, cfg, cfg.deadband_cpu_m);
    let lim_mem_material = is_material(deltas.lim_mem_percent, deltas.lim_mem_abs, cfg, cfg.deadband_mem_mi);
    let emit = req_cpu_material || req_mem_material || lim_cpu_material || lim_mem_material;

    // Step 7: action from the *request* dimensions only. Upsize wins ties.
    let any_request_rose = req_cpu_material && deltas.req_cpu_abs > 0.0 || req_mem_material && deltas.req_mem_abs > 0.0;
    let any_request_fell = req_cpu_material && deltas.req_cpu_abs < 0.0 || req_mem_material && deltas.req_mem_abs < 0.0;
    let action = if any_request_rose {
        Action::Upsize
    } else if any_request_fell {
        Action::Downsize
    } else {
        Action::NoChange
    };

    RecommendOutcome::Computed(Recommendation {
        target,
        usage,
        rec_request_cpu_m: CpuMillis::from_f64(req_cpu),
        rec_request_mem_mi: MemMebis::from_f64(req_mem),
        rec_limit_cpu_m: CpuMillis::from_f64(lim_cpu),
        rec_limit_mem_mi: MemMebis::from_f64(lim_mem),
        action,
        notes,
        deltas,
        emit,
    })
}

/// Flattens workload templates into per-container evaluation targets.
pub fn flatten_targets(workloads: &[WorkloadTemplate]) -> Vec<ContainerTarget> {
    let mut out = Vec::new();
    for w in workloads {
        for c in &w.containers {
            out.push(ContainerTarget {
                namespace: w.namespace.clone(),
                kind: w.kind,
                workload: w.name.clone(),
                release: w.release.clone(),
                container: c.name.clone(),
                replicas: w.replicas.max(1),
                current: c.current.clone(),
            });
        }
    }
    out
}

async fn query_usage(gateway: &PrometheusGateway, target: &ContainerTarget, cfg: &RecommenderConfig) -> UsageSample {
    let pod = pod_regex(target.kind, &target.workload);
    let cpu_q = cpu_p95_query(&target.namespace, &pod, &target.container, &cfg.metrics_window, &cfg.metrics_resolution);
    let mem_q = mem_p95_query(&target.namespace, &pod, &target.container, &cfg.metrics_window, &cfg.metrics_resolution);
    let restarts_q = restarts_query(&target.namespace, &pod, &target.container, &cfg.metrics_window);

    let (cpu, mem, restarts) = futures::join!(
        gateway.query_scalar(&cpu_q),
        gateway.query_scalar(&mem_q),
        gateway.query_scalar(&restarts_q),
    );

    // The gateway returns CPU in cores and memory in bytes; the recommender
    // works in millicores and mebibytes throughout.
    UsageSample {
        cpu_p95_m: cpu.map(|cores| cores * 1000.0),
        mem_p95_mi: mem.map(|bytes| bytes / (1024.0 * 1024.0)),
        restarts_in_window: restarts,
    }
}

/// Runs the recommender over every container target, with a bounded
/// concurrent worker pool for telemetry queries.
pub async fn run(targets: Vec<ContainerTarget>, gateway: &PrometheusGateway, cfg: &RecommenderConfig) -> Vec<RecommendOutcome> {
    stream::iter(targets.into_iter().map(|target| async move {
        let usage = query_usage(gateway, &target, cfg).await;
        recommend_one(target, usage, cfg)
    }))
    .buffer_unordered(cfg.concurrency.max(1))
    .collect()
    .await
}

/// Max absolute `|Δ%|` across the four dimensions, for sort order.
pub fn max_abs_delta_percent(deltas: &Deltas) -> f64 {
    [deltas.req_cpu_percent, deltas.req_mem_percent, deltas.lim_cpu_percent, deltas.lim_mem_percent]
        .into_iter()
        .map(f64::abs)
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Sort order: upsize first, then descending restart count, then descending
/// max `|Δ%|` across the four dimensions.
pub fn sort_recommendations(recs: &mut [Recommendation]) {
    recs.sort_by(|a, b| {
        let upsize_rank = |r: &Recommendation| if r.action == Action::Upsize { 0 } else { 1 };
        upsize_rank(a)
            .cmp(&upsize_rank(b))
            .then(
                b.usage
                    .restarts_in_window
                    .unwrap_or(0.0)
                    .partial_cmp(&a.usage.restarts_in_window.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                max_abs_delta_percent(&b.deltas)
                    .partial_cmp(&max_abs_delta_percent(&a.deltas))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::WorkloadKind;
    use std::collections::HashSet;

    fn cfg() -> RecommenderConfig {
        RecommenderConfig {
            target_namespaces: vec!["default".into()],
            downscale_exclude: HashSet::new(),
            max_step_percent: 25.0,
            request_buffer_percent: 30.0,
            limit_buffer_percent: 60.0,
            min_cpu_m: 25.0,
            min_mem_mi: 64.0,
            deadband_percent: 10.0,
            deadband_cpu_m: 25.0,
            deadband_mem_mi: 64.0,
            metrics_window: "14d".into(),
            metrics_resolution: "1h".into(),
            concurrency: 4,
        }
    }

    fn target(cpu_req: i64, mem_req: i64, cpu_lim: i64, mem_lim: i64, release: &str) -> ContainerTarget {
        ContainerTarget {
            namespace: "default".into(),
            kind: WorkloadKind::Deployment,
            workload: "web".into(),
            release: release.into(),
            container: "app".into(),
            replicas: 1,
            current: ContainerCurrent {
                request_cpu_m: CpuMillis(cpu_req),
                request_mem_mi: MemMebis(mem_req),
                limit_cpu_m: CpuMillis(cpu_lim),
                limit_mem_mi: MemMebis(mem_lim),
            },
        }
    }

    #[test]
    fn s1_simple_upsize() {
        let t = target(100, 256, 200, 512, "app");
        let usage = UsageSample { cpu_p95_m: Some(300.0), mem_p95_mi: Some(400.0), restarts_in_window: Some(0.0) };
        let out = recommend_one(t, usage, &cfg());
        match out {
            RecommendOutcome::Computed(r) => {
                assert_eq!(r.rec_request_cpu_m.0, 125);
                assert_eq!(r.rec_request_mem_mi.0, 320);
                assert_eq!(r.action, Action::Upsize);
                assert!(r.notes.is_empty());
                assert!(r.emit);
            }
            _ => panic!("expected computed"),
        }
    }

    #[test]
    fn s2_restart_guard_blocks_memory_downsize() {
        let t = target(50, 512, 100, 1024, "app");
        let usage = UsageSample { cpu_p95_m: Some(10.0), mem_p95_mi: Some(50.0), restarts_in_window: Some(3.0) };
        let out = recommend_one(t, usage, &cfg());
        match out {
            RecommendOutcome::Computed(r) => {
                assert!(r.notes.contains(&Note::RestartGuard));
                assert_eq!(r.rec_request_mem_mi.0, 512);
            }
            _ => panic!("expected computed"),
        }
    }

    #[test]
    fn s3_downscale_excluded_blocks_all_decreases() {
        let mut c = cfg();
        c.downscale_exclude.insert("jellyfin".to_string());
        let t = target(500, 1024, 1000, 2048, "jellyfin");
        let usage = UsageSample { cpu_p95_m: Some(5.0), mem_p95_mi: Some(20.0), restarts_in_window: Some(0.0) };
        let out = recommend_one(t, usage, &c);
        match out {
            RecommendOutcome::Computed(r) => {
                assert!(r.notes.contains(&Note::DownscaleExcluded));
                assert!(r.rec_request_cpu_m.0 >= 500);
                assert!(r.rec_request_mem_mi.0 >= 1024);
                assert!(r.rec_limit_cpu_m.0 >= 1000);
                assert!(r.rec_limit_mem_mi.0 >= 2048);
                assert_eq!(r.action, Action::NoChange);
            }
            _ => panic!("expected computed"),
        }
    }

    #[test]
    fn s4_deadband_suppresses_tiny_change() {
        // p95 chosen so every one of the four buffered/step-limited targets
        // stays within both the 10% and the absolute deadband of current.
        let t = target(100, 500, 200, 750, "app");
        let usage = UsageSample { cpu_p95_m: Some(75.0), mem_p95_mi: Some(400.0), restarts_in_window: Some(0.0) };
        let out = recommend_one(t, usage, &cfg());
        match out {
            RecommendOutcome::Computed(r) => assert!(!r.emit),
            _ => panic!("expected computed"),
        }
    }

    #[test]
    fn no_metrics_skips_computation() {
        let t = target(100, 256, 200, 512, "app");
        let usage = UsageSample::default();
        let out = recommend_one(t, usage, &cfg());
        assert!(matches!(out, RecommendOutcome::NoMetrics { .. }));
    }

    #[test]
    fn zero_current_bypasses_step_limit() {
        assert_eq!(step_limit(0.0, 500.0, 25.0), 500.0);
    }

    #[test]
    fn step_limit_clamps_to_band() {
        assert_eq!(step_limit(100.0, 1000.0, 25.0), 125.0);
        assert_eq!(step_limit(100.0, 1.0, 25.0), 75.0);
    }
}
