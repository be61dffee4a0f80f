//! Apply planner: selects a bounded, budget-fitting subset of
//! recommendations to apply, pairing blocked upsizes with tradeoff
//! downsizes where that frees enough headroom.

use std::collections::{HashMap, HashSet};

use crate::config::PlannerConfig;
use crate::inventory::NodeInfo;
use crate::publish::mapping;
use crate::recommender::{Note, Recommendation};

/// One recommendation that cleared allowlist/mapping/threshold filtering and
/// entered the selection pool.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub namespace: String,
    pub workload: String,
    pub release: String,
    pub container: String,
    pub path: &'static str,
    pub replicas: u32,
    pub placement: HashMap<String, u32>,
    pub per_pod_delta_cpu_m: f64,
    pub per_pod_delta_mem_mi: f64,
    pub total_delta_cpu_m: f64,
    pub total_delta_mem_mi: f64,
    pub restart_guard: bool,
    pub downscale_excluded: bool,
    pub restarts: f64,
    pub req_cpu_m: i64,
    pub req_mem_mi: i64,
    pub lim_cpu_m: i64,
    pub lim_mem_mi: i64,
}

/// A candidate the planner decided not to apply, with the reason and (for
/// budget/node-fit blocks) the overshoot and suggested tradeoffs.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub release: String,
    pub container: String,
    pub reason: String,
    pub cluster_cpu_over: Option<f64>,
    pub cluster_mem_over: Option<f64>,
    pub suggested_tradeoffs: Vec<String>,
}

/// A recommendation the planner decided to apply.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub namespace: String,
    pub workload: String,
    pub release: String,
    pub container: String,
    pub path: &'static str,
    pub action: &'static str,
    pub replicas: u32,
    pub placement: HashMap<String, u32>,
    pub per_pod_delta_cpu_m: f64,
    pub per_pod_delta_mem_mi: f64,
    pub total_delta_cpu_m: f64,
    pub total_delta_mem_mi: f64,
    pub req_cpu_m: i64,
    pub req_mem_mi: i64,
    pub lim_cpu_m: i64,
    pub lim_mem_mi: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Budgets {
    pub cluster_cpu_m: f64,
    pub cluster_mem_mi: f64,
    pub node_cpu_m: HashMap<String, f64>,
    pub node_mem_mi: HashMap<String, f64>,
}

impl Budgets {
    pub fn compute(nodes: &[NodeInfo], cfg: &PlannerConfig) -> Budgets {
        let allocatable_cpu: f64 = nodes.iter().map(|n| n.allocatable_cpu_m.as_f64()).sum();
        let allocatable_mem: f64 = nodes.iter().map(|n| n.allocatable_mem_mi.as_f64()).sum();
        let mut node_cpu_m = HashMap::new();
        let mut node_mem_mi = HashMap::new();
        for n in nodes {
            node_cpu_m.insert(n.name.clone(), n.allocatable_cpu_m.as_f64() * cfg.max_requests_percent_cpu / 100.0);
            node_mem_mi.insert(n.name.clone(), n.allocatable_mem_mi.as_f64() * cfg.max_requests_percent_memory / 100.0);
        }
        Budgets {
            cluster_cpu_m: allocatable_cpu * cfg.max_requests_percent_cpu / 100.0,
            cluster_mem_mi: allocatable_mem * cfg.max_requests_percent_memory / 100.0,
            node_cpu_m,
            node_mem_mi,
        }
    }
}

const FIT_EPSILON: f64 = 0.01;

/// Cluster-total and per-node overshoot of a projected footprint against its
/// budgets. `ok` is true when every axis is within budget (epsilon 0.01).
#[derive(Debug, Clone, Default)]
pub struct FitResult {
    pub ok: bool,
    pub cluster_cpu_over: f64,
    pub cluster_mem_over: f64,
    pub node_over: HashMap<String, (f64, f64)>,
}

pub fn fit(by_node: &HashMap<String, (f64, f64)>, budgets: &Budgets) -> FitResult {
    let mut total_cpu = 0.0;
    let mut total_mem = 0.0;
    let mut node_over = HashMap::new();
    let mut any_node_over = false;

    for (node, &(cpu, mem)) in by_node {
        total_cpu += cpu;
        total_mem += mem;
        let node_cpu_budget = budgets.node_cpu_m.get(node).copied().unwrap_or(f64::INFINITY);
        let node_mem_budget = budgets.node_mem_mi.get(node).copied().unwrap_or(f64::INFINITY);
        let cpu_over = (cpu - node_cpu_budget - FIT_EPSILON).max(0.0);
        let mem_over = (mem - node_mem_budget - FIT_EPSILON).max(0.0);
        if cpu_over > 0.0 || mem_over > 0.0 {
            any_node_over = true;
        }
        node_over.insert(node.clone(), (cpu_over, mem_over));
    }

    let cluster_cpu_over = (total_cpu - budgets.cluster_cpu_m - FIT_EPSILON).max(0.0);
    let cluster_mem_over = (total_mem - budgets.cluster_mem_mi - FIT_EPSILON).max(0.0);
    let ok = cluster_cpu_over <= 0.0 && cluster_mem_over <= 0.0 && !any_node_over;

    FitResult { ok, cluster_cpu_over, cluster_mem_over, node_over }
}

fn apply_delta(by_node: &mut HashMap<String, (f64, f64)>, c: &Candidate) {
    for (node, count) in &c.placement {
        let entry = by_node.entry(node.clone()).or_insert((0.0, 0.0));
        entry.0 += c.per_pod_delta_cpu_m * (*count as f64);
        entry.1 += c.per_pod_delta_mem_mi * (*count as f64);
    }
}

/// Weighted magnitude used to rank pools: memory is weighted 10x CPU
/// (millicores), acknowledging memory pressure is cliff-shaped (OOM-kill)
/// while CPU pressure degrades gracefully (throttling).
fn weighted_delta(total_delta_cpu_m: f64, total_delta_mem_mi: f64) -> f64 {
    total_delta_mem_mi.abs() + total_delta_cpu_m.abs() / 10.0
}

/// Candidate filtering: allowlist/mapping, tiny-delta drop,
/// replica resolution (Decision D3), and the upsize/downsize admission
/// gates. Returns (upsize pool, downsize pool, skipped-before-selection).
pub fn filter_candidates(
    recommendations: &[Recommendation],
    placement_index: &HashMap<(String, String), HashMap<String, u32>>,
    coverage_days: Option<f64>,
    cfg: &PlannerConfig,
) -> (Vec<Candidate>, Vec<Candidate>, Vec<SkippedItem>) {
    let mut upsizes = Vec::new();
    let mut downsizes = Vec::new();
    let mut skipped = Vec::new();

    let insufficient_coverage = |min_days: f64| coverage_days.map_or(true, |d| d < min_days);

    for r in recommendations {
        let release = r.target.release.clone();
        let container = r.target.container.clone();

        if !cfg.apply_allowlist.contains(&release) {
            skipped.push(SkippedItem {
                release,
                container,
                reason: "not_allowlisted".to_string(),
                cluster_cpu_over: None,
                cluster_mem_over: None,
                suggested_tradeoffs: vec![],
            });
            continue;
        }

        let Some(path) = mapping::path_for(&release) else {
            skipped.push(SkippedItem {
                release,
                container,
                reason: "path_not_mapped".to_string(),
                cluster_cpu_over: None,
                cluster_mem_over: None,
                suggested_tradeoffs: vec![],
            });
            continue;
        };

        let per_pod_delta_cpu_m = r.rec_request_cpu_m.as_f64() - r.target.current.request_cpu_m.as_f64();
        let per_pod_delta_mem_mi = r.rec_request_mem_mi.as_f64() - r.target.current.request_mem_mi.as_f64();
        if per_pod_delta_cpu_m.abs() < 1.0 && per_pod_delta_mem_mi.abs() < 1.0 {
            continue;
        }

        let placement = placement_index
            .get(&(release.clone(), container.clone()))
            .cloned()
            .unwrap_or_default();
        let placement_sum: u32 = placement.values().sum();
        // Decision D3: placement sum, then template replicas, then 1.
        let effective_replicas = if placement_sum > 0 {
            placement_sum
        } else if r.target.replicas > 0 {
            r.target.replicas
        } else {
            1
        };

        let restart_guard = r.notes.contains(&Note::RestartGuard);
        let downscale_excluded = r.notes.contains(&Note::DownscaleExcluded);
        let restarts = r.usage.restarts_in_window.unwrap_or(0.0);
        let is_upsize = per_pod_delta_cpu_m > 0.0 || per_pod_delta_mem_mi > 0.0;

        let candidate = Candidate {
            namespace: r.target.namespace.clone(),
            workload: r.target.workload.clone(),
            release: release.clone(),
            container: container.clone(),
            path,
            replicas: effective_replicas,
            placement,
            per_pod_delta_cpu_m,
            per_pod_delta_mem_mi,
            total_delta_cpu_m: per_pod_delta_cpu_m * effective_replicas as f64,
            total_delta_mem_mi: per_pod_delta_mem_mi * effective_replicas as f64,
            restart_guard,
            downscale_excluded,
            restarts,
            req_cpu_m: r.rec_request_cpu_m.0,
            req_mem_mi: r.rec_request_mem_mi.0,
            lim_cpu_m: r.rec_limit_cpu_m.0,
            lim_mem_mi: r.rec_limit_mem_mi.0,
        };

        if is_upsize {
            if insufficient_coverage(cfg.min_data_days_for_upsize) && !restart_guard {
                skipped.push(SkippedItem {
                    release,
                    container,
                    reason: "insufficient_data_for_upsize".to_string(),
                    cluster_cpu_over: None,
                    cluster_mem_over: None,
                    suggested_tradeoffs: vec![],
                });
                continue;
            }
            upsizes.push(candidate);
        } else {
            if restart_guard {
                skipped.push(SkippedItem {
                    release,
                    container,
                    reason: "restart_guard_blocks_downsize".to_string(),
                    cluster_cpu_over: None,
                    cluster_mem_over: None,
                    suggested_tradeoffs: vec![],
                });
                continue;
            }
            if downscale_excluded {
                skipped.push(SkippedItem {
                    release,
                    container,
                    reason: "downscale_excluded".to_string(),
                    cluster_cpu_over: None,
                    cluster_mem_over: None,
                    suggested_tradeoffs: vec![],
                });
                continue;
            }
            if insufficient_coverage(cfg.min_data_days_for_downsize) {
                skipped.push(SkippedItem {
                    release,
                    container,
                    reason: "insufficient_data_for_downsize".to_string(),
                    cluster_cpu_over: None,
                    cluster_mem_over: None,
                    suggested_tradeoffs: vec![],
                });
                continue;
            }
            downsizes.push(candidate);
        }
    }

    downsizes.sort_by(|a, b| {
        weighted_delta(b.total_delta_cpu_m, b.total_delta_mem_mi)
            .partial_cmp(&weighted_delta(a.total_delta_cpu_m, a.total_delta_mem_mi))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    upsizes.sort_by(|a, b| {
        let pri = |c: &Candidate| (if c.restart_guard { 1 } else { 0 }, c.restarts);
        let (a_guard, a_restarts) = pri(a);
        let (b_guard, b_restarts) = pri(b);
        b_guard
            .cmp(&a_guard)
            .then(b_restarts.partial_cmp(&a_restarts).unwrap_or(std::cmp::Ordering::Equal))
            .then(
                weighted_delta(b.total_delta_cpu_m, b.total_delta_mem_mi)
                    .partial_cmp(&weighted_delta(a.total_delta_cpu_m, a.total_delta_mem_mi))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    (upsizes, downsizes, skipped)
}

fn tradeoff_score(d: &Candidate, cur: &FitResult) -> f64 {
    let mut score = 0.0;
    let savings_cpu = (-d.total_delta_cpu_m).max(0.0);
    let savings_mem = (-d.total_delta_mem_mi).max(0.0);

    if cur.cluster_cpu_over > 0.0 {
        score += savings_cpu.min(cur.cluster_cpu_over) / cur.cluster_cpu_over;
    }
    if cur.cluster_mem_over > 0.0 {
        score += savings_mem.min(cur.cluster_mem_over) / cur.cluster_mem_over;
    }

    for (node, &count) in &d.placement {
        if let Some(&(cpu_over, mem_over)) = cur.node_over.get(node) {
            if cpu_over > 0.0 {
                let node_savings = ((-d.per_pod_delta_cpu_m) * count as f64).max(0.0);
                score += node_savings.min(cpu_over) / cpu_over.max(1.0);
            }
            if mem_over > 0.0 {
                let node_savings = ((-d.per_pod_delta_mem_mi) * count as f64).max(0.0);
                score += node_savings.min(mem_over) / mem_over.max(1.0);
            }
        }
    }

    score
}

fn plan_item(c: &Candidate, action: &'static str, reason: String) -> PlanItem {
    PlanItem {
        namespace: c.namespace.clone(),
        workload: c.workload.clone(),
        release: c.release.clone(),
        container: c.container.clone(),
        path: c.path,
        action,
        replicas: c.replicas,
        placement: c.placement.clone(),
        per_pod_delta_cpu_m: c.per_pod_delta_cpu_m,
        per_pod_delta_mem_mi: c.per_pod_delta_mem_mi,
        total_delta_cpu_m: c.total_delta_cpu_m,
        total_delta_mem_mi: c.total_delta_mem_mi,
        req_cpu_m: c.req_cpu_m,
        req_mem_mi: c.req_mem_mi,
        lim_cpu_m: c.lim_cpu_m,
        lim_mem_mi: c.lim_mem_mi,
        reason,
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub current_by_node: HashMap<String, (f64, f64)>,
    pub projected_by_node: HashMap<String, (f64, f64)>,
    pub current_cluster_cpu_m: f64,
    pub current_cluster_mem_mi: f64,
    pub projected_cluster_cpu_m: f64,
    pub projected_cluster_mem_mi: f64,
    pub selected: Vec<PlanItem>,
    pub skipped: Vec<SkippedItem>,
}

fn cluster_totals(by_node: &HashMap<String, (f64, f64)>) -> (f64, f64) {
    by_node.values().fold((0.0, 0.0), |(cpu, mem), &(c, m)| (cpu + c, mem + m))
}

/// The tradeoff selection loop: for each upsize in priority
/// order, try a direct fit, then a bounded greedy tradeoff search pairing it
/// with downsizes, else skip it. Fills any remaining slots with the largest
/// unselected downsizes.
pub fn select(
    upsizes: Vec<Candidate>,
    downsizes: Vec<Candidate>,
    mut pre_skipped: Vec<SkippedItem>,
    current_by_node: HashMap<String, (f64, f64)>,
    budgets: &Budgets,
    cfg: &PlannerConfig,
) -> Plan {
    let (current_cluster_cpu_m, current_cluster_mem_mi) = cluster_totals(&current_by_node);
    let mut by_node = current_by_node.clone();
    let mut selected: Vec<PlanItem> = Vec::new();
    let mut skipped: Vec<SkippedItem> = Vec::new();
    let mut downsize_used: HashSet<usize> = HashSet::new();
    let max_slots = cfg.max_apply_changes_per_run;

    for up in &upsizes {
        if selected.len() >= max_slots {
            skipped.push(SkippedItem {
                release: up.release.clone(),
                container: up.container.clone(),
                reason: "max_changes_reached".to_string(),
                cluster_cpu_over: None,
                cluster_mem_over: None,
                suggested_tradeoffs: vec![],
            });
            continue;
        }

        let mut trial = by_node.clone();
        apply_delta(&mut trial, up);
        let direct = fit(&trial, budgets);

        if direct.ok {
            by_node = trial;
            selected.push(plan_item(up, "upsize", "upsize_within_budget_and_node_fit".to_string()));
            continue;
        }

        // Bounded greedy tradeoff search: reserve one slot for the upsize
        // itself, spend the rest on downsizes that free the most headroom.
        let search_budget = max_slots - selected.len() - 1;
        let mut used_this_search: Vec<usize> = Vec::new();
        let mut ran_out_of_slots = false;
        let mut last_fit = direct.clone();

        loop {
            let cur = fit(&trial, budgets);
            if cur.ok {
                last_fit = cur;
                break;
            }
            if used_this_search.len() >= search_budget {
                ran_out_of_slots = true;
                last_fit = cur;
                break;
            }
            let best = downsizes
                .iter()
                .enumerate()
                .filter(|(j, _)| !downsize_used.contains(j) && !used_this_search.contains(j))
                .map(|(j, d)| (j, tradeoff_score(d, &cur)))
                .filter(|(_, score)| *score > 0.0)
                .fold(None, |acc: Option<(usize, f64)>, (j, score)| match acc {
                    Some((_, best_score)) if best_score >= score => acc,
                    _ => Some((j, score)),
                });
            match best {
                Some((j, _)) => {
                    apply_delta(&mut trial, &downsizes[j]);
                    used_this_search.push(j);
                }
                None => {
                    last_fit = cur;
                    break;
                }
            }
        }

        let final_fit = fit(&trial, budgets);
        if final_fit.ok {
            for &j in &used_this_search {
                downsize_used.insert(j);
                selected.push(plan_item(
                    &downsizes[j],
                    "downsize",
                    format!("tradeoff_downsize_to_enable_{}", up.release),
                ));
            }
            selected.push(plan_item(up, "upsize", "upsize_enabled_by_tradeoff_downsizes".to_string()));
            by_node = trial;
        } else if ran_out_of_slots {
            skipped.push(SkippedItem {
                release: up.release.clone(),
                container: up.container.clone(),
                reason: "max_changes_reached".to_string(),
                cluster_cpu_over: Some(last_fit.cluster_cpu_over),
                cluster_mem_over: Some(last_fit.cluster_mem_over),
                suggested_tradeoffs: vec![],
            });
        } else {
            let mut suggestions: Vec<(usize, f64)> = downsizes
                .iter()
                .enumerate()
                .filter(|(j, _)| !downsize_used.contains(j))
                .map(|(j, d)| (j, weighted_delta(d.total_delta_cpu_m, d.total_delta_mem_mi)))
                .collect();
            suggestions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let names: Vec<String> = suggestions
                .into_iter()
                .take(5)
                .map(|(j, _)| format!("{}/{}", downsizes[j].release, downsizes[j].container))
                .collect();
            skipped.push(SkippedItem {
                release: up.release.clone(),
                container: up.container.clone(),
                reason: "budget_or_node_fit_block".to_string(),
                cluster_cpu_over: Some(last_fit.cluster_cpu_over),
                cluster_mem_over: Some(last_fit.cluster_mem_over),
                suggested_tradeoffs: names,
            });
        }
    }

    // Fill remaining slots with the largest unselected downsizes.
    for (j, d) in downsizes.iter().enumerate() {
        if downsize_used.contains(&j) {
            continue;
        }
        if selected.len() >= max_slots {
            skipped.push(SkippedItem {
                release: d.release.clone(),
                container: d.container.clone(),
                reason: "max_changes_reached".to_string(),
                cluster_cpu_over: None,
                cluster_mem_over: None,
                suggested_tradeoffs: vec![],
            });
            continue;
        }
        apply_delta(&mut by_node, d);
        downsize_used.insert(j);
        selected.push(plan_item(d, "downsize", "downsize_with_mature_data".to_string()));
    }

    let (projected_cluster_cpu_m, projected_cluster_mem_mi) = cluster_totals(&by_node);

    skipped.append(&mut pre_skipped);

    Plan {
        current_by_node,
        projected_by_node: by_node,
        current_cluster_cpu_m,
        current_cluster_mem_mi,
        projected_cluster_cpu_m,
        projected_cluster_mem_mi,
        selected,
        skipped,
    }
}

/// Reason -> count histogram for the PR body / report.
pub fn skip_reason_histogram(skipped: &[SkippedItem]) -> HashMap<String, usize> {
    let mut out = HashMap::new();
    for s in skipped {
        *out.entry(s.reason.clone()).or_insert(0) += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, cpu: i64, mem: i64) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            allocatable_cpu_m: crate::quantity::CpuMillis(cpu),
            allocatable_mem_mi: crate::quantity::MemMebis(mem),
        }
    }

    fn planner_cfg() -> PlannerConfig {
        PlannerConfig {
            max_requests_percent_cpu: 60.0,
            max_requests_percent_memory: 65.0,
            max_apply_changes_per_run: 5,
            min_data_days_for_upsize: 14.0,
            min_data_days_for_downsize: 14.0,
            apply_allowlist: HashSet::new(),
        }
    }

    fn candidate(release: &str, node_name: &str, delta_cpu: f64, delta_mem: f64) -> Candidate {
        let mut placement = HashMap::new();
        placement.insert(node_name.to_string(), 1);
        Candidate {
            namespace: "default".into(),
            workload: "web".into(),
            release: release.into(),
            container: "app".into(),
            path: "charts/web/values.yaml",
            replicas: 1,
            placement,
            per_pod_delta_cpu_m: delta_cpu,
            per_pod_delta_mem_mi: delta_mem,
            total_delta_cpu_m: delta_cpu,
            total_delta_mem_mi: delta_mem,
            restart_guard: false,
            downscale_excluded: false,
            restarts: 0.0,
            req_cpu_m: 100,
            req_mem_mi: 100,
            lim_cpu_m: 200,
            lim_mem_mi: 200,
        }
    }

    #[test]
    fn fit_ok_within_budget() {
        let budgets = Budgets { cluster_cpu_m: 1000.0, cluster_mem_mi: 1000.0, node_cpu_m: HashMap::new(), node_mem_mi: HashMap::new() };
        let mut by_node = HashMap::new();
        by_node.insert("n1".to_string(), (500.0, 500.0));
        assert!(fit(&by_node, &budgets).ok);
    }

    #[test]
    fn fit_detects_cluster_overshoot() {
        let budgets = Budgets { cluster_cpu_m: 100.0, cluster_mem_mi: 1000.0, node_cpu_m: HashMap::new(), node_mem_mi: HashMap::new() };
        let mut by_node = HashMap::new();
        by_node.insert("n1".to_string(), (500.0, 500.0));
        let result = fit(&by_node, &budgets);
        assert!(!result.ok);
        assert!(result.cluster_cpu_over > 0.0);
    }

    #[test]
    fn plan_bound_never_exceeds_max_changes() {
        let mut cfg = planner_cfg();
        cfg.max_apply_changes_per_run = 2;
        let budgets = Budgets { cluster_cpu_m: 100000.0, cluster_mem_mi: 100000.0, node_cpu_m: HashMap::new(), node_mem_mi: HashMap::new() };
        let upsizes = vec![candidate("a", "n1", 10.0, 10.0), candidate("b", "n1", 10.0, 10.0), candidate("c", "n1", 10.0, 10.0)];
        let plan = select(upsizes, vec![], vec![], HashMap::new(), &budgets, &cfg);
        assert!(plan.selected.len() <= 2);
    }

    #[test]
    fn s5_tradeoff_enabled_upsize() {
        // Cluster CPU budget 600m; footprint 580m. Upsize A adds 40m
        // (overshoot 20m). Downsize B saves 30m on the same node.
        let cfg = planner_cfg();
        let budgets = Budgets {
            cluster_cpu_m: 600.0,
            cluster_mem_mi: 100000.0,
            node_cpu_m: [("n1".to_string(), 600.0)].into_iter().collect(),
            node_mem_mi: [("n1".to_string(), 100000.0)].into_iter().collect(),
        };
        let mut current = HashMap::new();
        current.insert("n1".to_string(), (580.0, 1000.0));

        let up = candidate("app-a", "n1", 40.0, 0.0);
        let down = candidate("app-b", "n1", -30.0, 0.0);

        let plan = select(vec![up], vec![down], vec![], current, &budgets, &cfg);
        assert_eq!(plan.selected.len(), 2);
        assert_eq!(plan.selected[0].reason, "tradeoff_downsize_to_enable_app-a");
        assert_eq!(plan.selected[1].reason, "upsize_enabled_by_tradeoff_downsizes");
    }

    #[test]
    fn s6_coverage_gate_blocks_upsize_but_not_restart_guarded() {
        use crate::recommender::{Action, ContainerTarget, Deltas, Note, Recommendation, UsageSample};
        use std::collections::BTreeSet;

        let mut cfg = planner_cfg();
        cfg.apply_allowlist.insert("grafana".to_string());

        let base_target = |release: &str| ContainerTarget {
            namespace: "default".into(),
            kind: crate::inventory::WorkloadKind::Deployment,
            workload: "web".into(),
            release: release.into(),
            container: "app".into(),
            replicas: 1,
            current: crate::inventory::ContainerCurrent {
                request_cpu_m: crate::quantity::CpuMillis(100),
                request_mem_mi: crate::quantity::MemMebis(100),
                limit_cpu_m: crate::quantity::CpuMillis(200),
                limit_mem_mi: crate::quantity::MemMebis(200),
            },
        };
        let deltas = Deltas {
            req_cpu_percent: 50.0,
            req_cpu_abs: 50.0,
            req_mem_percent: 0.0,
            req_mem_abs: 0.0,
            lim_cpu_percent: 0.0,
            lim_cpu_abs: 0.0,
            lim_mem_percent: 0.0,
            lim_mem_abs: 0.0,
        };

        // An upsize with no restart history is blocked by the coverage gate.
        let plain_upsize = Recommendation {
            target: base_target("grafana"),
            usage: UsageSample { cpu_p95_m: Some(120.0), mem_p95_mi: Some(80.0), restarts_in_window: Some(0.0) },
            rec_request_cpu_m: crate::quantity::CpuMillis(150),
            rec_request_mem_mi: crate::quantity::MemMebis(100),
            rec_limit_cpu_m: crate::quantity::CpuMillis(300),
            rec_limit_mem_mi: crate::quantity::MemMebis(200),
            action: Action::Upsize,
            notes: BTreeSet::new(),
            deltas,
            emit: true,
        };

        // A co-pending upsize that *is* restart-guarded bypasses the gate.
        let mut guarded_notes = BTreeSet::new();
        guarded_notes.insert(Note::RestartGuard);
        let guarded_upsize = Recommendation {
            target: base_target("grafana"),
            usage: UsageSample { cpu_p95_m: Some(120.0), mem_p95_mi: Some(80.0), restarts_in_window: Some(2.0) },
            rec_request_cpu_m: crate::quantity::CpuMillis(150),
            rec_request_mem_mi: crate::quantity::MemMebis(100),
            rec_limit_cpu_m: crate::quantity::CpuMillis(300),
            rec_limit_mem_mi: crate::quantity::MemMebis(200),
            action: Action::Upsize,
            notes: guarded_notes,
            deltas,
            emit: true,
        };

        let (upsizes, _, skipped) =
            filter_candidates(&[plain_upsize, guarded_upsize], &HashMap::new(), Some(7.0), &cfg);

        assert_eq!(upsizes.len(), 1, "only the restart-guarded upsize should be admitted");
        assert!(upsizes[0].restart_guard);
        assert!(skipped.iter().any(|s| s.reason == "insufficient_data_for_upsize"));
    }

    #[test]
    fn blocked_upsize_gets_suggestions_when_no_tradeoff_helps() {
        let cfg = planner_cfg();
        let budgets = Budgets {
            cluster_cpu_m: 600.0,
            cluster_mem_mi: 100000.0,
            node_cpu_m: [("n1".to_string(), 600.0)].into_iter().collect(),
            node_mem_mi: [("n1".to_string(), 100000.0)].into_iter().collect(),
        };
        let mut current = HashMap::new();
        current.insert("n1".to_string(), (580.0, 1000.0));

        let up = candidate("app-a", "n1", 40.0, 0.0);
        // Downsize on a different node can't help node n1/cluster overshoot here
        // because it has zero placement on n1 and the cluster axis isn't over
        // by much more than what a same-node downsize would cover; force a
        // definitely-unhelpful one with positive delta (not a downsize) filtered out instead.
        let plan = select(vec![up], vec![], vec![], current, &budgets, &cfg);
        assert_eq!(plan.selected.len(), 0);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, "budget_or_node_fit_block");
    }
}
