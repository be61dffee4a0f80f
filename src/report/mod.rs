//! Report assembler: cluster totals, budget snapshot, and the
//! sorted recommendation list, plus JSON/markdown rendering.

pub mod markdown;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::{NodeInfo, WorkloadKind};
use crate::quantity::{CpuMillis, MemMebis};
use crate::recommender::{Action, ContainerTarget, Deltas, Note, RecommendOutcome, Recommendation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRow {
    pub namespace: String,
    pub kind: String,
    pub workload: String,
    pub release: String,
    pub container: String,
    pub replicas: u32,
    pub current_request_cpu_m: i64,
    pub current_request_mem_mi: i64,
    pub current_limit_cpu_m: i64,
    pub current_limit_mem_mi: i64,
    pub rec_request_cpu_m: i64,
    pub rec_request_mem_mi: i64,
    pub rec_limit_cpu_m: i64,
    pub rec_limit_mem_mi: i64,
    pub action: String,
    pub notes: Vec<String>,
    pub cpu_p95_m: Option<f64>,
    pub mem_p95_mi: Option<f64>,
    pub restarts_in_window: Option<f64>,
    pub delta_req_cpu_percent: f64,
    pub delta_req_mem_percent: f64,
}

fn kind_str(kind: WorkloadKind) -> &'static str {
    kind.label()
}

fn action_str(action: Action) -> &'static str {
    match action {
        Action::Upsize => "upsize",
        Action::Downsize => "downsize",
        Action::NoChange => "no-change",
    }
}

fn note_str(note: Note) -> &'static str {
    match note {
        Note::RestartGuard => "restart_guard",
        Note::DownscaleExcluded => "downscale_excluded",
    }
}

impl RecommendationRow {
    pub fn from_recommendation(r: &Recommendation) -> Self {
        Self {
            namespace: r.target.namespace.clone(),
            kind: kind_str(r.target.kind).to_string(),
            workload: r.target.workload.clone(),
            release: r.target.release.clone(),
            container: r.target.container.clone(),
            replicas: r.target.replicas,
            current_request_cpu_m: r.target.current.request_cpu_m.0,
            current_request_mem_mi: r.target.current.request_mem_mi.0,
            current_limit_cpu_m: r.target.current.limit_cpu_m.0,
            current_limit_mem_mi: r.target.current.limit_mem_mi.0,
            rec_request_cpu_m: r.rec_request_cpu_m.0,
            rec_request_mem_mi: r.rec_request_mem_mi.0,
            rec_limit_cpu_m: r.rec_limit_cpu_m.0,
            rec_limit_mem_mi: r.rec_limit_mem_mi.0,
            action: action_str(r.action).to_string(),
            notes: r.notes.iter().copied().map(note_str).map(str::to_string).collect(),
            cpu_p95_m: r.usage.cpu_p95_m,
            mem_p95_mi: r.usage.mem_p95_mi,
            restarts_in_window: r.usage.restarts_in_window,
            delta_req_cpu_percent: r.deltas.req_cpu_percent,
            delta_req_mem_percent: r.deltas.req_mem_percent,
        }
    }
}

/// Percent-of-allocatable pair for one resource; `null` when allocatable is 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetPercent {
    pub current: Option<f64>,
    pub recommended: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterBudgetSnapshot {
    pub allocatable_cpu_m: i64,
    pub allocatable_mem_mi: i64,
    pub current_request_cpu_m: i64,
    pub current_request_mem_mi: i64,
    pub recommended_request_cpu_m: i64,
    pub recommended_request_mem_mi: i64,
    pub cpu_percent: BudgetPercent,
    pub mem_percent: BudgetPercent,
}

fn percent_of(value: f64, allocatable: f64) -> Option<f64> {
    if allocatable <= 0.0 {
        None
    } else {
        Some(value / allocatable * 100.0)
    }
}

impl ClusterBudgetSnapshot {
    pub fn compute(nodes: &[NodeInfo], current_cpu_m: f64, current_mem_mi: f64, rec_cpu_m: f64, rec_mem_mi: f64) -> Self {
        let allocatable_cpu: i64 = nodes.iter().map(|n| n.allocatable_cpu_m.0).sum();
        let allocatable_mem: i64 = nodes.iter().map(|n| n.allocatable_mem_mi.0).sum();
        Self {
            allocatable_cpu_m: allocatable_cpu,
            allocatable_mem_mi: allocatable_mem,
            current_request_cpu_m: CpuMillis::from_f64(current_cpu_m).0,
            current_request_mem_mi: MemMebis::from_f64(current_mem_mi).0,
            recommended_request_cpu_m: CpuMillis::from_f64(rec_cpu_m).0,
            recommended_request_mem_mi: MemMebis::from_f64(rec_mem_mi).0,
            cpu_percent: BudgetPercent {
                current: percent_of(current_cpu_m, allocatable_cpu as f64),
                recommended: percent_of(rec_cpu_m, allocatable_cpu as f64),
            },
            mem_percent: BudgetPercent {
                current: percent_of(current_mem_mi, allocatable_mem as f64),
                recommended: percent_of(rec_mem_mi, allocatable_mem as f64),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub recommendations: Vec<RecommendationRow>,
    pub budget: ClusterBudgetSnapshot,
    pub coverage_days: Option<f64>,
}

/// Running accumulation of cluster-wide current/recommended request totals
///, independent of whether a recommendation is emitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterTotals {
    pub current_cpu_m: f64,
    pub current_mem_mi: f64,
    pub recommended_cpu_m: f64,
    pub recommended_mem_mi: f64,
}

impl ClusterTotals {
    fn add_current(&mut self, target: &ContainerTarget) {
        let replicas = target.replicas as f64;
        self.current_cpu_m += target.current.request_cpu_m.as_f64() * replicas;
        self.current_mem_mi += target.current.request_mem_mi.as_f64() * replicas;
    }

    fn accumulate(&mut self, outcome: &RecommendOutcome) {
        match outcome {
            RecommendOutcome::NoMetrics { target } => {
                self.add_current(target);
                self.recommended_cpu_m += target.current.request_cpu_m.as_f64() * target.replicas as f64;
                self.recommended_mem_mi += target.current.request_mem_mi.as_f64() * target.replicas as f64;
            }
            RecommendOutcome::Computed(r) => {
                self.add_current(&r.target);
                let replicas = r.target.replicas as f64;
                self.recommended_cpu_m += r.rec_request_cpu_m.as_f64() * replicas;
                self.recommended_mem_mi += r.rec_request_mem_mi.as_f64() * replicas;
            }
        }
    }
}

/// Builds the Report from recommender outcomes and live node inventory.
/// `coverage_days` is the minimum observed across evaluated containers, or
/// `None` if no container produced a usable coverage estimate.
pub fn assemble(outcomes: Vec<RecommendOutcome>, nodes: &[NodeInfo], mode: &str, coverage_days: Option<f64>, now: DateTime<Utc>) -> (Report, Vec<Recommendation>) {
    let mut totals = ClusterTotals::default();
    let mut emitted = Vec::new();

    for outcome in &outcomes {
        totals.accumulate(outcome);
    }
    for outcome in outcomes {
        if let RecommendOutcome::Computed(r) = outcome {
            if r.emit {
                emitted.push(r);
            }
        }
    }

    crate::recommender::sort_recommendations(&mut emitted);

    let budget = ClusterBudgetSnapshot::compute(
        nodes,
        totals.current_cpu_m,
        totals.current_mem_mi,
        totals.recommended_cpu_m,
        totals.recommended_mem_mi,
    );

    let rows: Vec<RecommendationRow> = emitted.iter().map(RecommendationRow::from_recommendation).collect();

    let report = Report {
        id: Uuid::new_v4().to_string(),
        generated_at: now,
        mode: mode.to_string(),
        recommendations: rows,
        budget,
        coverage_days,
    };

    (report, emitted)
}

pub fn render_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub use markdown::{render_html, render_markdown};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_percent_is_none_when_allocatable_zero() {
        let snap = ClusterBudgetSnapshot::compute(&[], 100.0, 100.0, 100.0, 100.0);
        assert!(snap.cpu_percent.current.is_none());
        assert!(snap.mem_percent.recommended.is_none());
    }

    #[test]
    fn budget_percent_computed_when_allocatable_present() {
        let nodes = vec![NodeInfo { name: "n1".into(), allocatable_cpu_m: CpuMillis(1000), allocatable_mem_mi: MemMebis(2048) }];
        let snap = ClusterBudgetSnapshot::compute(&nodes, 500.0, 1024.0, 600.0, 1100.0);
        assert_eq!(snap.cpu_percent.current, Some(50.0));
        assert!((snap.mem_percent.recommended.unwrap() - (1100.0 / 2048.0 * 100.0)).abs() < 1e-6);
    }
}
