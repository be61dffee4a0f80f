//! Inventory gateway: workloads, nodes, pods, and the
//! derivations the recommender and apply planner need from them.

pub mod client;

use std::collections::HashMap;

use crate::quantity::{CpuMillis, MemMebis};

pub use client::K8sClient;

/// Workload kinds differ only in the pod-name regex, modeled as a small
/// tagged enum with a `pod_regex` fn rather than a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn api_plural(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployments",
            WorkloadKind::StatefulSet => "statefulsets",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }

    /// Pod-name regex for this workload kind: ordinal suffix for
    /// StatefulSets, pod-template-hash suffix for everything else.
    pub fn pod_regex(&self, workload_name: &str) -> String {
        let escaped = regex::escape(workload_name);
        match self {
            WorkloadKind::StatefulSet => format!("{}-[0-9]+", escaped),
            WorkloadKind::Deployment => format!("{}-.+", escaped),
        }
    }
}

/// Current resources declared on one container of a workload template.
#[derive(Debug, Clone, Default)]
pub struct ContainerCurrent {
    pub request_cpu_m: CpuMillis,
    pub request_mem_mi: MemMebis,
    pub limit_cpu_m: CpuMillis,
    pub limit_mem_mi: MemMebis,
}

/// One container found in a workload's pod template.
#[derive(Debug, Clone)]
pub struct TemplateContainer {
    pub name: String,
    pub current: ContainerCurrent,
}

/// A deployment or statefulset, as enumerated from the cluster API.
#[derive(Debug, Clone)]
pub struct WorkloadTemplate {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
    /// Value of `app.kubernetes.io/instance`, falling back to the workload name.
    pub release: String,
    pub replicas: u32,
    pub containers: Vec<TemplateContainer>,
}

/// Allocatable capacity for one cluster node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub allocatable_cpu_m: CpuMillis,
    pub allocatable_mem_mi: MemMebis,
}

/// One pod's relevant fields for footprint and placement derivations.
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub node_name: Option<String>,
    pub instance_label: Option<String>,
    /// (container_name, request_cpu_m, request_mem_mi) for regular containers.
    pub container_requests: Vec<(String, CpuMillis, MemMebis)>,
    pub init_container_requests: Vec<(String, CpuMillis, MemMebis)>,
}

impl PodInfo {
    fn is_terminal(&self) -> bool {
        self.phase == "Succeeded" || self.phase == "Failed"
    }
}

/// `pod_effective_requests(pod)`: max(sum(container requests), max(initContainer requests)).
pub fn pod_effective_requests(pod: &PodInfo) -> (CpuMillis, MemMebis) {
    let sum_cpu: i64 = pod.container_requests.iter().map(|(_, c, _)| c.0).sum();
    let sum_mem: i64 = pod.container_requests.iter().map(|(_, _, m)| m.0).sum();
    let max_init_cpu = pod.init_container_requests.iter().map(|(_, c, _)| c.0).max().unwrap_or(0);
    let max_init_mem = pod.init_container_requests.iter().map(|(_, _, m)| m.0).max().unwrap_or(0);
    (
        CpuMillis(sum_cpu.max(max_init_cpu)),
        MemMebis(sum_mem.max(max_init_mem)),
    )
}

/// Sum over live (non-terminal, scheduled) pods of effective requests, per node.
pub fn node_request_footprint(pods: &[PodInfo]) -> HashMap<String, (f64, f64)> {
    let mut out: HashMap<String, (f64, f64)> = HashMap::new();
    for pod in pods {
        if pod.is_terminal() {
            continue;
        }
        let Some(node) = &pod.node_name else { continue };
        let (cpu, mem) = pod_effective_requests(pod);
        let entry = out.entry(node.clone()).or_insert((0.0, 0.0));
        entry.0 += cpu.as_f64();
        entry.1 += mem.as_f64();
    }
    out
}

/// `(release, container) -> {node -> pod count}` over scheduled live pods
/// whose `app.kubernetes.io/instance` label is non-empty.
pub fn placement_index(pods: &[PodInfo]) -> HashMap<(String, String), HashMap<String, u32>> {
    let mut out: HashMap<(String, String), HashMap<String, u32>> = HashMap::new();
    for pod in pods {
        if pod.is_terminal() {
            continue;
        }
        let Some(node) = &pod.node_name else { continue };
        let Some(release) = pod.instance_label.as_ref().filter(|r| !r.is_empty()) else {
            continue;
        };
        for (container_name, _, _) in &pod.container_requests {
            let key = (release.clone(), container_name.clone());
            *out.entry(key).or_default().entry(node.clone()).or_insert(0) += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(phase: &str, node: Option<&str>, release: Option<&str>) -> PodInfo {
        PodInfo {
            namespace: "default".into(),
            name: "p".into(),
            phase: phase.into(),
            node_name: node.map(|s| s.to_string()),
            instance_label: release.map(|s| s.to_string()),
            container_requests: vec![("main".into(), CpuMillis(100), MemMebis(256))],
            init_container_requests: vec![],
        }
    }

    #[test]
    fn effective_requests_prefers_sum_over_init_max() {
        let p = pod("Running", Some("n1"), Some("r1"));
        let (cpu, mem) = pod_effective_requests(&p);
        assert_eq!(cpu.0, 100);
        assert_eq!(mem.0, 256);
    }

    #[test]
    fn effective_requests_uses_init_max_when_larger() {
        let mut p = pod("Running", Some("n1"), Some("r1"));
        p.init_container_requests.push(("init".into(), CpuMillis(500), MemMebis(1024)));
        let (cpu, mem) = pod_effective_requests(&p);
        assert_eq!(cpu.0, 500);
        assert_eq!(mem.0, 1024);
    }

    #[test]
    fn footprint_skips_terminal_and_unscheduled() {
        let pods = vec![
            pod("Running", Some("n1"), Some("r1")),
            pod("Succeeded", Some("n1"), Some("r1")),
            pod("Running", None, Some("r1")),
        ];
        let footprint = node_request_footprint(&pods);
        assert_eq!(footprint.len(), 1);
        assert_eq!(footprint["n1"], (100.0, 256.0));
    }

    #[test]
    fn placement_index_requires_instance_label() {
        let pods = vec![pod("Running", Some("n1"), None), pod("Running", Some("n1"), Some("r1"))];
        let idx = placement_index(&pods);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx[&("r1".to_string(), "main".to_string())]["n1"], 1);
    }

    #[test]
    fn pod_regex_matches_kind() {
        assert_eq!(WorkloadKind::StatefulSet.pod_regex("redis"), "redis-[0-9]+");
        assert_eq!(WorkloadKind::Deployment.pod_regex("web"), "web-.+");
        assert_eq!(WorkloadKind::StatefulSet.pod_regex("a.b"), "a\\.b-[0-9]+");
    }
}
