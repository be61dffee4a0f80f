//! Cluster inventory client: wraps `kube::Client` and turns the raw API
//! objects into the plain records the rest of the crate works with.

use anyhow::Result;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{Api, Client};

use crate::errors::AdvisorError;
use crate::quantity::{CpuMillis, MemMebis};

use super::{ContainerCurrent, NodeInfo, PodInfo, TemplateContainer, WorkloadKind, WorkloadTemplate};

/// Parses a CPU quantity, logging and defaulting to zero if it's present but
/// malformed. A missing quantity (`None`) is a legitimate absence, not
/// logged.
fn parse_cpu(q: Option<&Quantity>, what: &str) -> CpuMillis {
    match q {
        None => CpuMillis::ZERO,
        Some(q) => CpuMillis::parse(&q.0).unwrap_or_else(|| {
            log::warn!("{}", AdvisorError::Parse { what: what.to_string(), detail: q.0.clone() });
            CpuMillis::ZERO
        }),
    }
}

/// Same as [`parse_cpu`] for memory quantities.
fn parse_mem(q: Option<&Quantity>, what: &str) -> MemMebis {
    match q {
        None => MemMebis::ZERO,
        Some(q) => MemMebis::parse(&q.0).unwrap_or_else(|| {
            log::warn!("{}", AdvisorError::Parse { what: what.to_string(), detail: q.0.clone() });
            MemMebis::ZERO
        }),
    }
}

#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub async fn new() -> Result<Self> {
        let config = kube::Config::infer().await?;
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    /// The underlying `kube::Client`, for components (the blob store) that
    /// need their own typed `Api<T>` accessor this client doesn't expose.
    pub fn raw_client(&self) -> Client {
        self.client.clone()
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn statefulsets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods_all(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Deployments and StatefulSets in one namespace, normalized to
    /// [`WorkloadTemplate`].
    pub async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadTemplate>> {
        let mut out = Vec::new();

        for dep in self.deployments(namespace).list(&Default::default()).await?.items {
            let name = dep.metadata.name.clone().unwrap_or_default();
            let replicas = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1).max(0) as u32;
            let release = release_label(dep.metadata.labels.as_ref(), &name);
            let containers = dep
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|ps| containers_from_spec(ps))
                .unwrap_or_default();
            out.push(WorkloadTemplate {
                namespace: namespace.to_string(),
                kind: WorkloadKind::Deployment,
                name,
                release,
                replicas,
                containers,
            });
        }

        for sts in self.statefulsets(namespace).list(&Default::default()).await?.items {
            let name = sts.metadata.name.clone().unwrap_or_default();
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1).max(0) as u32;
            let release = release_label(sts.metadata.labels.as_ref(), &name);
            let containers = sts
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|ps| containers_from_spec(ps))
                .unwrap_or_default();
            out.push(WorkloadTemplate {
                namespace: namespace.to_string(),
                kind: WorkloadKind::StatefulSet,
                name,
                release,
                replicas,
                containers,
            });
        }

        Ok(out)
    }

    /// All nodes, with allocatable CPU/memory parsed into the crate's
    /// quantity types.
    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut out = Vec::new();
        for node in self.nodes().list(&Default::default()).await?.items {
            let name = node.metadata.name.clone().unwrap_or_default();
            let allocatable = node.status.as_ref().and_then(|s| s.allocatable.as_ref());
            let cpu = parse_cpu(allocatable.and_then(|a| a.get("cpu")), &format!("node {name} allocatable cpu"));
            let mem = parse_mem(allocatable.and_then(|a| a.get("memory")), &format!("node {name} allocatable memory"));
            out.push(NodeInfo { name, allocatable_cpu_m: cpu, allocatable_mem_mi: mem });
        }
        Ok(out)
    }

    /// All pods cluster-wide, normalized to [`PodInfo`]. Listed once per
    /// planning run.
    pub async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        let mut out = Vec::new();
        for pod in self.pods_all().list(&Default::default()).await?.items {
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            let instance_label = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("app.kubernetes.io/instance"))
                .cloned();
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());

            let container_requests = pod
                .spec
                .as_ref()
                .map(|s| requests_from_containers(&s.containers))
                .unwrap_or_default();
            let init_container_requests = pod
                .spec
                .as_ref()
                .and_then(|s| s.init_containers.as_ref())
                .map(|cs| requests_from_containers(cs))
                .unwrap_or_default();

            out.push(PodInfo {
                namespace,
                name,
                phase,
                node_name,
                instance_label,
                container_requests,
                init_container_requests,
            });
        }
        Ok(out)
    }
}

fn release_label(labels: Option<&std::collections::BTreeMap<String, String>>, fallback: &str) -> String {
    labels
        .and_then(|l| l.get("app.kubernetes.io/instance"))
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

fn containers_from_spec(spec: &k8s_openapi::api::core::v1::PodSpec) -> Vec<TemplateContainer> {
    spec.containers
        .iter()
        .map(|c| {
            let resources = c.resources.as_ref();
            let requests = resources.and_then(|r| r.requests.as_ref());
            let limits = resources.and_then(|r| r.limits.as_ref());
            TemplateContainer {
                name: c.name.clone(),
                current: ContainerCurrent {
                    request_cpu_m: parse_cpu(
                        requests.and_then(|q| q.get("cpu")),
                        &format!("container {} request cpu", c.name),
                    ),
                    request_mem_mi: parse_mem(
                        requests.and_then(|q| q.get("memory")),
                        &format!("container {} request memory", c.name),
                    ),
                    limit_cpu_m: parse_cpu(
                        limits.and_then(|q| q.get("cpu")),
                        &format!("container {} limit cpu", c.name),
                    ),
                    limit_mem_mi: parse_mem(
                        limits.and_then(|q| q.get("memory")),
                        &format!("container {} limit memory", c.name),
                    ),
                },
            }
        })
        .collect()
}

fn requests_from_containers(containers: &[k8s_openapi::api::core::v1::Container]) -> Vec<(String, CpuMillis, MemMebis)> {
    containers
        .iter()
        .map(|c| {
            let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
            let cpu = parse_cpu(requests.and_then(|q| q.get("cpu")), &format!("pod container {} request cpu", c.name));
            let mem =
                parse_mem(requests.and_then(|q| q.get("memory")), &format!("pod container {} request memory", c.name));
            (c.name.clone(), cpu, mem)
        })
        .collect()
}
