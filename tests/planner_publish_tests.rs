use std::collections::{BTreeSet, HashMap, HashSet};

use resource_advisor::config::PlannerConfig;
use resource_advisor::inventory::{ContainerCurrent, NodeInfo, PodInfo, WorkloadKind};
use resource_advisor::manifest::patch_container_resources;
use resource_advisor::planner::{filter_candidates, select, Budgets};
use resource_advisor::publish::{branch_name, pr_body, pr_title};
use resource_advisor::quantity::{CpuMillis, MemMebis};
use resource_advisor::recommender::{Action, ContainerTarget, Deltas, Recommendation, UsageSample};

fn planner_cfg() -> PlannerConfig {
    let mut allowlist = HashSet::new();
    allowlist.insert("grafana".to_string());
    PlannerConfig {
        max_requests_percent_cpu: 60.0,
        max_requests_percent_memory: 65.0,
        max_apply_changes_per_run: 5,
        min_data_days_for_upsize: 14.0,
        min_data_days_for_downsize: 14.0,
        apply_allowlist: allowlist,
    }
}

fn grafana_upsize_recommendation() -> Recommendation {
    Recommendation {
        target: ContainerTarget {
            namespace: "monitoring".into(),
            kind: WorkloadKind::Deployment,
            workload: "grafana".into(),
            release: "grafana".into(),
            container: "app".into(),
            replicas: 1,
            current: ContainerCurrent {
                request_cpu_m: CpuMillis(100),
                request_mem_mi: MemMebis(256),
                limit_cpu_m: CpuMillis(200),
                limit_mem_mi: MemMebis(512),
            },
        },
        usage: UsageSample { cpu_p95_m: Some(300.0), mem_p95_mi: Some(400.0), restarts_in_window: Some(0.0) },
        rec_request_cpu_m: CpuMillis(125),
        rec_request_mem_mi: MemMebis(320),
        rec_limit_cpu_m: CpuMillis(250),
        rec_limit_mem_mi: MemMebis(480),
        action: Action::Upsize,
        notes: BTreeSet::new(),
        deltas: Deltas {
            req_cpu_percent: 25.0,
            req_cpu_abs: 25.0,
            req_mem_percent: 25.0,
            req_mem_abs: 64.0,
            lim_cpu_percent: 25.0,
            lim_cpu_abs: 50.0,
            lim_mem_percent: -6.25,
            lim_mem_abs: -32.0,
        },
        emit: true,
    }
}

fn pod(node: &str) -> PodInfo {
    PodInfo {
        namespace: "monitoring".into(),
        name: "grafana-abc".into(),
        phase: "Running".into(),
        node_name: Some(node.to_string()),
        instance_label: Some("grafana".into()),
        container_requests: vec![("app".into(), CpuMillis(100), MemMebis(256))],
        init_container_requests: vec![],
    }
}

/// Candidate filtering and selection, then the resulting [`PlanItem`] driven
/// through the manifest patcher twice to confirm idempotence end to end.
#[test]
fn apply_pr_pipeline_is_idempotent_against_the_manifest() {
    let nodes = vec![NodeInfo { name: "n1".into(), allocatable_cpu_m: CpuMillis(10_000), allocatable_mem_mi: MemMebis(20_000) }];
    let pods = vec![pod("n1")];
    let placement = resource_advisor::inventory::placement_index(&pods);
    let current_by_node = resource_advisor::inventory::node_request_footprint(&pods);
    let cfg = planner_cfg();
    let budgets = Budgets::compute(&nodes, &cfg);

    let recs = vec![grafana_upsize_recommendation()];
    let (upsizes, downsizes, pre_skipped) = filter_candidates(&recs, &placement, Some(20.0), &cfg);
    assert_eq!(upsizes.len(), 1);
    assert!(downsizes.is_empty());

    let plan = select(upsizes, downsizes, pre_skipped, current_by_node, &budgets, &cfg);
    assert_eq!(plan.selected.len(), 1);
    let item = &plan.selected[0];
    assert_eq!(item.release, "grafana");
    assert_eq!(item.path, "clusters/prod/apps/grafana/values.yaml");

    let title = pr_title(&plan.selected);
    assert!(title.starts_with("tune/grafana:"));
    let body = pr_body(&plan);
    assert!(body.contains("grafana"));
    let branch = branch_name("resource-advisor/apply", &item.release, item.action, chrono::Utc::now());
    assert!(branch.starts_with("resource-advisor/apply/grafana-"));

    let manifest = r#"values:
  controllers:
    main:
      containers:
        app:
          image: registry/grafana:1.0.0
          resources:
            requests:
              cpu: "100m"
              memory: "256Mi"
            limits:
              cpu: "200m"
              memory: "512Mi"
"#;

    let req_cpu = CpuMillis(item.req_cpu_m).format();
    let req_mem = MemMebis(item.req_mem_mi).format();
    let lim_cpu = CpuMillis(item.lim_cpu_m).format();
    let lim_mem = MemMebis(item.lim_mem_mi).format();

    let (patched_once, changed1, _) = patch_container_resources(manifest, &item.container, &req_cpu, &req_mem, &lim_cpu, &lim_mem);
    assert!(changed1);
    assert!(patched_once.contains("cpu: \"125m\""));

    let (patched_twice, changed2, _) = patch_container_resources(&patched_once, &item.container, &req_cpu, &req_mem, &lim_cpu, &lim_mem);
    assert!(!changed2);
    assert_eq!(patched_once, patched_twice);
}

#[test]
fn not_allowlisted_release_is_skipped_before_selection() {
    let mut rec = grafana_upsize_recommendation();
    rec.target.release = "unlisted-app".into();
    let cfg = planner_cfg();
    let (upsizes, downsizes, skipped) = filter_candidates(&[rec], &HashMap::new(), Some(20.0), &cfg);
    assert!(upsizes.is_empty());
    assert!(downsizes.is_empty());
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].reason, "not_allowlisted");
}
