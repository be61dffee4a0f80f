//! Change publisher: turns a selected [`crate::planner::Plan`]
//! into a branch, a set of patched manifest files, and a pull request.

pub mod blob;
pub mod github;
pub mod mapping;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::config::PublishConfig;
use crate::errors::AdvisorError;
use crate::manifest::{patch_container_resources, PatchReason};
use crate::planner::{Plan, PlanItem};
use crate::quantity::{CpuMillis, MemMebis};
use github::GitHubPublisher;

fn verb_for(delta: f64) -> Option<&'static str> {
    if delta > 0.0 {
        Some("Increase")
    } else if delta < 0.0 {
        Some("Decrease")
    } else {
        None
    }
}

/// "Increase CPU and memory" / "Decrease memory" / "Increase CPU".
fn action_description(item: &PlanItem) -> String {
    let cpu = verb_for(item.per_pod_delta_cpu_m);
    let mem = verb_for(item.per_pod_delta_mem_mi);
    match (cpu, mem) {
        (Some(c), Some(m)) if c == m => format!("{} CPU and memory", c),
        (Some(c), Some(m)) => format!("{} CPU, {} memory", c, m),
        (Some(c), None) => format!("{} CPU", c),
        (None, Some(m)) => format!("{} memory", m),
        (None, None) => "adjust resources".to_string(),
    }
}

fn slugify(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// `<prefix>/<release>-<action-slug>-<timestamp>`, truncated to 120 chars.
pub fn branch_name(prefix: &str, release: &str, action: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%dT%H%M%S%.6fZ");
    let full = format!("{}/{}-{}-{}", prefix, release, slugify(action), stamp);
    full.chars().take(120).collect()
}

pub fn pr_title(selected: &[PlanItem]) -> String {
    let Some(first) = selected.first() else {
        return "tune: resource request/limit adjustments".to_string();
    };
    let base = format!("tune/{}: {}", first.release, action_description(first));
    if selected.len() > 1 {
        format!("{} (+{} more)", base, selected.len() - 1)
    } else {
        base
    }
}

fn fmt_delta(cpu_m: f64, mem_mi: f64) -> String {
    format!(
        "{}{} cpu, {}{} mem",
        if cpu_m >= 0.0 { "+" } else { "" },
        CpuMillis::from_f64(cpu_m).format(),
        if mem_mi >= 0.0 { "+" } else { "" },
        MemMebis::from_f64(mem_mi).format(),
    )
}

pub fn pr_body(plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str("## Selected changes\n\n");
    out.push_str("| Release | Container | Action | Per-pod delta | Reason |\n");
    out.push_str("|---|---|---|---|---|\n");
    for item in plan.selected.iter().take(20) {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            item.release,
            item.container,
            item.action,
            fmt_delta(item.per_pod_delta_cpu_m, item.per_pod_delta_mem_mi),
            item.reason,
        ));
    }
    if plan.selected.len() > 20 {
        out.push_str(&format!("\n_(+{} more not shown)_\n", plan.selected.len() - 20));
    }

    out.push_str("\n## Cluster footprint\n\n");
    out.push_str(&format!(
        "- CPU: {} -> {}\n",
        CpuMillis::from_f64(plan.current_cluster_cpu_m).format(),
        CpuMillis::from_f64(plan.projected_cluster_cpu_m).format(),
    ));
    out.push_str(&format!(
        "- Memory: {} -> {}\n",
        MemMebis::from_f64(plan.current_cluster_mem_mi).format(),
        MemMebis::from_f64(plan.projected_cluster_mem_mi).format(),
    ));

    let histogram = crate::planner::skip_reason_histogram(&plan.skipped);
    if !histogram.is_empty() {
        out.push_str("\n## Skipped\n\n");
        out.push_str("| Reason | Count |\n|---|---|\n");
        let mut entries: Vec<_> = histogram.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (reason, count) in entries {
            out.push_str(&format!("| {} | {} |\n", reason, count));
        }
    }

    let blocked: Vec<_> = plan
        .skipped
        .iter()
        .filter(|s| s.reason == "budget_or_node_fit_block" && !s.suggested_tradeoffs.is_empty())
        .collect();
    if !blocked.is_empty() {
        out.push_str("\n## Blocked upsizes with possible tradeoffs\n\n");
        for item in blocked {
            out.push_str(&format!(
                "- `{}/{}`: consider downsizing {}\n",
                item.release,
                item.container,
                item.suggested_tradeoffs.join(", "),
            ));
        }
    }

    out
}

/// Groups selected plan items by manifest path, patches each file in turn,
/// and opens or updates the pull request. Returns the PR number, or `None`
/// when there was nothing to apply.
pub async fn publish_plan(gh: &GitHubPublisher, cfg: &PublishConfig, plan: &Plan, now: DateTime<Utc>) -> Result<Option<u64>> {
    if plan.selected.is_empty() {
        return Ok(None);
    }

    let lead = &plan.selected[0];
    let head = branch_name(&cfg.github_apply_head_branch, &lead.release, &action_description(lead), now);
    gh.ensure_branch(&cfg.github_base_branch, &head).await.context("ensuring apply branch")?;

    let mut by_path: HashMap<&'static str, Vec<&PlanItem>> = HashMap::new();
    for item in &plan.selected {
        by_path.entry(item.path).or_default().push(item);
    }

    for (path, items) in &by_path {
        let Some((mut content, _)) = gh.read_file(&head, path).await.context("reading manifest file")? else {
            continue;
        };
        let mut any_change = false;
        for item in items {
            let req_cpu = CpuMillis::from_f64(item.req_cpu_m as f64).format();
            let req_mem = MemMebis::from_f64(item.req_mem_mi as f64).format();
            let lim_cpu = CpuMillis::from_f64(item.lim_cpu_m as f64).format();
            let lim_mem = MemMebis::from_f64(item.lim_mem_mi as f64).format();
            let (new_content, changed, reason) =
                patch_container_resources(&content, &item.container, &req_cpu, &req_mem, &lim_cpu, &lim_mem);
            if let PatchReason::NotFound(key) = reason {
                log::warn!("{}", AdvisorError::PreconditionNotFound { key });
            }
            content = new_content;
            any_change |= changed;
        }
        if any_change {
            let message = format!("tune({}): adjust resource requests/limits", items[0].release);
            gh.update_file(&head, path, &content, &message).await.context("writing patched manifest")?;
        }
    }

    let title = pr_title(&plan.selected);
    let body = pr_body(plan);
    let number = gh.ensure_pull_request(&head, &cfg.github_base_branch, &title, &body).await.context("ensuring pull request")?;
    Ok(Some(number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(release: &str, action: &'static str, delta_cpu: f64, delta_mem: f64) -> PlanItem {
        PlanItem {
            namespace: "default".into(),
            workload: "web".into(),
            release: release.into(),
            container: "app".into(),
            path: "charts/web/values.yaml",
            action,
            replicas: 1,
            placement: HashMap::new(),
            per_pod_delta_cpu_m: delta_cpu,
            per_pod_delta_mem_mi: delta_mem,
            total_delta_cpu_m: delta_cpu,
            total_delta_mem_mi: delta_mem,
            req_cpu_m: 125,
            req_mem_mi: 320,
            lim_cpu_m: 250,
            lim_mem_mi: 480,
            reason: "upsize_within_budget_and_node_fit".into(),
        }
    }

    #[test]
    fn action_description_combines_axes() {
        let up_both = item("app", "upsize", 10.0, 10.0);
        assert_eq!(action_description(&up_both), "Increase CPU and memory");

        let mixed = item("app", "upsize", 10.0, -10.0);
        assert_eq!(action_description(&mixed), "Increase CPU, Decrease memory");

        let mem_only = item("app", "downsize", 0.0, -10.0);
        assert_eq!(action_description(&mem_only), "Decrease memory");
    }

    #[test]
    fn branch_name_is_bounded_and_slugged() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let name = branch_name("resource-advisor/apply", "grafana", "Increase CPU and memory", now);
        assert!(name.starts_with("resource-advisor/apply/grafana-increase-cpu-and-memory-20260728"));
        assert!(name.len() <= 120);
    }

    #[test]
    fn pr_title_counts_extra_items() {
        let items = vec![item("grafana", "upsize", 10.0, 0.0), item("sonarr", "downsize", 0.0, -10.0)];
        let title = pr_title(&items);
        assert!(title.starts_with("tune/grafana:"));
        assert!(title.ends_with("(+1 more)"));
    }

    #[test]
    fn pr_title_empty_selection() {
        assert_eq!(pr_title(&[]), "tune: resource request/limit adjustments");
    }
}
