//! Markdown and HTML rendering of a [`Report`], built the same way as the
//! rest of the crate's text output: direct line accumulation rather than a
//! templating engine.

use anyhow::Result;
use comrak::{markdown_to_html, ComrakOptions};

use super::{BudgetPercent, ClusterBudgetSnapshot, Report, RecommendationRow};

fn fmt_opt_percent(p: Option<f64>) -> String {
    match p {
        Some(v) => format!("{:.1}%", v),
        None => "n/a".to_string(),
    }
}

fn render_budget_table(budget: &ClusterBudgetSnapshot) -> String {
    let mut out = String::new();
    out.push_str("| Resource | Allocatable | Current | Current % | Recommended | Recommended % |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    out.push_str(&format!(
        "| CPU | {}m | {}m | {} | {}m | {} |\n",
        budget.allocatable_cpu_m,
        budget.current_request_cpu_m,
        fmt_opt_percent(budget.cpu_percent.current),
        budget.recommended_request_cpu_m,
        fmt_opt_percent(budget.cpu_percent.recommended),
    ));
    out.push_str(&format!(
        "| Memory | {}Mi | {}Mi | {} | {}Mi | {} |\n",
        budget.allocatable_mem_mi,
        budget.current_request_mem_mi,
        fmt_opt_percent(budget.mem_percent.current),
        budget.recommended_request_mem_mi,
        fmt_opt_percent(budget.mem_percent.recommended),
    ));
    out
}

fn row_line(r: &RecommendationRow) -> String {
    format!(
        "| {ns} | {kind} | {wl} | {rel} | {c} | {rep} | {cur_req_cpu}m/{cur_req_mem}Mi | {rec_req_cpu}m/{rec_req_mem}Mi | {action} | {notes} |\n",
        ns = r.namespace,
        kind = r.kind,
        wl = r.workload,
        rel = r.release,
        c = r.container,
        rep = r.replicas,
        cur_req_cpu = r.current_request_cpu_m,
        cur_req_mem = r.current_request_mem_mi,
        rec_req_cpu = r.rec_request_cpu_m,
        rec_req_mem = r.rec_request_mem_mi,
        action = r.action,
        notes = if r.notes.is_empty() { "-".to_string() } else { r.notes.join(", ") },
    )
}

/// Builds the full markdown report: header, cluster budget snapshot, an
/// optional data-maturity caution, and the recommendations table.
pub fn render_markdown(report: &Report) -> String {
    let mut out = String::new();

    out.push_str("# Resource Advisor Report\n\n");
    out.push_str(&format!("**Report ID**: `{}`\n\n", report.id));
    out.push_str(&format!(
        "**Generated At**: {}\n\n",
        report.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    out.push_str(&format!("**Mode**: {}\n\n", report.mode));

    if let Some(days) = report.coverage_days {
        out.push_str(&format!("**Telemetry Coverage**: {:.1} days\n\n", days));
        if days < 14.0 {
            out.push_str(
                "> ⚠️ **Data maturity caution**: telemetry coverage is under 14 days; \
                 recommendations in this report may be based on an incomplete usage picture.\n\n",
            );
        }
    } else {
        out.push_str("**Telemetry Coverage**: unknown\n\n");
    }

    out.push_str("## Cluster Budget Snapshot\n\n");
    out.push_str(&render_budget_table(&report.budget));
    out.push('\n');

    out.push_str("## Recommendations\n\n");
    if report.recommendations.is_empty() {
        out.push_str("No recommendations cleared the deadband this run.\n\n");
    } else {
        out.push_str("| Namespace | Kind | Workload | Release | Container | Replicas | Current Req | Recommended Req | Action | Notes |\n");
        out.push_str("|---|---|---|---|---|---|---|---|---|---|\n");
        for row in &report.recommendations {
            out.push_str(&row_line(row));
        }
        out.push('\n');
    }

    out
}

/// Wraps rendered markdown in a standalone HTML document, with a
/// client-side script that renders `generated_at_iso` in the viewer's local
/// time zone. Used both for a single [`Report`] (`render_html`) and by the
/// exporter, which only has the last-published markdown string.
pub fn wrap_html(body_md: &str, generated_at_iso: &str) -> String {
    let mut opts = ComrakOptions::default();
    opts.extension.table = true;
    let body = markdown_to_html(body_md, &opts);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<title>Resource Advisor Report</title>
<style>
body {{
  max-width: 60em;
  margin: auto;
  font-family: system-ui, -apple-system, sans-serif;
  padding: 1em;
}}
table {{
  width: 100%;
  border-collapse: collapse;
  margin: 1em 0;
}}
th, td {{
  padding: 0.25em 0.5em;
  text-align: left;
  border-bottom: 1px solid #ddd;
}}
th {{
  background: #f5f5f5;
}}
#last-run-local {{
  color: #555;
  font-style: italic;
}}
</style>
</head>
<body>
<p id="last-run-local"></p>
{body}
<script>
(function() {{
  var el = document.getElementById("last-run-local");
  var iso = "{generated_at}";
  var d = new Date(iso);
  if (!isNaN(d.getTime())) {{
    el.textContent = "Last run (local time): " + d.toLocaleString();
  }}
}})();
</script>
</body>
</html>"#,
        body = body,
        generated_at = generated_at_iso,
    )
}

/// Converts a single [`Report`]'s markdown rendering to a standalone HTML
/// document.
pub fn render_html(report: &Report) -> Result<String> {
    let md = render_markdown(report);
    Ok(wrap_html(&md, &report.generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ClusterBudgetSnapshot;
    use chrono::Utc;

    fn sample_report() -> Report {
        Report {
            id: "abc".into(),
            generated_at: Utc::now(),
            mode: "report".into(),
            recommendations: vec![],
            budget: ClusterBudgetSnapshot {
                allocatable_cpu_m: 10000,
                allocatable_mem_mi: 20000,
                current_request_cpu_m: 5000,
                current_request_mem_mi: 8000,
                recommended_request_cpu_m: 5200,
                recommended_request_mem_mi: 8300,
                cpu_percent: BudgetPercent { current: Some(50.0), recommended: Some(52.0) },
                mem_percent: BudgetPercent { current: Some(40.0), recommended: Some(41.5) },
            },
            coverage_days: Some(7.0),
        }
    }

    #[test]
    fn markdown_includes_maturity_caution_below_14_days() {
        let md = render_markdown(&sample_report());
        assert!(md.contains("data maturity") || md.contains("Data maturity"));
    }

    #[test]
    fn markdown_omits_caution_at_or_above_14_days() {
        let mut r = sample_report();
        r.coverage_days = Some(14.0);
        let md = render_markdown(&r);
        assert!(!md.to_lowercase().contains("data maturity caution"));
    }

    #[test]
    fn markdown_renders_na_for_zero_allocatable() {
        let mut r = sample_report();
        r.budget.cpu_percent = BudgetPercent { current: None, recommended: None };
        let md = render_markdown(&r);
        assert!(md.contains("n/a"));
    }

    #[test]
    fn html_embeds_generated_at_for_local_time_script() {
        let html = render_html(&sample_report()).unwrap();
        assert!(html.contains("toLocaleString"));
        assert!(html.contains(&sample_report().generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
    }
}
