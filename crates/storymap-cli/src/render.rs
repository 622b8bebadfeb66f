//! Plain-text rendering for terminal output

use std::fmt::Write;

use storymap_core::{BuildReport, ExtractionDocument, PerformanceMetrics, TreeNode, TreeStats};

fn node_line(node: &TreeNode) -> String {
    match &node.label {
        Some(label) if *label != node.id => format!("{} - {}", node.id, label),
        _ => node.id.clone(),
    }
}

/// Outline of the tree, one top-level node per block
pub fn tree_text(root: &TreeNode) -> String {
    let mut lines = Vec::new();
    // (node, prefix, is_last); `None` marks a top-level node
    let mut stack: Vec<(&TreeNode, String, Option<bool>)> = root
        .children
        .iter()
        .rev()
        .map(|c| (c, String::new(), None))
        .collect();

    while let Some((node, prefix, last)) = stack.pop() {
        let (connector, child_prefix) = match last {
            None => ("", prefix.clone()),
            Some(true) => ("└── ", format!("{prefix}    ")),
            Some(false) => ("├── ", format!("{prefix}│   ")),
        };
        lines.push(format!("{prefix}{connector}{}", node_line(node)));

        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate().rev() {
            stack.push((child, child_prefix.clone(), Some(i + 1 == count)));
        }
    }

    lines.join("\n")
}

pub fn stats_text(stats: &TreeStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Nodes:       {}", stats.total_nodes);
    let _ = writeln!(out, "Top level:   {}", stats.top_level_nodes);
    let _ = writeln!(out, "Leaves:      {}", stats.leaf_nodes);
    let _ = writeln!(out, "Max depth:   {}", stats.max_depth);
    let levels: Vec<String> = stats
        .level_distribution
        .iter()
        .map(|(depth, count)| format!("{depth}:{count}"))
        .collect();
    let _ = write!(out, "Levels:      {}", levels.join(" "));
    out
}

pub fn report_text(report: &BuildReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Records:     {} total, {} accepted, {} rejected",
        report.total, report.accepted, report.rejected
    );
    for rejection in &report.rejections {
        let _ = writeln!(
            out,
            "  rejected #{} ({}): {}",
            rejection.index,
            rejection.id.as_deref().unwrap_or("-"),
            rejection.reason
        );
    }
    if !report.orphans.is_empty() {
        let _ = writeln!(out, "Orphans:     {}", report.orphans.join(", "));
    }
    for cycle in &report.cycles {
        let _ = writeln!(out, "Cycle:       {}", cycle.join(" -> "));
    }
    if let Some(fetch) = &report.fetch {
        let _ = writeln!(out, "Pages:       {} fetched", fetch.pages_fetched);
        for failure in &fetch.failed_pages {
            let _ = writeln!(out, "  page {} lost: {}", failure.page, failure.reason);
        }
    }
    out.trim_end().to_string()
}

pub fn metrics_text(metrics: &PerformanceMetrics) -> String {
    format!(
        "Requests:    {} ({} failed, {:.1}% success)\n\
         Attempts:    {}\n\
         Avg latency: {:.0} ms\n\
         Token:       {} refreshes, {}\n\
         Rate limit:  {} waits, {:.0}% of window used\n\
         Uptime:      {:.1} s",
        metrics.requests_total,
        metrics.requests_failed,
        metrics.success_rate * 100.0,
        metrics.attempts_total,
        metrics.avg_response_ms,
        metrics.auth_refreshes,
        if metrics.auth_token_valid { "valid" } else { "not held" },
        metrics.rate_limit_hits,
        metrics.rate_limit_utilization * 100.0,
        metrics.uptime_secs,
    )
}

pub fn extraction_text(document: &ExtractionDocument) -> String {
    let info = &document.extraction_info;
    let summary = &document.summary;
    format!(
        "Table:       {} ({})\n\
         Source:      {}\n\
         Extracted:   {}\n\
         Fields:      {}\n\
         Records:     {}",
        summary.table_name,
        document.table_info.obj_token,
        info.source_url,
        info.timestamp.to_rfc3339(),
        summary.total_fields,
        summary.total_records,
    )
}
