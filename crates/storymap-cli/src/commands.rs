//! Command handlers

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use storymap_core::{
    BitableClient, BuildReport, ClientConfig, ExtractionDocument, TableSource, TreeBuilder,
    TreeNode, TreeStats,
};

use crate::cli::{OutputArgs, OutputFormat};
use crate::render;

/// Deeper trees are exported as a flat `nodes` list instead of nested JSON
const MAX_NESTED_DEPTH: usize = 512;

/// Everything `tree` and `analyze` produce, as exported
#[derive(Debug, Serialize)]
struct TreeExport<'a> {
    stats: TreeStats,
    report: &'a BuildReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    tree: Option<&'a TreeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<Vec<NodeRow<'a>>>,
}

/// One node of a flat export, in pre-order
#[derive(Debug, Serialize)]
struct NodeRow<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    parent_id: Option<&'a str>,
    depth: usize,
    fields: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> TreeExport<'a> {
    fn new(root: &'a TreeNode, report: &'a BuildReport) -> Self {
        let stats = root.stats();
        if stats.max_depth <= MAX_NESTED_DEPTH {
            return Self {
                stats,
                report,
                tree: Some(root),
                nodes: None,
            };
        }

        warn!(
            depth = stats.max_depth,
            "Tree deeper than {MAX_NESTED_DEPTH}; exporting a flat node list"
        );
        let nodes = root
            .nodes()
            .map(|node| NodeRow {
                id: &node.id,
                label: node.label.as_deref(),
                parent_id: node.parent_id.as_deref(),
                depth: node.depth,
                fields: &node.fields,
            })
            .collect();
        Self {
            stats,
            report,
            tree: None,
            nodes: Some(nodes),
        }
    }
}

pub async fn extract(
    config: &ClientConfig,
    url: &str,
    output: Option<PathBuf>,
    show_metrics: bool,
) -> Result<()> {
    let source = TableSource::from_url(url)?;
    let client = BitableClient::new(config)?;

    let document = ExtractionDocument::extract(&client, &source, url)
        .await
        .with_context(|| format!("Extraction of {source} failed"))?;
    let path = output.unwrap_or_else(|| Path::new("temp").join(document.default_file_name()));
    document.save(&path)?;

    println!("{}", render::extraction_text(&document));
    println!("Saved:       {}", path.display());
    print_metrics(&client, show_metrics);
    Ok(())
}

pub async fn tree(
    config: &ClientConfig,
    url: &str,
    output: &OutputArgs,
    show_metrics: bool,
) -> Result<()> {
    let source = TableSource::from_url(url)?;
    let mapping = config.tree.field_mapping()?;
    let client = BitableClient::new(config)?;

    let (root, report) = client
        .fetch_tree(&source, &mapping)
        .await
        .with_context(|| format!("Could not build a tree from {source}"))?;

    emit(&root, &report, output)?;
    print_metrics(&client, show_metrics);
    Ok(())
}

pub fn analyze(config: &ClientConfig, file: &Path, output: &OutputArgs) -> Result<()> {
    let document = ExtractionDocument::load(file)?;
    let mapping = config.tree.field_mapping()?;
    info!(
        records = document.table_records.len(),
        "Analyzing {}", document.summary.table_name
    );

    let (root, report) = TreeBuilder::new(mapping).build(&document.table_records);
    emit(&root, &report, output)
}

pub async fn check(config: &ClientConfig, url: &str, show_metrics: bool) -> Result<()> {
    let source = TableSource::from_url(url)?;
    let client = BitableClient::new(config)?;

    let check = client
        .check_connection(&source)
        .await
        .with_context(|| format!("Connection check for {source} failed"))?;

    println!("Connected:   {} / {}", check.app_token, check.table_id);
    println!("Fields:      {}", check.field_count);
    println!("Sample:      {} record(s)", check.sample_records);
    print_metrics(&client, show_metrics);
    Ok(())
}

fn emit(root: &TreeNode, report: &BuildReport, output: &OutputArgs) -> Result<()> {
    let export = TreeExport::new(root, report);

    match output.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&export)?),
        OutputFormat::Text => {
            println!("{}", render::tree_text(root));
            println!();
            println!("{}", render::stats_text(&export.stats));
            println!("{}", render::report_text(report));
        }
    }

    if !report.is_clean() {
        warn!("Tree built with problems; see the report");
    }

    if let Some(path) = &output.export {
        write_json(path, &export)?;
        println!("Exported:    {}", path.display());
    }
    Ok(())
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_metrics(client: &BitableClient, show: bool) {
    if show {
        println!();
        println!("{}", render::metrics_text(&client.performance_metrics()));
    }
}
