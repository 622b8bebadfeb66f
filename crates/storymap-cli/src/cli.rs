//! Command-line arguments

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use storymap_core::ClientConfig;

#[derive(Debug, Parser)]
#[command(name = "storymap", version, about = "Rebuild Lark Bitable story records as a validated tree")]
pub struct Cli {
    /// Config file (default: ~/.storymap/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print client metrics after network commands
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is not set
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Snapshot a table's schema and records to a JSON file
    Extract {
        /// Table URL, e.g. https://<host>/base/<token>?table=<table_id>
        url: String,
        /// Output path (default: temp/<table>_<timestamp>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch a table and build its story tree
    Tree {
        url: String,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        mapping: MappingArgs,
    },

    /// Build the story tree from a saved extraction file
    Analyze {
        file: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        mapping: MappingArgs,
    },

    /// Verify credentials and table access
    Check { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, clap::Args)]
pub struct OutputArgs {
    /// Output format for stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write tree, statistics and report as JSON to this path
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Per-run overrides of the `[tree]` config section
#[derive(Debug, Clone, Default, clap::Args)]
pub struct MappingArgs {
    /// Field holding the record identifier (`record_id` for the row id)
    #[arg(long)]
    pub id_field: Option<String>,

    /// Field holding the parent reference; repeat to try several in order
    #[arg(long = "parent-field")]
    pub parent_fields: Vec<String>,

    /// Field used as the node label
    #[arg(long)]
    pub label_field: Option<String>,
}

impl MappingArgs {
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(id_field) = &self.id_field {
            config.tree.id_field = id_field.clone();
        }
        if !self.parent_fields.is_empty() {
            config.tree.parent_fields = self.parent_fields.clone();
        }
        if let Some(label_field) = &self.label_field {
            config.tree.label_field = Some(label_field.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_command() {
        let cli = Cli::parse_from([
            "storymap",
            "-v",
            "tree",
            "https://x.larksuite.com/base/tok?table=tbl",
            "--format",
            "json",
            "--parent-field",
            "Parent Tickets",
            "--parent-field",
            "parent",
        ]);

        assert_eq!(cli.log_level(), "debug");
        let Commands::Tree { output, mapping, .. } = cli.command else {
            panic!("expected tree command");
        };
        assert_eq!(output.format, OutputFormat::Json);
        assert_eq!(mapping.parent_fields, vec!["Parent Tickets", "parent"]);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["storymap", "-v", "-q", "check", "u"]).is_err());
    }

    #[test]
    fn test_mapping_overrides() {
        let mut config = ClientConfig::default();
        MappingArgs {
            id_field: Some("Story.No".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.tree.id_field, "Story.No");
        assert_eq!(config.tree.parent_fields.len(), 3);
    }
}
