//! Extraction documents: a table snapshot saved as JSON for offline analysis

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::api::{BitableClient, TableSource};
use crate::error::FetchError;
use crate::tree::FlatRecord;

pub const EXTRACTOR_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionInfo {
    pub timestamp: DateTime<Utc>,
    pub source_url: String,
    pub wiki_token: String,
    pub table_id: String,
    pub extractor_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: String,
    pub name: String,
    pub obj_token: String,
    pub wiki_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub total_fields: usize,
    pub total_records: usize,
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionDocument {
    pub extraction_info: ExtractionInfo,
    pub table_info: TableInfo,
    pub table_schema: Vec<Value>,
    pub table_records: Vec<FlatRecord>,
    pub summary: ExtractionSummary,
}

impl ExtractionDocument {
    /// Snapshot the schema and every record of `source`.
    ///
    /// Fails if any page is lost; a partial snapshot would silently
    /// misrepresent the table downstream.
    pub async fn extract(
        client: &BitableClient,
        source: &TableSource,
        source_url: &str,
    ) -> Result<Self, FetchError> {
        let table = client.resolve_table(source).await?;
        let table_schema = client.table_schema(source).await?;
        let outcome = client.fetch_records(source).await?;

        if let Some(failure) = outcome.failures.first() {
            return Err(FetchError::unavailable(format!(
                "page {} of {source} failed: {}",
                failure.page, failure.reason
            )));
        }

        let name = format!("Table_{}", table.table_id);
        let document = Self {
            extraction_info: ExtractionInfo {
                timestamp: Utc::now(),
                source_url: source_url.to_string(),
                wiki_token: source.wiki_token.clone(),
                table_id: source.table_id.clone(),
                extractor_version: EXTRACTOR_VERSION.to_string(),
            },
            table_info: TableInfo {
                table_id: table.table_id,
                name: name.clone(),
                obj_token: table.app_token,
                wiki_token: source.wiki_token.clone(),
            },
            summary: ExtractionSummary {
                total_fields: table_schema.len(),
                total_records: outcome.records.len(),
                table_name: name,
            },
            table_schema,
            table_records: outcome.records,
        };

        info!(
            fields = document.summary.total_fields,
            records = document.summary.total_records,
            "Extracted {}",
            document.summary.table_name
        );
        Ok(document)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not an extraction document", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved extraction to {}", path.display());
        Ok(())
    }

    /// Default file name, e.g. `Table_tbl1_20260101_120000.json`
    pub fn default_file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.summary.table_name.replace(' ', "_"),
            self.extraction_info.timestamp.format("%Y%m%d_%H%M%S")
        )
    }
}
