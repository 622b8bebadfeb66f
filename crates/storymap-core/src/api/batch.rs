//! Bulk record creation
//!
//! Batches are sized from the average serialized size of a sample of the
//! records so a batch stays under the payload ceiling. A batch the API
//! refuses is replayed one record at a time, so one bad row costs only
//! itself.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pagination::TableRef;
use super::requester::RetryingRequester;
use super::types::{ApiRequest, AttemptOutcome};
use crate::config::BatchConfig;
use crate::error::AuthExhausted;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    config: BatchConfig,
}

impl BatchPlanner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Records per batch for this record set
    pub fn batch_size(&self, records: &[Fields]) -> usize {
        let max = self.config.max_batch_size.max(1);
        let sample = &records[..records.len().min(self.config.sample_size.max(1))];
        if sample.is_empty() {
            return max;
        }

        let bytes: usize = sample
            .iter()
            .map(|r| serde_json::to_vec(r).map(|v| v.len()).unwrap_or(0))
            .sum();
        let average = (bytes / sample.len()).max(1);
        (self.config.max_payload_bytes / average).clamp(1, max)
    }

    pub fn plan<'a>(&self, records: &'a [Fields]) -> Vec<&'a [Fields]> {
        let size = self.batch_size(records);
        debug!(records = records.len(), batch_size = size, "Planned batches");
        records.chunks(size).collect()
    }
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

/// A record that could not be written even on its own
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Position in the input
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchWriteReport {
    pub written: usize,
    pub batches: usize,
    /// Batches replayed item by item
    pub fallback_batches: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BatchWriter {
    requester: Arc<RetryingRequester>,
    planner: BatchPlanner,
}

impl BatchWriter {
    pub fn new(requester: Arc<RetryingRequester>, planner: BatchPlanner) -> Self {
        Self { requester, planner }
    }

    /// Create `records` in `table`
    pub async fn create_records(
        &self,
        table: &TableRef,
        records: &[Fields],
    ) -> Result<BatchWriteReport, AuthExhausted> {
        let mut report = BatchWriteReport::default();
        let batch_path = format!("{}/batch_create", table.records_path());
        let mut offset = 0;

        for batch in self.planner.plan(records) {
            report.batches += 1;
            let body = json!({
                "records": batch.iter().map(|fields| json!({ "fields": fields })).collect::<Vec<_>>()
            });

            match self.requester.execute(&ApiRequest::post(&batch_path, body)).await? {
                AttemptOutcome::Success(_) => report.written += batch.len(),
                failed => {
                    warn!(
                        batch = report.batches,
                        size = batch.len(),
                        "Batch create failed, falling back to single writes: {}",
                        failed.describe()
                    );
                    report.fallback_batches += 1;
                    self.write_each(table, batch, offset, &mut report).await?;
                }
            }
            offset += batch.len();
        }

        info!(
            written = report.written,
            failed = report.failures.len(),
            batches = report.batches,
            "Batch create finished"
        );
        Ok(report)
    }

    async fn write_each(
        &self,
        table: &TableRef,
        batch: &[Fields],
        offset: usize,
        report: &mut BatchWriteReport,
    ) -> Result<(), AuthExhausted> {
        for (i, fields) in batch.iter().enumerate() {
            let request = ApiRequest::post(table.records_path(), json!({ "fields": fields }));
            match self.requester.execute(&request).await? {
                AttemptOutcome::Success(_) => report.written += 1,
                failed => report.failures.push(ItemFailure {
                    index: offset + i,
                    reason: failed.describe(),
                }),
            }
        }
        Ok(())
    }
}
