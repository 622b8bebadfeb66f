//! Bitable client facade
//!
//! Wires the token store, rate limiter, transport and requester together
//! and exposes the table-level operations: resolve, fetch, schema, write,
//! and `fetch_tree`.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::batch::{BatchPlanner, BatchWriteReport, BatchWriter, Fields};
use super::pagination::{FetchOutcome, PaginationConfig, Paginator, TableRef};
use super::rate_limit::RateLimiter;
use super::requester::RetryingRequester;
use super::retry::RetryPolicy;
use super::source::TableSource;
use super::transport::{HttpTransport, Transport};
use super::types::{ApiRequest, AttemptOutcome};
use crate::auth::{LarkTokenProvider, TokenProvider, TokenStore};
use crate::config::ClientConfig;
use crate::error::FetchError;
use crate::tree::{BuildReport, FetchSummary, FieldMapping, TreeBuilder, TreeNode};

const GET_NODE_PATH: &str = "/wiki/v2/spaces/get_node";

/// Point-in-time view of client health, for observability only
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub attempts_total: u64,
    pub auth_refreshes: u64,
    pub rate_limit_hits: u64,
    pub avg_response_ms: f64,
    pub success_rate: f64,
    pub auth_token_valid: bool,
    pub rate_limit_utilization: f64,
    pub uptime_secs: f64,
}

/// Result of a connection check
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub app_token: String,
    pub table_id: String,
    pub field_count: usize,
    pub sample_records: usize,
}

pub struct BitableClient {
    requester: Arc<RetryingRequester>,
    paginator: Paginator,
    writer: BatchWriter,
    app_tokens: Mutex<HashMap<String, String>>,
    started: Instant,
}

impl BitableClient {
    /// Build a client talking to the real API
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        config.require_credentials()?;
        let transport = HttpTransport::new(&config.base_url, config.timeout())?;
        let provider = LarkTokenProvider::new(
            transport.client().clone(),
            &config.base_url,
            config.app_id.clone(),
            config.app_secret.clone(),
        );
        info!("Bitable client ready for app {}", config.app_id);
        Ok(Self::from_parts(
            Arc::new(transport),
            Arc::new(provider),
            config,
        ))
    }

    /// Build a client over any transport and token provider
    pub fn from_parts(
        transport: Arc<dyn Transport>,
        provider: Arc<dyn TokenProvider>,
        config: &ClientConfig,
    ) -> Self {
        let tokens = Arc::new(TokenStore::new(
            provider,
            config.auth_retries,
            config.refresh_buffer(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_enabled,
            config.requests_per_minute,
        ));
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        };
        let requester = Arc::new(RetryingRequester::new(transport, tokens, limiter, policy));

        Self {
            paginator: Paginator::new(requester.clone(), PaginationConfig::from(config)),
            writer: BatchWriter::new(requester.clone(), BatchPlanner::new(config.batch.clone())),
            requester,
            app_tokens: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Resolve the wiki token of `source` to the app token record endpoints need.
    /// Successful resolutions are cached for the life of the client.
    pub async fn resolve_table(&self, source: &TableSource) -> Result<TableRef, FetchError> {
        let cached = self.app_tokens.lock().get(&source.wiki_token).cloned();
        if let Some(app_token) = cached {
            debug!("Using cached app token for {}", source.wiki_token);
            return Ok(TableRef::new(app_token, source.table_id.clone()));
        }

        let request = ApiRequest::get(GET_NODE_PATH).with_query("token", &source.wiki_token);
        let data = self
            .requester
            .execute(&request)
            .await?
            .into_data()
            .map_err(|reason| {
                FetchError::unavailable(format!(
                    "cannot resolve wiki token {}: {reason}",
                    source.wiki_token
                ))
            })?;

        let app_token = data
            .pointer("/node/obj_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                FetchError::unavailable(format!(
                    "node {} has no obj_token",
                    source.wiki_token
                ))
            })?
            .to_string();

        info!("Resolved wiki token {} -> {}", source.wiki_token, app_token);
        self.app_tokens
            .lock()
            .insert(source.wiki_token.clone(), app_token.clone());
        Ok(TableRef::new(app_token, source.table_id.clone()))
    }

    /// Every record of the table. Page failures are reported in the outcome.
    pub async fn fetch_records(&self, source: &TableSource) -> Result<FetchOutcome, FetchError> {
        let table = self.resolve_table(source).await?;
        Ok(self.paginator.fetch_all(&table).await?)
    }

    /// Field definitions of the table (`data.items` of the fields endpoint)
    pub async fn table_schema(&self, source: &TableSource) -> Result<Vec<Value>, FetchError> {
        let table = self.resolve_table(source).await?;
        let data = self
            .requester
            .execute(&ApiRequest::get(table.fields_path()))
            .await?
            .into_data()
            .map_err(|reason| FetchError::unavailable(format!("cannot read schema: {reason}")))?;

        Ok(data
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Resolve, read the schema and fetch a one-record page
    pub async fn check_connection(&self, source: &TableSource) -> Result<ConnectionCheck, FetchError> {
        let fields = self.table_schema(source).await?;
        let table = self.resolve_table(source).await?;

        let sample_records = match self.paginator.fetch_page(&table, None, 1).await? {
            AttemptOutcome::Success(data) => data
                .get("items")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
            failed => {
                return Err(FetchError::unavailable(format!(
                    "cannot read records: {}",
                    failed.describe()
                )))
            }
        };

        Ok(ConnectionCheck {
            app_token: table.app_token,
            table_id: table.table_id,
            field_count: fields.len(),
            sample_records,
        })
    }

    /// Fetch every record of `source` and build the story tree.
    ///
    /// Fails only when no tree can be built: the token could not be refreshed,
    /// the table could not be resolved, or its first page failed. Later page
    /// failures still yield a tree; the report's `fetch` section lists them.
    pub async fn fetch_tree(
        &self,
        source: &TableSource,
        mapping: &FieldMapping,
    ) -> Result<(TreeNode, BuildReport), FetchError> {
        let outcome = self.fetch_records(source).await?;

        if outcome.first_page_failed() {
            let reason = outcome
                .failures
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            return Err(FetchError::unavailable(format!(
                "first page of {source} failed: {reason}"
            )));
        }
        if !outcome.is_complete() {
            warn!(
                failed_pages = outcome.failures.len(),
                "Building tree from a partial record set"
            );
        }

        let (root, mut report) = TreeBuilder::new(mapping.clone()).build(&outcome.records);
        report.fetch = Some(FetchSummary {
            pages_fetched: outcome.pages_fetched,
            failed_pages: outcome.failures,
        });
        Ok((root, report))
    }

    /// Create records in `source`, batching where possible
    pub async fn create_records(
        &self,
        source: &TableSource,
        records: &[Fields],
    ) -> Result<BatchWriteReport, FetchError> {
        let table = self.resolve_table(source).await?;
        Ok(self.writer.create_records(&table, records).await?)
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let requests = self.requester.metrics();
        let limiter = self.requester.rate_limiter();
        let tokens = self.requester.token_store();

        PerformanceMetrics {
            requests_total: requests.requests_total,
            requests_failed: requests.requests_failed,
            attempts_total: requests.attempts_total,
            auth_refreshes: tokens.refresh_count(),
            rate_limit_hits: limiter.hits(),
            avg_response_ms: requests.avg_response_ms,
            success_rate: requests.success_rate(),
            auth_token_valid: tokens.has_valid_credential(),
            rate_limit_utilization: limiter.utilization(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawResponse;
    use crate::testing::{ok_envelope, record, records_page, ScriptedTokenProvider, ScriptedTransport};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig {
            rate_limit_enabled: false,
            max_page_size: 2,
            retry_base_delay_secs: 0.01,
            retry_max_delay_secs: 0.1,
            ..Default::default()
        }
    }

    fn source() -> TableSource {
        TableSource::new("wik1", "tbl1")
    }

    fn node_response() -> RawResponse {
        ok_envelope(json!({ "node": { "obj_token": "app1" } }))
    }

    /// Routes node resolution, schema and record pages
    fn bitable(pages: Vec<Vec<Value>>) -> ScriptedTransport {
        ScriptedTransport::always(move |request| {
            if request.path == GET_NODE_PATH {
                return Ok(node_response());
            }
            if request.path.ends_with("/fields") {
                return Ok(ok_envelope(json!({
                    "items": [{"field_name": "Story.No"}, {"field_name": "parent"}]
                })));
            }
            let page: usize = request
                .query_value("page_token")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);
            let has_more = page + 1 < pages.len();
            let next = (page + 1).to_string();
            Ok(records_page(
                pages.get(page).cloned().unwrap_or_default(),
                has_more,
                has_more.then_some(next.as_str()),
                None,
            ))
        })
    }

    fn client(transport: Arc<ScriptedTransport>) -> BitableClient {
        let provider = Arc::new(ScriptedTokenProvider::new(Duration::from_secs(7200)));
        BitableClient::from_parts(transport, provider, &config())
    }

    fn mapping() -> FieldMapping {
        FieldMapping::new("Story.No", "parent")
    }

    #[tokio::test]
    async fn test_fetch_tree_end_to_end() {
        let transport = Arc::new(bitable(vec![
            vec![record("S1", ""), record("S2", "S1")],
            vec![record("S3", "S9")],
        ]));
        let client = client(transport.clone());

        let (root, report) = client.fetch_tree(&source(), &mapping()).await.unwrap();

        let top: Vec<&str> = root.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(top, vec!["S1", "S3"]);
        assert_eq!(root.children[0].children[0].id, "S2");
        assert_eq!(report.orphans, vec!["S3"]);
        assert_eq!(report.rejected, 0);
        let fetch = report.fetch.as_ref().unwrap();
        assert_eq!(fetch.pages_fetched, 2);
        assert!(!fetch.is_partial());

        let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths[0], GET_NODE_PATH);
        assert!(paths[1..]
            .iter()
            .all(|p| p == "/bitable/v1/apps/app1/tables/tbl1/records"));
    }

    #[tokio::test]
    async fn test_app_token_is_cached() {
        let transport = Arc::new(bitable(vec![vec![record("S1", "")]]));
        let client = client(transport.clone());

        client.fetch_records(&source()).await.unwrap();
        client.fetch_records(&source()).await.unwrap();

        let resolutions = transport
            .requests()
            .iter()
            .filter(|r| r.path == GET_NODE_PATH)
            .count();
        assert_eq!(resolutions, 1);
    }

    #[tokio::test]
    async fn test_unresolvable_source_is_unavailable() {
        let transport = Arc::new(ScriptedTransport::always(|_| {
            Ok(RawResponse::new(200, r#"{"code":131005,"msg":"not found"}"#))
        }));
        let client = client(transport);

        let err = client.fetch_tree(&source(), &mapping()).await.unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_first_page_failure_is_unavailable_not_empty() {
        let transport = Arc::new(ScriptedTransport::always(|request| {
            if request.path == GET_NODE_PATH {
                Ok(node_response())
            } else {
                Ok(RawResponse::new(200, r#"{"code":91402,"msg":"NOTEXIST"}"#))
            }
        }));
        let failing = client(transport);

        let err = failing.fetch_tree(&source(), &mapping()).await.unwrap_err();
        assert!(err.to_string().contains("first page"));

        let empty = client(Arc::new(bitable(vec![vec![]])));
        let (root, report) = empty.fetch_tree(&source(), &mapping()).await.unwrap();
        assert!(root.children.is_empty());
        assert_eq!(report.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_page_failure_gives_partial_tree() {
        let transport = Arc::new(ScriptedTransport::always(|request| {
            if request.path == GET_NODE_PATH {
                return Ok(node_response());
            }
            match request.query_value("page_token") {
                None => Ok(records_page(vec![record("S1", "")], true, Some("1"), None)),
                Some(_) => Ok(RawResponse::new(503, "")),
            }
        }));
        let client = client(transport);

        let (root, report) = client.fetch_tree(&source(), &mapping()).await.unwrap();

        assert_eq!(root.children.len(), 1);
        let fetch = report.fetch.unwrap();
        assert!(fetch.is_partial());
        assert_eq!(fetch.failed_pages[0].page, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_exhaustion_is_terminal() {
        let transport = Arc::new(bitable(vec![vec![record("S1", "")]]));
        let provider = Arc::new(ScriptedTokenProvider::new(Duration::from_secs(7200)));
        provider.fail_next(100);
        let client = BitableClient::from_parts(transport.clone(), provider, &config());

        let err = client.fetch_tree(&source(), &mapping()).await.unwrap_err();

        assert!(matches!(err, FetchError::AuthExhausted(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_check_connection_and_metrics() {
        let transport = Arc::new(bitable(vec![vec![record("S1", "")]]));
        let client = client(transport);

        let check = client.check_connection(&source()).await.unwrap();
        assert_eq!(check.app_token, "app1");
        assert_eq!(check.field_count, 2);
        assert_eq!(check.sample_records, 1);

        let metrics = client.performance_metrics();
        assert_eq!(metrics.requests_total, 3);
        assert_eq!(metrics.requests_failed, 0);
        assert_eq!(metrics.auth_refreshes, 1);
        assert!(metrics.auth_token_valid);
        assert_eq!(metrics.success_rate, 1.0);
    }
}
