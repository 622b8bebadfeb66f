//! Paged record retrieval
//!
//! The first page is always fetched on its own. Remaining pages are walked
//! sequentially by continuation token, or, when the source hands out
//! offset-style tokens and concurrency is enabled, pulled from a shared work
//! queue by a bounded set of workers and merged once at the end.
//!
//! Concurrent pages are buffered by page index and merged in one step once
//! every worker is done, so both modes yield records in page order.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::requester::RetryingRequester;
use super::types::{ApiRequest, AttemptOutcome, ErrorKind};
use crate::config::{ClientConfig, PageTokenMode};
use crate::error::AuthExhausted;
use crate::tree::FlatRecord;

/// Storage-level table address (after wiki token resolution)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub app_token: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(app_token: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            app_token: app_token.into(),
            table_id: table_id.into(),
        }
    }

    pub fn records_path(&self) -> String {
        format!(
            "/bitable/v1/apps/{}/tables/{}/records",
            self.app_token, self.table_id
        )
    }

    pub fn fields_path(&self) -> String {
        format!(
            "/bitable/v1/apps/{}/tables/{}/fields",
            self.app_token, self.table_id
        )
    }
}

/// One page as returned by the list-records endpoint
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub records: Vec<Value>,
    pub next_token: Option<String>,
    pub has_more: bool,
    pub total: Option<usize>,
}

impl PageResult {
    pub fn from_data(data: &Value) -> Self {
        let records = data
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_token = data
            .get("page_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Self {
            records,
            next_token,
            has_more: data.get("has_more").and_then(Value::as_bool).unwrap_or(false),
            total: data
                .get("total")
                .and_then(Value::as_u64)
                .map(|t| t as usize),
        }
    }
}

/// A page that could not be fetched
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    /// 0-based page index
    pub page: usize,
    pub kind: Option<String>,
    pub reason: String,
}

impl PageFailure {
    fn from_outcome(page: usize, outcome: &AttemptOutcome) -> Self {
        Self {
            page,
            kind: outcome.error_kind().map(|k: ErrorKind| k.to_string()),
            reason: outcome.describe(),
        }
    }
}

/// Everything `fetch_all` collected, plus what went wrong
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<FlatRecord>,
    pub pages_fetched: usize,
    pub failures: Vec<PageFailure>,
}

impl FetchOutcome {
    /// The first page failed, so `records` is empty for a reason other than an empty table
    pub fn first_page_failed(&self) -> bool {
        self.failures.iter().any(|f| f.page == 0)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub page_size: u32,
    pub workers: usize,
    pub concurrent: bool,
    pub token_mode: PageTokenMode,
}

impl From<&ClientConfig> for PaginationConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            page_size: config.max_page_size,
            workers: config.pagination_workers,
            concurrent: config.concurrent_pagination,
            token_mode: config.page_token_mode,
        }
    }
}

enum PageFetch {
    Done { page: usize, result: PageResult },
    Failed(PageFailure),
    AuthExhausted(AuthExhausted),
}

pub struct Paginator {
    requester: Arc<RetryingRequester>,
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(requester: Arc<RetryingRequester>, config: PaginationConfig) -> Self {
        Self { requester, config }
    }

    /// Fetch a single page
    pub async fn fetch_page(
        &self,
        table: &TableRef,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<AttemptOutcome, AuthExhausted> {
        fetch_page(&self.requester, table, page_token, page_size).await
    }

    /// Fetch every page of `table`
    pub async fn fetch_all(&self, table: &TableRef) -> Result<FetchOutcome, AuthExhausted> {
        info!("Fetching records from {}/{}", table.app_token, table.table_id);
        let mut outcome = FetchOutcome::default();

        let first = match self.fetch_page(table, None, self.config.page_size).await? {
            AttemptOutcome::Success(data) => PageResult::from_data(&data),
            failed => {
                warn!("First page of {} failed: {}", table.table_id, failed.describe());
                outcome.failures.push(PageFailure::from_outcome(0, &failed));
                return Ok(outcome);
            }
        };

        outcome.pages_fetched = 1;
        let has_more = first.has_more;
        let next_token = first.next_token.clone();
        let total = first.total;
        push_records(&mut outcome.records, first.records);

        if !has_more {
            info!("Fetched {} records in 1 page", outcome.records.len());
            return Ok(outcome);
        }

        let use_concurrency = self.config.concurrent
            && self.config.workers > 1
            && self.config.token_mode == PageTokenMode::Offset;

        match (use_concurrency, total) {
            (true, Some(total)) => self.fetch_rest_concurrent(table, total, &mut outcome).await?,
            (true, None) => {
                debug!("Source reported no total, falling back to sequential pagination");
                self.fetch_rest_sequential(table, next_token, &mut outcome).await?
            }
            (false, _) => {
                if self.config.concurrent {
                    debug!("Opaque continuation tokens, paginating sequentially");
                }
                self.fetch_rest_sequential(table, next_token, &mut outcome).await?
            }
        }

        info!(
            records = outcome.records.len(),
            pages = outcome.pages_fetched,
            failed_pages = outcome.failures.len(),
            "Record fetch finished"
        );
        Ok(outcome)
    }

    async fn fetch_rest_sequential(
        &self,
        table: &TableRef,
        mut token: Option<String>,
        outcome: &mut FetchOutcome,
    ) -> Result<(), AuthExhausted> {
        let mut page = 1;
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(current) = token.take() {
            if !seen.insert(current.clone()) {
                // A repeated cursor would loop forever
                warn!(page, token = %current, "Source repeated a continuation token, stopping");
                outcome.failures.push(PageFailure {
                    page,
                    kind: None,
                    reason: format!("continuation token {current} was already used"),
                });
                break;
            }

            match self
                .fetch_page(table, Some(&current), self.config.page_size)
                .await?
            {
                AttemptOutcome::Success(data) => {
                    let result = PageResult::from_data(&data);
                    debug!(page, count = result.records.len(), "Fetched page");
                    outcome.pages_fetched += 1;
                    push_records(&mut outcome.records, result.records);
                    if result.has_more {
                        token = result.next_token;
                        if token.is_none() {
                            warn!(page, "Source reported more data without a continuation token");
                        }
                    }
                }
                failed => {
                    // Without this page's token the rest is unreachable
                    warn!(page, "Page fetch failed, stopping: {}", failed.describe());
                    outcome.failures.push(PageFailure::from_outcome(page, &failed));
                }
            }
            page += 1;
        }

        Ok(())
    }

    async fn fetch_rest_concurrent(
        &self,
        table: &TableRef,
        total: usize,
        outcome: &mut FetchOutcome,
    ) -> Result<(), AuthExhausted> {
        let page_size = self.config.page_size.max(1) as usize;
        let page_count = total.div_ceil(page_size);
        if page_count <= 1 {
            return Ok(());
        }

        let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new((1..page_count).collect()));
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<PageFetch>();
        let workers = self.config.workers.min(page_count - 1);

        info!(
            pages = page_count - 1,
            workers, "Fetching remaining pages concurrently"
        );

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let abort = abort.clone();
            let tx = tx.clone();
            let requester = self.requester.clone();
            let table = table.clone();
            let request_size = self.config.page_size;

            handles.push(tokio::spawn(async move {
                loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let Some(page) = queue.lock().pop_front() else {
                        break;
                    };

                    let offset = (page * page_size).to_string();
                    debug!(worker, page, "Worker fetching page");
                    let message =
                        match fetch_page(&requester, &table, Some(&offset), request_size).await {
                            Ok(AttemptOutcome::Success(data)) => PageFetch::Done {
                                page,
                                result: PageResult::from_data(&data),
                            },
                            Ok(failed) => {
                                warn!(page, "Page fetch failed: {}", failed.describe());
                                PageFetch::Failed(PageFailure::from_outcome(page, &failed))
                            }
                            Err(exhausted) => {
                                abort.store(true, Ordering::Relaxed);
                                PageFetch::AuthExhausted(exhausted)
                            }
                        };

                    if tx.send(message).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut auth_failure = None;
        let mut done: BTreeMap<usize, Vec<Value>> = BTreeMap::new();
        while let Some(message) = rx.recv().await {
            match message {
                PageFetch::Done { page, result } => {
                    debug!(page, count = result.records.len(), "Page received");
                    done.insert(page, result.records);
                }
                PageFetch::Failed(failure) => outcome.failures.push(failure),
                PageFetch::AuthExhausted(e) => {
                    auth_failure.get_or_insert(e);
                }
            }
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                warn!("Pagination worker ended abnormally: {}", e);
            }
        }

        if let Some(e) = auth_failure {
            return Err(e);
        }

        outcome.pages_fetched += done.len();
        for (_, records) in done {
            push_records(&mut outcome.records, records);
        }
        outcome.failures.sort_by_key(|f| f.page);
        Ok(())
    }
}

async fn fetch_page(
    requester: &RetryingRequester,
    table: &TableRef,
    page_token: Option<&str>,
    page_size: u32,
) -> Result<AttemptOutcome, AuthExhausted> {
    let mut request = ApiRequest::get(table.records_path()).with_query("page_size", page_size);
    if let Some(token) = page_token {
        request = request.with_query("page_token", token);
    }
    requester.execute(&request).await
}

fn push_records(into: &mut Vec<FlatRecord>, items: Vec<Value>) {
    into.extend(items.iter().map(FlatRecord::from_bitable));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawResponse;
    use crate::testing::{fast_policy, record, records_page, requester_with, ScriptedTransport};
    use std::time::Duration;

    fn table() -> TableRef {
        TableRef::new("app1", "tbl1")
    }

    fn config(concurrent: bool, mode: PageTokenMode) -> PaginationConfig {
        PaginationConfig {
            page_size: 2,
            workers: 3,
            concurrent,
            token_mode: mode,
        }
    }

    fn ids(outcome: &FetchOutcome) -> Vec<String> {
        outcome
            .records
            .iter()
            .map(|r| r.record_id.clone().unwrap_or_default())
            .collect()
    }

    /// Opaque cursor source: token "p<N>" addresses page N
    fn opaque_source(pages: usize) -> ScriptedTransport {
        ScriptedTransport::always(move |request| {
            let page: usize = request
                .query_value("page_token")
                .and_then(|t| t.trim_start_matches('p').parse().ok())
                .unwrap_or(0);
            let items = vec![
                record(&format!("rec{page}a"), ""),
                record(&format!("rec{page}b"), ""),
            ];
            let has_more = page + 1 < pages;
            let next = format!("p{}", page + 1);
            Ok(records_page(
                items,
                has_more,
                has_more.then_some(next.as_str()),
                Some(pages * 2),
            ))
        })
    }

    #[tokio::test]
    async fn test_single_page() {
        let transport = Arc::new(ScriptedTransport::always(|_| {
            Ok(records_page(vec![record("rec1", "")], false, None, Some(1)))
        }));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(ids(&outcome), vec!["rec1"]);
        assert!(outcome.is_complete());
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            transport.requests()[0].path,
            "/bitable/v1/apps/app1/tables/tbl1/records"
        );
    }

    #[tokio::test]
    async fn test_sequential_preserves_page_order() {
        let transport = Arc::new(opaque_source(3));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(
            ids(&outcome),
            vec!["rec0a", "rec0b", "rec1a", "rec1b", "rec2a", "rec2b"]
        );
        assert_eq!(outcome.pages_fetched, 3);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_empty_table_is_not_a_failure() {
        let transport = Arc::new(ScriptedTransport::always(|_| {
            Ok(records_page(vec![], false, None, Some(0)))
        }));
        let requester = Arc::new(requester_with(transport, fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert!(outcome.records.is_empty());
        assert!(!outcome.first_page_failed());
    }

    #[tokio::test]
    async fn test_first_page_failure_is_reported() {
        let transport = Arc::new(ScriptedTransport::always(|_| {
            Ok(RawResponse::new(200, r#"{"code":91402,"msg":"NOTEXIST"}"#))
        }));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert!(outcome.records.is_empty());
        assert!(outcome.first_page_failed());
        assert_eq!(outcome.failures[0].kind.as_deref(), Some("unknown"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_failure_keeps_collected_records() {
        let transport = Arc::new(ScriptedTransport::always(|request| {
            match request.query_value("page_token") {
                None => Ok(records_page(vec![record("rec1", "")], true, Some("p1"), None)),
                Some(_) => Ok(RawResponse::new(503, "")),
            }
        }));
        let requester = Arc::new(requester_with(transport, fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(ids(&outcome), vec!["rec1"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].page, 1);
        assert!(!outcome.first_page_failed());
    }

    #[tokio::test]
    async fn test_repeated_token_stops_sequential_walk() {
        let transport = Arc::new(ScriptedTransport::always(|request| {
            let id = match request.query_value("page_token") {
                None => "rec0",
                Some(_) => "rec1",
            };
            Ok(records_page(vec![record(id, "")], true, Some("same"), None))
        }));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(false, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(ids(&outcome), vec!["rec0", "rec1"]);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(transport.calls(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].page, 2);
        assert!(outcome.failures[0].kind.is_none());
        assert!(!outcome.is_complete());
    }

    /// Offset source: token is the record offset, 2 records per page, 9 records total
    fn offset_source(fail_offset: Option<&'static str>) -> ScriptedTransport {
        ScriptedTransport::always(move |request| {
            let offset: usize = request
                .query_value("page_token")
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            if fail_offset == request.query_value("page_token") && fail_offset.is_some() {
                return Ok(RawResponse::new(500, ""));
            }
            let items = (offset..(offset + 2).min(9))
                .map(|i| record(&format!("rec{i}"), ""))
                .collect();
            let has_more = offset + 2 < 9;
            let next = (offset + 2).to_string();
            Ok(records_page(
                items,
                has_more,
                has_more.then_some(next.as_str()),
                Some(9),
            ))
        })
        .with_latency(Duration::from_millis(20))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetch_collects_every_page() {
        let transport = Arc::new(offset_source(None));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(true, PageTokenMode::Offset));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        let expected: Vec<String> = (0..9).map(|i| format!("rec{i}")).collect();
        assert_eq!(ids(&outcome), expected);
        assert_eq!(outcome.pages_fetched, 5);
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_page_failure_does_not_abort_others() {
        let transport = Arc::new(offset_source(Some("4")));
        let requester = Arc::new(requester_with(transport, fast_policy()));
        let paginator = Paginator::new(requester, config(true, PageTokenMode::Offset));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(
            ids(&outcome),
            vec!["rec0", "rec1", "rec2", "rec3", "rec6", "rec7", "rec8"]
        );
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].page, 2);
        assert_eq!(outcome.failures[0].kind.as_deref(), Some("server"));
    }

    #[tokio::test]
    async fn test_concurrency_ignored_for_opaque_tokens() {
        let transport = Arc::new(opaque_source(3));
        let requester = Arc::new(requester_with(transport.clone(), fast_policy()));
        let paginator = Paginator::new(requester, config(true, PageTokenMode::Opaque));

        let outcome = paginator.fetch_all(&table()).await.unwrap();

        assert_eq!(
            ids(&outcome),
            vec!["rec0a", "rec0b", "rec1a", "rec1b", "rec2a", "rec2b"]
        );
    }

    #[test]
    fn test_page_result_parsing() {
        let data = serde_json::json!({
            "items": [{"record_id": "rec1", "fields": {}}],
            "has_more": true,
            "page_token": "",
            "total": 10
        });
        let page = PageResult::from_data(&data);
        assert_eq!(page.records.len(), 1);
        assert!(page.has_more);
        assert_eq!(page.next_token, None);
        assert_eq!(page.total, Some(10));
    }
}
