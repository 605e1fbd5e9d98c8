//! Integration tests for the crawl engine
//!
//! Most tests drive the engine with an in-process fetcher so that timing
//! and failures are fully scripted. The last tests use wiremock to run the
//! real HTTP transport and the built-in page spider end-to-end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{Config, SpiderConfig};
use sumi_harvest::crawler::{
    output, Callback, CrawlPhase, EngineBuilder, ErrorCallback, FailureReason, FetchFailure,
    FetchOutcome, Fetcher, OutputStream, PageSpider, PauseControl, PluginRegistry, RequestStream,
    Spider, SpiderError,
};
use sumi_harvest::distributed::MemoryLockStore;
use sumi_harvest::http::{Request, Response, ResponseParts};
use sumi_harvest::pipeline::Sink;
use sumi_harvest::record::{FieldKind, Record, RecordSchema};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast-ticking configuration for tests
fn create_test_config(concurrency: usize) -> Config {
    let mut config = Config::default();
    config.engine.concurrency = concurrency;
    config.engine.dequeue_timeout_ms = 20;
    config.engine.generator_timeout_ms = 200;
    config.engine.idle_backoff_min_ms = 1;
    config.engine.idle_backoff_max_ms = 20;
    config.pipeline.flush_interval_secs = 0;
    config
}

fn create_test_schema() -> Arc<RecordSchema> {
    RecordSchema::new("items")
        .required("url", FieldKind::String)
        .finish()
        .unwrap()
}

fn urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://example.com/item/{}", i))
        .collect()
}

/// Fetcher that answers from memory and tracks in-flight fetches
#[derive(Default)]
struct MemoryFetcher {
    delay: Duration,
    failing: HashSet<String>,
    fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.fetched.lock().push(request.url().to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(request.url()) {
            return FetchOutcome::Failure(FetchFailure {
                request,
                reason: FailureReason::Connect("connection refused".to_string()),
            });
        }

        let url = request.url().to_string();
        FetchOutcome::Success(Response::new(
            request,
            ResponseParts {
                status: 200,
                url,
                ..Default::default()
            },
        ))
    }

    fn idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
    }
}

/// Shares a fetcher between the test and the engine
struct SharedFetcher(Arc<MemoryFetcher>);

#[async_trait]
impl Fetcher for SharedFetcher {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
        self.0.fetch(request).await
    }

    fn idle(&self) -> bool {
        self.0.idle()
    }
}

#[derive(Default)]
struct Collected {
    fail_first: AtomicUsize,
    records: Mutex<Vec<Record>>,
    errors: Mutex<Vec<Record>>,
}

/// Sink that keeps what it receives; clones share the same storage
#[derive(Clone, Default)]
struct CollectingSink(Arc<Collected>);

impl CollectingSink {
    fn failing_first(calls: usize) -> Self {
        Self(Arc::new(Collected {
            fail_first: AtomicUsize::new(calls),
            ..Collected::default()
        }))
    }

    fn records(&self) -> Vec<Record> {
        self.0.records.lock().clone()
    }

    fn errors(&self) -> Vec<Record> {
        self.0.errors.lock().clone()
    }

    fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .records()
            .iter()
            .filter_map(|r| r.get("url").and_then(|v| v.as_str()).map(String::from))
            .collect();
        urls.sort();
        urls
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    async fn process(&self, records: &[Record]) -> bool {
        let should_fail = self
            .0
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return false;
        }
        self.0.records.lock().extend(records.iter().cloned());
        true
    }

    async fn process_error(&self, records: &[Record]) {
        self.0.errors.lock().extend(records.iter().cloned());
    }
}

/// Spider over a fixed list of URLs that emits one record per response
struct ListSpider {
    urls: Vec<String>,
    priority: i64,
    schema: Arc<RecordSchema>,
}

impl ListSpider {
    fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            priority: 0,
            schema: create_test_schema(),
        }
    }

    fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl Spider for ListSpider {
    fn name(&self) -> &str {
        "list"
    }

    fn start_requests(&self) -> RequestStream {
        output::requests(
            self.urls
                .iter()
                .map(|u| Request::get(u.as_str()).with_priority(self.priority))
                .collect::<Vec<_>>(),
        )
    }

    fn parse(&self, response: Response) -> OutputStream {
        match self.schema.builder().set("url", response.url()).build() {
            Ok(record) => output::outputs(vec![record]),
            Err(e) => output::fail(e.into()),
        }
    }
}

#[tokio::test]
async fn test_records_reach_sink() {
    let sink = CollectingSink::default();
    let engine = EngineBuilder::new(ListSpider::new(urls(3)))
        .config(create_test_config(2))
        .fetcher(MemoryFetcher::default())
        .sink(sink.clone())
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(engine.phase(), CrawlPhase::Finished);
    assert_eq!(report.stats.download_success, 3);
    assert_eq!(report.stats.parse_success, 3);
    assert_eq!(report.stats.records_emitted, 3);
    assert_eq!(report.pipeline.success_count, 3);
    assert_eq!(report.pipeline.fail_count, 0);
    assert_eq!(sink.urls(), urls(3));
    assert!(sink.errors().is_empty());
}

#[tokio::test]
async fn test_failed_batch_is_retried_before_close() {
    let sink = CollectingSink::failing_first(1);
    let engine = EngineBuilder::new(ListSpider::new(urls(3)))
        .config(create_test_config(1))
        .fetcher(MemoryFetcher::default())
        .sink(sink.clone())
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.pipeline.success_count, 3);
    assert_eq!(report.pipeline.fail_count, 1);
    assert_eq!(sink.urls(), urls(3));
    assert!(sink.errors().is_empty());
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    for limit in 1..=6 {
        let total = limit * 3 + 1;
        let fetcher = Arc::new(MemoryFetcher::with_delay(Duration::from_millis(15)));
        let engine = EngineBuilder::new(ListSpider::new(urls(total)))
            .config(create_test_config(limit))
            .fetcher(SharedFetcher(fetcher.clone()))
            .build()
            .unwrap();

        let report = engine.run().await.unwrap();

        assert_eq!(report.stats.download_success, total as u64);
        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= limit, "limit {}: saw {} fetches in flight", limit, max);
        assert!(max >= 1);
        if limit > 1 {
            assert!(max > 1, "limit {}: fetches never overlapped", limit);
        }
    }
}

#[tokio::test]
async fn test_pause_holds_requests_until_proceed() {
    let fetcher = Arc::new(MemoryFetcher::default());
    let pause = PauseControl::with_threshold(Some(10));
    let engine = Arc::new(
        EngineBuilder::new(ListSpider::new(urls(4)))
            .config(create_test_config(2))
            .fetcher(SharedFetcher(fetcher.clone()))
            .pause_control(pause.clone())
            .build()
            .unwrap(),
    );

    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fetcher.fetched().is_empty());
    assert_eq!(engine.pending(), 4);

    pause.proceed();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.stats.download_success, 4);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn test_resume_releases_requests_at_threshold() {
    let fetcher = Arc::new(MemoryFetcher::default());
    let pause = PauseControl::with_threshold(Some(10));
    let engine = Arc::new(
        EngineBuilder::new(ListSpider::new(urls(3)).with_priority(5))
            .config(create_test_config(1))
            .fetcher(SharedFetcher(fetcher.clone()))
            .pause_control(pause.clone())
            .build()
            .unwrap(),
    );

    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fetcher.fetched().is_empty());
    assert_eq!(engine.pending(), 3);

    // still below the threshold
    pause.resume(6);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fetcher.fetched().is_empty());

    pause.resume(5);
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.stats.download_success, 3);
    assert_eq!(pause.current_threshold(), Some(5));
}

/// Spider whose requests carry their own callbacks
struct CallbackSpider {
    schema: Arc<RecordSchema>,
}

#[async_trait]
impl Spider for CallbackSpider {
    fn name(&self) -> &str {
        "callbacks"
    }

    fn start_requests(&self) -> RequestStream {
        let schema = self.schema.clone();
        let requests = vec![
            Request::get("https://example.com/fails").with_callback(Callback::new(
                "parse_broken",
                |_| output::fail(SpiderError::callback("parse_broken", "bad markup")),
            )),
            Request::get("https://example.com/panics").with_callback(Callback::new(
                "parse_panicky",
                |_| panic!("callback exploded"),
            )),
            Request::get("https://example.com/works").with_callback(Callback::new(
                "parse_item",
                move |response| match schema.builder().set("url", response.url()).build() {
                    Ok(record) => output::outputs(vec![record]),
                    Err(e) => output::fail(e.into()),
                },
            )),
        ];
        output::requests(requests)
    }

    fn parse(&self, _response: Response) -> OutputStream {
        output::empty()
    }
}

#[tokio::test]
async fn test_failing_callbacks_do_not_stop_the_crawl() {
    let sink = CollectingSink::default();
    let engine = EngineBuilder::new(CallbackSpider {
        schema: create_test_schema(),
    })
    .config(create_test_config(2))
    .fetcher(MemoryFetcher::default())
    .sink(sink.clone())
    .build()
    .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.download_success, 3);
    assert_eq!(report.stats.parse_success, 1);
    assert_eq!(report.stats.parse_fail, 2);
    assert_eq!(sink.urls(), vec!["https://example.com/works".to_string()]);
}

/// Spider that turns fetch failures into records
struct RecoveringSpider {
    schema: Arc<RecordSchema>,
}

#[async_trait]
impl Spider for RecoveringSpider {
    fn name(&self) -> &str {
        "recovering"
    }

    fn start_requests(&self) -> RequestStream {
        let schema = self.schema.clone();
        let on_error = ErrorCallback::new("record_failure", move |failure: FetchFailure| {
            let record = schema
                .builder()
                .set("url", format!("failed:{}", failure.request.url()))
                .build();
            match record {
                Ok(record) => output::outputs(vec![record]),
                Err(e) => output::fail(e.into()),
            }
        });

        output::requests(vec![
            Request::get("https://example.com/ok").with_error_callback(on_error.clone()),
            Request::get("https://example.com/down").with_error_callback(on_error),
            Request::get("https://example.com/down-too"),
        ])
    }

    fn parse(&self, _response: Response) -> OutputStream {
        output::empty()
    }
}

#[tokio::test]
async fn test_error_callback_handles_fetch_failure() {
    let sink = CollectingSink::default();
    let engine = EngineBuilder::new(RecoveringSpider {
        schema: create_test_schema(),
    })
    .config(create_test_config(1))
    .fetcher(MemoryFetcher::failing(&[
        "https://example.com/down",
        "https://example.com/down-too",
    ]))
    .sink(sink.clone())
    .build()
    .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.download_success, 1);
    assert_eq!(report.stats.download_fail, 2);
    assert_eq!(
        sink.urls(),
        vec!["failed:https://example.com/down".to_string()]
    );

    // the clean error-callback run counts as a failed parse; the failure
    // without an error callback is not a parse at all
    assert_eq!(report.stats.parse_success, 1);
    assert_eq!(report.stats.parse_fail, 1);
}

/// Spider that hands out request batches from a fixed list of tasks
struct TaskSpider {
    tasks: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Spider for TaskSpider {
    fn name(&self) -> &str {
        "tasks"
    }

    fn start_requests(&self) -> RequestStream {
        output::requests(vec![Request::get("https://example.com/start")])
    }

    async fn task_requests(&self) -> Option<RequestStream> {
        let batch = self.tasks.lock().pop()?;
        let requests: Vec<Request> = batch.into_iter().map(Request::get).collect();
        Some(output::requests(requests))
    }

    fn parse(&self, _response: Response) -> OutputStream {
        output::empty()
    }
}

#[tokio::test]
async fn test_task_batches_run_after_start_requests() {
    let fetcher = Arc::new(MemoryFetcher::default());
    let spider = TaskSpider {
        tasks: Mutex::new(vec![
            vec!["https://example.com/task/2".to_string()],
            vec![
                "https://example.com/task/1a".to_string(),
                "https://example.com/task/1b".to_string(),
            ],
        ]),
    };
    let engine = EngineBuilder::new(spider)
        .config(create_test_config(1))
        .fetcher(SharedFetcher(fetcher.clone()))
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.download_success, 4);
    let fetched = fetcher.fetched();
    assert_eq!(fetched[0], "https://example.com/start");
    assert_eq!(fetched[3], "https://example.com/task/2");
}

/// Spider whose generator fails half way
struct BrokenGeneratorSpider;

#[async_trait]
impl Spider for BrokenGeneratorSpider {
    fn name(&self) -> &str {
        "broken"
    }

    fn start_requests(&self) -> RequestStream {
        use futures::StreamExt;
        futures::stream::iter(vec![
            Ok(Request::get("https://example.com/first")),
            Err(SpiderError::Generator("seed file truncated".to_string())),
            Ok(Request::get("https://example.com/never")),
        ])
        .boxed()
    }

    fn parse(&self, _response: Response) -> OutputStream {
        output::empty()
    }
}

#[tokio::test]
async fn test_generator_error_closes_generator() {
    let fetcher = Arc::new(MemoryFetcher::default());
    let engine = EngineBuilder::new(BrokenGeneratorSpider)
        .config(create_test_config(1))
        .fetcher(SharedFetcher(fetcher.clone()))
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.download_success, 1);
    assert_eq!(fetcher.fetched(), vec!["https://example.com/first".to_string()]);
}

#[tokio::test]
async fn test_engines_sharing_a_lock_store_fetch_once() {
    let store = Arc::new(MemoryLockStore::new());
    let fetcher = Arc::new(MemoryFetcher::with_delay(Duration::from_millis(5)));

    let mut config = create_test_config(2);
    config.distributed.enabled = true;
    config.distributed.redis_url = Some("redis://127.0.0.1:6379/0".to_string());

    let build = || {
        EngineBuilder::new(ListSpider::new(urls(6)))
            .config(config.clone())
            .fetcher(SharedFetcher(fetcher.clone()))
            .lock_store(store.clone())
            .build()
            .unwrap()
    };
    let first = build();
    let second = build();

    let (a, b) = tokio::join!(first.run(), second.run());
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut fetched = fetcher.fetched();
    fetched.sort();
    assert_eq!(fetched, urls(6));
    assert_eq!(a.stats.download_success + b.stats.download_success, 6);
    assert_eq!(a.stats.lock_contended + b.stats.lock_contended, 6);

    // Queued and running markers are gone; only the locks remain
    assert!(store.keys_with_prefix("sumi:list:queued").is_empty());
    assert!(store.keys_with_prefix("sumi:list:running").is_empty());
    assert_eq!(store.keys_with_prefix("sumi:list:lock").len(), 6);
}

#[tokio::test]
async fn test_page_spider_over_http() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="{}/page1">Page 1</a>
                    <a href="/page2">Page 2</a>
                    <a href="https://elsewhere.invalid/">Off-site</a>
                    </body></html>"#,
                    base_url
                ))
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>Page 1</title></head><body><a href="/deeper">Deeper</a></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(2);
    config.spider = SpiderConfig {
        name: "pages".to_string(),
        start_urls: vec![format!("{}/", base_url)],
        max_depth: 1,
    };

    let sink = CollectingSink::default();
    let engine = EngineBuilder::new(PageSpider::new(config.spider.clone()).unwrap())
        .config(config)
        .sink(sink.clone())
        .from_registry(&PluginRegistry::with_defaults())
        .await
        .unwrap()
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.stats.download_success, 3);
    assert_eq!(report.stats.status_codes.get(&200), Some(&2));
    assert_eq!(report.stats.status_codes.get(&404), Some(&1));
    assert_eq!(
        sink.urls(),
        vec![
            format!("{}/", base_url),
            format!("{}/page1", base_url),
            format!("{}/page2", base_url),
        ]
    );

    let records = sink.records();
    let home = records
        .iter()
        .find(|r| r.get("url").and_then(|v| v.as_str()) == Some(&format!("{}/", base_url)))
        .unwrap();
    assert_eq!(home.get("title"), Some(&serde_json::json!("Home")));
}

#[tokio::test]
async fn test_records_persist_to_sqlite() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Only</title></head><body></body></html>"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("records.db");

    let mut config = create_test_config(1);
    config.spider.start_urls = vec![format!("{}/", mock_server.uri())];
    config.pipeline.sinks = vec!["sqlite".to_string()];
    config.sqlite.database_path = Some(db_path.to_string_lossy().to_string());

    let engine = EngineBuilder::new(PageSpider::new(config.spider.clone()).unwrap())
        .config(config)
        .from_registry(&PluginRegistry::with_defaults())
        .await
        .unwrap()
        .build()
        .unwrap();

    let report = engine.run().await.unwrap();
    assert_eq!(report.pipeline.success_count, 1);

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"page\"", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
