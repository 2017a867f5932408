// Tests for the page scan pipeline

use async_trait::async_trait;
use sitemaster_core::config::ScanConfig;
use sitemaster_core::error::{PassError, StoreError};
use sitemaster_core::marks::{InMemoryMarkCatalog, Mark, MarkCatalog, MarkDefinition};
use sitemaster_core::metrics::{builtin_registry, LinkMetric};
use sitemaster_core::plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};
use sitemaster_core::registry::PluginRegistry;
use sitemaster_core::scan::{PageScanResult, PassOutcome, PassState, ScanOrchestrator, ScanStore};
use sitemaster_scanner::{DocumentModel, LinkCheckConfig, LinkValidator, PageFetcher, ScanError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &[u8] = b"<html><head><title>Home</title></head><body><p>Hello</body></html>";

/// Emits a fixed list of usages.
struct FixedPlugin {
    name: &'static str,
    usages: Vec<MarkUsage>,
}

#[async_trait(?Send)]
impl MetricPlugin for FixedPlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _context: &PageContext, _document: &DocumentModel) -> Result<Vec<MarkUsage>, PluginError> {
        Ok(self.usages.clone())
    }
}

struct FailingPlugin;

#[async_trait(?Send)]
impl MetricPlugin for FailingPlugin {
    fn name(&self) -> &str {
        "metric_failing"
    }

    async fn run(&self, context: &PageContext, _document: &DocumentModel) -> Result<Vec<MarkUsage>, PluginError> {
        Err(PluginError::run(self.name(), context.url.as_str(), "always fails"))
    }
}

struct PanickingPlugin;

#[async_trait(?Send)]
impl MetricPlugin for PanickingPlugin {
    fn name(&self) -> &str {
        "metric_panicking"
    }

    async fn run(&self, _context: &PageContext, _document: &DocumentModel) -> Result<Vec<MarkUsage>, PluginError> {
        panic!("plugin blew up");
    }
}

/// Cancels the pass it runs in.
struct CancellingPlugin;

#[async_trait(?Send)]
impl MetricPlugin for CancellingPlugin {
    fn name(&self) -> &str {
        "metric_cancelling"
    }

    async fn run(&self, context: &PageContext, _document: &DocumentModel) -> Result<Vec<MarkUsage>, PluginError> {
        context.cancel.cancel();
        Ok(vec![MarkUsage::new("cancelled-mark", 1)])
    }
}

struct FailingStore;

impl ScanStore for FailingStore {
    fn save(&self, _result: &PageScanResult) -> Result<(), StoreError> {
        Err(StoreError::NotFound("page_scans".to_string()))
    }
}

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<String>>,
}

impl ScanStore for RecordingStore {
    fn save(&self, result: &PageScanResult) -> Result<(), StoreError> {
        self.saved.lock().unwrap().push(result.page_url.clone());
        Ok(())
    }
}

struct BrokenCatalog;

impl MarkCatalog for BrokenCatalog {
    fn mark(&self, machine_name: &str) -> Result<Mark, StoreError> {
        Err(StoreError::NotFound(machine_name.to_string()))
    }

    fn define(&self, definition: &MarkDefinition) -> Result<Mark, StoreError> {
        Err(StoreError::NotFound(definition.machine_name.clone()))
    }
}

/// Serves pages from memory; unknown URLs fail.
struct MapFetcher {
    pages: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> sitemaster_scanner::error::Result<Vec<u8>> {
        self.pages.get(url).cloned().ok_or_else(|| ScanError::FetchFailed {
            url: url.to_string(),
            reason: "HTTP 404".to_string(),
        })
    }
}

fn context(url: &str) -> PageContext {
    PageContext::new(Url::parse(url).unwrap()).with_scan_id("scan-1")
}

fn orchestrator(plugins: Vec<Arc<dyn MetricPlugin>>) -> ScanOrchestrator {
    ScanOrchestrator::new(
        Arc::new(PluginRegistry::with_plugins(plugins)),
        Arc::new(InMemoryMarkCatalog::new()),
    )
}

fn fixed(name: &'static str, usages: Vec<MarkUsage>) -> Arc<dyn MetricPlugin> {
    Arc::new(FixedPlugin { name, usages })
}

fn delivered(outcome: &PassOutcome) -> &PageScanResult {
    match outcome {
        PassOutcome::Delivered(pass) => &pass.result,
        PassOutcome::Failed(pass) => panic!("expected delivered pass, got {}", pass.error),
    }
}

// ============================================================================
// Single Pass Tests
// ============================================================================

#[tokio::test]
async fn test_pass_delivers_marks_in_registry_order() {
    let orchestrator = orchestrator(vec![
        fixed("metric_b", vec![MarkUsage::new("mark-b", 2)]),
        fixed("metric_a", vec![MarkUsage::new("mark-a", 1), MarkUsage::new("mark-c", 3)]),
    ]);

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    assert_eq!(outcome.state(), PassState::Delivered);
    let result = delivered(&outcome);
    assert_eq!(result.scan_id, "scan-1");
    assert_eq!(result.page_url, "http://www.test.com/");
    assert_eq!(result.title.as_deref(), Some("Home"));

    let names: Vec<&str> = result.marks.iter().map(|m| m.mark.machine_name.as_str()).collect();
    assert_eq!(names, vec!["mark-b", "mark-a", "mark-c"]);
    assert_eq!(result.marks[0].plugin, "metric_b");
    assert_eq!(result.total_marks(), 6);
}

#[tokio::test]
async fn test_zero_count_usage_dropped() {
    let orchestrator = orchestrator(vec![fixed(
        "metric_a",
        vec![MarkUsage::new("mark-zero", 0), MarkUsage::new("mark-one", 1)],
    )]);

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    let result = delivered(&outcome);
    assert_eq!(result.marks.len(), 1);
    assert_eq!(result.mark_count("mark-zero"), 0);
    assert_eq!(result.mark_count("mark-one"), 1);
}

#[tokio::test]
async fn test_failing_and_panicking_plugins_are_isolated() {
    let orchestrator = orchestrator(vec![
        Arc::new(FailingPlugin),
        fixed("metric_a", vec![MarkUsage::new("mark-a", 1)]),
        Arc::new(PanickingPlugin),
        fixed("metric_b", vec![MarkUsage::new("mark-b", 1)]),
    ]);

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    assert!(outcome.is_delivered());
    let result = delivered(&outcome);
    let order: Vec<&str> = result.marks.iter().map(|m| m.mark.machine_name.as_str()).collect();
    assert_eq!(order, vec!["mark-a", "mark-b"]);
    let plugins: Vec<&str> = result.marks.iter().map(|m| m.plugin.as_str()).collect();
    assert_eq!(plugins, vec!["metric_a", "metric_b"]);
    assert_eq!(result.mark_count("mark-a"), 1);
    assert_eq!(result.mark_count("mark-b"), 1);

    let errors = outcome.plugin_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].plugin(), "metric_failing");
    assert_eq!(errors[1].plugin(), "metric_panicking");
    assert!(errors[1].to_string().contains("plugin blew up"));
}

#[tokio::test]
async fn test_plugin_failure_on_every_page() {
    let orchestrator = orchestrator(vec![
        Arc::new(FailingPlugin),
        fixed("metric_a", vec![MarkUsage::new("mark-a", 1)]),
    ]);

    for url in ["http://www.test.com/", "http://www.test.com/about"] {
        let outcome = orchestrator.scan_page(&context(url), PAGE).await;
        assert!(outcome.is_delivered());
        assert_eq!(delivered(&outcome).mark_count("mark-a"), 1);
        assert_eq!(outcome.plugin_errors().len(), 1);
    }
}

#[tokio::test]
async fn test_unparseable_page_fails_pass() {
    let orchestrator = orchestrator(vec![fixed("metric_a", vec![MarkUsage::new("mark-a", 1)])]);

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), b"\x00\x01\x02").await;

    assert_eq!(outcome.state(), PassState::Failed);
    assert!(outcome.result().is_none());
    match outcome {
        PassOutcome::Failed(pass) => assert!(matches!(pass.error, PassError::Parse(_))),
        PassOutcome::Delivered(_) => panic!("expected failed pass"),
    }
}

#[tokio::test]
async fn test_empty_page_fails_pass() {
    let orchestrator = orchestrator(Vec::new());

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), b"   ").await;

    assert_eq!(outcome.state(), PassState::Failed);
}

#[tokio::test]
async fn test_no_plugins_delivers_empty_result() {
    let orchestrator = orchestrator(Vec::new());

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    assert!(delivered(&outcome).marks.is_empty());
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let orchestrator = orchestrator(vec![fixed("metric_a", vec![MarkUsage::new("mark-a", 1)])]);
    let context = context("http://www.test.com/");
    context.cancel.cancel();

    let outcome = orchestrator.scan_page(&context, PAGE).await;

    match outcome {
        PassOutcome::Failed(pass) => assert!(matches!(pass.error, PassError::Cancelled)),
        PassOutcome::Delivered(_) => panic!("expected cancelled pass"),
    }
}

#[tokio::test]
async fn test_cancelled_between_plugins() {
    let store = Arc::new(RecordingStore::default());
    let orchestrator = orchestrator(vec![
        Arc::new(FailingPlugin),
        Arc::new(CancellingPlugin),
        fixed("metric_a", vec![MarkUsage::new("mark-a", 1)]),
    ])
    .with_store(store.clone());

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    assert_eq!(outcome.state(), PassState::Failed);
    // Errors gathered before cancellation are kept
    assert_eq!(outcome.plugin_errors().len(), 1);
    assert!(store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_url_cancelled_while_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PAGE).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let fetcher = sitemaster_scanner::HttpFetcher::new(&LinkCheckConfig::default()).unwrap();
    let orchestrator = orchestrator(Vec::new());
    let context = context(&format!("{}/slow", server.uri()));

    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let outcome = orchestrator.scan_url(&context, &fetcher).await;

    match outcome {
        PassOutcome::Failed(pass) => assert!(matches!(pass.error, PassError::Cancelled)),
        PassOutcome::Delivered(_) => panic!("expected cancelled pass"),
    }
}

// ============================================================================
// Collaborator Failure Tests
// ============================================================================

#[tokio::test]
async fn test_store_failure_still_delivers() {
    let orchestrator = orchestrator(vec![fixed("metric_a", vec![MarkUsage::new("mark-a", 1)])])
        .with_store(Arc::new(FailingStore));

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    match outcome {
        PassOutcome::Delivered(pass) => {
            assert_eq!(pass.result.mark_count("mark-a"), 1);
            assert_eq!(pass.warnings.len(), 1);
            assert!(pass.warnings[0].contains("not persisted"));
        }
        PassOutcome::Failed(pass) => panic!("expected delivered pass, got {}", pass.error),
    }
}

#[tokio::test]
async fn test_store_receives_delivered_result() {
    let store = Arc::new(RecordingStore::default());
    let orchestrator = orchestrator(Vec::new()).with_store(store.clone());

    orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    assert_eq!(*store.saved.lock().unwrap(), vec!["http://www.test.com/"]);
}

#[tokio::test]
async fn test_catalog_failure_drops_marks_with_warning() {
    let registry = PluginRegistry::with_plugins(vec![fixed("metric_a", vec![MarkUsage::new("mark-a", 1)])]);
    let orchestrator = ScanOrchestrator::new(Arc::new(registry), Arc::new(BrokenCatalog));

    let outcome = orchestrator.scan_page(&context("http://www.test.com/"), PAGE).await;

    match outcome {
        PassOutcome::Delivered(pass) => {
            assert!(pass.result.marks.is_empty());
            assert_eq!(pass.warnings.len(), 1);
            assert!(pass.warnings[0].contains("mark-a"));
        }
        PassOutcome::Failed(pass) => panic!("expected delivered pass, got {}", pass.error),
    }
}

// ============================================================================
// Site Scan Tests
// ============================================================================

#[tokio::test]
async fn test_scan_site_isolates_pages() {
    let mut pages = HashMap::new();
    pages.insert("http://www.test.com/".to_string(), PAGE.to_vec());
    pages.insert("http://www.test.com/blank".to_string(), b"<html><body></body></html>".to_vec());
    pages.insert("http://www.test.com/binary".to_string(), vec![0u8, 1, 2]);
    let fetcher = MapFetcher { pages };

    let orchestrator = orchestrator(vec![
        Arc::new(sitemaster_core::metrics::TitleMetric),
        Arc::new(FailingPlugin),
    ]);

    let contexts = vec![
        context("http://www.test.com/"),
        context("http://www.test.com/missing"),
        context("http://www.test.com/binary"),
        context("http://www.test.com/blank"),
    ];

    let outcomes = orchestrator.scan_site(contexts, &fetcher, 3).await;

    assert_eq!(outcomes.len(), 4);
    let urls: Vec<&str> = outcomes.iter().map(|o| o.page_url()).collect();
    assert_eq!(
        urls,
        vec![
            "http://www.test.com/",
            "http://www.test.com/missing",
            "http://www.test.com/binary",
            "http://www.test.com/blank",
        ]
    );

    assert!(outcomes[0].is_delivered());
    assert_eq!(delivered(&outcomes[0]).mark_count("title-missing"), 0);
    match &outcomes[1] {
        PassOutcome::Failed(pass) => assert!(matches!(pass.error, PassError::Fetch(_))),
        PassOutcome::Delivered(_) => panic!("expected failed fetch"),
    }
    assert_eq!(outcomes[2].state(), PassState::Failed);
    assert_eq!(delivered(&outcomes[3]).mark_count("title-missing"), 1);
}

// ============================================================================
// End-to-end Link Tests
// ============================================================================

#[tokio::test]
async fn test_link_metric_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", format!("{}/ok", server.uri())))
        .mount(&server)
        .await;

    let page = format!(
        r##"<html><head><title>Links</title></head><body>
            <a href="{0}/ok">ok</a>
            <a href="{0}/old">old</a>
            <a href="mailto:test@test.com">mail</a>
            <a href="#top">top</a>
            <a href="javascript:void(0)">js</a>
        </body></html>"##,
        server.uri()
    );

    let validator = LinkValidator::new(LinkCheckConfig::default()).unwrap();
    let orchestrator = orchestrator(vec![Arc::new(LinkMetric::new(validator))]);

    let outcome = orchestrator
        .scan_page(&context(&format!("{}/", server.uri())), page.as_bytes())
        .await;

    let result = delivered(&outcome);
    assert_eq!(result.mark_count("link-redirect"), 1);
    assert_eq!(result.mark_count("link-broken"), 0);
    assert_eq!(result.mark_count("link-timeout"), 0);
    assert_eq!(result.mark_count("link-connection-failure"), 0);
    assert!(outcome.plugin_errors().is_empty());
}

#[tokio::test]
async fn test_builtin_registry_reports_broken_links() {
    let server = MockServer::start().await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let page = format!(
        r#"<html><body><a href="{0}/gone">gone</a><img src="/a.png"></body></html>"#,
        server.uri()
    );

    let registry = builtin_registry(&ScanConfig::default()).unwrap();
    let orchestrator = ScanOrchestrator::new(Arc::new(registry), Arc::new(InMemoryMarkCatalog::new()));

    let outcome = orchestrator
        .scan_page(&context(&format!("{}/", server.uri())), page.as_bytes())
        .await;

    let result = delivered(&outcome);
    assert_eq!(result.mark_count("link-broken"), 1);
    assert_eq!(result.mark_count("title-missing"), 1);
    assert_eq!(result.mark_count("image-alt-missing"), 1);

    let broken = result
        .marks
        .iter()
        .find(|m| m.mark.machine_name == "link-broken")
        .unwrap();
    assert_eq!(broken.details, vec![format!("{}/gone (HTTP 404)", server.uri())]);
}
