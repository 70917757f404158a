//! Shared fixtures for the integration tests.
//!
//! Nothing here needs Chromium or Postgres: people live in the in-memory
//! directory, PDFs come from a scripted exporter, and artifacts go to a
//! HashMap-backed storage.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use carnet_server::auth::generate_access_token;
use carnet_server::carnet::template::count_cards;
use carnet_server::carnet::{
    CarnetError, HtmlDocument, InMemoryGenerationStore, PdfExporter, PipelineEvent, ProgressSink,
};
use carnet_server::config::AppConfig;
use carnet_server::people::{EducationLevel, InMemoryPersonDirectory, PersonKind, PersonRecord};
use carnet_server::storage::{ObjectStorage, StorageError};
use carnet_server::{AppState, TenantId};

/// Mock implementation of ObjectStorage for testing
#[derive(Default)]
pub struct MockObjectStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn seed(&self, path: &str, data: &[u8]) {
        self.files.lock().insert(path.to_string(), data.to_vec());
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Remote("bucket unavailable".to_string()));
        }
        self.files.lock().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.files.lock().remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("http://test.example.com/{}", path)
    }
}

/// What the fake exporter does on one call.
#[derive(Debug, Clone)]
pub enum ExportStep {
    /// Return a PDF after `delay`.
    Succeed { delay: Duration },
    /// Sleep for `after`, then report a timeout.
    TimeOut { after: Duration },
    Fail(&'static str),
    Panic,
}

/// Scripted stand-in for the headless browser. Steps are consumed in order;
/// once the script is exhausted every call succeeds immediately.
#[derive(Default)]
pub struct FakeExporter {
    script: Mutex<VecDeque<ExportStep>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    last_html: Mutex<Option<String>>,
}

/// Counts one running export; released even if the export panics.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(steps: impl IntoIterator<Item = ExportStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of exports that ran at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// HTML handed to the most recent export.
    pub fn last_html(&self) -> Option<String> {
        self.last_html.lock().clone()
    }
}

/// Deterministic PDF bytes for a document: the card count and card order are
/// embedded so tests can check what was printed.
pub fn fake_pdf(html: &str) -> Vec<u8> {
    format!(
        "%PDF-1.7\n% cards={}\n% order={}\n%%EOF\n",
        count_cards(html),
        card_order(html).join(",")
    )
    .into_bytes()
}

/// `data-person` keys of the cards in document order.
pub fn card_order(html: &str) -> Vec<String> {
    html.split("data-person=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

pub fn cards_in_pdf(pdf: &[u8]) -> usize {
    let text = String::from_utf8_lossy(pdf);
    text.lines()
        .find_map(|line| line.strip_prefix("% cards="))
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl PdfExporter for FakeExporter {
    async fn export(&self, document: &HtmlDocument) -> Result<Vec<u8>, CarnetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _running = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        *self.last_html.lock() = Some(document.html.clone());
        let step = self.script.lock().pop_front();
        match step {
            None => Ok(fake_pdf(&document.html)),
            Some(ExportStep::Succeed { delay }) => {
                tokio::time::sleep(delay).await;
                Ok(fake_pdf(&document.html))
            }
            Some(ExportStep::TimeOut { after }) => {
                tokio::time::sleep(after).await;
                Err(CarnetError::RenderTimeout(after))
            }
            Some(ExportStep::Fail(reason)) => Err(CarnetError::ExportFailure(reason.to_string())),
            Some(ExportStep::Panic) => panic!("browser adapter exploded"),
        }
    }
}

/// Collects every event the pipeline emits.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.lock().push(event);
    }
}

pub fn student(tenant: TenantId, id: i64, grade: &str, section: &str) -> PersonRecord {
    PersonRecord {
        id,
        kind: PersonKind::Student,
        tenant_id: tenant,
        level: Some(EducationLevel::Primaria),
        grade: Some(grade.to_string()),
        section: Some(section.to_string()),
        full_name: Some(format!("Estudiante {}", id)),
        document_number: Some(format!("7{:07}", id)),
        code: Some(format!("EST-{:04}", id)),
        photo: Some(format!("photos/students/{}.jpg", id)),
    }
}

pub fn teacher(tenant: TenantId, id: i64) -> PersonRecord {
    PersonRecord {
        id,
        kind: PersonKind::Teacher,
        tenant_id: tenant,
        level: Some(EducationLevel::Primaria),
        grade: None,
        section: None,
        full_name: Some(format!("Docente {}", id)),
        document_number: Some(format!("4{:07}", id)),
        code: Some(format!("DOC-{:04}", id)),
        photo: Some(format!("photos/teachers/{}.jpg", id)),
    }
}

/// Students 1..=n in PRIMARIA, grade 3, section A.
pub fn seed_class(directory: &InMemoryPersonDirectory, tenant: TenantId, n: i64) {
    for id in 1..=n {
        directory.insert(student(tenant, id, "3", "A"));
    }
}

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        queue_workers: 2,
        queue_capacity: 8,
        max_attempts: 2,
        html_batch_size: 10,
        pdf_heartbeat: Duration::from_millis(10),
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub directory: Arc<InMemoryPersonDirectory>,
    pub storage: Arc<MockObjectStorage>,
    pub exporter: Arc<FakeExporter>,
}

pub fn build_app(exporter: FakeExporter) -> TestApp {
    build_app_with_config(exporter, test_config())
}

pub fn build_app_with_config(exporter: FakeExporter, config: AppConfig) -> TestApp {
    let directory = Arc::new(InMemoryPersonDirectory::new());
    let storage = Arc::new(MockObjectStorage::new());
    let exporter = Arc::new(exporter);
    let state = AppState::from_parts(
        config,
        directory.clone(),
        Arc::new(InMemoryGenerationStore::new()),
        storage.clone(),
        exporter.clone(),
    );
    TestApp {
        state,
        directory,
        storage,
        exporter,
    }
}

pub fn bearer(tenant: TenantId) -> (&'static str, String) {
    let token = generate_access_token("user-1", "secretaria", tenant, TEST_JWT_SECRET).expect("token");
    ("Authorization", format!("Bearer {}", token))
}

/// Poll `check` until it returns `Some` or the deadline passes.
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
