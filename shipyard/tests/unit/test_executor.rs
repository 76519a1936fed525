//! Build executor tests against an in-memory bus and content store

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOptions,
    PutOptions, PutPayload, PutResult,
};
use shipyard::bus::{LogBus, MemoryBus, Subscription, Topics};
use shipyard::deploy::executor::{BuildExecutor, ExecutorOptions};
use shipyard::deploy::git::Fetcher;
use shipyard::deploy::publisher::LogPublisher;
use shipyard::errors::PipelineError;
use shipyard::models::deployment::{DeploymentStatus, LogEvent};
use shipyard::storage::content::ContentStore;
use shipyard::storage::layout::WorkspaceLayout;
use shipyard::storage::settings::BuildSettings;
use tempfile::TempDir;

/// Writes a tiny site whose index names the source it was fetched from
struct FixtureFetcher;

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        publisher: &LogPublisher,
    ) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(
            dest.join("index.html"),
            format!("<h1>{}</h1>", source_url),
        )
        .await?;
        publisher.log("fixture checked out").await;
        Ok(())
    }
}

struct FailingFetcher;

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(
        &self,
        _source_url: &str,
        _dest: &Path,
        _publisher: &LogPublisher,
    ) -> Result<(), PipelineError> {
        Err(PipelineError::FetchFailure(
            "repository not found".to_string(),
        ))
    }
}

const SITE_BUILD: &str =
    "mkdir -p dist/assets && cp index.html dist/index.html && echo 'body{}' > dist/assets/site.css && echo built";

/// In-memory store whose Nth put fails
#[derive(Debug)]
struct FlakyStore {
    inner: InMemory,
    puts: AtomicUsize,
    fail_at: usize,
}

impl FlakyStore {
    fn failing_put(fail_at: usize) -> Self {
        Self {
            inner: InMemory::new(),
            puts: AtomicUsize::new(0),
            fail_at,
        }
    }
}

impl fmt::Display for FlakyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlakyStore")
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_opts(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(object_store::Error::Generic {
                store: "FlakyStore",
                source: format!("refusing {}", location).into(),
            });
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjectPath,
        opts: PutMultipartOptions,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&ObjectPath>) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
    ) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

const THREE_FILE_BUILD: &str =
    "mkdir -p dist && echo a > dist/a.txt && echo b > dist/b.txt && echo c > dist/c.txt";

struct Harness {
    bus: Arc<MemoryBus>,
    store: ContentStore,
    workspace: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(ContentStore::in_memory())
    }

    fn with_store(store: ContentStore) -> Self {
        Self {
            bus: Arc::new(MemoryBus::new()),
            store,
            workspace: tempfile::tempdir().unwrap(),
        }
    }

    fn options(&self, build_cmd: &str, step_timeout: Duration) -> ExecutorOptions {
        ExecutorOptions {
            layout: WorkspaceLayout::new(self.workspace.path()),
            build: BuildSettings {
                install_cmd: String::new(),
                build_cmd: build_cmd.to_string(),
                output_dir: "dist".to_string(),
            },
            step_timeout,
            upload_concurrency: 4,
            upload_rollback: true,
        }
    }

    /// Executor uploading one file at a time, with rollback as given
    fn sequential_executor(&self, build_cmd: &str, rollback: bool) -> BuildExecutor {
        let options = ExecutorOptions {
            upload_concurrency: 1,
            upload_rollback: rollback,
            ..self.options(build_cmd, Duration::from_secs(10))
        };
        BuildExecutor::new(
            options,
            self.bus.clone(),
            self.store.clone(),
            Arc::new(FixtureFetcher),
        )
    }

    fn executor(&self, build_cmd: &str, fetcher: Arc<dyn Fetcher>) -> BuildExecutor {
        self.executor_with_timeout(build_cmd, fetcher, Duration::from_secs(10))
    }

    fn executor_with_timeout(
        &self,
        build_cmd: &str,
        fetcher: Arc<dyn Fetcher>,
        step_timeout: Duration,
    ) -> BuildExecutor {
        let options = self.options(build_cmd, step_timeout);
        BuildExecutor::new(options, self.bus.clone(), self.store.clone(), fetcher)
    }

    async fn subscribe(&self, deployment_id: &str) -> Subscription {
        self.bus.subscribe(&Topics::logs(deployment_id)).await.unwrap()
    }

    /// Close the bus and collect everything a subscription received
    async fn drain(&self, mut subscription: Subscription) -> Vec<LogEvent> {
        self.bus.shutdown().await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = subscription.recv().await {
            events.push(event);
        }
        events
    }
}

fn assert_contiguous(events: &[LogEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64 + 1, "{:?}", event);
    }
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_successful_deployment_uploads_every_file() {
    let harness = Harness::new();
    let executor = harness.executor(SITE_BUILD, Arc::new(FixtureFetcher));
    let subscription = harness.subscribe("brave-red-fox").await;

    let report = executor
        .run("brave-red-fox", "https://github.com/acme/widgets")
        .await
        .unwrap();
    assert_eq!(report.files_uploaded, 2);

    let index = harness
        .store
        .get("deployments/brave-red-fox/index.html")
        .await
        .unwrap();
    assert_eq!(&index.bytes[..], b"<h1>https://github.com/acme/widgets</h1>");
    assert_eq!(index.content_type.as_deref(), Some("text/html"));

    let css = harness
        .store
        .get("deployments/brave-red-fox/assets/site.css")
        .await
        .unwrap();
    assert_eq!(css.content_type.as_deref(), Some("text/css"));

    let events = harness.drain(subscription).await;
    assert_contiguous(&events);
    assert!(events.iter().any(|e| e.message == "built"));

    let statuses: Vec<DeploymentStatus> = events.iter().filter_map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            DeploymentStatus::Building,
            DeploymentStatus::Uploading,
            DeploymentStatus::Ready
        ]
    );
    let last = events.last().unwrap();
    assert_eq!(last.message, "Deployment complete: 2 files uploaded");
    assert!(events.iter().all(|e| !e.message.starts_with("ERROR")));
}

#[tokio::test]
async fn test_missing_output_fails_once_without_uploads() {
    let harness = Harness::new();
    let executor = harness.executor("echo nothing to see", Arc::new(FixtureFetcher));
    let subscription = harness.subscribe("site").await;

    let result = executor
        .run("site", "https://github.com/acme/widgets")
        .await;
    assert!(matches!(result, Err(PipelineError::BuildOutputMissing(_))));
    assert!(harness.store.list("deployments").await.unwrap().is_empty());

    let events = harness.drain(subscription).await;
    assert_contiguous(&events);
    let failures: Vec<&LogEvent> = events
        .iter()
        .filter(|e| e.message.starts_with("ERROR"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].status, Some(DeploymentStatus::Failed));
    assert_eq!(events.last().unwrap().status, Some(DeploymentStatus::Failed));
    assert!(events
        .iter()
        .all(|e| e.status != Some(DeploymentStatus::Ready)));
}

#[tokio::test]
async fn test_failing_build_reports_build_failure() {
    let harness = Harness::new();
    let executor = harness.executor("echo compiling && exit 3", Arc::new(FixtureFetcher));
    let subscription = harness.subscribe("site").await;

    let result = executor.run("site", "https://github.com/acme/widgets").await;
    assert!(matches!(result, Err(PipelineError::BuildFailure(_))));

    let events = harness.drain(subscription).await;
    assert!(events.iter().any(|e| e.message == "compiling"));
    let last = events.last().unwrap();
    assert!(last.message.starts_with("ERROR: Build failed"));
}

#[tokio::test]
async fn test_fetch_failure_is_reported() {
    let harness = Harness::new();
    let executor = harness.executor(SITE_BUILD, Arc::new(FailingFetcher));
    let subscription = harness.subscribe("site").await;

    let result = executor.run("site", "https://github.com/acme/missing").await;
    assert!(matches!(result, Err(PipelineError::FetchFailure(_))));

    let events = harness.drain(subscription).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, Some(DeploymentStatus::Building));
    assert_eq!(
        events[1].message,
        "ERROR: Fetch failed: repository not found"
    );
}

#[tokio::test]
async fn test_hung_build_times_out() {
    let harness = Harness::new();
    let executor = harness.executor_with_timeout(
        "sleep 30",
        Arc::new(FixtureFetcher),
        Duration::from_millis(300),
    );
    let subscription = harness.subscribe("site").await;

    let started = std::time::Instant::now();
    let result = executor.run("site", "https://github.com/acme/widgets").await;
    assert!(started.elapsed() < Duration::from_secs(10));

    match result {
        Err(PipelineError::Timeout { step, .. }) => assert_eq!(step, "build"),
        other => panic!("expected timeout, got {:?}", other),
    }
    let events = harness.drain(subscription).await;
    assert!(events
        .last()
        .unwrap()
        .message
        .starts_with("ERROR: Timed out during build"));
}

#[tokio::test]
async fn test_concurrent_deployments_are_isolated() {
    let harness = Harness::new();
    let executor = Arc::new(harness.executor(SITE_BUILD, Arc::new(FixtureFetcher)));
    let sub_a = harness.subscribe("site-a").await;
    let sub_b = harness.subscribe("site-b").await;

    let (a, b) = tokio::join!(
        executor.run("site-a", "https://github.com/acme/alpha"),
        executor.run("site-b", "https://github.com/acme/beta"),
    );
    a.unwrap();
    b.unwrap();

    let index_a = harness.store.get("deployments/site-a/index.html").await.unwrap();
    let index_b = harness.store.get("deployments/site-b/index.html").await.unwrap();
    assert_eq!(&index_a.bytes[..], b"<h1>https://github.com/acme/alpha</h1>");
    assert_eq!(&index_b.bytes[..], b"<h1>https://github.com/acme/beta</h1>");

    harness.bus.shutdown().await.unwrap();
    for (id, mut sub) in [("site-a", sub_a), ("site-b", sub_b)] {
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        assert!(events.iter().all(|e| e.deployment_id == id));
        assert_contiguous(&events);
        assert_eq!(events.last().unwrap().status, Some(DeploymentStatus::Ready));
    }

    // Workspaces are removed after each run
    let mut leftovers = tokio::fs::read_dir(harness.workspace.path()).await.unwrap();
    assert!(leftovers.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_file_names_with_reserved_characters_keep_their_keys() {
    let harness = Harness::new();
    let build = "mkdir -p dist/_next/static/chunks/pages \
        && echo 'export {}' > 'dist/_next/static/chunks/pages/[slug]-ab12.js' \
        && echo 'a{}' > 'dist/a~b.css'";
    let executor = harness.executor(build, Arc::new(FixtureFetcher));

    executor
        .run("site", "https://github.com/acme/widgets")
        .await
        .unwrap();

    assert_eq!(
        harness.store.list("deployments/site").await.unwrap(),
        vec![
            "deployments/site/_next/static/chunks/pages/[slug]-ab12.js".to_string(),
            "deployments/site/a~b.css".to_string(),
        ]
    );
    let chunk = harness
        .store
        .get("deployments/site/_next/static/chunks/pages/[slug]-ab12.js")
        .await
        .unwrap();
    assert_eq!(&chunk.bytes[..], b"export {}\n");
    let css = harness.store.get("deployments/site/a~b.css").await.unwrap();
    assert_eq!(css.content_type.as_deref(), Some("text/css"));
}

async fn run_with_failing_upload(rollback: bool) -> (Harness, Result<(), PipelineError>, Vec<LogEvent>) {
    let store = ContentStore::new(Arc::new(FlakyStore::failing_put(2)));
    let harness = Harness::with_store(store);
    let executor = harness.sequential_executor(THREE_FILE_BUILD, rollback);
    let subscription = harness.subscribe("site").await;

    let result = executor
        .run("site", "https://github.com/acme/widgets")
        .await
        .map(|_| ());
    let events = harness.drain(subscription).await;
    (harness, result, events)
}

fn assert_failed_once(events: &[LogEvent]) {
    assert_contiguous(events);
    let failures: Vec<&LogEvent> = events
        .iter()
        .filter(|e| e.message.starts_with("ERROR"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.starts_with("ERROR: Upload failed"));
    assert_eq!(failures[0].status, Some(DeploymentStatus::Failed));
    assert_eq!(events.last().unwrap().status, Some(DeploymentStatus::Failed));
    assert!(events
        .iter()
        .all(|e| e.status != Some(DeploymentStatus::Ready)));
}

#[tokio::test]
async fn test_single_upload_failure_fails_and_rolls_back() {
    let (harness, result, events) = run_with_failing_upload(true).await;

    assert!(matches!(result, Err(PipelineError::UploadFailure(_))));
    assert_failed_once(&events);
    assert!(events
        .iter()
        .any(|e| e.message.starts_with("Rolling back")));
    assert!(harness.store.list("deployments/site").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_failure_without_rollback_leaves_partial_keys() {
    let (harness, result, events) = run_with_failing_upload(false).await;

    assert!(matches!(result, Err(PipelineError::UploadFailure(_))));
    assert_failed_once(&events);
    assert!(events
        .iter()
        .all(|e| !e.message.starts_with("Rolling back")));
    assert_eq!(harness.store.list("deployments/site").await.unwrap().len(), 1);
}
