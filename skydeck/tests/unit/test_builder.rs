//! Build executor tests with in-memory store and broker

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use skydeck::broker::memory::MemoryBroker;
use skydeck::broker::Broker;
use skydeck::builder::executor::{BuildExecutor, BuildPlan};
use skydeck::builder::git::Checkout;
use skydeck::errors::PlatformError;
use skydeck::slug::Slug;
use skydeck::store::memory::MemoryStore;
use skydeck::store::ObjectStore;

use crate::common::{in_order, messages_until};

const STORE_URL: &str = "https://sites.store.example";

/// Writes a small static site into `dist`
const SITE_BUILD: &str = "mkdir -p dist/assets \
    && printf '<script src=\"/assets/app.js\"></script>' > dist/index.html \
    && printf 'console.log(1)' > dist/assets/app.js \
    && echo built \
    && echo 'deprecated dependency' >&2";

fn plan(work_dir: &Path, command: &str, abort_on_build_failure: bool) -> BuildPlan {
    BuildPlan {
        repository_url: "file:///unused.git".to_string(),
        slug: Slug::parse("brave-tiger").unwrap(),
        work_dir: work_dir.to_path_buf(),
        build_command: command.to_string(),
        output_dir: "dist".into(),
        store_public_url: STORE_URL.to_string(),
        abort_on_build_failure,
    }
}

/// A work dir with sources already present, so no clone happens
fn checked_out() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("package.json"), "{}").unwrap();
    dir
}

struct FailingStore;

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, key: &str, _body: Vec<u8>, _content_type: &str) -> Result<(), PlatformError> {
        Err(PlatformError::StoreError(format!("access denied for {}", key)))
    }
}

#[tokio::test]
async fn test_build_uploads_and_reports_progress() {
    let dir = checked_out();
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-brave-tiger").await.unwrap();

    let report = BuildExecutor::new(plan(dir.path(), SITE_BUILD, false), store.clone(), broker.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.checkout, Checkout::Existing);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(
        report.uploaded,
        vec![
            "__outputs/brave-tiger/assets/app.js",
            "__outputs/brave-tiger/index.html"
        ]
    );

    let index = store.get("__outputs/brave-tiger/index.html").unwrap();
    assert_eq!(index.content_type, "text/html");
    assert_eq!(
        String::from_utf8(index.body).unwrap(),
        "<script src=\"https://sites.store.example/__outputs/brave-tiger/assets/app.js\"></script>"
    );
    let script = store.get("__outputs/brave-tiger/assets/app.js").unwrap();
    assert_eq!(script.body, b"console.log(1)");

    let messages = messages_until(&mut progress, "completed uploading files").await;
    assert_eq!(messages[0], "starting build process");
    assert!(messages.contains(&"built".to_string()));
    assert!(messages.contains(&"error occurred - deprecated dependency".to_string()));
    assert!(in_order(
        &messages,
        &[
            "starting build process",
            "build process completed successfully",
            "uploading assets/app.js",
            "uploaded assets/app.js",
            "uploading index.html",
            "uploaded index.html",
            "completed uploading files",
        ]
    ));
}

#[tokio::test]
async fn test_output_is_published_before_the_build_exits() {
    let dir = checked_out();
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-brave-tiger").await.unwrap();
    let command = format!(
        "echo compiling; while [ ! -f go ]; do sleep 0.05; done; {}",
        SITE_BUILD
    );

    let executor = BuildExecutor::new(plan(dir.path(), &command, false), store.clone(), broker);
    let build = tokio::spawn(async move { executor.run().await });

    let messages = messages_until(&mut progress, "compiling").await;
    assert_eq!(messages, vec!["starting build process", "compiling"]);
    assert!(!build.is_finished());
    assert!(store.keys().is_empty());

    std::fs::write(dir.path().join("go"), "").unwrap();
    let report = build.await.unwrap().unwrap();
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(store.keys().len(), 2);
}

#[tokio::test]
async fn test_failed_build_still_uploads_by_default() {
    let dir = checked_out();
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let command = format!("{} && exit 2", SITE_BUILD);

    let report = BuildExecutor::new(plan(dir.path(), &command, false), store.clone(), broker)
        .run()
        .await
        .unwrap();

    assert_eq!(report.exit_code, Some(2));
    assert_eq!(store.keys().len(), 2);
}

#[tokio::test]
async fn test_failed_build_aborts_when_hardened() {
    let dir = checked_out();
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-").await.unwrap();
    let command = format!("{} && exit 2", SITE_BUILD);

    let result = BuildExecutor::new(plan(dir.path(), &command, true), store.clone(), broker.clone())
        .run()
        .await;

    assert!(matches!(result, Err(PlatformError::BuildError(_))));
    assert!(store.keys().is_empty());
    let messages = messages_until(&mut progress, "build process failed with exit code 2").await;
    assert!(!messages.contains(&"build process completed successfully".to_string()));
}

#[tokio::test]
async fn test_missing_output_dir_is_reported() {
    let dir = checked_out();
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-").await.unwrap();

    let result = BuildExecutor::new(
        plan(dir.path(), "echo nothing to build", false),
        Arc::new(MemoryStore::new()),
        broker.clone(),
    )
    .run()
    .await;

    assert!(result.is_err());
    let messages = messages_until(&mut progress, "build process completed successfully").await;
    assert!(messages.contains(&"nothing to build".to_string()));
    let next = messages_until_error(&mut progress).await;
    assert!(next.contains("does not exist"), "{}", next);
}

#[tokio::test]
async fn test_store_failure_aborts_upload() {
    let dir = checked_out();
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-").await.unwrap();

    let result = BuildExecutor::new(plan(dir.path(), SITE_BUILD, false), Arc::new(FailingStore), broker.clone())
        .run()
        .await;

    assert!(matches!(result, Err(PlatformError::StoreError(_))));
    let messages = messages_until(&mut progress, "uploading assets/app.js").await;
    assert!(!messages.contains(&"completed uploading files".to_string()));
    let error = messages_until_error(&mut progress).await;
    assert!(error.contains("access denied"), "{}", error);
}

#[tokio::test]
async fn test_clone_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(MemoryBroker::default());
    let mut progress = broker.subscribe_prefix("logs-").await.unwrap();
    let mut plan = plan(&dir.path().join("sources"), SITE_BUILD, false);
    plan.repository_url = "file:///definitely/not/a/repo.git".to_string();

    let result = BuildExecutor::new(plan, Arc::new(MemoryStore::new()), broker.clone())
        .run()
        .await;

    assert!(matches!(result, Err(PlatformError::BuildError(_))));
    let error = messages_until_error(&mut progress).await;
    assert!(error.starts_with("error occurred - "));
}

/// Next progress message carrying the error prefix
async fn messages_until_error(progress: &mut skydeck::broker::MessageStream) -> String {
    use futures::StreamExt;
    use openapi_server::models::ProgressEvent;

    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(10), progress.next())
            .await
            .expect("timed out waiting for an error")
            .expect("broker stream ended");
        let event: ProgressEvent = message.parse_json().unwrap();
        if event.message.starts_with("error occurred - ") && !event.message.contains("deprecated") {
            return event.message;
        }
    }
}
