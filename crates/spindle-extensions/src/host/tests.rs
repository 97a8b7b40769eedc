//! Unit tests for the extension host.

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use rstest::rstest;
use serde_json::json;
use spindle_sandbox::LogLevel;

use super::*;
use crate::error::StoreError;
use crate::hooks::AFTER_FILE_UPLOAD;
use crate::store::InMemoryExtensionStore;
use crate::tests::{StubExecutor, report};

mock! {
    Store {}
    #[async_trait]
    impl ExtensionStore for Store {
        async fn list(&self) -> Result<Vec<Extension>, StoreError>;
        async fn get(&self, id: &str) -> Result<Extension, StoreError>;
        async fn update(&self, extension: Extension) -> Result<(), StoreError>;
    }
}

fn timeout(id: &str) -> SandboxError {
    SandboxError::ExecutionTimeout {
        extension: id.to_owned(),
        timeout_ms: 30_000,
        logs: Vec::new(),
    }
}

fn host_with(
    extensions: impl IntoIterator<Item = Extension>,
) -> (Arc<InMemoryExtensionStore>, Arc<StubExecutor>, ExtensionHost) {
    let store = Arc::new(InMemoryExtensionStore::with_extensions(extensions));
    let executor = StubExecutor::new();
    let host = ExtensionHost::new(store.clone(), executor.clone());
    (store, executor, host)
}

#[rstest]
#[tokio::test]
async fn load_all_skips_disabled_and_isolates_failures() {
    let (store, executor, host) = host_with([
        Extension::new("good", "Good", "src"),
        Extension::new("bad", "Bad", "src"),
        Extension::new("off", "Off", "src").with_enabled(false),
    ]);
    executor.on_evaluate(
        "bad",
        Err(SandboxError::Evaluation {
            extension: String::from("bad"),
            message: String::from("ReferenceError: x is not defined"),
            stack: None,
            logs: Vec::new(),
        }),
    );

    let summary = host.load_all().await.expect("load all");

    let loaded: Vec<&str> = summary.loaded.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(loaded, ["good"]);
    assert_eq!(summary.skipped, ["off"]);
    let (failed_id, failure) = summary.failed.first().expect("one failure");
    assert_eq!(failed_id, "bad");
    assert!(failure.to_string().contains("x is not defined"));

    let bad = store.get("bad").await.expect("bad record");
    assert_eq!(bad.error_count(), 1);
    assert!(bad.last_error().is_some_and(|message| message.contains("x is not defined")));
    assert!(bad.last_error_at().is_some());
    assert_eq!(store.get("good").await.expect("good").error_count(), 0);
}

#[rstest]
#[tokio::test]
async fn disabled_extensions_refuse_direct_loads() {
    let (_store, executor, host) =
        host_with([Extension::new("off", "Off", "src").with_enabled(false)]);

    assert!(matches!(
        host.load("off").await,
        Err(ExtensionError::Disabled { id }) if id == "off"
    ));
    assert!(executor.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn call_timeouts_are_recorded_on_the_extension() {
    let (store, executor, host) = host_with([Extension::new("slow-tool", "Slow", "src")]);
    executor.on_evaluate("slow-tool", Ok(report(&["crawl"], &[])));
    executor.on_call("slow-tool", "crawl", Err(timeout("slow-tool")));
    host.load("slow-tool").await.expect("load");

    let error = host
        .call("slow", "crawl", Vec::new())
        .await
        .expect_err("timeout");

    assert!(error.is_timeout());
    let record = store.get("slow-tool").await.expect("record");
    assert_eq!(record.error_count(), 1);
}

#[rstest]
#[tokio::test]
async fn missing_functions_are_not_recorded() {
    let (store, executor, host) = host_with([Extension::new("notes", "Notes", "src")]);
    executor.on_evaluate("notes", Ok(report(&["add"], &[])));
    host.load("notes").await.expect("load");

    let error = host
        .call("notes", "remove", Vec::new())
        .await
        .expect_err("missing function");

    assert!(matches!(
        error,
        ExtensionError::Sandbox(SandboxError::FunctionNotFound { .. })
    ));
    assert_eq!(store.get("notes").await.expect("record").error_count(), 0);
}

#[rstest]
#[tokio::test]
async fn trigger_merges_contributions_across_extensions() {
    let (_store, executor, host) = host_with([
        Extension::new("a-describer", "A", "src"),
        Extension::new("b-describer", "B", "src"),
    ]);
    executor.on_evaluate("a-describer", Ok(report(&[], &["a"])));
    executor.on_evaluate("b-describer", Ok(report(&[], &["b"])));
    executor.on_call("a-describer", "a", Err(timeout("a-describer")));
    executor.on_call("b-describer", "b", Ok(json!({ "description": "X" })));
    host.load_all().await.expect("load all");

    let outcome = host
        .trigger(AFTER_FILE_UPLOAD, &json!({ "name": "f.txt" }))
        .await;

    assert_eq!(outcome.merged().get("description"), Some(&json!("X")));
    assert_eq!(outcome.failures.len(), 1);
}

#[rstest]
#[tokio::test]
async fn context_documentation_uses_current_source() {
    let (store, executor, host) = host_with([Extension::new(
        "web-search",
        "Web Search",
        "module.exports = { search: (query) => [] };",
    )]);
    executor.on_evaluate("web-search", Ok(report(&["search"], &[])));
    host.load_all().await.expect("load all");

    let mut edited = store.get("web-search").await.expect("record");
    edited.set_code(
        "module.exports = { search: (query, limit) => [] };",
        time::OffsetDateTime::now_utc(),
    );
    store.insert(edited);

    let docs = host.context_documentation().await.expect("docs");
    assert!(docs.starts_with("### Web Search"));
    assert!(docs.contains("- `webSearch.search(query, limit)`"));
}

#[rstest]
#[tokio::test]
async fn loads_without_captured_logs_write_nothing() {
    let extension = Extension::new("notes", "Notes", "src").with_debug(true);
    let mut store = MockStore::new();
    store
        .expect_get()
        .with(eq("notes"))
        .times(2)
        .returning(move |_| Ok(extension.clone()));
    store
        .expect_update()
        .never();

    let executor = StubExecutor::new();
    let host = ExtensionHost::new(Arc::new(store), executor);

    // No debug lines were captured, so nothing is written back.
    host.load("notes").await.expect("load");
    host.unload("notes").await.expect("unload");
    assert!(host.load("notes").await.is_ok());
}

#[rstest]
#[tokio::test]
async fn failed_writes_do_not_mask_the_load_error() {
    let extension = Extension::new("broken", "Broken", "src");
    let mut store = MockStore::new();
    store
        .expect_get()
        .with(eq("broken"))
        .returning(move |_| Ok(extension.clone()));
    store.expect_update().once().returning(|_| {
        Err(StoreError::Backend {
            message: String::from("disk full"),
            source: None,
        })
    });

    let executor = StubExecutor::new();
    executor.on_evaluate(
        "broken",
        Err(SandboxError::Evaluation {
            extension: String::from("broken"),
            message: String::from("boom"),
            stack: None,
            logs: Vec::new(),
        }),
    );
    let host = ExtensionHost::new(Arc::new(store), executor);

    let error = host.load("broken").await.expect_err("load fails");
    assert!(matches!(error, ExtensionError::Sandbox(SandboxError::Evaluation { .. })));
}

#[rstest]
#[tokio::test]
async fn unknown_records_surface_store_errors() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .returning(|id| Err(StoreError::NotFound { id: id.to_owned() }));
    let host = ExtensionHost::new(Arc::new(store), StubExecutor::new());

    assert!(matches!(
        host.load("ghost").await,
        Err(ExtensionError::Store(StoreError::NotFound { .. }))
    ));
}

#[rstest]
#[tokio::test]
async fn debug_logs_are_kept_only_for_debug_extensions() {
    let (store, executor, host) = host_with([
        Extension::new("chatty", "Chatty", "src").with_debug(true),
        Extension::new("quiet", "Quiet", "src"),
    ]);
    executor.on_evaluate("chatty", Ok(report(&["talk"], &[])));
    executor.on_evaluate("quiet", Ok(report(&["talk"], &[])));
    executor.on_call("chatty", "talk", Ok(json!(null)));
    executor.on_call("quiet", "talk", Ok(json!(null)));
    executor.emit_logs(&["hello"]);

    host.load_all().await.expect("load all");
    host.call("chatty", "talk", Vec::new()).await.expect("chatty call");
    host.call("quiet", "talk", Vec::new()).await.expect("quiet call");

    let chatty = store.get("chatty").await.expect("chatty");
    let messages: Vec<&str> = chatty
        .debug_logs()
        .iter()
        .map(|entry| entry.message.as_str())
        .collect();
    assert_eq!(messages, ["hello", "hello"]);
    assert!(store.get("quiet").await.expect("quiet").debug_logs().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_calls_keep_the_console_lines_written_before_the_error() {
    let (store, executor, host) = host_with([
        Extension::new("fragile", "Fragile", "src").with_debug(true),
        Extension::new("quiet", "Quiet", "src"),
    ]);
    let failure = |id: &str| SandboxError::Evaluation {
        extension: id.to_owned(),
        message: String::from("TypeError: rows is undefined"),
        stack: None,
        logs: vec![DebugLogEntry::now(LogLevel::Warn, "parsing rows")],
    };
    for id in ["fragile", "quiet"] {
        executor.on_evaluate(id, Ok(report(&["parse"], &[])));
        executor.on_call(id, "parse", Err(failure(id)));
    }

    host.load_all().await.expect("load all");
    host.call("fragile", "parse", Vec::new())
        .await
        .expect_err("fragile call fails");
    host.call("quiet", "parse", Vec::new())
        .await
        .expect_err("quiet call fails");

    let fragile = store.get("fragile").await.expect("fragile");
    assert_eq!(fragile.error_count(), 1);
    let messages: Vec<&str> = fragile
        .debug_logs()
        .iter()
        .map(|entry| entry.message.as_str())
        .collect();
    assert_eq!(messages, ["parsing rows"]);

    let quiet = store.get("quiet").await.expect("quiet");
    assert_eq!(quiet.error_count(), 1);
    assert!(quiet.debug_logs().is_empty());
}
