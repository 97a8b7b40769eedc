//! Crate-level integration and BDD tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use spindle_sandbox::{
    DebugLogEntry, EvaluationReport, EvaluationRequest, ExtensionExecutor, HookDescriptor, LogLevel,
    Output, SandboxError,
};

use crate::hooks::AFTER_FILE_UPLOAD;
use crate::host::ExtensionHost;
use crate::record::Extension;
use crate::store::InMemoryExtensionStore;


/// Scripted stand-in for the execution worker.
///
/// Evaluations succeed with an empty report unless a result was scripted
/// for the extension id. Calls and hook invocations answer with the
/// result scripted for `(extension, name)`, or `FunctionNotFound`.
#[derive(Default)]
pub(crate) struct StubExecutor {
    reports: Mutex<HashMap<String, Result<EvaluationReport, SandboxError>>>,
    answers: Mutex<HashMap<(String, String), Result<Value, SandboxError>>>,
    realms: Mutex<HashSet<String>>,
    requests: Mutex<Vec<EvaluationRequest>>,
    unloads: Mutex<Vec<String>>,
    console: Mutex<Vec<String>>,
}

impl StubExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on_evaluate(&self, id: &str, result: Result<EvaluationReport, SandboxError>) {
        self.reports
            .lock()
            .expect("reports lock")
            .insert(id.to_owned(), result);
    }

    pub(crate) fn on_call(&self, id: &str, name: &str, result: Result<Value, SandboxError>) {
        self.answers
            .lock()
            .expect("answers lock")
            .insert((id.to_owned(), name.to_owned()), result);
    }

    /// Every later response carries these console lines.
    pub(crate) fn emit_logs(&self, lines: &[&str]) {
        *self.console.lock().expect("console lock") =
            lines.iter().map(|line| (*line).to_owned()).collect();
    }

    fn logs(&self) -> Vec<DebugLogEntry> {
        self.console
            .lock()
            .expect("console lock")
            .iter()
            .map(|line| DebugLogEntry::now(LogLevel::Log, line.clone()))
            .collect()
    }

    pub(crate) fn requests(&self) -> Vec<EvaluationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn unloads(&self) -> Vec<String> {
        self.unloads.lock().expect("unloads lock").clone()
    }

    fn answer(&self, id: &str, name: &str) -> Result<Output<Value>, SandboxError> {
        if !self.realms.lock().expect("realms lock").contains(id) {
            return Err(SandboxError::NotLoaded {
                extension: id.to_owned(),
            });
        }
        self.answers
            .lock()
            .expect("answers lock")
            .get(&(id.to_owned(), name.to_owned()))
            .cloned()
            .unwrap_or_else(|| {
                Err(SandboxError::FunctionNotFound {
                    extension: id.to_owned(),
                    function: name.to_owned(),
                })
            })
            .map(|value| Output {
                value,
                logs: self.logs(),
            })
    }
}

#[async_trait]
impl ExtensionExecutor for StubExecutor {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<Output<EvaluationReport>, SandboxError> {
        let id = request.extension_id().to_owned();
        self.requests.lock().expect("requests lock").push(request);
        let result = self
            .reports
            .lock()
            .expect("reports lock")
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Ok(EvaluationReport::default()));
        if result.is_ok() {
            self.realms.lock().expect("realms lock").insert(id);
        }
        result.map(|value| Output {
            value,
            logs: self.logs(),
        })
    }

    async fn invoke(
        &self,
        extension_id: &str,
        function: &str,
        _args: Vec<Value>,
    ) -> Result<Output<Value>, SandboxError> {
        self.answer(extension_id, function)
    }

    async fn invoke_hook(
        &self,
        extension_id: &str,
        _hook_type: &str,
        name: &str,
        _context: Value,
    ) -> Result<Output<Value>, SandboxError> {
        self.answer(extension_id, name)
    }

    async fn unload(&self, extension_id: &str) -> Result<(), SandboxError> {
        self.realms.lock().expect("realms lock").remove(extension_id);
        self.unloads
            .lock()
            .expect("unloads lock")
            .push(extension_id.to_owned());
        Ok(())
    }
}

/// A report exporting `functions` and registering one `afterFileUpload`
/// handler per entry of `hooks`.
pub(crate) fn report(functions: &[&str], hooks: &[&str]) -> EvaluationReport {
    EvaluationReport {
        functions: functions.iter().map(|name| (*name).to_owned()).collect(),
        values: serde_json::Map::new(),
        hooks: hooks
            .iter()
            .map(|name| HookDescriptor {
                hook_type: String::from(AFTER_FILE_UPLOAD),
                name: (*name).to_owned(),
            })
            .collect(),
    }
}

#[tokio::test]
async fn end_to_end_host_with_stub() {
    let executor = StubExecutor::new();
    executor.on_evaluate("file-tagger", Ok(report(&["tag"], &["tagger"])));
    executor.on_call("file-tagger", "tag", Ok(json!(["pdf"])));
    executor.on_call("file-tagger", "tagger", Ok(json!({ "description": "A PDF" })));

    let store = Arc::new(InMemoryExtensionStore::with_extensions([Extension::new(
        "file-tagger",
        "File Tagger",
        "module.exports = { tag: (file) => [] };",
    )]));
    let host = ExtensionHost::new(store, executor);

    let summary = host.load_all().await.expect("load all");
    assert_eq!(summary.loaded.len(), 1);

    let tags = host
        .call("file", "tag", vec![json!("report.pdf")])
        .await
        .expect("call");
    assert_eq!(tags, json!(["pdf"]));

    let merged = host
        .trigger(AFTER_FILE_UPLOAD, &json!({ "name": "report.pdf" }))
        .await
        .merged();
    assert_eq!(merged.get("description"), Some(&json!("A PDF")));

    let docs = host.context_documentation().await.expect("docs");
    assert!(docs.contains("- `file.tag(file)`"));
}
