//! Unit tests for the worker wire protocol.

use rstest::rstest;
use serde_json::json;

use super::*;

#[test]
fn evaluate_request_uses_camel_case_wire_names() {
    let message = WorkerMessage::new(
        "7",
        WorkerRequest::Evaluate {
            extension_id: String::from("web-search"),
            code: String::from("module.exports = {};"),
            dependencies: Some(DependencyManifest::from_iter([("lodash", "4.17.21")])),
            metadata: None,
        },
    );

    let value = serde_json::to_value(&message).expect("serialise");
    assert_eq!(
        value,
        json!({
            "id": "7",
            "type": "evaluate",
            "extensionId": "web-search",
            "code": "module.exports = {};",
            "dependencies": { "lodash": "4.17.21" },
        })
    );
}

#[test]
fn evaluate_request_accepts_missing_optional_fields() {
    let raw = r#"{"id":"1","type":"evaluate","extensionId":"x","code":"1"}"#;
    let message: WorkerMessage = serde_json::from_str(raw).expect("parse");
    assert_eq!(message.id(), "1");
    match message.request() {
        WorkerRequest::Evaluate {
            dependencies,
            metadata,
            ..
        } => {
            assert!(dependencies.is_none());
            assert!(metadata.is_none());
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[rstest]
#[case(r#"{"id":"a","type":"invoke","extensionId":"x","function":"run","args":[1]}"#, "x")]
#[case(r#"{"id":"b","type":"invokeHook","extensionId":"y","hookType":"afterFileUpload","name":"describe","context":{}}"#, "y")]
#[case(r#"{"id":"c","type":"unload","extensionId":"z"}"#, "z")]
fn supplemented_requests_parse(#[case] raw: &str, #[case] extension: &str) {
    let message: WorkerMessage = serde_json::from_str(raw).expect("parse");
    assert_eq!(message.request().extension_id(), extension);
}

#[test]
fn unknown_request_type_is_rejected() {
    let raw = r#"{"id":"1","type":"explode","extensionId":"x"}"#;
    assert!(serde_json::from_str::<WorkerMessage>(raw).is_err());
}

#[test]
fn success_response_omits_error_fields() {
    let response = WorkerResponse::success("9", json!({"ok": true}), Vec::new());
    let value = serde_json::to_value(&response).expect("serialise");
    assert_eq!(value, json!({"id": "9", "type": "result", "result": {"ok": true}}));
}

#[test]
fn timeout_survives_the_wire() {
    let error = SandboxError::ExecutionTimeout {
        extension: String::from("slow"),
        timeout_ms: 250,
        logs: Vec::new(),
    };
    let response = WorkerResponse::failure("3", &error);
    let text = serde_json::to_string(&response).expect("serialise");
    let parsed: WorkerResponse = serde_json::from_str(&text).expect("parse");

    assert_eq!(parsed.error_kind(), Some(ErrorKind::Timeout));
    let rebuilt = parsed.into_outcome("slow").expect_err("should fail");
    assert!(matches!(
        rebuilt,
        SandboxError::ExecutionTimeout { timeout_ms: 250, .. }
    ));
}

#[test]
fn dependency_failure_keeps_the_offending_package() {
    let error = SandboxError::Dependency(DependencyResolutionError::new(
        "left-pad@1.0.0",
        "package directory not found",
    ));
    let response = WorkerResponse::failure("4", &error);
    match response.into_outcome("x") {
        Err(SandboxError::Dependency(inner)) => {
            assert_eq!(inner.dependency(), "left-pad@1.0.0");
            assert_eq!(inner.message(), "package directory not found");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn evaluation_failure_keeps_stack_and_logs() {
    let error = SandboxError::Evaluation {
        extension: String::from("x"),
        message: String::from("boom"),
        stack: Some(String::from("at <eval>:1")),
        logs: vec![DebugLogEntry::now(LogLevel::Warn, "about to fail")],
    };
    let response = WorkerResponse::failure("5", &error);
    assert_eq!(response.logs().len(), 1);
    assert_eq!(response.error(), Some("boom"));

    let rebuilt = response.into_outcome("x").expect_err("should fail");
    assert_eq!(rebuilt.stack(), Some("at <eval>:1"));
    let messages: Vec<&str> = rebuilt.logs().iter().map(|entry| entry.message.as_str()).collect();
    assert_eq!(messages, ["about to fail"]);
}

#[rstest]
#[case("warn", LogLevel::Warn)]
#[case("error", LogLevel::Error)]
#[case("trace", LogLevel::Log)]
fn console_methods_map_to_levels(#[case] method: &str, #[case] expected: LogLevel) {
    assert_eq!(LogLevel::from_method(method), expected);
}

#[test]
fn report_parses_from_camel_case() {
    let report: EvaluationReport = serde_json::from_value(json!({
        "functions": ["search"],
        "values": {"limit": 3},
        "hooks": [{"hookType": "afterFileUpload", "name": "describe"}],
    }))
    .expect("parse");
    assert!(report.exports_function("search"));
    assert_eq!(report.hooks.first().map(|h| h.name.as_str()), Some("describe"));
}
