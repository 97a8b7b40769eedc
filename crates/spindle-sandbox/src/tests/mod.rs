//! Crate-level integration and BDD tests.

use serde_json::json;

use crate::bundler::DependencyManifest;
use crate::executor::EvaluationRequest;
use crate::protocol::WorkerMessage;


#[test]
fn evaluation_requests_serialise_to_the_wire_shape() {
    let request = EvaluationRequest::new("web-search", "module.exports = {};")
        .with_dependencies(DependencyManifest::new().with("lodash", "4.17.21"))
        .with_metadata(json!({ "debug": false }));
    let message = WorkerMessage::new("7", request.into_wire());

    assert_eq!(
        serde_json::to_value(&message).expect("serialises"),
        json!({
            "id": "7",
            "type": "evaluate",
            "extensionId": "web-search",
            "code": "module.exports = {};",
            "dependencies": { "lodash": "4.17.21" },
            "metadata": { "debug": false },
        })
    );
}

#[test]
fn empty_manifests_are_omitted_from_the_wire() {
    let message = WorkerMessage::new("1", EvaluationRequest::new("x", "").into_wire());
    let value = serde_json::to_value(&message).expect("serialises");
    assert!(value.get("dependencies").is_none());
}
