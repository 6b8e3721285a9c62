//! Unit tests for spell request and result wire types.

use serde_json::json;
use spellhost::spell::protocol::{error_code, SpellRequest, SpellResult, SpellStatus};

#[test]
fn request_omits_absent_fields() {
    let line = serde_json::to_string(&SpellRequest::new("hello")).expect("serialise");
    assert_eq!(line, r#"{"input":"hello"}"#);
}

#[test]
fn request_carries_model_key_and_config() {
    let mut request = SpellRequest::new("hi");
    request.model = Some("gpt-4o".into());
    request.api_key = Some("sk-test".into());
    request.config = Some(
        json!({"provider": "openai", "max_tokens": 64})
            .as_object()
            .cloned()
            .expect("object"),
    );

    let value = serde_json::to_value(&request).expect("serialise");
    assert_eq!(value["model"], "gpt-4o");
    assert_eq!(value["api_key"], "sk-test");
    assert_eq!(value["config"]["provider"], "openai");
}

/// Unknown metadata keys survive a parse and re-serialise.
#[test]
fn result_metadata_is_preserved() {
    let raw = json!({
        "status": "success",
        "output": "done",
        "metadata": {"tokens": 12, "nested": {"a": [1, 2]}}
    });

    let result: SpellResult = serde_json::from_value(raw.clone()).expect("parse");
    assert!(result.is_success());
    assert!(result.is_well_formed());
    assert_eq!(serde_json::to_value(&result).expect("serialise"), raw);
}

#[test]
fn error_result_shape() {
    let result = SpellResult::error(error_code::TIMEOUT, "took too long", None);

    assert_eq!(result.status, SpellStatus::Error);
    assert_eq!(result.error_code(), Some("TIMEOUT"));
    assert!(result.is_well_formed());
    assert_eq!(
        serde_json::to_value(&result).expect("serialise"),
        json!({"status": "error", "error": {"code": "TIMEOUT", "message": "took too long"}})
    );
}

#[test]
fn mismatched_status_is_not_well_formed() {
    let result: SpellResult =
        serde_json::from_value(json!({"status": "success"})).expect("parse");
    assert!(!result.is_well_formed());

    let result: SpellResult =
        serde_json::from_value(json!({"status": "error", "output": "x"})).expect("parse");
    assert!(!result.is_well_formed());
}

#[test]
fn stamp_creates_metadata_map() {
    let mut result = SpellResult::success("ok");
    result.stamp("total_time", 42_u64);
    result.stamp("spell_id", "echo");

    let metadata = result.metadata.expect("metadata");
    assert_eq!(metadata["total_time"], 42);
    assert_eq!(metadata["spell_id"], "echo");
}
