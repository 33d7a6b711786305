// crates/relay-gate-core/tests/transform.rs
// ============================================================================
// Module: Transform Tests
// Description: Tests for SIMPLE mapping, substitution, and conditions.
// Purpose: Exercise field extraction, lookups, formatters, and failures.
// Dependencies: relay-gate-core, serde_json
// ============================================================================
//! ## Overview
//! Validates the in-process transformation engine and condition evaluation.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use relay_gate_core::CompareOp;
use relay_gate_core::Condition;
use relay_gate_core::FieldMapping;
use relay_gate_core::Formatter;
use relay_gate_core::LookupKind;
use relay_gate_core::LookupResolveError;
use relay_gate_core::LookupResolver;
use relay_gate_core::LookupSpec;
use relay_gate_core::NoScriptEvaluator;
use relay_gate_core::OrgId;
use relay_gate_core::ScriptError;
use relay_gate_core::ScriptEvaluator;
use relay_gate_core::ScriptFailure;
use relay_gate_core::Timestamp;
use relay_gate_core::TransformContext;
use relay_gate_core::TransformError;
use relay_gate_core::TransformExecutor;
use relay_gate_core::Transformation;
use serde_json::Value;
use serde_json::json;

/// Map-backed resolver for tests.
struct TableResolver {
    entries: BTreeMap<String, String>,
}

impl LookupResolver for TableResolver {
    fn resolve(
        &self,
        _org_id: OrgId,
        _table: &str,
        key: &str,
        _kind: LookupKind,
    ) -> Result<Option<String>, LookupResolveError> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Evaluator returning a fixed value, for script-mode tests.
struct FixedEvaluator {
    output: Value,
}

impl ScriptEvaluator for FixedEvaluator {
    fn evaluate(&self, _script: &str, _input: &Value) -> Result<Value, ScriptError> {
        Ok(self.output.clone())
    }
}

fn executor_with_lookup(entries: &[(&str, &str)]) -> TransformExecutor {
    let entries = entries
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    TransformExecutor::new(
        Arc::new(NoScriptEvaluator),
        Arc::new(TableResolver {
            entries,
        }),
    )
}

fn ctx() -> TransformContext {
    // 2024-01-15T00:00:00Z.
    TransformContext::new(OrgId::new(42), Timestamp::from_unix_millis(1_705_276_800_000))
}

#[test]
fn empty_simple_mapping_passes_payload_through() {
    let executor = executor_with_lookup(&[]);
    let payload = json!({"a": {"b": 1}});
    let output = executor.apply(&Transformation::passthrough(), &payload, &ctx()).unwrap();
    assert_eq!(output, payload);
}

#[test]
fn simple_mapping_extracts_and_assigns_nested_paths() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "order.customer.id".to_string(),
            target: "bill.customer".to_string(),
            formatter: None,
            lookup: None,
        }],
    };
    let payload = json!({"order": {"customer": {"id": "c-9"}}});
    let output = executor.apply(&transformation, &payload, &ctx()).unwrap();
    assert_eq!(output, json!({"bill": {"customer": "c-9"}}));
}

#[test]
fn missing_source_path_fails_with_transformation_category() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "missing.path".to_string(),
            target: "out".to_string(),
            formatter: None,
            lookup: None,
        }],
    };
    let err = executor.apply(&transformation, &json!({}), &ctx()).unwrap_err();
    assert_eq!(
        err.into_delivery_error().category,
        relay_gate_core::ErrorCategory::Transformation
    );
}

#[test]
fn lookup_resolves_and_misses_pass_key_through() {
    let executor = executor_with_lookup(&[("src-1", "tgt-1")]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "id".to_string(),
            target: "mapped".to_string(),
            formatter: None,
            lookup: Some(LookupSpec {
                table: "ids".to_string(),
                kind: LookupKind::Id,
            }),
        }],
    };
    let hit = executor.apply(&transformation, &json!({"id": "src-1"}), &ctx()).unwrap();
    assert_eq!(hit, json!({"mapped": "tgt-1"}));

    let miss = executor.apply(&transformation, &json!({"id": "src-2"}), &ctx()).unwrap();
    assert_eq!(miss, json!({"mapped": "src-2"}));
}

#[test]
fn formatters_coerce_values() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![
            FieldMapping {
                source: "name".to_string(),
                target: "upper".to_string(),
                formatter: Some(Formatter::Uppercase),
                lookup: None,
            },
            FieldMapping {
                source: "count".to_string(),
                target: "count".to_string(),
                formatter: Some(Formatter::ToNumber),
                lookup: None,
            },
        ],
    };
    let payload = json!({"name": "acme", "count": "12"});
    let output = executor.apply(&transformation, &payload, &ctx()).unwrap();
    assert_eq!(output, json!({"upper": "ACME", "count": 12.0}));
}

#[test]
fn formatter_type_mismatch_fails() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "count".to_string(),
            target: "out".to_string(),
            formatter: Some(Formatter::Uppercase),
            lookup: None,
        }],
    };
    let err = executor.apply(&transformation, &json!({"count": 3}), &ctx()).unwrap_err();
    assert!(matches!(err, TransformError::Format { .. }));
}

#[test]
fn variables_substitute_in_mapped_strings() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "template".to_string(),
            target: "rendered".to_string(),
            formatter: None,
            lookup: None,
        }],
    };
    let payload = json!({"template": "org={{config.org_id}} day={{date.today()}}"});
    let output = executor.apply(&transformation, &payload, &ctx()).unwrap();
    let rendered = output.get("rendered").and_then(Value::as_str).unwrap();
    assert_eq!(rendered, "org=42 day=2024-01-15");
}

#[test]
fn unknown_variable_fails() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "template".to_string(),
            target: "rendered".to_string(),
            formatter: None,
            lookup: None,
        }],
    };
    let payload = json!({"template": "{{nope.nothing}}"});
    let err = executor.apply(&transformation, &payload, &ctx()).unwrap_err();
    assert!(matches!(err, TransformError::UnknownVariable(_)));
}

#[test]
fn env_variables_resolve_from_allowlisted_snapshot() {
    let mut context = ctx();
    context.env.insert("REGION".to_string(), "eu-1".to_string());
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Simple {
        mappings: vec![FieldMapping {
            source: "template".to_string(),
            target: "rendered".to_string(),
            formatter: None,
            lookup: None,
        }],
    };
    let payload = json!({"template": "region={{env.REGION}}"});
    let output = executor.apply(&transformation, &payload, &context).unwrap();
    assert_eq!(output.get("rendered").and_then(Value::as_str).unwrap(), "region=eu-1");
}

#[test]
fn script_mode_without_evaluator_fails_closed() {
    let executor = executor_with_lookup(&[]);
    let transformation = Transformation::Script {
        script: "transform(input)".to_string(),
    };
    let err = executor.apply(&transformation, &json!({}), &ctx()).unwrap_err();
    assert!(matches!(
        err,
        TransformError::Script(ScriptError {
            kind: ScriptFailure::Runtime,
            ..
        })
    ));
}

#[test]
fn script_null_output_is_invalid() {
    let executor = TransformExecutor::new(
        Arc::new(FixedEvaluator {
            output: Value::Null,
        }),
        Arc::new(TableResolver {
            entries: BTreeMap::new(),
        }),
    );
    let transformation = Transformation::Script {
        script: "transform(input)".to_string(),
    };
    let err = executor.apply(&transformation, &json!({}), &ctx()).unwrap_err();
    assert!(matches!(err, TransformError::InvalidOutput(_)));
}

#[test]
fn compare_conditions_gate_on_payload_values() {
    let executor = executor_with_lookup(&[]);
    let payload = json!({"order": {"total": 120, "tags": ["rush", "paid"]}});

    let gt = Condition::Compare {
        path: "order.total".to_string(),
        op: CompareOp::Gt,
        value: json!(100),
    };
    assert!(executor.evaluate_condition(&gt, &payload).unwrap());

    let contains = Condition::Compare {
        path: "order.tags".to_string(),
        op: CompareOp::Contains,
        value: json!("rush"),
    };
    assert!(executor.evaluate_condition(&contains, &payload).unwrap());

    let exists = Condition::Compare {
        path: "order.missing".to_string(),
        op: CompareOp::Exists,
        value: Value::Null,
    };
    assert!(!executor.evaluate_condition(&exists, &payload).unwrap());
}

#[test]
fn json_path_conditions_resolve() {
    let executor = executor_with_lookup(&[]);
    let payload = json!({"items": [{"sku": "a"}, {"sku": "b"}]});
    let condition = Condition::Compare {
        path: "$.items[1].sku".to_string(),
        op: CompareOp::Eq,
        value: json!("b"),
    };
    assert!(executor.evaluate_condition(&condition, &payload).unwrap());
}
