// crates/relay-gate-core/src/runtime/transform.rs
// ============================================================================
// Module: Relay Gate Transform Executor
// Description: SIMPLE field mapping, variable substitution, and conditions.
// Purpose: Turn source payloads into target bodies without leaving process.
// Dependencies: crate::core, crate::interfaces, jsonpath_lib, serde_json, time
// ============================================================================

//! ## Overview
//! The executor evaluates either a SIMPLE declarative field map or a SCRIPT
//! through the injected sandbox evaluator. SIMPLE mappings extract dotted
//! source paths, optionally resolve lookup tables, apply formatters, and
//! substitute `{{…}}` variables. Every failure kind (missing path, lookup
//! store failure, script syntax/runtime/timeout, invalid output) surfaces as
//! one `TRANSFORMATION` delivery error.
//!
//! Conditions gate individual actions: a comparison addresses the payload by
//! JSON path (`$.a.b`) or dotted path, and a script predicate is truthy on
//! `true`, non-zero numbers, and non-empty strings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::CompareOp;
use crate::core::Condition;
use crate::core::DeliveryError;
use crate::core::ErrorCategory;
use crate::core::FieldMapping;
use crate::core::Formatter;
use crate::core::LookupSpec;
use crate::core::OrgId;
use crate::core::Timestamp;
use crate::core::Transformation;
use crate::interfaces::LookupResolver;
use crate::interfaces::ScriptError;
use crate::interfaces::ScriptEvaluator;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Transformation failures; every variant maps to category `TRANSFORMATION`.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Source path missing from the payload.
    #[error("source path not found: {0}")]
    MissingSource(String),
    /// Formatter could not coerce the extracted value.
    #[error("formatter failed on {path}: {message}")]
    Format {
        /// Source path being formatted.
        path: String,
        /// Coercion failure detail.
        message: String,
    },
    /// Lookup resolution failed at the store.
    #[error("lookup failure: {0}")]
    Lookup(String),
    /// Script evaluation failed in the sandbox.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// Script output was not a JSON-serializable body.
    #[error("invalid transform output: {0}")]
    InvalidOutput(String),
    /// Variable substitution referenced an unknown variable.
    #[error("unknown substitution variable: {0}")]
    UnknownVariable(String),
    /// Condition evaluation failed.
    #[error("condition failure: {0}")]
    Condition(String),
}

impl TransformError {
    /// Converts the failure into a category-tagged delivery error.
    #[must_use]
    pub fn into_delivery_error(self) -> DeliveryError {
        DeliveryError::new(ErrorCategory::Transformation, "transform_failed", self.to_string())
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Per-delivery context available to substitution and scripts.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Owning organization.
    pub org_id: OrgId,
    /// Delivery wall-clock time.
    pub now: Timestamp,
    /// Allowlisted environment snapshot for `{{env.NAME}}`.
    pub env: BTreeMap<String, String>,
}

impl TransformContext {
    /// Creates a context with an empty environment snapshot.
    #[must_use]
    pub const fn new(org_id: OrgId, now: Timestamp) -> Self {
        Self {
            org_id,
            now,
            env: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Transformation executor with injected sandbox and lookup seams.
pub struct TransformExecutor {
    /// Sandbox evaluator for SCRIPT transformations.
    evaluator: Arc<dyn ScriptEvaluator>,
    /// Lookup-table resolver for SIMPLE mappings.
    lookups: Arc<dyn LookupResolver>,
}

impl TransformExecutor {
    /// Creates an executor over the given seams.
    #[must_use]
    pub fn new(evaluator: Arc<dyn ScriptEvaluator>, lookups: Arc<dyn LookupResolver>) -> Self {
        Self {
            evaluator,
            lookups,
        }
    }

    /// Applies a transformation to a payload.
    ///
    /// An empty SIMPLE mapping passes the payload through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] on any mapping or script failure.
    pub fn apply(
        &self,
        transformation: &Transformation,
        payload: &Value,
        ctx: &TransformContext,
    ) -> Result<Value, TransformError> {
        match transformation {
            Transformation::Simple {
                mappings,
            } => {
                if mappings.is_empty() {
                    return Ok(payload.clone());
                }
                let mut output = Value::Object(Map::new());
                for mapping in mappings {
                    let value = self.map_field(mapping, payload, ctx)?;
                    set_path(&mut output, &mapping.target, value);
                }
                Ok(output)
            }
            Transformation::Script {
                script,
            } => {
                let output = self.evaluator.evaluate(script, payload)?;
                ensure_serializable_body(&output)?;
                Ok(output)
            }
        }
    }

    /// Evaluates an action condition against the payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the path, comparison, or script fails.
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        payload: &Value,
    ) -> Result<bool, TransformError> {
        match condition {
            Condition::Compare {
                path,
                op,
                value,
            } => {
                let resolved = resolve_path(payload, path);
                Ok(compare(resolved.as_ref(), *op, value))
            }
            Condition::Script {
                script,
            } => {
                let output = self.evaluator.evaluate(script, payload)?;
                Ok(is_truthy(&output))
            }
        }
    }

    /// Resolves one field mapping into its output value.
    fn map_field(
        &self,
        mapping: &FieldMapping,
        payload: &Value,
        ctx: &TransformContext,
    ) -> Result<Value, TransformError> {
        let extracted = resolve_path(payload, &mapping.source)
            .ok_or_else(|| TransformError::MissingSource(mapping.source.clone()))?;
        let looked_up = match &mapping.lookup {
            Some(spec) => self.resolve_lookup(spec, &extracted, ctx)?,
            None => extracted,
        };
        let formatted = match mapping.formatter {
            Some(formatter) => apply_formatter(formatter, &looked_up, &mapping.source)?,
            None => looked_up,
        };
        substitute_value(formatted, ctx)
    }

    /// Resolves a lookup reference; a missing entry passes the key through.
    fn resolve_lookup(
        &self,
        spec: &LookupSpec,
        value: &Value,
        ctx: &TransformContext,
    ) -> Result<Value, TransformError> {
        let key = value_as_lookup_key(value);
        let resolved = self
            .lookups
            .resolve(ctx.org_id, &spec.table, &key, spec.kind)
            .map_err(|err| TransformError::Lookup(err.to_string()))?;
        Ok(resolved.map_or_else(|| value.clone(), Value::String))
    }
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves a path against the payload, JSON path (`$…`) or dotted.
#[must_use]
pub fn resolve_path(payload: &Value, path: &str) -> Option<Value> {
    if path.starts_with('$') {
        return jsonpath_lib::select(payload, path)
            .ok()
            .and_then(|matches| matches.first().map(|found| (*found).clone()));
    }
    let mut current = payload;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Assigns a value at a dotted path, creating intermediate objects.
fn set_path(output: &mut Value, path: &str, value: Value) {
    let mut current = output;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if index == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map.entry((*segment).to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

// ============================================================================
// SECTION: Formatters
// ============================================================================

/// Applies one formatter to an extracted value.
fn apply_formatter(
    formatter: Formatter,
    value: &Value,
    path: &str,
) -> Result<Value, TransformError> {
    match formatter {
        Formatter::Uppercase => format_string(value, path, |s| s.to_uppercase()),
        Formatter::Lowercase => format_string(value, path, |s| s.to_lowercase()),
        Formatter::Trim => format_string(value, path, |s| s.trim().to_string()),
        Formatter::ToNumber => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| TransformError::Format {
                    path: path.to_string(),
                    message: format!("`{text}` is not numeric"),
                }),
            other => Err(TransformError::Format {
                path: path.to_string(),
                message: format!("cannot coerce {} to number", type_label(other)),
            }),
        },
        Formatter::ToString => Ok(Value::String(value_as_lookup_key(value))),
    }
}

/// Applies a string transformation, rejecting non-string values.
fn format_string(
    value: &Value,
    path: &str,
    transform: impl Fn(&str) -> String,
) -> Result<Value, TransformError> {
    match value {
        Value::String(text) => Ok(Value::String(transform(text))),
        other => Err(TransformError::Format {
            path: path.to_string(),
            message: format!("cannot apply string formatter to {}", type_label(other)),
        }),
    }
}

/// Returns a short label for a JSON value's type.
const fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders a value as a lookup key or string coercion target.
fn value_as_lookup_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Variable Substitution
// ============================================================================

/// Substitutes `{{…}}` variables inside every string of a value tree.
fn substitute_value(value: Value, ctx: &TransformContext) -> Result<Value, TransformError> {
    match value {
        Value::String(text) => substitute_variables(&text, ctx).map(Value::String),
        Value::Array(items) => items
            .into_iter()
            .map(|item| substitute_value(item, ctx))
            .collect::<Result<Vec<Value>, TransformError>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key, substitute_value(item, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other),
    }
}

/// Substitutes `{{…}}` variables inside one string.
///
/// Supported variables: `{{config.org_id}}`, `{{date.today()}}`,
/// `{{date.now()}}`, and `{{env.NAME}}` for allowlisted names.
///
/// # Errors
///
/// Returns [`TransformError::UnknownVariable`] for unsupported references.
pub fn substitute_variables(
    text: &str,
    ctx: &TransformContext,
) -> Result<String, TransformError> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        let (head, tail) = rest.split_at(open);
        output.push_str(head);
        let Some(close) = tail.find("}}") else {
            output.push_str(tail);
            return Ok(output);
        };
        let variable = tail[2..close].trim();
        output.push_str(&resolve_variable(variable, ctx)?);
        rest = &tail[close + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

/// Resolves one substitution variable to its value.
fn resolve_variable(variable: &str, ctx: &TransformContext) -> Result<String, TransformError> {
    match variable {
        "config.org_id" | "config.orgId" => Ok(ctx.org_id.to_string()),
        "date.today()" => Ok(format_date(ctx.now)),
        "date.now()" => Ok(ctx.now.to_rfc3339()),
        other => {
            if let Some(name) = other.strip_prefix("env.") {
                return ctx
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TransformError::UnknownVariable(other.to_string()));
            }
            Err(TransformError::UnknownVariable(other.to_string()))
        }
    }
}

/// Formats a timestamp as a `YYYY-MM-DD` date.
fn format_date(now: Timestamp) -> String {
    let nanos = i128::from(now.as_unix_millis()).saturating_mul(1_000_000);
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_or_else(
        |_| now.to_string(),
        |datetime| {
            format!(
                "{:04}-{:02}-{:02}",
                datetime.year(),
                u8::from(datetime.month()),
                datetime.day()
            )
        },
    )
}

// ============================================================================
// SECTION: Output Validation
// ============================================================================

/// Ensures a transform output is a deliverable body.
fn ensure_serializable_body(output: &Value) -> Result<(), TransformError> {
    match output {
        Value::Object(_) | Value::Array(_) | Value::String(_) | Value::Number(_)
        | Value::Bool(_) => Ok(()),
        Value::Null => Err(TransformError::InvalidOutput("transform returned null".to_string())),
    }
}

// ============================================================================
// SECTION: Truthiness
// ============================================================================

/// Script predicate truthiness: `true`, non-zero numbers, non-empty strings.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ============================================================================
// SECTION: Comparison
// ============================================================================

/// Applies one comparison operator.
fn compare(resolved: Option<&Value>, op: CompareOp, literal: &Value) -> bool {
    match op {
        CompareOp::Exists => resolved.is_some_and(|value| !value.is_null()),
        CompareOp::Eq => resolved.is_some_and(|value| value == literal),
        CompareOp::Ne => resolved.is_none_or(|value| value != literal),
        CompareOp::Gt => compare_numbers(resolved, literal).is_some_and(|ord| ord.is_gt()),
        CompareOp::Gte => compare_numbers(resolved, literal).is_some_and(|ord| ord.is_ge()),
        CompareOp::Lt => compare_numbers(resolved, literal).is_some_and(|ord| ord.is_lt()),
        CompareOp::Lte => compare_numbers(resolved, literal).is_some_and(|ord| ord.is_le()),
        CompareOp::Contains => resolved.is_some_and(|value| contains(value, literal)),
    }
}

/// Numeric comparison between a resolved value and a literal.
fn compare_numbers(resolved: Option<&Value>, literal: &Value) -> Option<std::cmp::Ordering> {
    let left = resolved?.as_f64()?;
    let right = literal.as_f64()?;
    left.partial_cmp(&right)
}

/// Containment: substring for strings, membership for arrays.
fn contains(value: &Value, literal: &Value) -> bool {
    match value {
        Value::String(text) => literal.as_str().is_some_and(|needle| text.contains(needle)),
        Value::Array(items) => items.contains(literal),
        _ => false,
    }
}
