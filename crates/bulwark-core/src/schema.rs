//! JSON Schema validation for the response contract.
//!
//! The schema of record lives in spec/response.schema.json and is embedded
//! at compile time. Validation is used at trust boundaries and in tests;
//! the normalizer guarantees conformance by construction.

use std::sync::OnceLock;
use thiserror::Error;

use crate::types::AiResponse;

/// Embedded response schema (loaded at compile time).
const RESPONSE_SCHEMA_JSON: &str = include_str!("../../../spec/response.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation setup.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to load response schema: {0}")]
    Load(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(RESPONSE_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::Load(e.clone())),
    }
}

/// Validate a JSON value against the response schema.
///
/// Returns `Ok(())` if valid, or the list of validation error messages.
pub fn validate_response_schema(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check whether a JSON value conforms to the response schema.
///
/// Use [`validate_response_schema`] for detailed error messages.
pub fn is_valid_response(value: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(value))
        .unwrap_or(false)
}

/// Check that a typed [`AiResponse`] serializes to a schema-valid value.
///
/// The struct keeps the shape right by construction; this catches invariant
/// breaks the type system cannot see, like an empty `response` string.
pub fn conforms(response: &AiResponse) -> bool {
    serde_json::to_value(response)
        .map(|v| is_valid_response(&v))
        .unwrap_or(false)
}
