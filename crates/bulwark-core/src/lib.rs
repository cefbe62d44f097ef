//! # bulwark-core
//!
//! Deterministic response-contract layer for bulwark.
//!
//! This crate owns the canonical [`AiResponse`] contract, the payload
//! normalizer that repairs malformed provider output, and the emergency
//! pool of canned responses. It is the deterministic half of the system:
//!
//! 1. **No async, no I/O**: everything here is a pure in-memory operation
//! 2. **Total**: [`normalize`] maps any JSON value onto the contract and
//!    never fails
//! 3. **Schema-first**: `spec/response.schema.json` is the contract of
//!    record, embedded at compile time
//!
//! Provider calls, circuit breaking, caching, and orchestration live in
//! `bulwark-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use bulwark_core::normalize;
//! use serde_json::json;
//!
//! // A provider buried the reply inside a nested object; repair it.
//! let payload = json!({ "response": { "text": "Here is your summary." } });
//! let repaired = normalize(&payload);
//! assert_eq!(repaired.response, "Here is your summary.");
//! ```

pub mod emergency;
pub mod normalize;
pub mod schema;
pub mod types;

pub use emergency::{EmergencyPool, PoolError};
pub use normalize::normalize;
pub use schema::{conforms, is_valid_response, validate_response_schema, SchemaError};
pub use types::{AiResponse, Message, Role, Suggestion};
