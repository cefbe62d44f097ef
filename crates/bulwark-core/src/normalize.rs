//! Payload normalization: repairing malformed provider output.
//!
//! Providers can return anything: a bare string, a well-formed response
//! object, a response object whose `response` field is itself an object, or
//! outright garbage. [`normalize`] is total — it maps any JSON value onto
//! the [`AiResponse`] contract and never fails.
//!
//! Repair runs as an ordered list of pure passes, each returning
//! `Option<AiResponse>`; the first pass that produces a response wins.
//! Structural self-healing (passes 1–2) runs before generic key scanning
//! (pass 4), since it preserves more of the payload's original content.

use serde_json::{Map, Value};

use crate::types::AiResponse;

/// Sentiment attached when a bare string payload is wrapped.
const NEUTRAL_SENTIMENT: &str = "neutral";

/// Sentiment attached when nothing usable could be extracted.
const APOLOGETIC_SENTIMENT: &str = "apologetic";

/// Reply used when no repair pass can extract usable text.
const UNPARSEABLE_REPLY: &str =
    "I'm sorry, I couldn't quite understand that response. Could you try asking again?";

/// Keys probed, in priority order, inside a nested `response` object.
const NESTED_TEXT_KEYS: [&str; 3] = ["text", "content", "message"];

/// Top-level keys probed, in priority order, when strict decoding fails.
const TOP_LEVEL_TEXT_KEYS: [&str; 5] = ["text", "message", "content", "answer", "output"];

/// Map an arbitrary payload onto the response contract.
///
/// Total function: never panics, never returns an invalid response. The
/// result always carries a non-empty `response` string.
pub fn normalize(input: &Value) -> AiResponse {
    let passes: [(&str, fn(&Value) -> Option<AiResponse>); 4] = [
        ("wrap_plain_string", wrap_plain_string),
        ("flatten_nested_response", flatten_nested_response),
        ("decode_strict", decode_strict),
        ("scan_known_keys", scan_known_keys),
    ];

    for (name, pass) in passes {
        if let Some(response) = pass(input) {
            tracing::debug!(pass = name, "payload normalized");
            return response;
        }
    }

    tracing::warn!("payload unusable, returning canned reply");
    unparseable()
}

/// The canned response for payloads no repair pass could handle.
pub fn unparseable() -> AiResponse {
    AiResponse::text(UNPARSEABLE_REPLY).with_sentiment(APOLOGETIC_SENTIMENT)
}

/// Pass 1: a bare string payload becomes the reply text directly.
fn wrap_plain_string(input: &Value) -> Option<AiResponse> {
    let text = input.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(AiResponse::text(text).with_sentiment(NEUTRAL_SENTIMENT))
}

/// Pass 2: flatten a `response` field that is itself an object.
///
/// The nested object is probed for `text`, `content`, then `message`; if
/// none holds a string, the whole nested object is serialized as a last
/// resort within this pass. Sibling fields are kept where they decode.
fn flatten_nested_response(input: &Value) -> Option<AiResponse> {
    let obj = input.as_object()?;
    let nested = obj.get("response")?.as_object()?;

    let flattened = NESTED_TEXT_KEYS
        .iter()
        .find_map(|key| nested.get(*key).and_then(non_empty_str))
        .map(str::to_owned)
        .or_else(|| serde_json::to_string(nested).ok())?;

    if flattened.trim().is_empty() {
        return None;
    }

    Some(with_sibling_fields(obj, flattened))
}

/// Pass 3: strict typed decode of an already well-formed payload.
fn decode_strict(input: &Value) -> Option<AiResponse> {
    let decoded: AiResponse = serde_json::from_value(input.clone()).ok()?;
    if decoded.response.trim().is_empty() {
        return None;
    }
    Some(decoded)
}

/// Pass 4: scan well-known top-level keys for reply text.
fn scan_known_keys(input: &Value) -> Option<AiResponse> {
    let obj = input.as_object()?;
    let text = TOP_LEVEL_TEXT_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(non_empty_str))?;

    Some(with_sibling_fields(obj, text.to_owned()))
}

/// Rebuild a response around extracted reply text, keeping whichever
/// optional sibling fields decode cleanly and dropping the rest.
fn with_sibling_fields(obj: &Map<String, Value>, response: String) -> AiResponse {
    AiResponse {
        response,
        sentiment: string_field(obj, "sentiment"),
        suggestions: decode_field(obj, "suggestions"),
        follow_up_questions: decode_field(obj, "followUpQuestions"),
        personality: string_field(obj, "personality"),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(non_empty_str).map(str::to_owned)
}

fn decode_field<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}

fn non_empty_str(value: &Value) -> Option<&str> {
    let text = value.as_str()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
