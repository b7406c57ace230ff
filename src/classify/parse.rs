//! Oracle reply parsing.
//!
//! Replies are asked to be a bare JSON object but are not trusted to be one.
//! Parsing falls through three tiers:
//! 1. the whole reply (code fences stripped) as JSON
//! 2. the first embedded `{... "status": "OPEN|CLOSED|UNKNOWN" ...}` object
//! 3. a keyword search for `OPEN` then `CLOSED`
//!
//! Parsing never fails; the last tier yields `Unknown` with confidence 0.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::result::{Classification, GateStatus};

/// Confidence reported when only a bare keyword could be found.
pub const KEYWORD_FALLBACK_CONFIDENCE: u8 = 50;

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```(?:json)?\s*").expect("valid fence regex"))
}

fn fence_close() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)\s*```$").expect("valid fence regex"))
}

fn embedded_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\{[^}]*"status"\s*:\s*"(OPEN|CLOSED|UNKNOWN)"[^}]*\}"#)
            .expect("valid status regex")
    })
}

/// Parse an oracle reply into a classification.
pub fn parse_gate_response(response_text: &str) -> Classification {
    let text = response_text.trim();

    if let Some(parsed) = parse_whole(text) {
        return parsed;
    }

    if let Some(found) = embedded_object().find(text) {
        if let Some(parsed) = parse_object(found.as_str()) {
            return parsed;
        }
    }

    let upper = text.to_uppercase();
    if upper.contains("OPEN") {
        return Classification::new(GateStatus::Open, KEYWORD_FALLBACK_CONFIDENCE);
    }
    if upper.contains("CLOSED") {
        return Classification::new(GateStatus::Closed, KEYWORD_FALLBACK_CONFIDENCE);
    }
    Classification::new(GateStatus::Unknown, 0)
}

fn parse_whole(text: &str) -> Option<Classification> {
    let cleaned = fence_open().replace_all(text, "");
    let cleaned = fence_close().replace_all(&cleaned, "");
    parse_object(cleaned.trim())
}

fn parse_object(json: &str) -> Option<Classification> {
    let value: Value = serde_json::from_str(json).ok()?;
    let object = value.as_object()?;
    let status = match object.get("status") {
        None => GateStatus::Unknown,
        Some(Value::String(s)) => GateStatus::parse(s)?,
        Some(_) => return None,
    };
    let confidence = match object.get("confidence") {
        None => 0,
        Some(value) => confidence_value(value)?,
    };
    Some(Classification::new(status, clamp_confidence(confidence)))
}

/// Integer confidence from a JSON number or numeric string. Fractions truncate.
fn confidence_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn clamp_confidence(confidence: i64) -> u8 {
    confidence.clamp(0, 100) as u8
}
