//! Parsing of raw model responses into validated `SummaryPayload` values.
//!
//! The summarizer returns schema-less text that is usually JSON but often
//! arrives wrapped in markdown fences, prefixed with prose, or with small
//! syntax defects. Parsing applies a bounded sequence of repair strategies
//! before giving up; validation maps every field into an explicit typed form
//! with `unknown`/`None` fallbacks instead of trusting key presence.

use crate::types::{PipelineError, Result, Sentiment, SummaryPayload, TimeHorizon};
use serde_json::Value;
use tracing::debug;

/// Strip markdown code fences and leading/trailing prose around a JSON body.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        text = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        text = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
    }

    text.trim().to_string()
}

/// Slice the text down to the outermost `{ ... }` pair, if one exists.
fn brace_slice(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

/// Remove commas that directly precede a closing bracket; the most common
/// syntax defect in model-emitted JSON.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_comma = false;
    let mut comma_ws = String::new();

    for ch in text.chars() {
        if pending_comma {
            if ch.is_whitespace() {
                comma_ws.push(ch);
                continue;
            }
            if ch != '}' && ch != ']' {
                out.push(',');
                out.push_str(&comma_ws);
            } else {
                out.push_str(&comma_ws);
            }
            pending_comma = false;
            comma_ws.clear();
            out.push(ch);
        } else if ch == ',' {
            pending_comma = true;
        } else {
            out.push(ch);
        }
    }
    if pending_comma {
        out.push(',');
        out.push_str(&comma_ws);
    }
    out
}

/// Parse a raw model response, attempting up to `repair_retries` recovery
/// strategies after the initial attempt fails.
pub fn parse_with_repair(raw: &str, repair_retries: u32) -> Result<SummaryPayload> {
    let mut candidates: Vec<String> = vec![raw.trim().to_string()];

    let cleaned = clean_response(raw);
    candidates.push(cleaned.clone());
    if let Some(sliced) = brace_slice(&cleaned) {
        candidates.push(strip_trailing_commas(&sliced));
        candidates.push(sliced);
    }

    let mut last_error = String::new();
    for (attempt, candidate) in candidates
        .iter()
        .take(1 + repair_retries as usize)
        .enumerate()
    {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => {
                if attempt > 0 {
                    debug!("model response parsed after {} repair attempt(s)", attempt);
                }
                return Ok(payload_from_value(&value));
            }
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(PipelineError::MalformedResponse(last_error))
}

/// Validate a parsed JSON value into the typed payload. Missing or
/// ill-typed fields fall back to empty/`unknown`/`None` rather than failing.
fn payload_from_value(value: &Value) -> SummaryPayload {
    SummaryPayload {
        summary: string_field(value, "summary"),
        investment_implications: string_field(value, "investment_implications"),
        key_metrics: list_field(value, "key_metrics"),
        companies_mentioned: list_field(value, "companies_mentioned"),
        sectors_affected: list_field(value, "sectors_affected"),
        sentiment: value
            .get("sentiment")
            .and_then(Value::as_str)
            .map(Sentiment::parse)
            .unwrap_or(Sentiment::Unknown),
        risk_factors: list_field(value, "risk_factors"),
        opportunities: list_field(value, "opportunities"),
        time_horizon: value
            .get("time_horizon")
            .and_then(Value::as_str)
            .and_then(TimeHorizon::parse),
        confidence_score: confidence_field(value),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Ordered list of strings, preserving the model's emission order. Entries
/// are not deduplicated; non-string elements are stringified.
fn list_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        // Some models emit a single string instead of a one-element list.
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Confidence as a number or numeric string, clamped to [0, 1].
fn confidence_field(value: &Value) -> Option<f64> {
    let number = match value.get("confidence_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if number.is_nan() {
        return None;
    }
    Some(number.clamp(0.0, 1.0))
}
