//! Structured extraction from free-text model replies.
//!
//! Models wrap JSON in code fences, prepend reasoning blocks, or surround it
//! with prose. The helpers here peel that noise off and either produce a typed
//! record or an [`ExtractionFailed`] carrying the untouched reply.

use serde_json::{Map, Value};

use crate::error::ExtractionFailed;
use crate::scoring::MAX_TURN_SCORE;

/// Reasoning/internal tags whose content is never part of the answer.
const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

/// Positions produced by the referee at setup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stances {
    pub pro_stance: String,
    pub con_stance: String,
}

/// A referee score before it is attributed to a side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreVerdict {
    pub score: u32,
    pub reasoning: String,
}

/// Placeholder used when the referee omits its reasoning.
pub const MISSING_REASONING: &str = "No reasoning given.";

/// Remove reasoning blocks such as `<think>...</think>` including their content.
pub fn strip_reasoning(response: &str) -> String {
    let mut result = response.to_string();

    for tag in &REASONING_TAGS {
        // Match <tag>...</tag> including with attributes and newlines
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    result
}

/// Sanitize a spoken argument: reasoning blocks, stray tags, emphasis markers
/// and runs of whitespace are removed.
pub fn sanitize_response(response: &str) -> String {
    let mut result = strip_reasoning(response);

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}

/// Strip a leading ```` ```lang ```` marker and a trailing ```` ``` ```` marker.
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }

    body.trim()
}

/// Parse the JSON object contained in a model reply.
fn parse_object(raw: &str, expected: &'static str) -> Result<Map<String, Value>, ExtractionFailed> {
    let fail = |reason: String| ExtractionFailed {
        expected,
        reason,
        raw: raw.to_string(),
    };

    let without_reasoning = strip_reasoning(raw);
    let cleaned = strip_code_fences(&without_reasoning);

    let first_error = match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(_) => "reply is JSON but not an object".to_string(),
        Err(e) => e.to_string(),
    };

    // Fall back to the outermost {...} slice for JSON embedded in prose.
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return Ok(map);
            }
        }
    }

    Err(fail(first_error))
}

/// Extract the `{pro_stance, con_stance}` pair. Both must be non-empty.
pub fn extract_stances(raw: &str) -> Result<Stances, ExtractionFailed> {
    const EXPECTED: &str = "stances";
    let map = parse_object(raw, EXPECTED)?;

    let field = |key: &str| -> Result<String, ExtractionFailed> {
        match map.get(key).and_then(Value::as_str).map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(ExtractionFailed {
                expected: EXPECTED,
                reason: format!("missing or empty '{}'", key),
                raw: raw.to_string(),
            }),
        }
    };

    Ok(Stances {
        pro_stance: field("pro_stance")?,
        con_stance: field("con_stance")?,
    })
}

/// Extract `{score, reasoning}`.
///
/// `score` may be a single number or a mapping of sub-scores (logic,
/// evidence, persuasiveness), which are summed. The mapping shape is a
/// compatibility shim for inconsistent model output, not a format to extend.
pub fn extract_score(raw: &str) -> Result<ScoreVerdict, ExtractionFailed> {
    const EXPECTED: &str = "score";
    let map = parse_object(raw, EXPECTED)?;
    let fail = |reason: String| ExtractionFailed {
        expected: EXPECTED,
        reason,
        raw: raw.to_string(),
    };

    let score_value = map
        .get("score")
        .ok_or_else(|| fail("missing 'score'".to_string()))?;
    let score = normalize_score(score_value).map_err(&fail)?;
    if score > MAX_TURN_SCORE as u64 {
        return Err(fail(format!(
            "score {} is outside 0..={}",
            score, MAX_TURN_SCORE
        )));
    }

    let reasoning = match map.get("reasoning") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::String(_)) | Some(Value::Null) | None => MISSING_REASONING.to_string(),
        Some(other) => other.to_string(),
    };

    Ok(ScoreVerdict {
        score: score as u32,
        reasoning,
    })
}

fn normalize_score(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
                _ => Err(format!("score {} is not a non-negative integer", n)),
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("score '{}' is not a non-negative integer", s)),
        Value::Object(parts) if !parts.is_empty() => {
            let mut total = 0u64;
            for part in parts.values() {
                match part {
                    Value::Object(_) => return Err("sub-scores may not be nested".to_string()),
                    other => total = total.saturating_add(normalize_score(other)?),
                }
            }
            Ok(total)
        }
        other => Err(format!("unsupported score shape: {}", other)),
    }
}
