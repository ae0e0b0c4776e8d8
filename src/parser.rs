//! Tolerant parsing of model output into advice values.
//!
//! The generative service returns free-form text: clean JSON on a good day,
//! but also JSON wrapped in code fences, JSON truncated mid-object by the
//! output-token limit, or JSON buried in prose. This module turns any of
//! those into a validated advice value, or `None` so the orchestrator can
//! retry or fall back. It never returns an error.
//!
//! The pipeline is an ordered list of pure extraction stages, tried left to
//! right, first successful parse-and-validate wins:
//!
//! 1. strip code fences, parse directly
//! 2. repair (drop trailing commas, close unbalanced braces/brackets), parse
//! 3. extract the first balanced `{...}` object from surrounding prose, parse

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::model::{RichReport, Severity, SimpleAdvice};

/// Checklist substituted when the model omits one or sends it empty.
pub fn default_decon_checklist() -> Vec<String> {
    vec![
        "Ventilate gear thoroughly.".to_string(),
        "Wash exposed skin with soap and water.".to_string(),
        "Monitor for any symptoms (headache, dizziness).".to_string(),
        "Report any unusual symptoms to medical personnel.".to_string(),
    ]
}

/// Parse a raw model blob into simple advice.
///
/// `severity` gates the reminder field: for a SAFE window the reminder is
/// ignored even if the model sent one.
pub fn parse_simple_advice(text: &str, severity: Severity) -> Option<SimpleAdvice> {
    parse_with(text, |value| validate_simple(value, severity))
}

/// Parse a raw model blob into a rich report.
pub fn parse_rich_report(text: &str) -> Option<RichReport> {
    parse_with(text, validate_rich)
}

fn parse_with<T>(text: &str, validate: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return None;
    }

    let stages: [fn(&str) -> Option<String>; 3] = [
        |s| Some(s.to_string()),
        |s| Some(repair_json(s)),
        extract_first_json_object,
    ];

    for stage in stages {
        let Some(candidate) = stage(&cleaned) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(parsed) = validate(&value) {
                return Some(parsed);
            }
        }
    }

    None
}

/// Strip ```json fences (or ```): drop the fence line and everything from
/// the last fence onward.
fn strip_code_fences(s: &str) -> String {
    let mut trimmed = s.trim();
    if trimmed.starts_with("```") {
        if let Some(first_nl) = trimmed.find('\n') {
            trimmed = &trimmed[first_nl + 1..];
        }
        if let Some(last_fence) = trimmed.rfind("```") {
            trimmed = &trimmed[..last_fence];
        }
        trimmed = trimmed.trim();
    }
    trimmed.to_string()
}

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("trailing comma pattern"));

/// Best-effort repair for truncated or slightly malformed JSON.
///
/// Removes trailing commas before closing delimiters, then appends whatever
/// closers are needed to balance unclosed `{`/`[` pairs. Depth is tracked
/// quote-aware so braces inside string values don't count. Idempotent:
/// repairing an already-repaired string changes nothing.
fn repair_json(s: &str) -> String {
    let mut t = strip_code_fences(s);
    while t.ends_with("```") || t.ends_with('`') {
        t.truncate(t.len() - 1);
        t = t.trim_end().to_string();
    }

    let mut t = TRAILING_COMMA.replace_all(&t, "$1").into_owned();
    if t.ends_with(',') {
        t.truncate(t.len() - 1);
    }

    let mut open_curly: i64 = 0;
    let mut open_square: i64 = 0;
    let mut in_str = false;
    let mut escaped = false;
    for c in t.chars() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '{' => open_curly += 1,
            '}' => open_curly = (open_curly - 1).max(0),
            '[' => open_square += 1,
            ']' => open_square = (open_square - 1).max(0),
            _ => {}
        }
    }

    // A string truncated mid-value needs its quote closed before the
    // structural closers.
    if in_str {
        t.push('"');
    }
    for _ in 0..open_square {
        t.push(']');
    }
    for _ in 0..open_curly {
        t.push('}');
    }
    t
}

/// Extract the first balanced top-level `{...}` block when extra text
/// surrounds the JSON.
fn extract_first_json_object(s: &str) -> Option<String> {
    let mut depth = 0i64;
    let mut start = None;
    let mut in_str = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start {
                        return Some(s[start..i + c.len_utf8()].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

// ---- shape validation / coercion ----

/// First present, non-blank string among `keys`.
fn text_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Coerce a field into a list of strings: arrays are taken element-wise, a
/// single string splits on newline, semicolon, or pipe. Blanks are dropped.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(['\n', ';', '|'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// First key among `keys` that yields a non-empty string list.
fn list_field(obj: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .map(string_list)
        .find(|items| !items.is_empty())
        .unwrap_or_default()
}

/// Clamp a riskScore-ish value into `[0, 100]`; absent or non-numeric
/// defaults to 50.
fn coerce_risk_score(value: Option<&Value>) -> i64 {
    let score = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    score.unwrap_or(50).clamp(0, 100)
}

fn validate_simple(value: &Value, severity: Severity) -> Option<SimpleAdvice> {
    if !value.is_object() {
        return None;
    }

    let summary = text_field(value, &["summary", "overview", "message"])?;

    let mut actions = list_field(value, &["actions"]);
    if actions.is_empty() {
        actions = list_field(value, &["bullets", "action_points", "recommendations", "tips"]);
    }
    if actions.is_empty() {
        return None;
    }
    actions.truncate(3);

    let decon_reminder = if severity.needs_decon() {
        text_field(value, &["deconReminder", "reminder"])
    } else {
        None
    };

    Some(SimpleAdvice {
        summary,
        actions,
        decon_reminder,
    })
}

fn validate_rich(value: &Value) -> Option<RichReport> {
    if !value.is_object() {
        return None;
    }

    let summary = text_field(value, &["summary", "overview", "message"])?;

    let mut key_findings = list_field(value, &["keyFindings", "key_findings", "findings"]);
    if key_findings.is_empty() {
        return None;
    }
    key_findings.truncate(5);

    let mut recommendations = list_field(value, &["recommendations", "actions"]);
    if recommendations.is_empty() {
        return None;
    }
    recommendations.truncate(5);

    let mut decon_checklist = list_field(value, &["deconChecklist", "decon_checklist"]);
    if decon_checklist.is_empty() {
        decon_checklist = default_decon_checklist();
    }
    decon_checklist.truncate(6);

    Some(RichReport {
        summary,
        risk_score: coerce_risk_score(value.get("riskScore").or_else(|| value.get("risk_score"))),
        key_findings,
        recommendations,
        decon_checklist,
        policy_suggestion: text_field(value, &["policySuggestion", "policy_suggestion"]),
    })
}
