//! Free-text input sanitation.
//!
//! Strips the characters and fragments most commonly used to smuggle markup
//! or script into a value that may later be reflected back by the upstream
//! provider.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static ANGLE_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>]").expect("angle bracket pattern"));

static JAVASCRIPT_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("javascript protocol pattern"));

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on\w+=").expect("event handler pattern"));

/// Remove angle brackets, `javascript:` prefixes and inline `on*=` handlers,
/// then trim surrounding whitespace.
///
/// Passes are repeated until the value stops changing, so fragments that
/// only appear after an inner removal (`jajavascript:vascript:`) are caught
/// and the function is idempotent.
pub fn sanitize(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn sanitize_pass(input: &str) -> String {
    let without_brackets = ANGLE_BRACKETS.replace_all(input, "");
    let without_protocol = JAVASCRIPT_PROTOCOL.replace_all(&without_brackets, "");
    let without_handlers = EVENT_HANDLER.replace_all(&without_protocol, "");
    without_handlers.trim().to_string()
}

/// Sanitize a JSON value. Strings are cleaned with [`sanitize`]; every
/// other value is returned unchanged.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(&s)),
        other => other,
    }
}
