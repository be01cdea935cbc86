//! Reply text extraction across payload shapes
//!
//! The completion service answers in several shapes depending on endpoint,
//! model family and server version. Extraction runs a fixed, ordered list of
//! strategies over the raw payload and returns the first non-blank text.
//! "No text" is a signal for the caller, not an error.

use serde_json::Value;

/// A single extraction strategy over a raw reply
type Strategy = fn(&Value) -> Option<String>;

/// Strategies in priority order
const STRATEGIES: &[(&str, Strategy)] = &[
    ("output_text", flattened_text),
    ("output", structured_output),
    ("text.value", text_value),
    ("choices", legacy_choices),
];

/// Extract trimmed, non-empty text from a raw reply
pub fn extract_text(reply: &Value) -> Option<String> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let text = strategy(reply)?;
        tracing::trace!("Extracted reply text via {}", name);
        Some(text)
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `output_text` convenience field
fn flattened_text(reply: &Value) -> Option<String> {
    non_blank(reply.get("output_text"))
}

/// `output[*].content[*].text`, or a nested `message` part whose own content
/// holds a `text`-typed entry
fn structured_output(reply: &Value) -> Option<String> {
    let items = reply
        .get("output")
        .filter(|v| v.as_array().is_some_and(|a| !a.is_empty()))
        .or_else(|| reply.get("outputs"))?
        .as_array()?;

    items.iter().find_map(|item| {
        let parts = item.get("content")?.as_array()?;
        parts.iter().find_map(|part| {
            if let Some(text) = non_blank(part.get("text")) {
                return Some(text);
            }
            if part.get("type").and_then(Value::as_str) != Some("message") {
                return None;
            }
            part.get("content")?.as_array()?.iter().find_map(|inner| {
                if inner.get("type").and_then(Value::as_str) == Some("text") {
                    non_blank(inner.get("text"))
                } else {
                    None
                }
            })
        })
    })
}

/// `text.value`, used by some summary-only endpoints
fn text_value(reply: &Value) -> Option<String> {
    non_blank(reply.get("text")?.get("value"))
}

/// `choices[0].message.content`, the oldest wire shape
fn legacy_choices(reply: &Value) -> Option<String> {
    non_blank(reply.get("choices")?.get(0)?.get("message")?.get("content"))
}
