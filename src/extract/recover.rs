//! Lenient recovery of a JSON array from free-form model output.
//!
//! Models wrap the requested array in prose, code fences or trailing
//! commentary. Recovery first tries the widest `[` … `]` span, which keeps
//! nested arrays intact, and falls back to the first balanced span when
//! trailing text contains stray brackets.

use serde_json::Value;

use crate::graph::{NewRelation, scalar_text, truthy};

#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// No `[` … `]` span in the text at all.
    NoArray,
    /// A span was found but none parsed as a JSON array.
    Invalid(String),
    Array(Vec<Value>),
}

/// Recover the JSON array embedded in `raw`.
pub fn recover_json_array(raw: &str) -> Recovery {
    let Some(greedy) = greedy_span(raw) else {
        return Recovery::NoArray;
    };

    let first_err = match serde_json::from_str::<Value>(greedy) {
        Ok(Value::Array(items)) => return Recovery::Array(items),
        Ok(other) => format!("expected array, found {}", kind(&other)),
        Err(e) => e.to_string(),
    };

    match balanced_span(raw) {
        Some(balanced) if balanced.len() != greedy.len() => match serde_json::from_str::<Value>(balanced) {
            Ok(Value::Array(items)) => Recovery::Array(items),
            _ => Recovery::Invalid(first_err),
        },
        _ => Recovery::Invalid(first_err),
    }
}

/// From the first `[` to the last `]`, inclusive.
fn greedy_span(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

/// The first `[` … `]` span whose brackets balance, ignoring brackets
/// inside JSON string literals.
fn balanced_span(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Turn recovered array elements into relations stamped with `chapter`.
///
/// Returns the relations plus the number of elements skipped: non-objects,
/// objects missing `source`/`target`/`relation`, or whose endpoint values
/// are not scalars. A present but non-scalar `relation` becomes `""`;
/// `is_reveal` is read by truthiness, as on load.
pub fn parse_triples(items: &[Value], chapter: i64) -> (Vec<NewRelation>, usize) {
    let mut relations = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        let Some(obj) = item.as_object() else {
            skipped += 1;
            continue;
        };
        let field = |name: &str| obj.get(name).and_then(scalar_text);
        if !obj.contains_key("relation") {
            skipped += 1;
            continue;
        }
        let (Some(source), Some(target)) = (field("source"), field("target")) else {
            skipped += 1;
            continue;
        };
        let relation = field("relation").unwrap_or_default();

        relations.push(
            NewRelation::new(source, target, relation, chapter)
                .revealed_at(chapter)
                .secret(obj.get("is_reveal").is_some_and(truthy))
                .desc(field("desc").unwrap_or_default()),
        );
    }
    (relations, skipped)
}
