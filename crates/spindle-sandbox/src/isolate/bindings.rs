//! Binding plan for an evaluation request.
//!
//! The realm compiles extension source as the body of an async function
//! taking `module`, `exports`, `deps`, `registerHook`, `unregisterHook` and
//! `extension`, followed by one parameter per identifier-safe dependency
//! name. Other dependency names stay reachable as `deps["date-fns"]`.
//! Source text is passed to the realm as data and never spliced into a
//! script.

use serde_json::{Value, json};

use crate::bundler::Bundle;

/// Parameters every extension body receives.
const BODY_PARAMETERS: &[&str] = &[
    "module",
    "exports",
    "deps",
    "registerHook",
    "unregisterHook",
    "extension",
];

const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "arguments",
    "eval", "undefined", "NaN", "Infinity", "async",
];

/// Returns `true` when `name` can be bound as a plain parameter.
pub(crate) fn is_bindable(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == '$');
    starts_well
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED_WORDS.contains(&name)
        && !BODY_PARAMETERS.contains(&name)
}

/// Renders the JSON request handed to the realm's `begin` control call.
pub(crate) fn evaluation_request(bundle: &Bundle, metadata: &Value) -> String {
    let specs: Vec<Value> = bundle
        .iter()
        .map(|(name, handle)| json!([name, handle.entry_specifier(), handle.key()]))
        .collect();
    let aliases: Vec<&str> = bundle
        .keys()
        .map(String::as_str)
        .filter(|name| is_bindable(name))
        .collect();
    let extension = if metadata.is_object() {
        metadata.clone()
    } else {
        json!({})
    };
    json!({
        "specs": specs,
        "aliases": aliases,
        "metadata": extension,
    })
    .to_string()
}
