//! Best-effort recovery of exported function signatures from source text.
//!
//! Recognised shapes, in any order:
//! - `name: (a, b) => ...`, `name: async x => ...`, `name: function (a) {`
//! - `name(a) {` and `async name(a) {` method shorthand
//! - `exports.name = (a) => ...` and `module.exports.name = function (a) {`
//! - `module.exports = { name }` shorthand pointing at a top-level
//!   `function name(a)` or `const name = (a) =>`
//!
//! A return type comes from a `): Type` annotation or, failing that, from
//! `@returns {Type}` in a doc comment directly above the definition.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Property-style definitions: arrow functions and function expressions.
#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static PROPERTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(?:^|[{,])[ \t]*([A-Za-z_$][\w$]*)[ \t]*:[ \t]*(async\s+)?(?:function\b\s*[A-Za-z_$]*\s*)?\(([^)]*)\)(?:\s*:\s*([^={]+?))?\s*(?:=>|\{)",
    )
    .expect("property pattern compiles")
});

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static BARE_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[{,])[ \t]*([A-Za-z_$][\w$]*)[ \t]*:[ \t]*(async\s+)?([A-Za-z_$][\w$]*)\s*=>")
        .expect("arrow pattern compiles")
});

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(async\s+)?([A-Za-z_$][\w$]*)[ \t]*\(([^)]*)\)(?:\s*:\s*([^{;]+?))?\s*\{",
    )
    .expect("method pattern compiles")
});

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static ASSIGNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=\s*(async\s+)?(?:function\b\s*[A-Za-z_$]*\s*)?\(([^)]*)\)(?:\s*:\s*([^={]+?))?\s*(?:=>|\{)",
    )
    .expect("assignment pattern compiles")
});

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static EXPORT_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:module\.exports|return)\s*=?\s*\{([^{}]*)\}").expect("export object pattern compiles")
});

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static RETURNS_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@returns?\s*\{([^}]+)\}").expect("returns tag pattern compiles")
});

const NOT_FUNCTION_NAMES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "with", "constructor",
    "getDocumentation", "getDocs", "getContext", "getContextDocumentation",
];

/// Returns `true` for names that are never listed as callable functions.
pub(crate) fn is_reserved(name: &str) -> bool {
    NOT_FUNCTION_NAMES.contains(&name)
}

/// An exported function as recovered from source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Exported name.
    pub name: String,
    /// Parameter list as written, whitespace-normalised.
    pub params: String,
    /// Declared return type, if any.
    pub returns: Option<String>,
    /// Declared `async`.
    pub is_async: bool,
}

/// Returns the exported functions of `source` in source order.
pub(crate) fn infer_functions(source: &str) -> Vec<FunctionSignature> {
    let mut found: Vec<(usize, FunctionSignature)> = Vec::new();
    collect(&mut found, source, &PROPERTY, |caps| Shape {
        name: 1,
        is_async: 2,
        params: 3,
        returns: Some(4),
        caps,
    });
    collect(&mut found, source, &BARE_ARROW, |caps| Shape {
        name: 1,
        is_async: 2,
        params: 3,
        returns: None,
        caps,
    });
    collect(&mut found, source, &METHOD, |caps| Shape {
        name: 2,
        is_async: 1,
        params: 3,
        returns: Some(4),
        caps,
    });
    collect(&mut found, source, &ASSIGNED, |caps| Shape {
        name: 1,
        is_async: 2,
        params: 3,
        returns: Some(4),
        caps,
    });
    collect_shorthand(&mut found, source);

    found.sort_by_key(|(position, _)| *position);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, signature)| signature)
        .filter(|signature| seen.insert(signature.name.clone()))
        .collect()
}

struct Shape<'c, 'h> {
    caps: &'c Captures<'h>,
    name: usize,
    is_async: usize,
    params: usize,
    returns: Option<usize>,
}

fn collect<'h>(
    found: &mut Vec<(usize, FunctionSignature)>,
    source: &'h str,
    pattern: &Regex,
    shape: impl for<'c> Fn(&'c Captures<'h>) -> Shape<'c, 'h>,
) {
    for caps in pattern.captures_iter(source) {
        let layout = shape(&caps);
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(layout.name)) else {
            continue;
        };
        if is_reserved(name.as_str()) {
            continue;
        }
        let annotated = layout
            .returns
            .and_then(|index| layout.caps.get(index))
            .map(|m| m.as_str().trim().to_owned())
            .filter(|text| !text.is_empty());
        let signature = FunctionSignature {
            name: name.as_str().to_owned(),
            params: normalise(layout.caps.get(layout.params).map_or("", |m| m.as_str())),
            returns: annotated.or_else(|| documented_return(source, whole.start())),
            is_async: layout.caps.get(layout.is_async).is_some(),
        };
        found.push((whole.start(), signature));
    }
}

/// Resolves `{ name, other }` export shorthand to top-level definitions.
fn collect_shorthand(found: &mut Vec<(usize, FunctionSignature)>, source: &str) {
    for caps in EXPORT_OBJECT.captures_iter(source) {
        let Some(body) = caps.get(1) else {
            continue;
        };
        for entry in body.as_str().split(',').map(str::trim) {
            let is_identifier = !entry.is_empty()
                && entry
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            if !is_identifier {
                continue;
            }
            if let Some(signature) = top_level_definition(source, entry) {
                found.push((body.start(), signature));
            }
        }
    }
}

fn top_level_definition(source: &str, name: &str) -> Option<FunctionSignature> {
    let escaped = regex::escape(name);
    let pattern = Regex::new(&format!(
        r"(?:(async\s+)function\s+{escaped}\s*\(([^)]*)\)|function\s+{escaped}\s*\(([^)]*)\)|(?:const|let|var)\s+{escaped}\s*=\s*(async\s+)?(?:function\b\s*[A-Za-z_$]*\s*)?\(([^)]*)\))"
    ))
    .ok()?;
    let caps = pattern.captures(source)?;
    let whole = caps.get(0)?;
    let params = caps
        .get(2)
        .or_else(|| caps.get(3))
        .or_else(|| caps.get(5))
        .map_or("", |m| m.as_str());
    Some(FunctionSignature {
        name: name.to_owned(),
        params: normalise(params),
        returns: documented_return(source, whole.start()),
        is_async: caps.get(1).is_some() || caps.get(4).is_some(),
    })
}

/// Reads `@returns {T}` from a doc comment ending right before `start`.
fn documented_return(source: &str, start: usize) -> Option<String> {
    let head = source.get(..start)?.trim_end().strip_suffix("*/")?;
    let open = head.rfind("/**")?;
    let comment = head.get(open..)?;
    RETURNS_TAG
        .captures(comment)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_owned())
}

fn normalise(params: &str) -> String {
    params.split_whitespace().collect::<Vec<_>>().join(" ")
}
