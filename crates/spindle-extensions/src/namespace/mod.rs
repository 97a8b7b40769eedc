//! Namespace resolution for extension identifiers.
//!
//! Resolution is a pure function of the id. The kebab-case id is converted
//! to camelCase and cut at its first internal capital, so `excel-document`
//! is exposed as `excel`. Ids whose first word names a family of related
//! extensions keep their full camelCase form instead, so `show-chart` and
//! `show-table` stay distinct.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First words that introduce a family of extensions.
pub const FAMILY_PREFIXES: &[&str] = &[
    "show",
    "web",
    "image",
    "pdf",
    "word",
    "powerpoint",
    "extension",
];

/// The identifier under which an extension's functions are called.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Resolves the namespace of `extension_id`.
    #[must_use]
    pub fn for_extension(extension_id: &str) -> Self {
        let camel = camel_case(extension_id);
        let first = first_word(&camel);
        if FAMILY_PREFIXES.contains(&first) && camel != first {
            return Self(camel);
        }
        Self(first.to_owned())
    }

    /// Returns the namespace text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Converts `kebab-case` to `camelCase`. Letters after a hyphen are
/// upper-cased and the hyphen dropped; everything else is kept as written.
#[must_use]
pub fn camel_case(id: &str) -> String {
    let mut output = String::with_capacity(id.len());
    let mut upper_next = false;
    for ch in id.chars() {
        if ch == '-' {
            upper_next = !output.is_empty();
            continue;
        }
        if upper_next {
            output.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            output.push(ch);
        }
    }
    output
}

/// Returns the prefix of `camel` before its first capital after position 0.
fn first_word(camel: &str) -> &str {
    let cut = camel
        .char_indices()
        .skip(1)
        .find(|(_, ch)| ch.is_uppercase())
        .map_or(camel.len(), |(index, _)| index);
    camel.get(..cut).unwrap_or(camel)
}

#[cfg(test)]
mod tests;
