//! Module graph materialisation.
//!
//! A package is turned into an in-memory module table in two steps. A
//! re-export entry module is written to a staging directory, then every
//! module reachable from it through relative or absolute static specifiers
//! is read, its specifiers are rewritten to virtual `name@version/path`
//! form, and the result is stored under that virtual specifier. Modules may
//! not escape the package directory.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::source::{PackageLocation, module_candidates};
use crate::error::DependencyResolutionError;

/// File name of the generated re-export module.
pub(crate) const ENTRY_FILE: &str = "__spindle_entry__.js";

const MAX_MODULES: usize = 1024;

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static SPECIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\bfrom\s*|\bimport\s*\(\s*|\bimport\s*)["']([^"'\r\n]+)["']"#)
        .expect("specifier pattern compiles")
});

/// Module table for one package.
#[derive(Debug)]
pub(crate) struct Materialized {
    pub(crate) entry: String,
    pub(crate) modules: BTreeMap<String, String>,
}

/// Writes the entry module into `staging` and loads the reachable graph.
pub(crate) fn materialize(
    key: &str,
    location: &PackageLocation,
    staging: &Path,
) -> Result<Materialized, DependencyResolutionError> {
    let entry_path = staging.join(ENTRY_FILE);
    fs::write(&entry_path, entry_source(location.entry())).map_err(|error| {
        DependencyResolutionError::io(key, "cannot write staging entry module", error)
    })?;

    let root = canonical(key, location.root())?;
    let staged = canonical(key, &entry_path)?;
    let entry = format!("{key}/{ENTRY_FILE}");

    let mut walker = Walker {
        key,
        root,
        known: HashMap::from([(staged.clone(), entry.clone())]),
        pending: VecDeque::from([(staged, entry.clone())]),
        modules: BTreeMap::new(),
    };
    walker.run()?;
    Ok(Materialized {
        entry,
        modules: walker.modules,
    })
}

/// Source of the generated entry: named re-exports plus a default export
/// that prefers the package's own default.
pub(crate) fn entry_source(package_entry: &Path) -> String {
    let target = serde_json::Value::String(package_entry.to_string_lossy().into_owned());
    format!(
        "import * as __pkg from {target};\n\
         export * from {target};\n\
         export default (\"default\" in __pkg ? __pkg.default : __pkg);\n"
    )
}

struct Walker<'a> {
    key: &'a str,
    root: PathBuf,
    known: HashMap<PathBuf, String>,
    pending: VecDeque<(PathBuf, String)>,
    modules: BTreeMap<String, String>,
}

impl Walker<'_> {
    fn run(&mut self) -> Result<(), DependencyResolutionError> {
        while let Some((path, specifier)) = self.pending.pop_front() {
            if self.modules.len() >= MAX_MODULES {
                return Err(DependencyResolutionError::new(
                    self.key,
                    format!("module graph exceeds {MAX_MODULES} modules"),
                ));
            }
            let text = fs::read_to_string(&path).map_err(|error| {
                DependencyResolutionError::io(
                    self.key,
                    format!("cannot read module {}", path.display()),
                    error,
                )
            })?;
            let rewritten = self.rewrite(&path, &text)?;
            self.modules.insert(specifier, rewritten);
        }
        Ok(())
    }

    fn rewrite(&mut self, path: &Path, text: &str) -> Result<String, DependencyResolutionError> {
        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for captures in SPECIFIER.captures_iter(text) {
            let Some(found) = captures.get(2) else {
                continue;
            };
            let Some(replacement) = self.link(path, found.as_str())? else {
                continue;
            };
            output.push_str(text.get(cursor..found.start()).unwrap_or_default());
            output.push_str(&replacement);
            cursor = found.end();
        }
        output.push_str(text.get(cursor..).unwrap_or_default());
        Ok(output)
    }

    /// Returns the virtual specifier for a path-like import, or `None` for
    /// bare specifiers which the isolate resolves against declared packages.
    fn link(&mut self, from: &Path, specifier: &str) -> Result<Option<String>, DependencyResolutionError> {
        let written = Path::new(specifier);
        let is_relative = specifier.starts_with("./") || specifier.starts_with("../");
        if !is_relative && !written.is_absolute() {
            return Ok(None);
        }

        let base = from.parent().unwrap_or(&self.root);
        let target = if is_relative {
            base.join(written)
        } else {
            written.to_path_buf()
        };
        let resolved = module_candidates(&target)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                DependencyResolutionError::new(
                    self.key,
                    format!("cannot resolve '{specifier}' from {}", from.display()),
                )
            })?;
        let resolved = canonical(self.key, &resolved)?;

        if let Some(existing) = self.known.get(&resolved) {
            return Ok(Some(existing.clone()));
        }
        let relative = resolved.strip_prefix(&self.root).map_err(|_| {
            DependencyResolutionError::new(
                self.key,
                format!("'{specifier}' escapes the package directory"),
            )
        })?;
        let virtual_specifier = format!("{}/{}", self.key, slash_path(relative));
        self.known.insert(resolved.clone(), virtual_specifier.clone());
        self.pending.push_back((resolved, virtual_specifier.clone()));
        Ok(Some(virtual_specifier))
    }
}

fn canonical(key: &str, path: &Path) -> Result<PathBuf, DependencyResolutionError> {
    fs::canonicalize(path).map_err(|error| {
        DependencyResolutionError::io(key, format!("cannot canonicalise {}", path.display()), error)
    })
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
