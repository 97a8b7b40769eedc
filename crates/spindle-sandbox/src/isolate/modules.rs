//! Module resolution for bundled dependencies.
//!
//! The engine never touches the filesystem. Every module an extension can
//! import was materialised by the bundler and installed here under its
//! virtual `name@version/path` specifier.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module, Result};

use crate::bundler::Bundle;

#[derive(Debug, Default)]
struct TableState {
    sources: HashMap<String, String>,
    packages: HashMap<String, String>,
}

/// Shared table of module sources, owned by one engine runtime.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleTable {
    state: Rc<RefCell<TableState>>,
}

impl ModuleTable {
    /// Makes every module of `bundle` importable. Bare package names map to
    /// the most recently installed version.
    pub(crate) fn install(&self, bundle: &Bundle) {
        let mut state = self.state.borrow_mut();
        for (name, handle) in bundle {
            for (specifier, source) in handle.modules() {
                state
                    .sources
                    .entry(specifier.clone())
                    .or_insert_with(|| source.clone());
            }
            state
                .packages
                .insert(name.clone(), handle.entry_specifier().to_owned());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.borrow().sources.len()
    }

    fn resolve(&self, base: &str, name: &str) -> Option<String> {
        let state = self.state.borrow();
        if name.starts_with("./") || name.starts_with("../") {
            let joined = join_specifier(base, name)?;
            return state.sources.contains_key(&joined).then_some(joined);
        }
        if state.sources.contains_key(name) {
            return Some(name.to_owned());
        }
        state.packages.get(name).cloned()
    }

    fn source(&self, name: &str) -> Option<String> {
        self.state.borrow().sources.get(name).cloned()
    }
}

/// Joins a relative specifier onto the directory of `base`.
pub(crate) fn join_specifier(base: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').collect();
    parts.pop();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

pub(crate) struct BundleResolver {
    table: ModuleTable,
}

impl BundleResolver {
    pub(crate) const fn new(table: ModuleTable) -> Self {
        Self { table }
    }
}

impl Resolver for BundleResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> Result<String> {
        self.table
            .resolve(base, name)
            .ok_or_else(|| Error::new_resolving(base, name))
    }
}

pub(crate) struct BundleLoader {
    table: ModuleTable,
}

impl BundleLoader {
    pub(crate) const fn new(table: ModuleTable) -> Self {
        Self { table }
    }
}

impl Loader for BundleLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> Result<Module<'js, Declared>> {
        let source = self
            .table
            .source(name)
            .ok_or_else(|| Error::new_loading(name))?;
        Module::declare(ctx.clone(), name, source)
    }
}
