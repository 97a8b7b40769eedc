//! Context documentation for LLM-driven callers.
//!
//! Documentation is produced in tiers. Author-declared text wins outright;
//! `@example` blocks and metadata examples are appended to whatever tier
//! produced the body; otherwise the exported surface is inferred from the
//! source text. Nothing here fails: each tier that cannot recover anything
//! falls through to the next, ending in a header-only stub.

mod examples;
mod explicit;
mod inference;

use tracing::debug;

pub use self::examples::DocExample;
pub use self::inference::FunctionSignature;

use self::examples::{comment_examples, render_examples};
use self::explicit::explicit_documentation;
use self::inference::{infer_functions, is_reserved};
use crate::record::Extension;

const DOCS_TARGET: &str = "spindle_extensions::docs";

/// Generates the markdown context documentation for `extension`.
#[must_use]
pub fn generate(extension: &Extension) -> String {
    generate_with_exports(extension, &[])
}

/// Generates documentation, reconciling inferred functions with the export
/// table reported by the worker.
///
/// When `exports` is non-empty, inferred names the worker did not report
/// are dropped and reported names the source scan missed are listed with an
/// unknown parameter list.
#[must_use]
pub fn generate_with_exports(extension: &Extension, exports: &[String]) -> String {
    let examples = collect_examples(extension);

    if let Some(explicit) = explicit_documentation(extension.code()) {
        debug!(target: DOCS_TARGET, extension = extension.id(), "explicit documentation found");
        return append_examples(explicit, &examples);
    }

    let functions = reconcile(infer_functions(extension.code()), exports);
    debug!(
        target: DOCS_TARGET,
        extension = extension.id(),
        functions = functions.len(),
        examples = examples.len(),
        "documentation inferred"
    );
    let namespace = extension.namespace();
    let mut output = format!(
        "### {}\n**ID**: `{}`\n**Namespace**: `{namespace}`",
        extension.name(),
        extension.id()
    );
    if let Some(description) = extension
        .metadata()
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        output.push_str("\n\n");
        output.push_str(description);
    }

    if let Some(first) = functions.first() {
        output.push_str("\n\n**Available Functions**:\n");
        for function in &functions {
            output.push_str(&format!("- `{namespace}.{}({})`", function.name, function.params));
            if let Some(returns) = &function.returns {
                output.push_str(&format!(" → `{returns}`"));
            }
            output.push('\n');
        }
        output.push_str(&format!(
            "\n**Usage**:\n```javascript\nconst result = await {namespace}.{}({});\n```",
            first.name, first.params
        ));
    }

    append_examples(output, &examples)
}

/// Metadata examples first, then those parsed from comment blocks.
fn collect_examples(extension: &Extension) -> Vec<DocExample> {
    let mut examples = extension.metadata().examples.clone();
    examples.extend(comment_examples(extension.code()));
    examples
}

fn append_examples(mut body: String, examples: &[DocExample]) -> String {
    if !examples.is_empty() {
        body.push_str("\n\n");
        body.push_str(&render_examples(examples));
    }
    body
}

fn reconcile(inferred: Vec<FunctionSignature>, exports: &[String]) -> Vec<FunctionSignature> {
    if exports.is_empty() {
        return inferred;
    }
    let mut functions: Vec<FunctionSignature> = inferred
        .into_iter()
        .filter(|signature| exports.contains(&signature.name))
        .collect();
    for name in exports.iter().filter(|name| !is_reserved(name)) {
        if !functions.iter().any(|signature| &signature.name == name) {
            functions.push(FunctionSignature {
                name: name.clone(),
                params: String::from("..."),
                returns: None,
                is_async: false,
            });
        }
    }
    functions
}
