//! Usage examples from metadata and `@example` comment blocks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static DOC_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*\*(.*?)\*/").expect("doc block pattern compiles"));

/// A worked example of calling an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocExample {
    /// Short heading.
    pub title: String,
    /// What the example demonstrates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JavaScript calling the extension.
    pub code: String,
    /// What the call returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Description,
    Code,
    Result,
    Other,
}

#[derive(Default)]
struct Draft {
    title: String,
    code: Vec<String>,
    result: Vec<String>,
}

/// Parses every `@example` tag found in `/** ... */` blocks of `source`.
pub(crate) fn comment_examples(source: &str) -> Vec<DocExample> {
    let mut examples = Vec::new();
    for block in DOC_BLOCK.captures_iter(source) {
        let Some(body) = block.get(1) else {
            continue;
        };
        if body.as_str().contains("@example") {
            parse_block(body.as_str(), &mut examples);
        }
    }
    examples
}

fn parse_block(body: &str, examples: &mut Vec<DocExample>) {
    let mut summary = Vec::new();
    let mut drafts: Vec<Draft> = Vec::new();
    let mut section = Section::Description;

    for line in body.lines().map(comment_line) {
        if let Some(tagged) = line.trim_start().strip_prefix('@') {
            let (tag, rest) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
            section = match tag {
                "example" => {
                    drafts.push(Draft {
                        title: rest.trim().to_owned(),
                        ..Draft::default()
                    });
                    Section::Code
                }
                "returns" | "return" | "result" if !drafts.is_empty() => {
                    push_line(&mut drafts, Section::Result, rest.trim());
                    Section::Result
                }
                _ => Section::Other,
            };
            continue;
        }
        match section {
            Section::Description => {
                let text = line.trim();
                if !text.is_empty() {
                    summary.push(text.to_owned());
                }
            }
            Section::Code | Section::Result => push_line(&mut drafts, section, line),
            Section::Other => {}
        }
    }

    let description = (!summary.is_empty()).then(|| summary.join(" "));
    let offset = examples.len();
    for (index, draft) in drafts.into_iter().enumerate() {
        let code = strip_fences(&draft.code);
        if code.is_empty() {
            continue;
        }
        let title = if draft.title.is_empty() {
            format!("Example {}", offset.saturating_add(index).saturating_add(1))
        } else {
            draft.title
        };
        let result = draft.result.join("\n").trim().to_owned();
        examples.push(DocExample {
            title,
            description: description.clone(),
            code,
            result: (!result.is_empty()).then_some(result),
        });
    }
}

fn push_line(drafts: &mut [Draft], section: Section, line: &str) {
    let Some(draft) = drafts.last_mut() else {
        return;
    };
    match section {
        Section::Code => draft.code.push(line.to_owned()),
        Section::Result => {
            if !line.trim().is_empty() {
                draft.result.push(line.trim().to_owned());
            }
        }
        Section::Description | Section::Other => {}
    }
}

/// Strips the comment gutter (`*` and one following space) from a line.
fn comment_line(line: &str) -> &str {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix('*')
        .map_or(trimmed, |rest| rest.strip_prefix(' ').unwrap_or(rest))
}

fn strip_fences(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|line| !line.trim_start().starts_with("```"))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Renders the `**Examples**` section.
pub(crate) fn render_examples(examples: &[DocExample]) -> String {
    let mut output = String::from("**Examples**:\n");
    for example in examples {
        output.push_str(&format!("\n#### {}\n", example.title));
        if let Some(description) = &example.description {
            output.push_str(description);
            output.push('\n');
        }
        output.push_str(&format!("```javascript\n{}\n```\n", example.code));
        if let Some(result) = &example.result {
            output.push_str(&format!("Result: `{result}`\n"));
        }
    }
    output.trim_end().to_owned()
}
