//! Author-declared documentation.
//!
//! Recognises a documentation function whose body is nothing but a string
//! literal, a template literal without substitutions, or a `+` chain of
//! those, and returns the text it would produce.

use std::iter::Peekable;
use std::str::Chars;

use once_cell::sync::Lazy;
use regex::Regex;

#[expect(clippy::expect_used, reason = "the pattern is a checked-in literal")]
static DOC_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:getDocumentation|getDocs|getContext|getContextDocumentation)\b\s*(?:[:=]\s*(?:async\s+)?(?:function\b\s*[A-Za-z_$]*)?\s*)?\(\s*\)\s*(?:=>)?",
    )
    .expect("documentation pattern compiles")
});

/// Returns the literal text of the first documentation function found.
pub(crate) fn explicit_documentation(source: &str) -> Option<String> {
    DOC_FUNCTION.find_iter(source).find_map(|found| {
        let body = source.get(found.end()..)?;
        literal_body(body)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
    })
}

fn literal_body(body: &str) -> Option<String> {
    let mut chars = body.chars().peekable();
    skip_whitespace(&mut chars);
    if chars.peek() == Some(&'{') {
        chars.next();
        skip_whitespace(&mut chars);
        expect_word(&mut chars, "return")?;
    }
    skip_whitespace(&mut chars);
    let parenthesised = chars.peek() == Some(&'(');
    if parenthesised {
        chars.next();
    }

    let mut text = String::new();
    loop {
        skip_whitespace(&mut chars);
        text.push_str(&literal(&mut chars)?);
        skip_whitespace(&mut chars);
        if chars.peek() == Some(&'+') {
            chars.next();
            continue;
        }
        break;
    }

    if parenthesised {
        skip_whitespace(&mut chars);
        if chars.next() != Some(')') {
            return None;
        }
        skip_whitespace(&mut chars);
    }
    match chars.peek() {
        None | Some(';' | '}' | ',' | '\n' | '\r') => Some(text),
        Some(_) => None,
    }
}

fn literal(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let quote = chars.next().filter(|c| matches!(c, '`' | '\'' | '"'))?;
    let mut text = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => text.push(unescape(chars.next()?)),
            '$' if quote == '`' && chars.peek() == Some(&'{') => return None,
            c if c == quote => return Some(text),
            '\n' if quote != '`' => return None,
            c => text.push(c),
        }
    }
    None
}

const fn unescape(ch: char) -> char {
    match ch {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn expect_word(chars: &mut Peekable<Chars<'_>>, word: &str) -> Option<()> {
    for expected in word.chars() {
        if chars.next()? != expected {
            return None;
        }
    }
    chars
        .peek()
        .is_none_or(|c| !c.is_alphanumeric() && *c != '_')
        .then_some(())
}
