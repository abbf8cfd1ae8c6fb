//! Static checks run before any script code executes.
//!
//! The async scan is a fast, clear rejection and nothing more. Scripts can
//! still assemble banned names at runtime; the interpreter itself has no
//! `Promise` and its job queue is never run, so such tricks find nothing to
//! call.

use std::iter::Peekable;
use std::str::Chars;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RuntimeError;

const SYNC_ONLY: &str = "only synchronous code is supported";

struct AsyncPattern {
    pattern: Lazy<Option<Regex>>,
    describe: fn(&str) -> String,
}

static ASYNC_PATTERNS: [AsyncPattern; 4] = [
    AsyncPattern {
        pattern: Lazy::new(|| Regex::new(r"\bPromise\b").ok()),
        describe: |_| "Promise usage is not allowed".to_string(),
    },
    AsyncPattern {
        pattern: Lazy::new(|| Regex::new(r"\basync\b").ok()),
        describe: |_| "async functions are not allowed".to_string(),
    },
    AsyncPattern {
        pattern: Lazy::new(|| Regex::new(r"\bawait\b").ok()),
        describe: |_| "await keyword is not allowed".to_string(),
    },
    AsyncPattern {
        pattern: Lazy::new(|| {
            Regex::new(r"\b(setTimeout|setInterval|setImmediate|queueMicrotask)\b").ok()
        }),
        describe: |name| format!("{name} is not allowed"),
    },
];

/// Rejects oversized scripts and scripts that reference async machinery.
pub fn validate_script(code: &str, max_bytes: usize) -> Result<(), RuntimeError> {
    if code.len() > max_bytes {
        return Err(RuntimeError::validation(format!(
            "script exceeds maximum size of {max_bytes} bytes"
        )));
    }

    scan_async(code)?;
    if let Some(stripped) = strip_comments_and_strings(code) {
        scan_async(&stripped)?;
    }
    Ok(())
}

fn scan_async(source: &str) -> Result<(), RuntimeError> {
    for entry in &ASYNC_PATTERNS {
        let Some(pattern) = entry.pattern.as_ref() else {
            continue;
        };
        if let Some(found) = pattern.find(source) {
            return Err(RuntimeError::async_not_allowed(format!(
                "{} - {SYNC_ONLY}",
                (entry.describe)(found.as_str())
            )));
        }
    }
    Ok(())
}

/// Replaces comments with whitespace and literal text with empty literals,
/// keeping the code inside template substitutions.
///
/// Returns `None` when the source does not lex cleanly (unterminated literal
/// or comment, unbalanced brackets).
pub fn strip_comments_and_strings(source: &str) -> Option<String> {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        out: String::with_capacity(source.len()),
        brackets: Vec::new(),
    };
    lexer.code(false)?;
    Some(lexer.out)
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    out: String,
    brackets: Vec<char>,
}

impl Lexer<'_> {
    /// Consumes code until end of input, or until the `}` closing a template
    /// substitution when `in_substitution` is set.
    fn code(&mut self, in_substitution: bool) -> Option<()> {
        let depth = self.brackets.len();

        while let Some(c) = self.chars.next() {
            match c {
                '/' if self.chars.peek() == Some(&'/') => self.line_comment(),
                '/' if self.chars.peek() == Some(&'*') => self.block_comment()?,
                '\'' | '"' => self.string(c)?,
                '`' => self.template()?,
                '(' | '[' | '{' => {
                    self.brackets.push(c);
                    self.out.push(c);
                }
                ')' | ']' | '}' => {
                    if in_substitution && c == '}' && self.brackets.len() == depth {
                        return Some(());
                    }
                    let open = self.brackets.pop()?;
                    if !matches!((open, c), ('(', ')') | ('[', ']') | ('{', '}')) {
                        return None;
                    }
                    self.out.push(c);
                }
                _ => self.out.push(c),
            }
        }

        (!in_substitution && self.brackets.is_empty()).then_some(())
    }

    fn line_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.out.push('\n');
                return;
            }
        }
    }

    fn block_comment(&mut self) -> Option<()> {
        self.chars.next();
        let mut previous = '\0';
        for c in self.chars.by_ref() {
            if previous == '*' && c == '/' {
                self.out.push(' ');
                return Some(());
            }
            previous = c;
        }
        None
    }

    fn string(&mut self, quote: char) -> Option<()> {
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    self.chars.next()?;
                }
                '\n' => return None,
                c if c == quote => {
                    self.out.push(quote);
                    self.out.push(quote);
                    return Some(());
                }
                _ => {}
            }
        }
        None
    }

    fn template(&mut self) -> Option<()> {
        self.out.push('`');
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    self.chars.next()?;
                }
                '`' => {
                    self.out.push('`');
                    return Some(());
                }
                '$' if self.chars.peek() == Some(&'{') => {
                    self.chars.next();
                    self.out.push(' ');
                    self.code(true)?;
                    self.out.push(' ');
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case::promise("const p = Promise.resolve(1);")]
    #[case::bracket_single("globalThis['Promise']")]
    #[case::bracket_double(r#"globalThis["Promise"]"#)]
    #[case::bracket_backtick("globalThis[`Promise`]")]
    #[case::async_fn("async function f() {}")]
    #[case::async_arrow("const f = async () => 1;")]
    #[case::await_kw("await mcp.callTool('a.b', {});")]
    #[case::set_timeout("setTimeout(() => {}, 10)")]
    #[case::set_interval("globalThis['setInterval']")]
    #[case::set_immediate("setImmediate(f)")]
    #[case::microtask("queueMicrotask(f)")]
    #[case::in_comment("// async is sneaky\n1")]
    #[case::in_template("`${await x}`")]
    fn async_constructs_are_rejected(#[case] code: &str) {
        let err = validate_script(code, 1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AsyncNotAllowed, "{code}");
        assert!(err.message.ends_with(SYNC_ONLY));
    }

    #[rstest]
    #[case("const asyncCount = 1; asyncCount + 1")]
    #[case("const awaiting = [1, 2]; awaiting.length")]
    #[case("const promised = true;")]
    #[case("mcp.callTool('github.search', { q: 'x' })")]
    fn identifiers_containing_keywords_are_allowed(#[case] code: &str) {
        assert!(validate_script(code, 1024).is_ok(), "{code}");
    }

    #[test]
    fn size_cap_is_a_validation_error() {
        let err = validate_script(&"1;".repeat(100), 50).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "script exceeds maximum size of 50 bytes");
    }

    #[test]
    fn stripping_keeps_template_substitutions() {
        let stripped =
            strip_comments_and_strings("/* a */ let s = `x ${ f('y') } z`; // tail\nnext").unwrap();
        assert_eq!(stripped, "  let s = `  f('')  `; \nnext");
    }

    #[test]
    fn nested_templates_are_handled() {
        let stripped = strip_comments_and_strings("`a ${ `b ${ c } d` } e`").unwrap();
        assert_eq!(stripped, "`  `  c  `  `");
    }

    #[rstest]
    #[case("'unterminated")]
    #[case("/* open")]
    #[case("f(1")]
    #[case("f(1]")]
    #[case("`${ a `")]
    fn malformed_sources_do_not_lex(#[case] code: &str) {
        assert!(strip_comments_and_strings(code).is_none(), "{code}");
    }

    #[test]
    fn malformed_source_still_gets_raw_scan() {
        let err = validate_script("f(await", 1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AsyncNotAllowed);
    }
}
