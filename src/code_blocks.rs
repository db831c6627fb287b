//! Structural block decomposition of source code.
//!
//! The structural counterpart of [`crate::blocks`]: block boundaries are
//! function/class bodies found by brace matching rather than headings.
//! The scanner ignores braces occurring inside string, char, and
//! template literals and inside line or block comments, so object
//! literals in strings never unbalance the match.
//!
//! Keys are `#`-joined paths of declaration names; unnamed callables
//! are keyed `<anonymous>`. Duplicate names in the same parent scope
//! are suffixed `[2]`, `[3]`, … in order of appearance. Lines before
//! the first declaration get the reserved key `#`.

use std::collections::{BTreeMap, HashMap};

use crate::blocks::LineRange;
use crate::error::{Error, Result};

const NAMED_KEYWORDS: &[&str] = &[
    "fn",
    "function",
    "class",
    "struct",
    "enum",
    "trait",
    "interface",
    "impl",
    "def",
];

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "match", "loop", "do", "try", "catch", "finally",
    "unsafe", "return", "new",
];

const MODIFIER_KEYWORDS: &[&str] = &[
    "pub", "public", "private", "protected", "static", "async", "export", "default", "get",
    "set", "override",
];

/// Reserved key for a declaration's anonymous callable.
pub const ANONYMOUS_KEY: &str = "<anonymous>";

enum Classified {
    Named(String),
    Anonymous,
    /// Control-structure or plain brace block: tracked for matching,
    /// but merged into its parent rather than keyed.
    Plain,
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    Str(char),
    Template,
}

struct OpenScope {
    /// Full key for named/anonymous blocks, `None` for plain braces.
    key: Option<String>,
    start_line: usize,
}

/// Decompose source code into block keys and 1-indexed inclusive line
/// ranges.
pub fn parse_code_blocks(text: &str) -> BTreeMap<String, LineRange> {
    let mut blocks = BTreeMap::new();
    let total_lines = text.lines().count();
    if total_lines == 0 {
        return blocks;
    }

    let mut state = ScanState::Normal;
    let mut line = 1usize;
    let mut sig = String::new();
    let mut sig_start_line: Option<usize> = None;
    let mut scopes: Vec<OpenScope> = Vec::new();
    let mut occurrences: HashMap<(String, String), usize> = HashMap::new();

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
            if state == ScanState::LineComment {
                state = ScanState::Normal;
            }
            if matches!(state, ScanState::Normal) {
                sig.push(' ');
            }
            continue;
        }

        match state {
            ScanState::LineComment => {}
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = ScanState::Normal;
                }
            }
            ScanState::Str(delim) => {
                if c == '\\' {
                    chars.next();
                } else if c == delim {
                    state = ScanState::Normal;
                }
            }
            ScanState::Template => {
                if c == '\\' {
                    chars.next();
                } else if c == '`' {
                    state = ScanState::Normal;
                }
            }
            ScanState::Normal => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = ScanState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = ScanState::BlockComment;
                }
                '"' => state = ScanState::Str('"'),
                '\'' => {
                    if tick_opens_literal(chars.clone()) {
                        state = ScanState::Str('\'');
                    } else {
                        // lifetime tick ('a, 'static): part of the
                        // signature, not a literal
                        if sig_start_line.is_none() {
                            sig_start_line = Some(line);
                        }
                        sig.push(c);
                    }
                }
                '`' => state = ScanState::Template,
                '{' => {
                    let parent_key: String = scopes
                        .iter()
                        .filter_map(|s| s.key.as_deref())
                        .last()
                        .unwrap_or_default()
                        .to_string();
                    let key = match classify(&sig) {
                        Classified::Named(name) => {
                            Some(scoped_key(&mut occurrences, &parent_key, &name))
                        }
                        Classified::Anonymous => {
                            Some(scoped_key(&mut occurrences, &parent_key, ANONYMOUS_KEY))
                        }
                        Classified::Plain => None,
                    };
                    scopes.push(OpenScope {
                        key,
                        start_line: sig_start_line.unwrap_or(line),
                    });
                    sig.clear();
                    sig_start_line = None;
                }
                '}' => {
                    if let Some(scope) = scopes.pop() {
                        if let Some(key) = scope.key {
                            blocks.insert(key, (scope.start_line, line));
                        }
                    }
                    sig.clear();
                    sig_start_line = None;
                }
                ';' => {
                    sig.clear();
                    sig_start_line = None;
                }
                _ => {
                    if sig_start_line.is_none() && !c.is_whitespace() {
                        sig_start_line = Some(line);
                    }
                    sig.push(c);
                }
            },
        }
    }

    // unterminated scopes close at end of file
    while let Some(scope) = scopes.pop() {
        if let Some(key) = scope.key {
            blocks.insert(key, (scope.start_line, total_lines));
        }
    }

    let first_top = blocks
        .iter()
        .filter(|(key, _)| key.matches('#').count() == 1)
        .map(|(_, &(start, _))| start)
        .min();
    match first_top {
        Some(start) if start > 1 => {
            blocks.insert(crate::blocks::ROOT_KEY.to_string(), (1, start - 1));
        }
        None => {
            blocks.insert(crate::blocks::ROOT_KEY.to_string(), (1, total_lines));
        }
        _ => {}
    }

    blocks
}

/// The full key for `name` under `parent_key`, with per-parent
/// duplicate suffixing.
fn scoped_key(
    occurrences: &mut HashMap<(String, String), usize>,
    parent_key: &str,
    name: &str,
) -> String {
    let count = occurrences
        .entry((parent_key.to_string(), name.to_string()))
        .and_modify(|c| *c += 1)
        .or_insert(1);
    if *count > 1 {
        format!("{parent_key}#{name}[{count}]")
    } else {
        format!("{parent_key}#{name}")
    }
}

/// Decide what kind of block a signature opens.
fn classify(sig: &str) -> Classified {
    let tokens: Vec<&str> = sig.split_whitespace().collect();
    if tokens.is_empty() {
        return Classified::Plain;
    }

    for window in tokens.windows(2) {
        if NAMED_KEYWORDS.contains(&window[0]) {
            if let Some(name) = leading_identifier(window[1]) {
                return Classified::Named(name);
            }
        }
    }

    let has_callable_shape = sig.contains("=>") || sig.contains("function");
    if has_callable_shape {
        // `let NAME = … =>` / `const NAME = function`
        for window in tokens.windows(2) {
            if matches!(window[0], "let" | "const" | "var") {
                if let Some(name) = leading_identifier(window[1]) {
                    return Classified::Named(name);
                }
            }
        }
        return Classified::Anonymous;
    }

    if tokens
        .first()
        .is_some_and(|t| CONTROL_KEYWORDS.contains(t))
    {
        return Classified::Plain;
    }

    // method shorthand: `name(args)` with a completed parameter list,
    // as in class bodies (`start() {`) or Go (`func` is a named kw)
    if sig.trim_end().ends_with(')') {
        let head = tokens
            .iter()
            .find(|t| !MODIFIER_KEYWORDS.contains(*t))
            .copied();
        if let Some(head) = head {
            if !CONTROL_KEYWORDS.contains(&head) {
                if let Some(paren) = head.find('(') {
                    if paren > 0 {
                        if let Some(name) = leading_identifier(head) {
                            if name.len() == paren {
                                return Classified::Named(name);
                            }
                        }
                    }
                }
            }
        }
    }

    Classified::Plain
}

/// Whether a `'` begins a character/string literal rather than a
/// lifetime tick. A lifetime is an identifier run with no closing
/// quote (`'a`, `'static`); a quote closed after the run, or followed
/// by a non-identifier character, opens a literal.
fn tick_opens_literal(ahead: std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut ident_len = 0usize;
    for c in ahead {
        if c == '\'' {
            return true;
        }
        if (c.is_alphanumeric() || c == '_') && ident_len < 64 {
            ident_len += 1;
            continue;
        }
        break;
    }
    ident_len == 0
}

fn leading_identifier(token: &str) -> Option<String> {
    let ident: String = token
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if ident.is_empty() || ident.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        None
    } else {
        Some(ident)
    }
}

fn range_of(text: &str, key: &str) -> Result<LineRange> {
    parse_code_blocks(text)
        .get(key)
        .copied()
        .ok_or_else(|| Error::NotFound {
            key: key.to_string(),
        })
}

/// The exact text of the code block `key`.
pub fn read_code_block(text: &str, key: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    Ok(lines[start - 1..end].join("\n"))
}

/// Replace the code block `key` with `new_text`, returning the full
/// source.
pub fn update_code_block(text: &str, key: &str, new_text: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend(new_text.lines());
    out.extend_from_slice(&lines[end..]);
    Ok(crate::blocks::rejoin(out, text))
}

/// Remove the code block `key`, returning the full source.
pub fn destroy_code_block(text: &str, key: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend_from_slice(&lines[end..]);
    Ok(crate::blocks::rejoin(out, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "\
import util from './util';

function setup(config) {
  const state = {};
  return state;
}

class Engine {
  start() {
    if (this.ready) {
      run();
    }
  }
}

const onTick = (dt) => {
  advance(dt);
};

items.forEach((item) => {
  emit(item);
});";

    #[test]
    fn test_named_function_and_class_keys() {
        let blocks = parse_code_blocks(SRC);
        assert_eq!(blocks.get("#setup"), Some(&(3, 6)));
        assert_eq!(blocks.get("#Engine"), Some(&(8, 14)));
    }

    #[test]
    fn test_preamble_gets_root_key() {
        let blocks = parse_code_blocks(SRC);
        assert_eq!(blocks.get("#"), Some(&(1, 2)));
    }

    #[test]
    fn test_assigned_arrow_uses_binding_name() {
        let blocks = parse_code_blocks(SRC);
        assert_eq!(blocks.get("#onTick"), Some(&(16, 18)));
    }

    #[test]
    fn test_unassigned_arrow_is_anonymous() {
        let blocks = parse_code_blocks(SRC);
        assert_eq!(blocks.get("#<anonymous>"), Some(&(20, 22)));
    }

    #[test]
    fn test_control_structures_merge_into_parent() {
        let blocks = parse_code_blocks(SRC);
        assert!(!blocks.keys().any(|k| k.contains("if")));
        // the method body's `if` lines stay inside #Engine#start
        assert_eq!(blocks.get("#Engine#start"), Some(&(9, 13)));
    }

    #[test]
    fn test_braces_in_strings_are_ignored() {
        let src = "function f() {\n  const s = \"{ not a block }\";\n  return s;\n}\n";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#f"), Some(&(1, 4)));
    }

    #[test]
    fn test_braces_in_comments_are_ignored() {
        let src = "function g() {\n  // ignore { this\n  /* and { this\n     too } */\n  return 1;\n}\n";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#g"), Some(&(1, 6)));
    }

    #[test]
    fn test_braces_in_template_literals_are_ignored() {
        let src = "function h() {\n  const t = `x ${'{'} y`;\n  return t;\n}\n";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#h"), Some(&(1, 4)));
    }

    #[test]
    fn test_duplicate_names_are_suffixed_per_scope() {
        let src = "\
function dup() {
  return 1;
}
function dup() {
  return 2;
}";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#dup"), Some(&(1, 3)));
        assert_eq!(blocks.get("#dup[2]"), Some(&(4, 6)));
    }

    #[test]
    fn test_anonymous_callables_are_suffixed() {
        let src = "run(() => {\n  a();\n});\nrun(() => {\n  b();\n});";
        let blocks = parse_code_blocks(src);
        assert!(blocks.contains_key("#<anonymous>"));
        assert!(blocks.contains_key("#<anonymous>[2]"));
    }

    #[test]
    fn test_rust_fn_and_impl() {
        let src = "\
impl Store {
    fn flush(&self) {
        self.sync();
    }
}";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#Store"), Some(&(1, 5)));
        assert_eq!(blocks.get("#Store#flush"), Some(&(2, 4)));
    }

    #[test]
    fn test_lifetime_ticks_do_not_open_literals() {
        let src = "\
fn first<'a>(x: &'a str) {
    body(x);
}
fn second(c: char) {
    if c == '{' {
        handle();
    }
}";
        let blocks = parse_code_blocks(src);
        assert_eq!(blocks.get("#first"), Some(&(1, 3)));
        assert_eq!(blocks.get("#second"), Some(&(4, 8)));
    }

    #[test]
    fn test_code_edits_preserve_trailing_newline() {
        let src = "function f() {\n  a();\n}\n";
        let updated = update_code_block(src, "#f", "function f() {\n  b();\n}").unwrap();
        assert!(updated.ends_with("}\n"));
        assert_eq!(destroy_code_block(src, "#f").unwrap(), "");
    }

    #[test]
    fn test_read_code_block() {
        let body = read_code_block(SRC, "#setup").unwrap();
        assert!(body.starts_with("function setup"));
        assert!(body.ends_with("}"));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        assert!(matches!(
            read_code_block(SRC, "#missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_code_block_splices() {
        let updated = update_code_block(SRC, "#onTick", "const onTick = (dt) => {\n  noop(dt);\n};").unwrap();
        assert!(updated.contains("noop(dt)"));
        assert!(!updated.contains("advance(dt)"));
    }

    #[test]
    fn test_destroy_code_block() {
        let reduced = destroy_code_block(SRC, "#Engine").unwrap();
        assert!(!reduced.contains("class Engine"));
        assert!(reduced.contains("function setup"));
    }
}
