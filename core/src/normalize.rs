// LaTeX canonicalization shared by indexing and querying. The rule sequence
// repeats until the string stops changing; whitespace survives only between a
// control word and a following letter (`\alpha b` is not `\alphab`).

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use unicode_normalization::UnicodeNormalization;

/// Persisted with every index; an index built under another version is rejected at load.
pub const NORMALIZER_VERSION: u32 = 1;

const MAX_PASSES: usize = 16;

const FONT_COMMANDS: &[&str] = &[
    "\\mathbf", "\\mathrm", "\\mathit", "\\mathsf", "\\mathtt", "\\mathbb", "\\mathcal", "\\mathfrak", "\\text",
    "\\bm",
];

const RENDERING_COMMANDS: &[&str] = &["\\left", "\\right", "\\displaystyle", "\\limits"];

const SYMBOL_ALIASES: &[(&str, &str)] = &[
    ("\\|", "||"),
    ("\\Vert", "||"),
    ("\\lbrace", "\\{"),
    ("\\rbrace", "\\}"),
    ("\\langle", "<"),
    ("\\rangle", ">"),
    ("\\varepsilon", "\\epsilon"),
    ("\\vartheta", "\\theta"),
    ("\\varkappa", "\\kappa"),
    ("\\varpi", "\\pi"),
    ("\\varrho", "\\rho"),
    ("\\varsigma", "\\sigma"),
    ("\\varphi", "\\phi"),
    ("\\le", "\\leq"),
    ("\\ge", "\\geq"),
    ("\\ne", "\\neq"),
    ("\\to", "\\rightarrow"),
    ("\\gets", "\\leftarrow"),
    ("\\land", "\\wedge"),
    ("\\lor", "\\vee"),
    ("\\lnot", "\\neg"),
    ("\\dfrac", "\\frac"),
    ("\\tfrac", "\\frac"),
    ("^H", "^T"),
    ("^*", "^T"),
    ("^\\dagger", "^T"),
    ("^{H}", "^{T}"),
    ("^{*}", "^{T}"),
    ("^{\\dagger}", "^{T}"),
];

lazy_static! {
    static ref DELIMITER_RE: Regex = Regex::new(r"\$\$?|\\\[|\\\]").expect("valid regex");
    // A control word or a control symbol, so that `\\left` is read as `\\` + `left`.
    static ref CONTROL_RE: Regex = Regex::new(r"(?s)\\(?:[A-Za-z]+|.)").expect("valid regex");
    static ref MATRIX_RE: Regex =
        Regex::new(r"\\(begin|end)\s*\{\s*[pbvV]matrix\s*\}").expect("valid regex");
    static ref FONT_SET: HashSet<&'static str> = FONT_COMMANDS.iter().copied().collect();
    static ref RENDERING_SET: HashSet<&'static str> = RENDERING_COMMANDS.iter().copied().collect();
    static ref ALIAS_MAP: HashMap<&'static str, &'static str> = SYMBOL_ALIASES.iter().copied().collect();
    static ref ALIAS_RE: Regex = build_alias_regex();
}

/// Alternation of every alias that is not a plain control word, longest
/// first, followed by the generic control-sequence pattern. Control words are
/// matched whole, so `\le` never fires inside `\leq` or `\left`.
fn build_alias_regex() -> Regex {
    let mut literal: Vec<&str> = SYMBOL_ALIASES
        .iter()
        .map(|(from, _)| *from)
        .filter(|from| !is_control_word(from))
        .collect();
    literal.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let mut pattern: Vec<String> = literal.iter().map(|s| regex::escape(s)).collect();
    pattern.push(r"\\(?:[A-Za-z]+|.)".to_string());
    Regex::new(&format!("(?s){}", pattern.join("|"))).expect("valid alias regex")
}

fn is_control_word(s: &str) -> bool {
    s.len() > 1 && s.starts_with('\\') && s[1..].chars().all(|c| c.is_ascii_alphabetic())
}

/// Canonical form of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub canonical: String,
    /// True when canonicalization changed more than whitespace. Telemetry only.
    pub was_modified: bool,
}

/// Canonicalizes raw LaTeX. Empty or blank input yields `("", false)`.
pub fn normalize(raw: &str) -> Normalized {
    if raw.trim().is_empty() {
        return Normalized::default();
    }
    let mut current = raw.to_string();
    for _ in 0..MAX_PASSES {
        let next = canonicalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    let was_modified = current != collapse_whitespace(raw);
    Normalized { canonical: current, was_modified }
}

fn canonicalize_once(s: &str) -> String {
    // Removals below can leave a base letter next to a combining mark, so
    // composition runs on every pass.
    let s: String = s.nfkc().collect();
    let s = DELIMITER_RE.replace_all(&s, "");
    let s = strip_font_commands(&s);
    let s = ALIAS_RE.replace_all(&s, |caps: &Captures| {
        let m = &caps[0];
        ALIAS_MAP.get(m).copied().unwrap_or(m).to_string()
    });
    let s = MATRIX_RE.replace_all(&s, |caps: &Captures| format!("\\{}{{matrix}}", &caps[1]));
    let s = CONTROL_RE.replace_all(&s, |caps: &Captures| {
        let m = &caps[0];
        if RENDERING_SET.contains(m) {
            " ".to_string()
        } else {
            m.to_string()
        }
    });
    let s = collapse_whitespace(&s);
    collapse_braces(&s)
}

/// Removes font commands. A braced argument is unwrapped unless the command
/// is itself a script operand (`x^\mathbf{ab}`), where the braces carry the
/// script's scope. Removed text becomes a space so neighbours never fuse.
fn strip_font_commands(s: &str) -> String {
    let mut cuts: Vec<Range<usize>> = Vec::new();
    for m in CONTROL_RE.find_iter(s) {
        if !FONT_SET.contains(m.as_str()) {
            continue;
        }
        cuts.push(m.range());
        let scripted = s[..m.start()].trim_end().ends_with(|c| c == '^' || c == '_');
        if scripted {
            continue;
        }
        let rest = &s[m.end()..];
        let open = m.end() + (rest.len() - rest.trim_start().len());
        if s[open..].starts_with('{') {
            if let Some(close) = matching_brace(s, open) {
                cuts.push(open..open + 1);
                cuts.push(close..close + 1);
            }
        }
    }
    if cuts.is_empty() {
        return s.to_string();
    }
    cuts.sort_by_key(|r| r.start);
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for cut in cuts {
        if cut.start < last {
            continue;
        }
        out.push_str(&s[last..cut.start]);
        out.push(' ');
        last = cut.end;
    }
    out.push_str(&s[last..]);
    out
}

/// Byte offset of the `}` closing the `{` at `open`. Escaped braces are skipped.
fn matching_brace(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = s[open..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lex {
    Plain,
    Backslash,
    ControlWord,
}

/// Drops whitespace, keeping one space only where a control word is followed
/// by a letter. A control space (`\ `) is dropped with its backslash.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut state = Lex::Plain;
    let mut before_backslash = Lex::Plain;
    let mut pending_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if state == Lex::Backslash {
                out.pop();
                state = before_backslash;
            }
            pending_space = true;
            continue;
        }
        if pending_space && state == Lex::ControlWord && c.is_ascii_alphabetic() {
            out.push(' ');
            state = Lex::Plain;
        }
        pending_space = false;
        out.push(c);
        state = match (state, c) {
            (Lex::Backslash, c) if c.is_ascii_alphabetic() => Lex::ControlWord,
            (Lex::Backslash, _) => Lex::Plain,
            (Lex::ControlWord, c) if c.is_ascii_alphabetic() => Lex::ControlWord,
            (_, '\\') => {
                before_backslash = state;
                Lex::Backslash
            }
            _ => Lex::Plain,
        };
    }
    out
}

/// Collapses braces whose only content is another braced group: `{{x}}` -> `{x}`.
fn collapse_braces(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut closing: HashMap<usize, usize> = HashMap::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => stack.push(i),
            b'}' => {
                if let Some(open) = stack.pop() {
                    closing.insert(open, i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    let mut drop: HashSet<usize> = HashSet::new();
    for (&open, &close) in &closing {
        if let Some(&inner_close) = closing.get(&(open + 1)) {
            if inner_close + 1 == close {
                drop.insert(open + 1);
                drop.insert(inner_close);
            }
        }
    }
    if drop.is_empty() {
        return s.to_string();
    }
    s.char_indices()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, c)| c)
        .collect()
}
