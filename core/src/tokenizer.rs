use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE: Regex = Regex::new(r"\\[A-Za-z]+|\\.|[A-Za-z0-9]+|\S").expect("valid regex");
}

/// Joins consecutive tokens of a bare N-gram path.
pub const NGRAM_SEPARATOR: &str = "->";

/// Structural context a token sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Inside a `{...}` group.
    Group,
    Sup,
    Sub,
}

impl Marker {
    pub fn label(self) -> &'static str {
        match self {
            Marker::Group => "grp",
            Marker::Sup => "sup",
            Marker::Sub => "sub",
        }
    }
}

/// An atomic token with the nesting stack it was read under, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathToken {
    pub text: String,
    pub context: Vec<Marker>,
}

impl PathToken {
    pub fn parent(&self) -> Option<Marker> {
        self.context.last().copied()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Group,
    /// `^`/`_` waiting for its operand.
    Pending,
    /// `^`/`_` whose operand is the group right above it on the stack.
    Bound,
}

struct Frame {
    marker: Marker,
    scope: Scope,
}

/// Scans canonical LaTeX into context-carrying tokens.
///
/// `{` opens a group and `}` closes the innermost one; `^` and `_` apply to
/// the next token only, or to the whole group when followed by `{`. Commands,
/// alphanumeric runs and any other single character are atomic tokens.
/// Unbalanced closing braces are ignored.
pub fn tokenize(latex: &str) -> Vec<PathToken> {
    let mut tokens = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    for mat in RE.find_iter(latex) {
        match mat.as_str() {
            "{" => {
                if let Some(top) = stack.last_mut() {
                    if top.scope == Scope::Pending {
                        top.scope = Scope::Bound;
                    }
                }
                stack.push(Frame { marker: Marker::Group, scope: Scope::Group });
            }
            "}" => {
                if let Some(pos) = stack.iter().rposition(|f| f.scope == Scope::Group) {
                    stack.truncate(pos);
                    if matches!(stack.last(), Some(f) if f.scope == Scope::Bound) {
                        stack.pop();
                    }
                }
            }
            "^" => stack.push(Frame { marker: Marker::Sup, scope: Scope::Pending }),
            "_" => stack.push(Frame { marker: Marker::Sub, scope: Scope::Pending }),
            text => {
                tokens.push(PathToken {
                    text: text.to_string(),
                    context: stack.iter().map(|f| f.marker).collect(),
                });
                while matches!(stack.last(), Some(f) if f.scope == Scope::Pending) {
                    stack.pop();
                }
            }
        }
    }
    tokens
}

/// Bare-token N-grams of window `length`: `max(0, n - length + 1)` paths.
pub fn ngram_paths(tokens: &[PathToken], length: usize) -> Vec<String> {
    if length == 0 || tokens.len() < length {
        return Vec::new();
    }
    tokens
        .windows(length)
        .map(|w| w.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(NGRAM_SEPARATOR))
        .collect()
}

/// Context-qualified variants: `parent/token` for every nested token and the
/// full `outer/.../inner/token` path once the stack is deeper than one.
pub fn context_paths(tokens: &[PathToken]) -> Vec<String> {
    let mut paths = Vec::new();
    for token in tokens {
        let Some(parent) = token.parent() else { continue };
        paths.push(format!("{}/{}", parent.label(), token.text));
        if token.context.len() > 1 {
            let full: Vec<&str> = token.context.iter().map(|m| m.label()).collect();
            paths.push(format!("{}/{}", full.join("/"), token.text));
        }
    }
    paths
}

/// All structural paths of a canonical formula: bare tokens, bare N-grams
/// (when `length > 1`) and the context-qualified variants.
pub fn extract_paths(latex: &str, length: usize) -> Vec<String> {
    let tokens = tokenize(latex);
    let mut paths: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
    if length > 1 {
        paths.extend(ngram_paths(&tokens, length));
    }
    paths.extend(context_paths(&tokens));
    paths
}
