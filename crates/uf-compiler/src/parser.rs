//! Redirect rule line grammar
//!
//! Each non-blank, non-comment line of a rule file is one rule attempt.
//! Two forms are recognized:
//!
//! - **Full regex form**: `/<body>/<flags> , "<replacement>"` or
//!   `/<body>/<flags> -> <replacement>` (arrow spellings `->`, `=>`, `→`).
//!   The replacement may be quoted and may carry `$1`-style back-references.
//! - **Simple host form**: `<source> -> <target>` where `<source>` is a bare
//!   host/path glob with at most one leading `*.`. The source is escaped and
//!   compiled into an anchored `^https?://` regex; a target without an
//!   explicit scheme inherits the request's scheme at match time via the
//!   `{SCHEME}` placeholder.
//!
//! Lines matching neither form, or carrying an unsafe regex, are dropped
//! with a logged diagnostic. One bad line never invalidates the file.

use log::debug;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use uf_core::url::Scheme;

use crate::safety::{SafetyPolicy, UnsafePattern};

const LOG_TARGET: &str = "uf::compiler";

/// Placeholder in a substitution resolved to the request's own scheme, so
/// one rule serves both http and https.
pub const SCHEME_TOKEN: &str = "{SCHEME}";

/// Capture name appended by the simple host form to carry the URL tail
/// through the substitution.
const REST_GROUP: &str = "rest";

const ARROWS: &[&str] = &["->", "=>", "→"];

// =============================================================================
// Compiled Rule
// =============================================================================

/// One executable redirect rule. Immutable once compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Matched against the full request URL.
    pub pattern: Regex,
    /// Original regex body, kept for diagnostics and value comparison.
    pub source: String,
    /// Replacement template (may contain `$n` back-references and the
    /// scheme placeholder).
    pub substitution: String,
    /// Lowercase host this rule is specific to, when one could be derived.
    pub host_key: Option<String>,
    /// Plain prefix of every URL the pattern can match; cheap pre-filter.
    pub literal_prefix: Option<String>,
    /// 1-based line number in the source text.
    pub line_no: usize,
}

impl CompiledRule {
    /// Cheap rejection: a URL that does not start with the literal prefix
    /// cannot match, so the regex never runs. Compared ASCII
    /// case-insensitively so this can never reject a URL the pattern would
    /// have matched.
    #[inline]
    pub fn quick_reject(&self, url: &str) -> bool {
        match &self.literal_prefix {
            Some(prefix) => {
                url.len() < prefix.len()
                    || !url.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            }
            None => false,
        }
    }

    /// Apply the rule to a URL. Returns the candidate target, or `None`
    /// when the pattern does not match or rewrites the URL to itself.
    pub fn apply(&self, url: &str, scheme: Scheme) -> Option<String> {
        if self.quick_reject(url) || !self.pattern.is_match(url) {
            return None;
        }
        let out = self
            .pattern
            .replace(url, self.substitution.as_str())
            .into_owned();
        let out = if out.contains(SCHEME_TOKEN) {
            out.replace(SCHEME_TOKEN, scheme.as_str())
        } else {
            out
        };
        if out.is_empty() || out == url {
            return None;
        }
        Some(out)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Per-line compilation failure. Never fatal: the line is skipped and the
/// rest of the file still compiles.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("line matches no rule form")]
    UnrecognizedForm,
    #[error("{0}")]
    Unsafe(#[from] UnsafePattern),
    #[error("regex rejected: {0}")]
    BadRegex(#[from] Box<regex::Error>),
    #[error("source pattern rejected: {0}")]
    BadSource(String),
    #[error("redirect target rejected: {0}")]
    BadTarget(String),
}

// =============================================================================
// Line Parsing
// =============================================================================

/// Parse one line of rule text. `Ok(None)` means the line is blank or a
/// comment; `Err` means it was a rule attempt that failed.
pub fn parse_line(
    line: &str,
    line_no: usize,
    policy: &SafetyPolicy,
) -> Result<Option<CompiledRule>, RuleError> {
    let s = line.trim();
    if s.is_empty() || is_comment(s) {
        return Ok(None);
    }

    if let Some((body, flags, replacement)) = split_regex_form(s) {
        return compile_regex_rule(body, flags, &replacement, line_no, policy).map(Some);
    }

    if let Some((source, target)) = split_simple_form(s) {
        return compile_simple_rule(source, target, line_no, policy).map(Some);
    }

    Err(RuleError::UnrecognizedForm)
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with(';') || line.starts_with("//")
}

fn strip_arrow(s: &str) -> Option<&str> {
    ARROWS.iter().find_map(|a| s.strip_prefix(a))
}

fn find_arrow(s: &str) -> Option<(usize, usize)> {
    ARROWS
        .iter()
        .filter_map(|a| s.find(a).map(|pos| (pos, a.len())))
        .min_by_key(|&(pos, _)| pos)
}

/// Split the full regex form into (body, flags, replacement).
///
/// The body may itself contain `/`, so candidate closing slashes are tried
/// from the end of the line backwards, mirroring a greedy `/(.+)/` match.
fn split_regex_form(line: &str) -> Option<(&str, &str, String)> {
    // Bracketed spelling: [ /re/, "to" ]
    let s = line.strip_prefix('[').map(str::trim_start).unwrap_or(line);
    let rest = s.strip_prefix('/')?;

    for (idx, _) in rest
        .char_indices()
        .rev()
        .filter(|&(_, c)| c == '/')
    {
        let body = &rest[..idx];
        if body.is_empty() {
            continue;
        }
        if let Some((flags, replacement)) = parse_regex_tail(&rest[idx + 1..]) {
            return Some((body, flags, replacement));
        }
    }
    None
}

/// Parse `<flags> , "<replacement>"` or `<flags> -> <replacement>` after
/// the closing slash.
fn parse_regex_tail(tail: &str) -> Option<(&str, String)> {
    let flags_end = tail
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(tail.len());
    let (flags, rest) = tail.split_at(flags_end);
    let rest = rest.trim_start();

    let rest = if let Some(r) = rest.strip_prefix(',') {
        r
    } else {
        strip_arrow(rest)?
    };

    let rest = rest.trim();
    let rest = rest.strip_suffix(']').map(str::trim_end).unwrap_or(rest);
    let replacement = strip_quotes(rest);
    if replacement.is_empty() {
        return None;
    }
    Some((flags, replacement.to_string()))
}

fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split the simple host form into (source, target).
fn split_simple_form(line: &str) -> Option<(&str, &str)> {
    let (pos, len) = find_arrow(line)?;
    let source = line[..pos].trim();
    let target = line[pos + len..].trim();
    if source.is_empty() || target.is_empty() {
        return None;
    }
    Some((source, target))
}

// =============================================================================
// Rule Compilation
// =============================================================================

fn compile_regex_rule(
    body: &str,
    flags: &str,
    replacement: &str,
    line_no: usize,
    policy: &SafetyPolicy,
) -> Result<CompiledRule, RuleError> {
    policy.check(body)?;

    // Only `i` is honored; other flags from foreign rule files are ignored.
    let case_insensitive = flags.contains('i');
    let pattern = RegexBuilder::new(body)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(Box::new)?;

    Ok(CompiledRule {
        pattern,
        source: body.to_string(),
        substitution: replacement.to_string(),
        host_key: derive_host_key(body),
        literal_prefix: derive_literal_prefix(body),
        line_no,
    })
}

fn compile_simple_rule(
    source: &str,
    target: &str,
    line_no: usize,
    policy: &SafetyPolicy,
) -> Result<CompiledRule, RuleError> {
    let (wildcard, rest) = match source.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, source),
    };

    if rest.is_empty() || rest.contains("://") || rest.contains('*') {
        return Err(RuleError::BadSource(format!("{source:?}")));
    }
    if !rest
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'/' | b'~'))
    {
        return Err(RuleError::BadSource(format!("{source:?}")));
    }

    if target.contains(char::is_whitespace) {
        return Err(RuleError::BadTarget(format!("{target:?}")));
    }

    // Hosts are case-insensitive; the path part keeps its case.
    let (host_part, path_part) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host_part = host_part.to_ascii_lowercase();
    if host_part.is_empty() || !host_part.contains('.') {
        return Err(RuleError::BadSource(format!("{source:?}")));
    }

    let escaped = format!("{}{}", regex::escape(&host_part), regex::escape(path_part));
    let body = if wildcard {
        format!(r"^https?://(?:[^/]+\.)?{escaped}(?P<{REST_GROUP}>[/:?#].*)?$")
    } else {
        format!(r"^https?://{escaped}(?P<{REST_GROUP}>[/:?#].*)?$")
    };

    policy.check(&body)?;
    let pattern = Regex::new(&body).map_err(Box::new)?;

    let target_with_scheme = if target.contains("://") {
        target.to_string()
    } else {
        format!("{SCHEME_TOKEN}://{target}")
    };
    let substitution = format!("{target_with_scheme}${{{REST_GROUP}}}");

    // Wildcard sources apply to any subdomain, so they cannot be bucketed
    // under a single host.
    let host_key = if wildcard { None } else { Some(host_part) };

    Ok(CompiledRule {
        pattern,
        source: body,
        substitution,
        host_key,
        literal_prefix: Some("http".to_string()),
        line_no,
    })
}

// =============================================================================
// Pattern Introspection
// =============================================================================

/// Longest plain prefix guaranteed to start every match of a `^`-anchored
/// body. A quantifier after a literal (`x?`, `x*`, `x{0,2}`) may match it
/// zero times, so the literal is dropped before stopping (this is what
/// turns `^https?://` into `http`). A top-level alternation means later
/// branches need not share the first branch's prefix, so no prefix is
/// derived at all. Unanchored bodies yield no prefix.
fn derive_literal_prefix(body: &str) -> Option<String> {
    let rest = body.strip_prefix('^')?;
    if has_top_level_alternation(rest) {
        return None;
    }

    let mut out = String::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                // Escaped punctuation is a literal; \d, \w etc. are classes
                Some(&next) if next.is_ascii_punctuation() => {
                    out.push(next);
                    chars.next();
                }
                _ => break,
            },
            '?' | '*' | '{' => {
                out.pop();
                break;
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '}' | '|' | '$' => break,
            _ => out.push(c),
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Whether the body contains an unescaped `|` outside any group or
/// character class. Such a body has branches with independent heads.
fn has_top_level_alternation(body: &str) -> bool {
    let mut depth = 0usize;
    let mut in_class = false;
    let mut escaped = false;

    for b in body.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            _ if in_class => {}
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'|' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Best-effort extraction of the host this pattern is specific to.
///
/// Only accepted when the literal host token is terminated by something
/// that marks a real host boundary (`/`, `:` port, or an end anchor);
/// anything else could match a longer host and would mis-bucket the rule.
fn derive_host_key(body: &str) -> Option<String> {
    // Tolerate JS-style escaped slashes in foreign rule text
    let norm = body.replace(r"\/", "/");
    let rest = norm.strip_prefix('^')?;
    // A second branch could name a different host
    if has_top_level_alternation(rest) {
        return None;
    }
    let rest = rest
        .strip_prefix("https?://")
        .or_else(|| rest.strip_prefix("https://"))
        .or_else(|| rest.strip_prefix("http://"))?;

    let mut host = String::new();
    let mut chars = rest.chars().peekable();
    let mut terminator: Option<char> = None;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('.') => {
                    host.push('.');
                    chars.next();
                }
                _ => return None,
            },
            '/' | ':' | '$' => {
                terminator = Some(c);
                break;
            }
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => host.push(c),
            _ => return None,
        }
    }

    // An open-ended host literal could match longer hosts
    terminator?;

    if host.contains('.') {
        Some(host.to_ascii_lowercase())
    } else {
        None
    }
}

/// Compile a whole rule text. Bad lines are logged and skipped.
pub fn compile_rule_lines(text: &str, policy: &SafetyPolicy) -> Vec<CompiledRule> {
    let mut rules = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_line(line, idx + 1, policy) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(err) => {
                debug!(target: LOG_TARGET, "line {}: dropped rule: {err}", idx + 1);
            }
        }
    }
    rules
}
