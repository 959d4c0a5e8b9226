//! Regex safety policy
//!
//! Rule text comes from arbitrary third-party lists, so every regex body is
//! vetted before construction. The `regex` crate itself is a linear-time
//! engine, but the same rule files are consumed by hosts with backtracking
//! engines, so the policy rejects the classic catastrophic-backtracking
//! shapes uniformly. This is a heuristic net, not a full static analysis:
//! over-rejecting is acceptable, letting a pathological pattern through is
//! not.

use thiserror::Error;

// =============================================================================
// Policy
// =============================================================================

/// Configurable ceilings for accepting a regex body.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    /// Maximum length of the regex body in bytes.
    pub max_body_len: usize,
    /// Maximum number of capturing groups.
    pub max_capture_groups: usize,
    /// Reject known catastrophic-backtracking shapes.
    pub reject_danger_shapes: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_body_len: 512,
            max_capture_groups: 8,
            reject_danger_shapes: true,
        }
    }
}

/// Why a regex body was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsafePattern {
    #[error("pattern body is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("pattern has {count} capturing groups, limit is {max}")]
    TooManyCaptures { count: usize, max: usize },
    #[error("pattern contains a dangerous shape: {0}")]
    DangerShape(&'static str),
}

impl SafetyPolicy {
    /// Vet a regex body before it is handed to the regex engine.
    pub fn check(&self, body: &str) -> Result<(), UnsafePattern> {
        if body.len() > self.max_body_len {
            return Err(UnsafePattern::TooLong {
                len: body.len(),
                max: self.max_body_len,
            });
        }

        let scan = scan_body(body);

        if scan.capture_groups > self.max_capture_groups {
            return Err(UnsafePattern::TooManyCaptures {
                count: scan.capture_groups,
                max: self.max_capture_groups,
            });
        }

        if self.reject_danger_shapes {
            if scan.lookaround {
                return Err(UnsafePattern::DangerShape("lookaround"));
            }
            if scan.nested_quantifier {
                return Err(UnsafePattern::DangerShape("quantifier on a quantified group"));
            }
            if scan.dot_star_runs > 1 {
                return Err(UnsafePattern::DangerShape("repeated unbounded wildcard"));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Body Scanner
// =============================================================================

#[derive(Debug, Default)]
struct BodyScan {
    capture_groups: usize,
    /// A closed group whose body contains a quantifier is itself quantified,
    /// e.g. `(a+)*`.
    nested_quantifier: bool,
    /// Count of unescaped `.*` / `.+` occurrences.
    dot_star_runs: usize,
    lookaround: bool,
}

fn is_quantifier(b: u8) -> bool {
    b == b'*' || b == b'+' || b == b'{'
}

/// Single pass over the body tracking escapes, character classes, and group
/// nesting. Intentionally approximate; ties always break toward "dangerous".
fn scan_body(body: &str) -> BodyScan {
    let bytes = body.as_bytes();
    let mut scan = BodyScan::default();

    // Per open group: did its body contain a quantifier?
    let mut group_stack: Vec<bool> = Vec::new();
    let mut in_class = false;
    let mut escaped = false;
    let mut prev_dot = false;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];

        if escaped {
            escaped = false;
            prev_dot = false;
            i += 1;
            continue;
        }

        match b {
            b'\\' => {
                escaped = true;
            }
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            _ if in_class => {}
            b'(' => {
                if bytes[i + 1..].starts_with(b"?=")
                    || bytes[i + 1..].starts_with(b"?!")
                    || bytes[i + 1..].starts_with(b"?<=")
                    || bytes[i + 1..].starts_with(b"?<!")
                {
                    scan.lookaround = true;
                } else if !bytes[i + 1..].starts_with(b"?") {
                    scan.capture_groups += 1;
                }
                group_stack.push(false);
            }
            b')' => {
                let had_quantifier = group_stack.pop().unwrap_or(false);
                let next = bytes.get(i + 1).copied().unwrap_or(0);
                if had_quantifier && is_quantifier(next) {
                    scan.nested_quantifier = true;
                }
                // A quantified group counts as a quantifier for its parent
                if had_quantifier || is_quantifier(next) {
                    if let Some(top) = group_stack.last_mut() {
                        *top = true;
                    }
                }
            }
            b'*' | b'+' | b'{' => {
                if let Some(top) = group_stack.last_mut() {
                    *top = true;
                }
                if prev_dot && (b == b'*' || b == b'+') {
                    scan.dot_star_runs += 1;
                }
            }
            _ => {}
        }

        prev_dot = b == b'.' && !in_class;
        i += 1;
    }

    scan
}
