//! Public Suffix List (PSL) utilities for eTLD+1 extraction
//!
//! The guard's same-site check and host-list normalization both work on
//! registrable domains. A `Psl` instance optionally holds suffix rules
//! parsed from PSL-format text; without one it falls back to a small
//! built-in heuristic, which is good enough for the common case and never
//! wrong in a way that widens the same-site boundary unsafely.
//!
//! # Examples
//!
//! ```
//! use uf_core::psl::Psl;
//!
//! let psl = Psl::default();
//! assert_eq!(psl.registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(psl.registrable_domain("sub.example.co.uk"), "example.co.uk");
//! ```

use std::collections::HashSet;

// =============================================================================
// Suffix Rule Sets
// =============================================================================

/// Parsed PSL rules, keyed by suffix string.
#[derive(Debug, Default, Clone)]
struct SuffixSets {
    /// Exact rules (e.g. "com", "co.uk")
    exact: HashSet<String>,
    /// Wildcard rules ("*.ck" stored as "ck")
    wildcard: HashSet<String>,
    /// Exception rules ("!www.ck" stored as "www.ck")
    exception: HashSet<String>,
}

// =============================================================================
// Psl
// =============================================================================

/// Owned public-suffix lookup. Construct once, share by reference.
#[derive(Debug, Default, Clone)]
pub struct Psl {
    sets: Option<SuffixSets>,
}

/// Common two-part TLDs used when no list is loaded.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

impl Psl {
    /// Build from PSL-format text (one rule per line, `//` comments).
    /// Malformed lines are skipped.
    pub fn from_list_text(text: &str) -> Self {
        let mut sets = SuffixSets::default();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let line = line.to_ascii_lowercase();
            if let Some(rest) = line.strip_prefix('!') {
                sets.exception.insert(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("*.") {
                sets.wildcard.insert(rest.to_string());
            } else {
                sets.exact.insert(line);
            }
        }
        Self { sets: Some(sets) }
    }

    /// Whether real PSL data is loaded (vs. fallback heuristic only).
    pub fn is_loaded(&self) -> bool {
        self.sets.is_some()
    }

    /// Get the eTLD+1 (registrable domain) for a hostname.
    ///
    /// Always returns something usable: unknown or single-label hosts come
    /// back unchanged (lowercased).
    pub fn registrable_domain(&self, host: &str) -> String {
        let host = host.to_ascii_lowercase();
        let host = host.trim_end_matches('.');
        let labels: Vec<&str> = host.split('.').collect();
        let n = labels.len();

        if n <= 1 {
            return host.to_string();
        }

        if let Some(ref psl) = self.sets {
            for i in 0..n - 1 {
                let suffix = labels[i..].join(".");
                let parent_suffix = if i + 1 < n {
                    labels[i + 1..].join(".")
                } else {
                    String::new()
                };

                // Exception rules override wildcards
                if psl.exception.contains(&suffix) {
                    if i > 0 {
                        return labels[i - 1..].join(".");
                    }
                    return suffix;
                }

                if psl.exact.contains(&suffix) {
                    if i > 0 {
                        return labels[i - 1..].join(".");
                    }
                    return host.to_string();
                }

                if !parent_suffix.is_empty() && psl.wildcard.contains(&parent_suffix) {
                    if i > 0 {
                        return labels[i - 1..].join(".");
                    }
                    return suffix;
                }
            }
        }

        fallback_etld1(&labels)
    }

    /// Check if two hosts share the same registrable domain.
    pub fn same_site(&self, host1: &str, host2: &str) -> bool {
        self.registrable_domain(host1) == self.registrable_domain(host2)
    }
}

/// Fallback eTLD+1 heuristic: last two labels, or three for a known
/// two-part TLD.
fn fallback_etld1(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    labels[n - 2..].join(".")
}
