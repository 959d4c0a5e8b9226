//! Host membership index
//!
//! Compact trie over reversed hostname bytes, used for the deny/allow host
//! lists. A query host matches when it equals a stored entry or is a proper
//! subdomain of one; partial-string matches are impossible because a match
//! is only accepted at a label boundary ("evil-example.com" never matches a
//! stored "example.com").
//!
//! The index is rebuilt wholesale whenever the underlying list text changes
//! and is never mutated incrementally.

use log::debug;

use crate::psl::Psl;

const LOG_TARGET: &str = "uf::hosttrie";

// =============================================================================
// Trie Storage
// =============================================================================

/// One trie node: byte-keyed children stored as parallel vectors.
/// Lists are small (tens to low thousands of hosts), so a flat scan of a
/// node's children beats a hash map on memory and is fast enough.
#[derive(Debug, Default, Clone)]
struct Node {
    bytes: Vec<u8>,
    children: Vec<u32>,
    terminal: bool,
}

/// Suffix-aware host membership index.
#[derive(Debug, Default, Clone)]
pub struct HostTrie {
    nodes: Vec<Node>,
    entries: usize,
}

impl HostTrie {
    /// Build an index from raw host lines. Each entry is normalized
    /// (lowercase, `*.` stripped, reduced to its registrable domain) and
    /// deduplicated; malformed entries are skipped, never fatal.
    pub fn build<'a, I>(hosts: I, psl: &Psl) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut trie = Self {
            nodes: vec![Node::default()],
            entries: 0,
        };

        for raw in hosts {
            match normalize_host(raw, psl) {
                Some(domain) => trie.insert(&domain),
                None => {
                    let trimmed = raw.trim();
                    if !trimmed.is_empty() {
                        debug!(target: LOG_TARGET, "skipping malformed host entry: {trimmed:?}");
                    }
                }
            }
        }

        trie
    }

    /// Number of distinct domains stored.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// True when no entry was accepted at build time (or never built).
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn insert(&mut self, host: &str) {
        let mut cur = 0usize;
        for &b in host.as_bytes().iter().rev() {
            cur = match self.find_child(cur, b) {
                Some(next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[cur].bytes.push(b);
                    self.nodes[cur].children.push(next as u32);
                    next
                }
            };
        }
        if !self.nodes[cur].terminal {
            self.nodes[cur].terminal = true;
            self.entries += 1;
        }
    }

    #[inline]
    fn find_child(&self, node: usize, b: u8) -> Option<usize> {
        let n = &self.nodes[node];
        n.bytes
            .iter()
            .position(|&c| c == b)
            .map(|i| n.children[i] as usize)
    }

    /// Suffix-aware membership: exact match or proper subdomain of a stored
    /// entry. Empty or unbuilt indexes always answer `false`.
    pub fn contains(&self, host: &str) -> bool {
        if self.entries == 0 || host.is_empty() {
            return false;
        }

        let host = host.trim().trim_end_matches('.');
        let bytes = host.as_bytes();
        let mut cur = 0usize;

        for (walked, &raw) in bytes.iter().rev().enumerate() {
            let b = raw.to_ascii_lowercase();
            cur = match self.find_child(cur, b) {
                Some(next) => next,
                None => return false,
            };
            // A stored entry ends here; accept only at a label boundary of
            // the query host.
            if self.nodes[cur].terminal {
                let remaining = bytes.len() - walked - 1;
                if remaining == 0 || bytes[remaining - 1] == b'.' {
                    return true;
                }
            }
        }

        false
    }
}

// =============================================================================
// Host Normalization
// =============================================================================

/// Normalize one list entry: trim, lowercase, strip a single leading `*.`,
/// then reduce to the registrable domain. Returns `None` for entries that
/// cannot name a host.
pub fn normalize_host(host: &str, psl: &Psl) -> Option<String> {
    let trimmed = host.trim().to_ascii_lowercase();
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(&trimmed);
    let trimmed = trimmed.trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return None;
    }

    Some(psl.registrable_domain(trimmed))
}
