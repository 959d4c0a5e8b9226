//! Redirect decision engine
//!
//! Resolves an intercepted document request against the compiled rule sets
//! for the active posture. Custom (user-authored) rules are consulted
//! before remote (fetched list) rules, and within each set host-specific
//! rules come before generic ones.
//!
//! The first rule whose pattern matches the URL owns the decision, even
//! when its rewrite turns out to be a no-op; later rules never get a
//! second look. This keeps a deliberately-neutralizing rule ("match and
//! rewrite to itself") usable as an exception entry.
//!
//! Decisions are memoized per tab on `(posture, url)`. The memo stores the
//! pre-guard candidate only; the safety guard always runs fresh because
//! its verdict depends on redirect history, not just the URL.

use std::collections::HashMap;

use log::trace;

use uf_core::cache::LruCache;
use uf_core::types::{Posture, RequestInfo};
use uf_core::url::Scheme;
use uf_compiler::{CompiledRule, RuleSet};

const LOG_TARGET: &str = "uf::decision";

/// Per-tab memo capacity. A handful of documents per tab is typical; the
/// cache exists to absorb rapid re-requests of the same URL.
const TAB_CACHE_CAPACITY: usize = 64;

// =============================================================================
// Decision Engine
// =============================================================================

/// Stateful per-tab decision memo over stateless rule-set scans.
#[derive(Debug, Default)]
pub struct DecisionEngine {
    caches: HashMap<i32, LruCache<(Posture, String), Option<String>>>,
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a request to a candidate target URL, or `None` when no rule
    /// applies. `sets` are scanned in priority order (custom before
    /// remote).
    pub fn decide(
        &mut self,
        req: &RequestInfo,
        posture: Posture,
        sets: &[&RuleSet],
    ) -> Option<String> {
        let key = (posture, req.url.clone());
        let cache = self
            .caches
            .entry(req.tab_id)
            .or_insert_with(|| LruCache::new(TAB_CACHE_CAPACITY));
        if let Some(hit) = cache.get(&key) {
            trace!(target: LOG_TARGET, "tab {}: memo hit for {}", req.tab_id, req.url);
            return hit.clone();
        }

        let scheme = req.scheme().unwrap_or(Scheme::Https);
        let candidate = scan(sets, &req.host, &req.url, scheme);

        if let Some(target) = &candidate {
            trace!(
                target: LOG_TARGET,
                "tab {}: {} -> {target}",
                req.tab_id,
                req.url
            );
        }

        if let Some(c) = self.caches.get_mut(&req.tab_id) {
            c.insert(key, candidate.clone());
        }
        candidate
    }

    /// Drop every memo. Called whenever any rule set is republished.
    pub fn invalidate(&mut self) {
        self.caches.clear();
    }

    pub fn tab_closed(&mut self, tab_id: i32) {
        self.caches.remove(&tab_id);
    }
}

/// Find the owning rule across the sets and apply it once.
fn scan(sets: &[&RuleSet], host: &str, url: &str, scheme: Scheme) -> Option<String> {
    let owner = sets
        .iter()
        .flat_map(|set| set.candidates(host))
        .find(|rule| matches(rule, url))?;
    owner.apply(url, scheme)
}

#[inline]
fn matches(rule: &CompiledRule, url: &str) -> bool {
    !rule.quick_reject(url) && rule.pattern.is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uf_core::types::ResourceType;
    use uf_compiler::SafetyPolicy;

    fn req(tab_id: i32, url: &str, host: &str) -> RequestInfo {
        RequestInfo {
            tab_id,
            url: url.to_string(),
            host: host.to_string(),
            resource_type: ResourceType::MainFrame,
        }
    }

    fn set(text: &str) -> RuleSet {
        RuleSet::compile(text, &SafetyPolicy::default())
    }

    #[test]
    fn test_basic_redirect() {
        let rules = set("m.example.com -> example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/page", "m.example.com");
        assert_eq!(
            engine.decide(&r, Posture::Desktop, &[&rules]).as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn test_custom_set_wins_over_remote() {
        let custom = set("m.example.com -> custom.example.com\n");
        let remote = set("m.example.com -> remote.example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/", "m.example.com");
        assert_eq!(
            engine
                .decide(&r, Posture::Desktop, &[&custom, &remote])
                .as_deref(),
            Some("https://custom.example.com/")
        );
    }

    #[test]
    fn test_first_match_owns_even_when_noop() {
        // The first rule matches but rewrites the URL to itself; the second
        // would redirect, but never runs.
        let rules = set(
            "/^https://m\\.example\\.com\\/keep$/ -> https://m.example.com/keep\n\
             m.example.com -> example.com\n",
        );
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/keep", "m.example.com");
        assert_eq!(engine.decide(&r, Posture::Desktop, &[&rules]), None);

        // Other URLs on the host still redirect via the second rule
        let r2 = req(1, "https://m.example.com/other", "m.example.com");
        assert_eq!(
            engine.decide(&r2, Posture::Desktop, &[&rules]).as_deref(),
            Some("https://example.com/other")
        );
    }

    #[test]
    fn test_memo_is_per_posture() {
        let rules = set("m.example.com -> example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/", "m.example.com");
        assert!(engine.decide(&r, Posture::Desktop, &[&rules]).is_some());
        // Same URL, mobile posture, no sets: decided independently
        assert_eq!(engine.decide(&r, Posture::Mobile, &[]), None);
        // Desktop memo unaffected
        assert!(engine.decide(&r, Posture::Desktop, &[&rules]).is_some());
    }

    #[test]
    fn test_invalidate_drops_memo() {
        let rules = set("m.example.com -> example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/", "m.example.com");
        assert!(engine.decide(&r, Posture::Desktop, &[&rules]).is_some());

        engine.invalidate();
        // New rule text now applies
        let replaced = set("m.example.com -> www.example.com\n");
        assert_eq!(
            engine.decide(&r, Posture::Desktop, &[&replaced]).as_deref(),
            Some("https://www.example.com/")
        );
    }

    #[test]
    fn test_tab_closed_drops_memo() {
        let rules = set("m.example.com -> example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://m.example.com/", "m.example.com");
        assert!(engine.decide(&r, Posture::Desktop, &[&rules]).is_some());

        engine.tab_closed(1);
        // A memo hit would still answer with the old candidate; an empty
        // scan proves the tab's cache is gone
        assert_eq!(engine.decide(&r, Posture::Desktop, &[]), None);
    }

    #[test]
    fn test_no_rule_no_redirect() {
        let rules = set("m.example.com -> example.com\n");
        let mut engine = DecisionEngine::new();
        let r = req(1, "https://other.test/", "other.test");
        assert_eq!(engine.decide(&r, Posture::Desktop, &[&rules]), None);
    }
}
