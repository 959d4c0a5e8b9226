//! Redirect safety guard
//!
//! Last line of defense between a candidate redirect and the network layer.
//! Redirect rules come from arbitrary third-party lists and sites answer
//! with arbitrary redirect chains of their own, so every candidate is
//! checked for downgrade, cross-site escape, and loop shapes before it is
//! allowed out.
//!
//! A short per-tab sliding window of recent hops backs the loop checks.
//! Rejected hops are not recorded: a blocked loop must not itself count as
//! a new hop.

use std::collections::HashMap;

use log::debug;

use uf_core::psl::Psl;
use uf_core::types::{GuardReason, GuardVerdict};
use uf_core::url::{host, normalize_for_compare, Scheme};

const LOG_TARGET: &str = "uf::guard";

/// Sliding window over recent hops.
const WINDOW_MS: u64 = 2500;

/// Hop-count ceiling within one window.
const MAX_HOPS: usize = 4;

// =============================================================================
// Hop History
// =============================================================================

#[derive(Debug, Clone)]
struct Hop {
    at_ms: u64,
    from_norm: String,
    to_norm: String,
    from_host: String,
    to_host: String,
}

// =============================================================================
// Guard
// =============================================================================

/// Per-tab redirect history and the checks over it.
#[derive(Debug, Default)]
pub struct RedirectGuard {
    history: HashMap<i32, Vec<Hop>>,
}

impl RedirectGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a candidate redirect. All checks must pass; on acceptance
    /// the hop is appended to the tab's window.
    pub fn allow(
        &mut self,
        tab_id: i32,
        from_url: &str,
        to_url: &str,
        now_ms: u64,
        psl: &Psl,
    ) -> GuardVerdict {
        let verdict = self.evaluate(tab_id, from_url, to_url, now_ms, psl);
        if let GuardVerdict::Block(reason) = verdict {
            debug!(
                target: LOG_TARGET,
                "tab {tab_id}: blocked {} (from {from_url} to {to_url})",
                reason.tag()
            );
        }
        verdict
    }

    fn evaluate(
        &mut self,
        tab_id: i32,
        from_url: &str,
        to_url: &str,
        now_ms: u64,
        psl: &Psl,
    ) -> GuardVerdict {
        // Never trade https for http.
        if Scheme::parse(from_url) == Some(Scheme::Https)
            && Scheme::parse(to_url) == Some(Scheme::Http)
        {
            return GuardVerdict::Block(GuardReason::HttpsDowngrade);
        }

        // Redirects normalize within a site, never hop registrable domains.
        // A target whose host cannot be read is equally out of bounds.
        let from_host = match host(from_url) {
            Some(h) => h.to_ascii_lowercase(),
            None => return GuardVerdict::Block(GuardReason::CrossOriginTarget),
        };
        let to_host = match host(to_url) {
            Some(h) => h.to_ascii_lowercase(),
            None => return GuardVerdict::Block(GuardReason::CrossOriginTarget),
        };
        if !psl.same_site(&from_host, &to_host) {
            return GuardVerdict::Block(GuardReason::CrossOriginTarget);
        }

        let from_norm = normalize_for_compare(from_url);
        let to_norm = normalize_for_compare(to_url);
        if from_norm == to_norm {
            return GuardVerdict::Block(GuardReason::NoopRedirect);
        }

        let window = self.history.entry(tab_id).or_default();
        window.retain(|hop| now_ms.saturating_sub(hop.at_ms) <= WINDOW_MS);

        if window.len() >= MAX_HOPS {
            return GuardVerdict::Block(GuardReason::TooManyHops);
        }

        if window.iter().any(|hop| hop.to_norm == to_norm) {
            return GuardVerdict::Block(GuardReason::SameTargetRepeats);
        }

        if let Some(last) = window.last() {
            // Exact reversal of the previous hop.
            if last.from_norm == to_norm && last.to_norm == from_norm {
                return GuardVerdict::Block(GuardReason::PingPong);
            }
            // Host-level reversal: redirectors that vary the path on each
            // bounce still alternate between the same pair of hosts.
            if last.from_host == to_host
                && last.to_host == from_host
                && from_host != to_host
            {
                return GuardVerdict::Block(GuardReason::HostPingPong);
            }
        }

        window.push(Hop {
            at_ms: now_ms,
            from_norm,
            to_norm,
            from_host,
            to_host,
        });
        GuardVerdict::Allow
    }

    /// Drop a tab's history: navigation committed to a new top-level
    /// document, or the tab closed.
    pub fn clear_tab(&mut self, tab_id: i32) {
        self.history.remove(&tab_id);
    }

    #[cfg(test)]
    fn window_len(&self, tab_id: i32) -> usize {
        self.history.get(&tab_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (RedirectGuard, Psl) {
        (RedirectGuard::new(), Psl::default())
    }

    #[test]
    fn test_https_downgrade_blocked() {
        let (mut g, psl) = guard();
        assert_eq!(
            g.allow(1, "https://a.com/x", "http://a.com/x", 0, &psl),
            GuardVerdict::Block(GuardReason::HttpsDowngrade)
        );
        // Upgrade is fine
        assert!(g
            .allow(1, "http://a.com/x", "https://a.com/y", 0, &psl)
            .is_allowed());
    }

    #[test]
    fn test_cross_site_blocked() {
        let (mut g, psl) = guard();
        assert_eq!(
            g.allow(1, "https://a.com/x", "https://b.com/x", 0, &psl),
            GuardVerdict::Block(GuardReason::CrossOriginTarget)
        );
        // Subdomain of the same registrable domain is fine
        assert!(g
            .allow(1, "https://m.a.com/x", "https://www.a.com/x", 0, &psl)
            .is_allowed());
    }

    #[test]
    fn test_noop_blocked() {
        let (mut g, psl) = guard();
        assert_eq!(
            g.allow(1, "https://a.com/x/", "https://a.com/x?utm=1", 0, &psl),
            GuardVerdict::Block(GuardReason::NoopRedirect)
        );
    }

    #[test]
    fn test_ping_pong_blocked() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://m.a.com/p", "https://www.a.com/p", 0, &psl)
            .is_allowed());
        assert_eq!(
            g.allow(1, "https://www.a.com/p", "https://m.a.com/p", 100, &psl),
            GuardVerdict::Block(GuardReason::PingPong)
        );
        // The blocked hop was not recorded
        assert_eq!(g.window_len(1), 1);
    }

    #[test]
    fn test_host_ping_pong_blocked() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://m.a.com/p", "https://www.a.com/p", 0, &psl)
            .is_allowed());
        // Path differs, hosts alternate: still a bounce
        assert_eq!(
            g.allow(1, "https://www.a.com/p2", "https://m.a.com/p3", 100, &psl),
            GuardVerdict::Block(GuardReason::HostPingPong)
        );
    }

    #[test]
    fn test_same_target_repeats_blocked() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://a.a.com/1", "https://b.a.com/z", 0, &psl)
            .is_allowed());
        assert!(g
            .allow(1, "https://b.a.com/z", "https://c.a.com/2", 100, &psl)
            .is_allowed());
        assert_eq!(
            g.allow(1, "https://c.a.com/2", "https://b.a.com/z", 200, &psl),
            GuardVerdict::Block(GuardReason::SameTargetRepeats)
        );
    }

    #[test]
    fn test_hop_ceiling() {
        let (mut g, psl) = guard();
        for i in 0..MAX_HOPS {
            let from = format!("https://s{i}.a.com/");
            let to = format!("https://s{}.a.com/", i + 1);
            assert!(g.allow(1, &from, &to, i as u64 * 10, &psl).is_allowed());
        }
        assert_eq!(
            g.allow(1, "https://x.a.com/", "https://y.a.com/", 500, &psl),
            GuardVerdict::Block(GuardReason::TooManyHops)
        );
    }

    #[test]
    fn test_window_expiry_reallows() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://m.a.com/p", "https://www.a.com/p", 0, &psl)
            .is_allowed());
        // Well past the window: the old hop no longer counts
        assert!(g
            .allow(1, "https://www.a.com/p", "https://m.a.com/p", WINDOW_MS + 1_000, &psl)
            .is_allowed());
    }

    #[test]
    fn test_clear_tab_resets_history() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://m.a.com/p", "https://www.a.com/p", 0, &psl)
            .is_allowed());
        g.clear_tab(1);
        assert!(g
            .allow(1, "https://www.a.com/p", "https://m.a.com/p", 100, &psl)
            .is_allowed());
    }

    #[test]
    fn test_histories_are_per_tab() {
        let (mut g, psl) = guard();
        assert!(g
            .allow(1, "https://m.a.com/p", "https://www.a.com/p", 0, &psl)
            .is_allowed());
        // Same reversal on a different tab is unrelated
        assert!(g
            .allow(2, "https://www.a.com/p", "https://m.a.com/p", 100, &psl)
            .is_allowed());
    }

    #[test]
    fn test_garbage_target_blocked() {
        let (mut g, psl) = guard();
        assert_eq!(
            g.allow(1, "https://a.com/x", "garbage", 0, &psl),
            GuardVerdict::Block(GuardReason::CrossOriginTarget)
        );
    }
}
