//! Engine state and request pipeline
//!
//! `Engine` owns every piece of mutable runtime state: the four rule-set
//! slots (custom/remote crossed with desktop/mobile), the deny/allow host
//! indexes, the viewport classifier, the decision memo, and the redirect
//! guard. The host's extension glue drives it through a handful of
//! single-writer update methods and the `on_request` entry point.
//!
//! All updates are publish-by-replace: rule sets and host indexes are
//! rebuilt wholesale (with previous-text memoization) and swapped in, so a
//! request being decided mid-update sees either the old or the new state,
//! never a half-built one.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use uf_core::hosttrie::HostTrie;
use uf_core::psl::Psl;
use uf_core::types::{Mode, Posture, RedirectDecision, RequestInfo, ViewportReport};
use uf_core::url::host;
use uf_compiler::{MemoizedCompiler, SafetyPolicy};

use crate::classifier::{Classification, ViewportClassifier};
use crate::decision::DecisionEngine;
use crate::guard::RedirectGuard;

const LOG_TARGET: &str = "uf::engine";

/// Default classification threshold in CSS pixels.
pub const DEFAULT_THRESHOLD: u32 = 600;

// =============================================================================
// Configuration
// =============================================================================

/// Engine settings, as persisted by the host's settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub mode: Mode,
    /// Desktop classification threshold (CSS px).
    pub threshold: u32,
    /// Master switch for URL rewriting.
    pub url_redirect: bool,
    /// Reload a tab automatically when its classification flips.
    pub auto_refresh: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            threshold: DEFAULT_THRESHOLD,
            url_redirect: true,
            auto_refresh: true,
        }
    }
}

/// Rule texts for one posture, custom entries taking priority over the
/// remotely fetched list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleTexts {
    pub custom: String,
    pub remote: String,
}

/// Outcome of a viewport report: the classification plus whether the host
/// should reload the tab now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportOutcome {
    pub classification: Classification,
    pub should_reload: bool,
}

// =============================================================================
// Rule Slots
// =============================================================================

/// Compiled rule sets for one posture.
#[derive(Debug)]
struct PostureRules {
    custom: MemoizedCompiler,
    remote: MemoizedCompiler,
}

impl PostureRules {
    fn new(policy: SafetyPolicy) -> Self {
        Self {
            custom: MemoizedCompiler::new(policy.clone()),
            remote: MemoizedCompiler::new(policy),
        }
    }
}

/// One host-list index with its previous-text memo.
#[derive(Debug, Default)]
struct HostList {
    prev_text: Option<String>,
    index: HostTrie,
}

impl HostList {
    /// Rebuild the index when the text changed. Returns whether it did.
    fn update(&mut self, text: &str, psl: &Psl) -> bool {
        if self.prev_text.as_deref() == Some(text) {
            return false;
        }
        self.index = HostTrie::build(text.lines(), psl);
        self.prev_text = Some(text.to_string());
        true
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The whole runtime, owned by the host's background context.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    psl: Psl,
    desktop_rules: PostureRules,
    mobile_rules: PostureRules,
    denylist: HostList,
    allowlist: HostList,
    classifier: ViewportClassifier,
    decisions: DecisionEngine,
    guard: RedirectGuard,
    /// Tabs with a dirty form; auto-reload is suppressed for them so user
    /// input is never thrown away by a classification flip.
    form_dirty: HashSet<i32>,
}

impl Engine {
    pub fn new(config: EngineConfig, psl: Psl) -> Self {
        let policy = SafetyPolicy::default();
        let threshold = config.threshold;
        Self {
            config,
            psl,
            desktop_rules: PostureRules::new(policy.clone()),
            mobile_rules: PostureRules::new(policy),
            denylist: HostList::default(),
            allowlist: HostList::default(),
            classifier: ViewportClassifier::new(threshold),
            decisions: DecisionEngine::new(),
            guard: RedirectGuard::new(),
            form_dirty: HashSet::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn psl(&self) -> &Psl {
        &self.psl
    }

    // -------------------------------------------------------------------------
    // Updates
    // -------------------------------------------------------------------------

    /// Swap in a new configuration. Threshold changes reach the classifier;
    /// mode changes invalidate the decision memo.
    pub fn apply_config(&mut self, config: EngineConfig) {
        if config.threshold != self.config.threshold {
            self.classifier.set_threshold(config.threshold);
        }
        if config.mode != self.config.mode || config.url_redirect != self.config.url_redirect {
            self.decisions.invalidate();
        }
        info!(
            target: LOG_TARGET,
            "config applied: mode {:?}, threshold {}", config.mode, config.threshold
        );
        self.config = config;
    }

    /// Recompile the rule slots for one posture. Unchanged texts are memo
    /// hits and republish the same set.
    pub fn recompile_rules(&mut self, posture: Posture, texts: &RuleTexts) {
        let slots = match posture {
            Posture::Desktop => &mut self.desktop_rules,
            Posture::Mobile => &mut self.mobile_rules,
        };
        let before = (slots.custom.current(), slots.remote.current());
        let custom = slots.custom.compile(&texts.custom);
        let remote = slots.remote.compile(&texts.remote);
        let changed =
            !Arc::ptr_eq(&before.0, &custom) || !Arc::ptr_eq(&before.1, &remote);
        if changed {
            debug!(
                target: LOG_TARGET,
                "{posture:?} rules republished ({} custom, {} remote)",
                custom.len(),
                remote.len()
            );
            self.decisions.invalidate();
        }
    }

    /// Rebuild the deny/allow host indexes from raw list text.
    pub fn rebuild_host_lists(&mut self, deny_text: &str, allow_text: &str) {
        let deny_changed = self.denylist.update(deny_text, &self.psl);
        let allow_changed = self.allowlist.update(allow_text, &self.psl);
        if deny_changed || allow_changed {
            debug!(
                target: LOG_TARGET,
                "host lists rebuilt ({} denied, {} allowed)",
                self.denylist.index.len(),
                self.allowlist.index.len()
            );
            self.decisions.invalidate();
        }
    }

    /// Feed one viewport report. The outcome says whether the host should
    /// reload the tab: only on a flip, only in an auto mode with
    /// auto-refresh on, never while a form is dirty, and at most once per
    /// rate-limit interval.
    pub fn on_viewport(
        &mut self,
        tab_id: i32,
        report: &ViewportReport,
        now_ms: u64,
    ) -> ViewportOutcome {
        let classification = self.classifier.classify(tab_id, report);
        let should_reload = classification.changed
            && self.config.auto_refresh
            && self.config.mode.is_auto()
            && !self.form_dirty.contains(&tab_id)
            && self.classifier.try_claim_reload(tab_id, now_ms);
        ViewportOutcome {
            classification,
            should_reload,
        }
    }

    /// Mark or clear the tab's dirty-form flag.
    pub fn set_form_dirty(&mut self, tab_id: i32, dirty: bool) {
        if dirty {
            self.form_dirty.insert(tab_id);
        } else {
            self.form_dirty.remove(&tab_id);
        }
    }

    /// A new top-level document committed in the tab: redirect history,
    /// the decision memo, and the form flag belong to the old document.
    pub fn navigation_committed(&mut self, tab_id: i32) {
        self.guard.clear_tab(tab_id);
        self.decisions.tab_closed(tab_id);
        self.form_dirty.remove(&tab_id);
    }

    pub fn tab_closed(&mut self, tab_id: i32) {
        self.classifier.tab_closed(tab_id);
        self.decisions.tab_closed(tab_id);
        self.guard.clear_tab(tab_id);
        self.form_dirty.remove(&tab_id);
    }

    // -------------------------------------------------------------------------
    // Request pipeline
    // -------------------------------------------------------------------------

    /// The posture that applies to a request host right now: the mode and
    /// the host lists can override the raw viewport classification.
    pub fn posture_for(&self, tab_id: i32, req_host: &str) -> Posture {
        match self.config.mode {
            Mode::Off => Posture::Mobile,
            Mode::Always | Mode::AutoDeny => {
                // Denylisted hosts stay mobile even when forcing desktop.
                if self.denylist.index.contains(req_host) {
                    Posture::Mobile
                } else if self.config.mode == Mode::Always
                    || self.classifier.is_desktop_preferred(tab_id)
                {
                    Posture::Desktop
                } else {
                    Posture::Mobile
                }
            }
            Mode::AutoAllow => {
                if self.allowlist.index.contains(req_host)
                    && self.classifier.is_desktop_preferred(tab_id)
                {
                    Posture::Desktop
                } else {
                    Posture::Mobile
                }
            }
        }
    }

    /// Decide one intercepted request. Effectively synchronous; never
    /// panics; anything unexpected resolves to `RedirectDecision::None`.
    pub fn on_request(&mut self, req: &RequestInfo, now_ms: u64) -> RedirectDecision {
        if !self.config.url_redirect || self.config.mode == Mode::Off {
            return RedirectDecision::None;
        }
        if req.scheme().is_none() || !req.resource_type.is_document() {
            return RedirectDecision::None;
        }
        // In allowlist mode only listed hosts are ever rewritten.
        if self.config.mode == Mode::AutoAllow && !self.allowlist.index.contains(&req.host) {
            return RedirectDecision::None;
        }

        let posture = self.posture_for(req.tab_id, &req.host);
        let (custom, remote) = match posture {
            Posture::Desktop => (
                self.desktop_rules.custom.current(),
                self.desktop_rules.remote.current(),
            ),
            Posture::Mobile => (
                self.mobile_rules.custom.current(),
                self.mobile_rules.remote.current(),
            ),
        };

        let candidate = match self.decisions.decide(req, posture, &[&custom, &remote]) {
            Some(target) => target,
            None => return RedirectDecision::None,
        };

        // The candidate is advisory until the guard accepts it. A rejected
        // candidate falls through to no action, never to another rule.
        if self
            .guard
            .allow(req.tab_id, &req.url, &candidate, now_ms, &self.psl)
            .is_allowed()
        {
            debug!(
                target: LOG_TARGET,
                "tab {}: redirect {} -> {candidate}", req.tab_id, req.url
            );
            RedirectDecision::RedirectTo(candidate)
        } else {
            RedirectDecision::None
        }
    }

    /// Simulate a decision without posture resolution, for offline tooling.
    /// Runs the same decide-then-guard pipeline against the given posture's
    /// slots.
    pub fn decide_as(
        &mut self,
        req: &RequestInfo,
        posture: Posture,
        now_ms: u64,
    ) -> RedirectDecision {
        let (custom, remote) = match posture {
            Posture::Desktop => (
                self.desktop_rules.custom.current(),
                self.desktop_rules.remote.current(),
            ),
            Posture::Mobile => (
                self.mobile_rules.custom.current(),
                self.mobile_rules.remote.current(),
            ),
        };
        let candidate = match self.decisions.decide(req, posture, &[&custom, &remote]) {
            Some(target) => target,
            None => return RedirectDecision::None,
        };
        if self
            .guard
            .allow(req.tab_id, &req.url, &candidate, now_ms, &self.psl)
            .is_allowed()
        {
            RedirectDecision::RedirectTo(candidate)
        } else {
            RedirectDecision::None
        }
    }

    /// Host of a URL, lowercased, for callers that only hold the URL.
    pub fn host_of(url: &str) -> Option<String> {
        host(url).map(|h| h.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uf_core::types::ResourceType;

    fn engine(mode: Mode) -> Engine {
        let mut e = Engine::new(
            EngineConfig {
                mode,
                ..Default::default()
            },
            Psl::default(),
        );
        e.recompile_rules(
            Posture::Desktop,
            &RuleTexts {
                custom: "m.example.com -> example.com\n".to_string(),
                remote: "m.shop.test -> shop.test\n".to_string(),
            },
        );
        e
    }

    fn doc_req(tab_id: i32, url: &str) -> RequestInfo {
        RequestInfo {
            tab_id,
            url: url.to_string(),
            host: Engine::host_of(url).unwrap_or_default(),
            resource_type: ResourceType::MainFrame,
        }
    }

    fn wide_report() -> ViewportReport {
        ViewportReport {
            vv_width: 1280,
            ..Default::default()
        }
    }

    fn narrow_report() -> ViewportReport {
        ViewportReport {
            vv_width: 400,
            ..Default::default()
        }
    }

    #[test]
    fn test_desktop_request_redirects() {
        let mut e = engine(Mode::AutoDeny);
        e.on_viewport(1, &wide_report(), 0);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/page"), 10),
            RedirectDecision::RedirectTo("https://example.com/page".to_string())
        );
    }

    #[test]
    fn test_mobile_tab_not_redirected() {
        let mut e = engine(Mode::AutoDeny);
        e.on_viewport(1, &narrow_report(), 0);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/page"), 10),
            RedirectDecision::None
        );
    }

    #[test]
    fn test_off_mode_is_inert() {
        let mut e = engine(Mode::Off);
        e.on_viewport(1, &wide_report(), 0);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/"), 10),
            RedirectDecision::None
        );
    }

    #[test]
    fn test_non_document_passed_through() {
        let mut e = engine(Mode::Always);
        let mut req = doc_req(1, "https://m.example.com/logo.png");
        req.resource_type = ResourceType::Other;
        assert_eq!(e.on_request(&req, 10), RedirectDecision::None);
    }

    #[test]
    fn test_non_http_passed_through() {
        let mut e = engine(Mode::Always);
        let req = RequestInfo {
            tab_id: 1,
            url: "ftp://m.example.com/".to_string(),
            host: "m.example.com".to_string(),
            resource_type: ResourceType::MainFrame,
        };
        assert_eq!(e.on_request(&req, 10), RedirectDecision::None);
    }

    #[test]
    fn test_denylist_forces_mobile() {
        let mut e = engine(Mode::Always);
        e.rebuild_host_lists("example.com\n", "");
        assert_eq!(e.posture_for(1, "m.example.com"), Posture::Mobile);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/"), 10),
            RedirectDecision::None
        );
        // Other hosts still get desktop under Always
        assert_eq!(e.posture_for(1, "m.shop.test"), Posture::Desktop);
    }

    #[test]
    fn test_allowlist_mode_gates_redirects() {
        let mut e = engine(Mode::AutoAllow);
        e.on_viewport(1, &wide_report(), 0);
        // Not allowlisted: untouched
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/"), 10),
            RedirectDecision::None
        );
        e.rebuild_host_lists("", "example.com\n");
        assert!(e
            .on_request(&doc_req(1, "https://m.example.com/"), 10)
            .is_redirect());
    }

    #[test]
    fn test_remote_rules_also_apply() {
        let mut e = engine(Mode::Always);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.shop.test/cart"), 10),
            RedirectDecision::RedirectTo("https://shop.test/cart".to_string())
        );
    }

    #[test]
    fn test_recompile_invalidates_memo() {
        let mut e = engine(Mode::Always);
        assert!(e
            .on_request(&doc_req(1, "https://m.example.com/"), 10)
            .is_redirect());
        e.recompile_rules(
            Posture::Desktop,
            &RuleTexts {
                custom: String::new(),
                remote: String::new(),
            },
        );
        e.navigation_committed(1);
        assert_eq!(
            e.on_request(&doc_req(1, "https://m.example.com/"), 20),
            RedirectDecision::None
        );
    }

    #[test]
    fn test_viewport_flip_requests_reload() {
        let mut e = engine(Mode::AutoDeny);
        let first = e.on_viewport(1, &wide_report(), 0);
        assert!(!first.should_reload);
        let flipped = e.on_viewport(1, &narrow_report(), 5_000);
        assert!(flipped.classification.changed);
        assert!(flipped.should_reload);
    }

    #[test]
    fn test_form_dirty_suppresses_reload() {
        let mut e = engine(Mode::AutoDeny);
        e.on_viewport(1, &wide_report(), 0);
        e.set_form_dirty(1, true);
        let flipped = e.on_viewport(1, &narrow_report(), 5_000);
        assert!(flipped.classification.changed);
        assert!(!flipped.should_reload);
        // Navigation clears the flag
        e.navigation_committed(1);
        let back = e.on_viewport(1, &wide_report(), 10_000);
        assert!(back.should_reload);
    }

    #[test]
    fn test_reload_rate_limited() {
        let mut e = engine(Mode::AutoDeny);
        e.on_viewport(1, &wide_report(), 0);
        assert!(e.on_viewport(1, &narrow_report(), 5_000).should_reload);
        // Second flip inside the interval is swallowed
        assert!(!e.on_viewport(1, &wide_report(), 5_500).should_reload);
    }

    #[test]
    fn test_threshold_config_reaches_classifier() {
        let mut e = engine(Mode::AutoDeny);
        e.apply_config(EngineConfig {
            mode: Mode::AutoDeny,
            threshold: 900,
            ..Default::default()
        });
        // 800 is wide under the default threshold but narrow under 900
        let r = e.on_viewport(
            1,
            &ViewportReport {
                vv_width: 800,
                ..Default::default()
            },
            0,
        );
        assert!(!r.classification.is_wide);
    }

    #[test]
    fn test_config_from_json() {
        // Settings arrive as JSON from the host's store; missing fields
        // keep their defaults
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"mode": "autoAllow", "threshold": 720}"#).unwrap();
        assert_eq!(cfg.mode, Mode::AutoAllow);
        assert_eq!(cfg.threshold, 720);
        assert!(cfg.url_redirect);
        assert!(cfg.auto_refresh);
    }

    #[test]
    fn test_tab_closed_drops_state() {
        let mut e = engine(Mode::AutoDeny);
        e.on_viewport(1, &narrow_report(), 0);
        e.tab_closed(1);
        // Fallback is the device-wide last observation, which was mobile
        assert_eq!(e.posture_for(1, "m.example.com"), Posture::Mobile);
    }
}
