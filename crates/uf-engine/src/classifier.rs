//! Viewport classifier
//!
//! Converts raw per-tab viewport reports into a stable desktop/mobile
//! classification. Two thresholds (hysteresis) keep a fold boundary from
//! flickering: a tab that was desktop stays desktop until the width drops
//! below `threshold_down`; a tab that was mobile stays mobile until the
//! width reaches `threshold_up`.

use std::collections::HashMap;

use log::debug;

use uf_core::types::ViewportReport;

const LOG_TARGET: &str = "uf::classifier";

/// Gap between the up and down thresholds, in CSS pixels.
const HYSTERESIS_PX: u32 = 100;

/// Lowest permitted down-threshold.
const MIN_THRESHOLD_DOWN: u32 = 100;

/// Minimum interval between auto-reloads of one tab.
const RELOAD_MIN_INTERVAL_MS: u64 = 1200;

// =============================================================================
// Per-Tab State
// =============================================================================

/// Last known classification for one tab. Created lazily on the first
/// viewport report, deleted when the tab closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabViewportState {
    /// Tri-state: `None` until the first report arrives.
    pub is_wide: Option<bool>,
    /// Most recent effective width used for the hysteresis decision.
    pub last_effective_width: u32,
}

/// Result of classifying one viewport report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_wide: bool,
    /// Whether the classification flipped relative to the tab's previous
    /// effective state.
    pub changed: bool,
}

// =============================================================================
// Classifier
// =============================================================================

/// Per-tab desktop/mobile classification with hysteresis.
#[derive(Debug)]
pub struct ViewportClassifier {
    threshold_up: u32,
    tabs: HashMap<i32, TabViewportState>,
    /// Fallback for tabs that have never reported: the most recent
    /// classification seen anywhere (the device did not change shape
    /// between tabs).
    last_known_wide: Option<bool>,
    last_reload_ms: HashMap<i32, u64>,
}

impl ViewportClassifier {
    pub fn new(threshold_up: u32) -> Self {
        Self {
            threshold_up: threshold_up.max(MIN_THRESHOLD_DOWN + 1),
            tabs: HashMap::new(),
            last_known_wide: None,
            last_reload_ms: HashMap::new(),
        }
    }

    pub fn set_threshold(&mut self, threshold_up: u32) {
        self.threshold_up = threshold_up.max(MIN_THRESHOLD_DOWN + 1);
    }

    pub fn threshold_up(&self) -> u32 {
        self.threshold_up
    }

    pub fn threshold_down(&self) -> u32 {
        (self.threshold_up - HYSTERESIS_PX).max(MIN_THRESHOLD_DOWN)
    }

    /// Classify one report for a tab and record the new state.
    pub fn classify(&mut self, tab_id: i32, report: &ViewportReport) -> Classification {
        let width = report.effective_width();
        let prev = self
            .tabs
            .get(&tab_id)
            .and_then(|t| t.is_wide)
            .or(self.last_known_wide);

        let is_wide = match prev {
            // Was desktop: stay desktop until the width falls below the
            // lower threshold.
            Some(true) => width >= self.threshold_down(),
            // Was mobile: stay mobile until the width reaches the upper
            // threshold.
            Some(false) => width >= self.threshold_up,
            // First observation anywhere.
            None => width >= self.threshold_up,
        };

        let changed = prev.map_or(false, |p| p != is_wide);

        self.tabs.insert(
            tab_id,
            TabViewportState {
                is_wide: Some(is_wide),
                last_effective_width: width,
            },
        );
        self.last_known_wide = Some(is_wide);

        if changed {
            debug!(
                target: LOG_TARGET,
                "tab {tab_id}: width {width} -> {}", if is_wide { "desktop" } else { "mobile" }
            );
        }

        Classification { is_wide, changed }
    }

    /// The tab's current desktop preference, falling back to the last
    /// classification seen anywhere, defaulting to desktop.
    pub fn is_desktop_preferred(&self, tab_id: i32) -> bool {
        match self.tabs.get(&tab_id).and_then(|t| t.is_wide) {
            Some(wide) => wide,
            None => self.last_known_wide != Some(false),
        }
    }

    pub fn tab_state(&self, tab_id: i32) -> Option<TabViewportState> {
        self.tabs.get(&tab_id).copied()
    }

    /// Rate limiter for flip-driven auto-reloads: at most one per tab per
    /// `RELOAD_MIN_INTERVAL_MS`. Recording happens on acceptance only.
    pub fn try_claim_reload(&mut self, tab_id: i32, now_ms: u64) -> bool {
        let last = self.last_reload_ms.get(&tab_id).copied().unwrap_or(0);
        if now_ms.saturating_sub(last) > RELOAD_MIN_INTERVAL_MS {
            self.last_reload_ms.insert(tab_id, now_ms);
            true
        } else {
            false
        }
    }

    pub fn tab_closed(&mut self, tab_id: i32) {
        self.tabs.remove(&tab_id);
        self.last_reload_ms.remove(&tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn width(w: u32) -> ViewportReport {
        ViewportReport {
            vv_width: w,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_observation_uses_threshold_up() {
        let mut c = ViewportClassifier::new(600);
        assert!(c.classify(1, &width(600)).is_wide);
        let mut c = ViewportClassifier::new(600);
        assert!(!c.classify(1, &width(599)).is_wide);
    }

    #[test]
    fn test_hysteresis_band() {
        let mut c = ViewportClassifier::new(600);
        let r = c.classify(1, &width(650));
        assert!(r.is_wide && !r.changed);

        // Inside the band: stays desktop
        let r = c.classify(1, &width(550));
        assert!(r.is_wide && !r.changed);

        // Below threshold_down: flips to mobile
        let r = c.classify(1, &width(450));
        assert!(!r.is_wide && r.changed);

        // Inside the band again: stays mobile now
        let r = c.classify(1, &width(550));
        assert!(!r.is_wide && !r.changed);

        // At threshold_up: flips back
        let r = c.classify(1, &width(600));
        assert!(r.is_wide && r.changed);
    }

    #[test]
    fn test_threshold_down_floor() {
        let c = ViewportClassifier::new(150);
        assert_eq!(c.threshold_down(), 100);
    }

    #[test]
    fn test_last_known_wide_fallback() {
        let mut c = ViewportClassifier::new(600);
        c.classify(1, &width(400));
        // Tab 2 never reported; inherits the device-wide last observation
        assert!(!c.is_desktop_preferred(2));
        // A fresh classifier defaults to desktop
        let c = ViewportClassifier::new(600);
        assert!(c.is_desktop_preferred(7));
    }

    #[test]
    fn test_fallback_state_counts_as_previous() {
        let mut c = ViewportClassifier::new(600);
        c.classify(1, &width(700));
        // First report for tab 2 inherits desktop, so 550 sits in the band
        let r = c.classify(2, &width(550));
        assert!(r.is_wide && !r.changed);
    }

    #[test]
    fn test_reload_rate_limit() {
        let mut c = ViewportClassifier::new(600);
        assert!(c.try_claim_reload(1, 10_000));
        assert!(!c.try_claim_reload(1, 10_800));
        assert!(c.try_claim_reload(1, 11_300));
        // Per tab, not global
        assert!(c.try_claim_reload(2, 10_000));
    }

    #[test]
    fn test_tab_closed_clears_state() {
        let mut c = ViewportClassifier::new(600);
        c.classify(1, &width(700));
        c.tab_closed(1);
        assert!(c.tab_state(1).is_none());
        // Device-wide fallback survives the tab
        assert!(c.is_desktop_preferred(1));
    }
}
