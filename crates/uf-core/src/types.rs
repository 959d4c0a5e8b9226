//! Shared type definitions for the unFold redirect engine
//!
//! These are the in-process data structures exchanged with the host's
//! extension glue (settings store, request interception, viewport observer).

use serde::{Deserialize, Serialize};

use crate::url::Scheme;

// =============================================================================
// Extension Mode
// =============================================================================

/// Overall extension mode, as persisted by the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Extension disabled; nothing is rewritten.
    Off,
    /// Force desktop posture everywhere.
    Always,
    /// Automatic, with a denylist of hosts kept mobile.
    AutoDeny,
    /// Automatic, restricted to an allowlist of hosts.
    AutoAllow,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::AutoDeny
    }
}

impl Mode {
    /// Modes that classify per-tab instead of forcing one posture.
    pub fn is_auto(self) -> bool {
        matches!(self, Mode::AutoDeny | Mode::AutoAllow)
    }
}

// =============================================================================
// Posture
// =============================================================================

/// The desktop-vs-mobile intent applied to a request. Distinct from the raw
/// viewport classification: the denylist and mode can override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Desktop,
    Mobile,
}

// =============================================================================
// Request Descriptor
// =============================================================================

/// Resource type of an intercepted request. Only top-level and frame
/// documents are candidates for redirect rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Other,
}

impl ResourceType {
    pub fn is_document(self) -> bool {
        matches!(self, ResourceType::MainFrame | ResourceType::SubFrame)
    }
}

/// Network request descriptor delivered by the host before the request is
/// sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub tab_id: i32,
    pub url: String,
    pub host: String,
    pub resource_type: ResourceType,
}

impl RequestInfo {
    pub fn scheme(&self) -> Option<Scheme> {
        Scheme::parse(&self.url)
    }
}

// =============================================================================
// Viewport Report
// =============================================================================

/// Raw viewport measurements reported by the page-side observer. Any subset
/// may be zero or absent; zero readings are ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportReport {
    pub vv_width: u32,
    pub inner_width: u32,
    pub outer_width: u32,
    pub screen_width: u32,
    pub vv_height: u32,
    pub inner_height: u32,
    pub outer_height: u32,
    pub screen_height: u32,
}

impl ViewportReport {
    /// Effective width: the minimum of all positive candidates. Guards
    /// against any single API lying due to page zoom or OS chrome.
    pub fn effective_width(&self) -> u32 {
        [
            self.vv_width,
            self.inner_width,
            self.outer_width,
            self.screen_width,
        ]
        .into_iter()
        .filter(|&w| w > 0)
        .min()
        .unwrap_or(0)
    }
}

// =============================================================================
// Redirect Decision
// =============================================================================

/// Outbound decision returned to the host's request-interception facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    /// No action; the request proceeds unmodified.
    None,
    /// Override the request URL.
    RedirectTo(String),
}

impl RedirectDecision {
    pub fn is_redirect(&self) -> bool {
        matches!(self, RedirectDecision::RedirectTo(_))
    }
}

// =============================================================================
// Guard Verdict
// =============================================================================

/// Why the safety guard refused a candidate redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardReason {
    NoopRedirect,
    TooManyHops,
    SameTargetRepeats,
    PingPong,
    HostPingPong,
    CrossOriginTarget,
    HttpsDowngrade,
}

impl GuardReason {
    /// Stable tag used in log output.
    pub fn tag(self) -> &'static str {
        match self {
            GuardReason::NoopRedirect => "noop-redirect",
            GuardReason::TooManyHops => "too-many-hops",
            GuardReason::SameTargetRepeats => "same-target-repeats",
            GuardReason::PingPong => "ping-pong",
            GuardReason::HostPingPong => "host-ping-pong",
            GuardReason::CrossOriginTarget => "cross-origin-target",
            GuardReason::HttpsDowngrade => "https-downgrade",
        }
    }
}

/// Outcome of the redirect safety guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Block(GuardReason),
}

impl GuardVerdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, GuardVerdict::Allow)
    }
}
