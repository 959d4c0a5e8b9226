//! unFold Core Library
//!
//! Leaf primitives shared by the rule compiler and the runtime engine.
//! Nothing in here touches a browser API: every type is an in-process data
//! structure exchanged with the host's extension glue at the boundaries.
//!
//! # Modules
//!
//! - `url`: fast URL slicing (scheme/host/path) and loop-guard normalization
//! - `psl`: public-suffix-aware eTLD+1 extraction with a built-in fallback
//! - `hosttrie`: suffix-aware host membership index for deny/allow lists
//! - `cache`: small LRU used for decision memoization
//! - `types`: shared boundary types (mode, posture, requests, verdicts)

pub mod cache;
pub mod hosttrie;
pub mod psl;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cache::LruCache;
pub use hosttrie::{normalize_host, HostTrie};
pub use psl::Psl;
pub use types::{
    GuardReason, GuardVerdict, Mode, Posture, RedirectDecision, RequestInfo, ResourceType,
    ViewportReport,
};
pub use url::Scheme;
