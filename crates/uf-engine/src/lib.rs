//! unFold Runtime Engine
//!
//! The stateful runtime behind the extension: classifies tab viewports,
//! resolves intercepted document requests against the compiled rule sets,
//! and guards every candidate redirect against loops and unsafe targets.
//! The host's extension glue owns an [`Engine`] and drives it through
//! synchronous calls; nothing here touches a browser API directly.
//!
//! # Modules
//!
//! - `classifier`: hysteresis-based desktop/mobile classification per tab
//! - `decision`: rule-set scan with per-tab memoization
//! - `guard`: redirect safety checks over a sliding hop window
//! - `state`: the owning `Engine` aggregate and request pipeline

pub mod classifier;
pub mod decision;
pub mod guard;
pub mod state;

pub use classifier::{Classification, ViewportClassifier};
pub use decision::DecisionEngine;
pub use guard::RedirectGuard;
pub use state::{Engine, EngineConfig, RuleTexts, ViewportOutcome, DEFAULT_THRESHOLD};
