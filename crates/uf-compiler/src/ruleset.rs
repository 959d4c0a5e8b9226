//! Compiled rule sets
//!
//! A `RuleSet` is the immutable product of compiling one rule-text body.
//! Rules specific to a host are bucketed in `host_map` for O(1)-ish lookup;
//! the rest are `generic`. Evaluation order is load-bearing: host-specific
//! rules are consulted before generic ones, and within each bucket the
//! original textual order is preserved; the first matching rule wins.
//!
//! Recompilation is memoized on the exact previous text and publishes a
//! whole new `Arc<RuleSet>`; in-flight readers always see either the old or
//! the new complete set, never a partially-built one.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::parser::{compile_rule_lines, CompiledRule};
use crate::safety::SafetyPolicy;

const LOG_TARGET: &str = "uf::compiler";

// =============================================================================
// RuleSet
// =============================================================================

/// All rules compiled from one text body, bucketed by host.
///
/// Invariant: every rule in `all` appears in exactly one bucket,
/// `host_map[rule.host_key]` when the rule has a host key and `generic`
/// otherwise. Buckets store indexes into `all`.
#[derive(Debug, Default)]
pub struct RuleSet {
    all: Vec<CompiledRule>,
    host_map: HashMap<String, Vec<usize>>,
    generic: Vec<usize>,
}

impl RuleSet {
    /// Compile a rule text into a bucketed set.
    pub fn compile(text: &str, policy: &SafetyPolicy) -> Self {
        let all = compile_rule_lines(text, policy);
        let mut host_map: HashMap<String, Vec<usize>> = HashMap::new();
        let mut generic = Vec::new();

        for (idx, rule) in all.iter().enumerate() {
            match &rule.host_key {
                Some(host) => host_map.entry(host.clone()).or_default().push(idx),
                None => generic.push(idx),
            }
        }

        debug!(
            target: LOG_TARGET,
            "compiled {} rules ({} host-bucketed, {} generic)",
            all.len(),
            all.len() - generic.len(),
            generic.len()
        );

        Self {
            all,
            host_map,
            generic,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// All rules in textual order.
    pub fn all(&self) -> &[CompiledRule] {
        &self.all
    }

    /// Rules bucketed under a specific host, in textual order.
    pub fn host_rules(&self, host: &str) -> impl Iterator<Item = &CompiledRule> {
        self.host_map
            .get(host)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.all[idx])
    }

    /// Generic rules (no host key), in textual order.
    pub fn generic_rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.generic.iter().map(move |&idx| &self.all[idx])
    }

    /// Candidate rules for a request host: host-specific first, then
    /// generic. The first match wins; callers must not keep scanning.
    pub fn candidates<'a>(&'a self, host: &str) -> impl Iterator<Item = &'a CompiledRule> {
        self.host_rules(host).chain(self.generic_rules())
    }
}

// =============================================================================
// Memoized Compilation
// =============================================================================

/// One rule-text slot (custom/remote × desktop/mobile each own one).
/// Recompiles only when the text actually changed; otherwise hands back the
/// same `Arc`.
#[derive(Debug)]
pub struct MemoizedCompiler {
    policy: SafetyPolicy,
    prev_text: Option<String>,
    current: Arc<RuleSet>,
}

impl MemoizedCompiler {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self {
            policy,
            prev_text: None,
            current: Arc::new(RuleSet::default()),
        }
    }

    /// Compile `text`, reusing the previous set when the text is unchanged.
    pub fn compile(&mut self, text: &str) -> Arc<RuleSet> {
        if self.prev_text.as_deref() == Some(text) {
            return Arc::clone(&self.current);
        }
        let set = Arc::new(RuleSet::compile(text, &self.policy));
        self.prev_text = Some(text.to_string());
        self.current = Arc::clone(&set);
        set
    }

    /// The most recently published set.
    pub fn current(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current)
    }
}
