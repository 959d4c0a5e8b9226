//! unFold Redirect Rule Compiler
//!
//! Compiles user-supplied and remotely-fetched redirect rule text into
//! executable, safety-checked rule sets. Rule text is untrusted input:
//! every regex body passes the `safety` policy before construction, and a
//! malformed line is dropped (logged) without invalidating the file.

pub mod parser;
pub mod ruleset;
pub mod safety;

pub use parser::{compile_rule_lines, parse_line, CompiledRule, RuleError, SCHEME_TOKEN};
pub use ruleset::{MemoizedCompiler, RuleSet};
pub use safety::{SafetyPolicy, UnsafePattern};
