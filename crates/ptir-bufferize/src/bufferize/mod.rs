//! Pre-bufferization tensor equivalence analysis.
//!
//! [`analyze_function`] walks a PTIR function once, in definition order, and
//! groups tensor values that can live in the same physical buffer into
//! equivalence classes. Classes that reach the function results are flagged as
//! output-aliased so the bufferization pass can compute them directly into the
//! caller's output buffers.
//!
//! The pass runs in two stages:
//!
//! 1. A liveness pre-pass numbers every instruction and region in walk order and
//!    records the live interval of each SSA value.
//! 2. The rule engine registers every tensor leaf, unions views with their
//!    sources, ties in-place results to free destinations, and links loop
//!    carries and branch yields across structured control flow.
//!
//! Results are returned as an [`EquivalenceStore`]; nothing is written back to
//! the program.

mod analysis;
mod liveness;
pub mod rules;
mod store;
pub mod walker;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::env;
use crate::ir_query::OperandTypeError;
use crate::spec::{RegionId, ValueId};

pub use analysis::{analyze_function, analyze_named, analyze_program};
pub use rules::{alias_rule, AliasRule, RuleAttrError};
pub use store::{EquivalenceClass, EquivalenceStore, StoreSummary, TensorKey};
pub use walker::{walk_function, FunctionVisitor, WalkError};

/// How an in-place candidate picks the operand it computes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DestinationPolicy {
    /// Only the last operand is considered.
    #[default]
    LastOperand,
    /// Operands are tried from last to first; the first eligible one wins.
    LastMatchingOperand,
}

impl DestinationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationPolicy::LastOperand => "last-operand",
            DestinationPolicy::LastMatchingOperand => "last-matching",
        }
    }
}

impl fmt::Display for DestinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown destination policy `{0}` (expected last-operand or last-matching)")]
pub struct ParsePolicyError(String);

impl FromStr for DestinationPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-operand" | "last" => Ok(DestinationPolicy::LastOperand),
            "last-matching" | "last-matching-operand" => {
                Ok(DestinationPolicy::LastMatchingOperand)
            }
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Knobs for one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub destination_policy: DestinationPolicy,
    /// When `false` only views and unconditional loop-carry unions are made.
    pub allow_inplace: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            destination_policy: DestinationPolicy::default(),
            allow_inplace: true,
        }
    }
}

impl AnalysisOptions {
    /// Defaults overridden by `PTIR_INPLACE_POLICY` and `PTIR_DISABLE_INPLACE`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(policy) = env::destination_policy() {
            options.destination_policy = policy;
        }
        if env::inplace_disabled() {
            options.allow_inplace = false;
        }
        options
    }

    pub fn with_policy(mut self, policy: DestinationPolicy) -> Self {
        self.destination_policy = policy;
        self
    }

    pub fn with_inplace(mut self, allow: bool) -> Self {
        self.allow_inplace = allow;
        self
    }
}

/// Structural failure that aborts the analysis of a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("function `{0}` not found in program")]
    FunctionNotFound(String),
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("instruction %{} merges tensors from divergent predecessors", value.0)]
    UnstructuredMerge { value: ValueId },
    #[error("instruction %{} has an invalid operand: {source}", instruction.0)]
    InvalidOperand {
        instruction: ValueId,
        source: OperandTypeError,
    },
    #[error("instruction %{} is missing operand {index}", instruction.0)]
    MissingOperand { instruction: ValueId, index: usize },
    #[error("operand {operand} of instruction %{} does not match its result type", instruction.0)]
    OperandTypeMismatch { instruction: ValueId, operand: usize },
    #[error("value %{} is defined more than once", value.0)]
    DuplicateDefinition { value: ValueId },
    #[error("value %{} is not defined in scope", value.0)]
    UndefinedValue { value: ValueId },
    #[error("region ^r{} has {found} {what}, expected {expected}", region.0)]
    RegionArity {
        region: RegionId,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("function `{function}` has {found} {what}, expected {expected}")]
    FunctionArity {
        function: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("result {index} of function `{function}` does not match its declared type")]
    FunctionTypeMismatch { function: String, index: usize },
    #[error("region ^r{} entry {index} does not match the type of its op", region.0)]
    RegionTypeMismatch { region: RegionId, index: usize },
    #[error("instruction %{} output does not provide {expected} results", instruction.0)]
    ResultArity { instruction: ValueId, expected: usize },
    #[error("instruction %{} has invalid `{attr}` attribute {value}", instruction.0)]
    InvalidAliasAttr {
        instruction: ValueId,
        attr: &'static str,
        value: i64,
    },
}
