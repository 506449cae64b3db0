//! Buffer equivalence analysis for PTIR tensor programs.
//!
//! The [`spec`] module holds the PTIR program representation and builder, and
//! [`bufferize`] computes which tensor values may share one allocation and which
//! allocations are the function outputs.

pub mod bufferize;
mod env;
pub mod ir_query;
pub mod ptir_utils;
pub mod spec;

pub use bufferize::{
    analyze_function, analyze_named, analyze_program, AnalysisError, AnalysisOptions,
    DestinationPolicy, EquivalenceStore, TensorKey,
};
pub use spec::{DType, Program, ProgramBuilder, Shape};
