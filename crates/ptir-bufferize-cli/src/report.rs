use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use ptir_bufferize::bufferize::StoreSummary;
use ptir_bufferize::{AnalysisOptions, EquivalenceStore, Program};
use serde::Serialize;

/// Loads a program from JSON (`.json`) or bincode (anything else).
pub fn load_program(path: &Path) -> Result<Program> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let program = if is_json {
        Program::load_json(path)
    } else {
        Program::load_bincode(path)
    };
    program.with_context(|| format!("failed to load program from {}", path.display()))
}

#[derive(Debug, Serialize)]
pub struct FunctionReport<'a> {
    pub function: &'a str,
    pub output_classes: usize,
    pub summary: StoreSummary,
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub policy: String,
    pub allow_inplace: bool,
    pub functions: Vec<FunctionReport<'a>>,
}

pub fn build_report<'a>(
    stores: &'a BTreeMap<String, EquivalenceStore>,
    options: &AnalysisOptions,
) -> AnalysisReport<'a> {
    AnalysisReport {
        policy: options.destination_policy.to_string(),
        allow_inplace: options.allow_inplace,
        functions: stores
            .iter()
            .map(|(name, store)| FunctionReport {
                function: name,
                output_classes: store.output_classes().len(),
                summary: store.summary(),
            })
            .collect(),
    }
}

pub fn render_json(
    stores: &BTreeMap<String, EquivalenceStore>,
    options: &AnalysisOptions,
) -> Result<String> {
    serde_json::to_string_pretty(&build_report(stores, options))
        .context("failed to serialize analysis report")
}

pub fn render_text(stores: &BTreeMap<String, EquivalenceStore>) -> String {
    let mut out = String::new();
    for (name, store) in stores {
        let _ = writeln!(
            out,
            "function {name}: {} tensors, {} classes, {} output",
            store.len(),
            store.class_count(),
            store.output_classes().len()
        );
        for line in store.to_string().lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
    out
}
