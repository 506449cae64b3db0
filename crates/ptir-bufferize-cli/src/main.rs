//! ptir-bufferize - inspect buffer equivalence classes of PTIR programs.

mod report;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ptir_bufferize::{analyze_named, analyze_program, AnalysisOptions, DestinationPolicy};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ptir-bufferize")]
#[command(about = "Buffer equivalence analysis for PTIR programs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and print the equivalence classes of every function
    Analyze {
        /// Path to the program (.json, otherwise bincode)
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,

        /// Only analyze this function
        #[arg(short, long, value_name = "NAME")]
        function: Option<String>,

        /// Destination operand policy for elementwise ops
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Disable in-place unions (views and loop carries only)
        #[arg(long)]
        no_inplace: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print a program in text form
    Print {
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    LastOperand,
    LastMatching,
}

impl From<PolicyArg> for DestinationPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::LastOperand => DestinationPolicy::LastOperand,
            PolicyArg::LastMatching => DestinationPolicy::LastMatchingOperand,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// `RUST_LOG` overrides the default `warn` filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            program,
            function,
            policy,
            no_inplace,
            format,
        } => cmd_analyze(program, function, policy, no_inplace, format),
        Commands::Print { program } => {
            let program = report::load_program(&program)?;
            print!("{}", program.to_text());
            Ok(())
        }
    }
}

fn cmd_analyze(
    path: PathBuf,
    function: Option<String>,
    policy: Option<PolicyArg>,
    no_inplace: bool,
    format: OutputFormat,
) -> Result<()> {
    let program = report::load_program(&path)?;

    let mut options = AnalysisOptions::from_env();
    if let Some(policy) = policy {
        options.destination_policy = policy.into();
    }
    if no_inplace {
        options.allow_inplace = false;
    }
    tracing::info!(
        program = %path.display(),
        policy = %options.destination_policy,
        allow_inplace = options.allow_inplace,
        "analyzing"
    );

    let stores = match function {
        Some(name) => {
            let store = analyze_named(&program, &name, &options)
                .with_context(|| format!("analysis of function `{name}` failed"))?;
            BTreeMap::from([(name, store)])
        }
        None => analyze_program(&program, &options).context("analysis failed")?,
    };

    match format {
        OutputFormat::Text => print!("{}", report::render_text(&stores)),
        OutputFormat::Json => println!("{}", report::render_json(&stores, &options)?),
    }
    Ok(())
}
