//! ttlang checker
//!
//! Reads a JSON-encoded program and runs the analysis core over it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ttlang::feedback::AnalysisFeedback;
use ttlang::frontend::ast::Program;
use ttlang::{analyze, AnalysisOptions, ConstTransferPolicy};

/// ttlang checker
#[derive(Parser, Debug)]
#[command(name = "ttc")]
#[command(version = "0.1.0")]
#[command(about = "ttlang static checker - ownership, mutability and trait resolution")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input program (JSON AST)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a program for errors
    Check {
        /// Input program (JSON AST)
        input: PathBuf,

        /// Emit structured JSON feedback
        #[arg(long)]
        json: bool,

        /// Reject every transfer of a const binding into an owned parameter
        #[arg(long)]
        strict_const: bool,

        /// Analyze bodies on the current thread
        #[arg(long)]
        sequential: bool,
    },
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Some(Commands::Check { input, json, strict_const, sequential }) => {
            let options = AnalysisOptions {
                const_transfer: if *strict_const {
                    ConstTransferPolicy::Forbid
                } else {
                    ConstTransferPolicy::AllowUnlessMutated
                },
                parallel: !*sequential,
            };
            check_file(input, &options, *json)
        }
        Some(Commands::Version) => {
            println!("ttc 0.1.0");
            println!("ttlang static checker");
            Ok(true)
        }
        None => match &cli.input {
            Some(input) => check_file(input, &AnalysisOptions::default(), false),
            None => {
                eprintln!("Error: No input file specified");
                eprintln!("Usage: ttc <FILE> or ttc check <FILE>");
                process::exit(1);
            }
        },
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Check a program; `Ok(false)` when diagnostics were reported
fn check_file(input: &Path, options: &AnalysisOptions, json: bool) -> Result<bool> {
    let source = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let program: Program =
        serde_json::from_str(&source).with_context(|| format!("decoding program from {}", input.display()))?;

    let start = Instant::now();
    let analysis = analyze(&program, options);
    let elapsed = start.elapsed().as_millis() as u64;
    let file_name = input.display().to_string();

    if json {
        println!("{}", AnalysisFeedback::from_analysis(&analysis, &file_name, elapsed).to_json());
        return Ok(analysis.is_ok());
    }

    println!("Checking: {}", file_name);
    for diagnostic in &analysis.diagnostics {
        match diagnostic.span() {
            Some(span) => eprintln!("error[{:?}] at {}: {}", diagnostic.kind(), span, diagnostic),
            None => eprintln!("error[{:?}]: {}", diagnostic.kind(), diagnostic),
        }
    }
    if analysis.is_ok() {
        let obligations: usize = analysis.units.iter().map(|u| u.obligations.len()).sum();
        println!("✅ No errors found ({} unit(s), {} runtime bound check(s))", analysis.units.len(), obligations);
        Ok(true)
    } else {
        eprintln!("{} error(s) found", analysis.diagnostics.len());
        Ok(false)
    }
}
