//! Concatenate headers into one, expanding their quoted includes.
//!
//! Usage:
//!   build_header <header>...

use clap::Parser;
use pixelflow::tools::inline_headers;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

/// Writes the given headers to stdout with `#include "..."` lines inlined
#[derive(Parser, Debug)]
#[command(name = "build_header")]
#[command(version)]
struct Cli {
    /// Headers to inline, in order
    #[arg(value_name = "HEADER")]
    headers: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env().format_timestamp(None).init();

    let stdout = io::stdout();
    match inline_headers(&cli.headers, BufWriter::new(stdout.lock())) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
