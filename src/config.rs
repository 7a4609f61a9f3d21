//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the dump
//! driver using `clap`: the input file, an optional report path, and
//! the logging level.

use clap::Parser;
use std::path::PathBuf;

/// Inspector for PE executables, COFF object files, and OBOE files.
///
/// Sniffs the input's magic bytes to pick the format, parses it, and
/// renders a plain-text report.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input file (PE executable, COFF object, or OBOE file)
    pub input: PathBuf,

    /// Report file; stdout when omitted
    #[arg(short, long, help = "Path to the output report")]
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
