//! Entry point for the oboe dump driver.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Map the input file into memory.
//! 3. Sniff the magic bytes to pick the format (MZ, OBOE, or COFF).
//! 4. Parse the file and render the matching report.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use tracing_subscriber::EnvFilter;

use oboe::coff::CoffObject;
use oboe::config::Config;
use oboe::dump;
use oboe::oboe::{FormatRevision, OboeFile, SectionRegistry, OBOE_SIGNATURE};
use oboe::pe::PeFile;

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .with_context(|| format!("invalid log level {:?}", config.log_level))?,
        )
        .init();

    let file = File::open(&config.input)
        .with_context(|| format!("failed to open {}", config.input.display()))?;
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", config.input.display()))?;
    let data: &[u8] = &mmap;

    let report = if data.starts_with(b"MZ") {
        let exe = PeFile::parse(data)
            .with_context(|| format!("failed to parse {} as PE", config.input.display()))?;
        dump::dump_pe(&exe)
    } else if data.starts_with(OBOE_SIGNATURE) {
        let registry = SectionRegistry::standard();
        let oboe_file = OboeFile::parse(data, &registry, FormatRevision::Original)
            .with_context(|| format!("failed to parse {} as OBOE", config.input.display()))?;
        dump::dump_oboe(&oboe_file)
    } else {
        let obj = CoffObject::parse(data)
            .with_context(|| format!("failed to parse {} as COFF object", config.input.display()))?;
        dump::dump_object(&obj)
    };

    match &config.output {
        Some(path) => std::fs::write(path, report)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{report}"),
    }
    Ok(())
}
