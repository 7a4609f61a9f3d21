//! OBOE object-format toolkit.
//!
//! This library reads and writes Windows PE executables, Windows COFF object
//! files, and the OBOE intermediate linker container format.
//! It is organized into several modules:
//! - `buffer`: bounds-checked byte-buffer reader and growable writer.
//! - `coff`: the COFF section/symbol/relocation model for `.obj` files.
//! - `pe`: the PE executable assembler and reader.
//! - `oboe`: the OBOE type-tagged section container.
//! - `dump`: plain-text report generation.
//! - `error`: the library error taxonomy.
//! - `config`: CLI configuration.

pub mod buffer;
pub mod coff;
pub mod config;
pub mod dump;
pub mod error;
pub mod oboe;
pub mod pe;
pub mod utils;

pub use error::{Error, Result};
