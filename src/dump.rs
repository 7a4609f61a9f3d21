//! Plain-text reports for each of the three file kinds.
//!
//! Each `dump_*` function renders a complete report into a `String`;
//! the CLI decides where it goes. Payload bytes are shown sixteen to a
//! row with a four-digit hex offset column.

use std::fmt::Write;

use crate::coff::{CoffObject, CoffSection};
use crate::oboe::{OboeFile, OboeSection};
use crate::pe::PeFile;

const SEPARATOR: &str = "----------------------------------------";

fn hex_rows(out: &mut String, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04X}: ", row * 16);
        for (i, b) in chunk.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{b:02X}");
        }
        out.push('\n');
    }
}

fn section_lines(out: &mut String, sec: &CoffSection) {
    let _ = writeln!(out, "section {}: {}", sec.sec_num, sec.name);
    let _ = writeln!(
        out,
        "  mem: {:#010x} + {:#x}  file: {:#010x} + {:#x}",
        sec.mem_pos, sec.mem_size, sec.file_pos, sec.file_size
    );
    let _ = writeln!(
        out,
        "  flags: {:#010x}  alignment: {}",
        sec.settings.encode_flags(),
        sec.settings.alignment
    );
    if !sec.data.is_empty() {
        hex_rows(out, &sec.data);
    }
}

pub fn dump_object(obj: &CoffObject) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "COFF object file");
    let _ = writeln!(out, "machine: {:#06x}", obj.machine);
    let _ = writeln!(out, "timestamp: {}", obj.timestamp);
    let _ = writeln!(out, "characteristics: {:#06x}", obj.characteristics);
    let _ = writeln!(out, "sections: {}", obj.sections.len());

    for sec in &obj.sections {
        let _ = writeln!(out, "{SEPARATOR}");
        section_lines(&mut out, sec);
        if !sec.relocations.is_empty() {
            let _ = writeln!(out, "RELOCATIONS");
            for rel in &sec.relocations {
                let _ = writeln!(out, "{:08X} : {} : sym {}", rel.address, rel.kind, rel.symbol);
            }
        }
    }

    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(out, "SYMBOLS");
    for (i, slot) in obj.symbols.iter().enumerate() {
        match slot {
            None => {
                let _ = writeln!(out, "[{i}] none");
            }
            Some(sym) => {
                let place = match sym.section {
                    Some(sec) => format!("SEC[{}]", sec + 1),
                    None => "UNDEF".to_string(),
                };
                let _ = writeln!(
                    out,
                    "[{i}] {} : {} : {} : {} : {:#x} : {:#x}",
                    sym.name, sym.binding, sym.kind, place, sym.ofs, sym.size
                );
            }
        }
    }
    out
}

pub fn dump_pe(exe: &PeFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PE executable image");
    let _ = writeln!(out, "machine: {:#06x}", exe.machine);
    let _ = writeln!(out, "timestamp: {}", exe.timestamp);
    let _ = writeln!(
        out,
        "characteristics: {:#06x}",
        exe.characteristics.encode_flags()
    );
    let _ = writeln!(out, "is dll: {}", exe.is_dll);
    let _ = writeln!(out, "linker version: {}.{}", exe.major_linker_version, exe.minor_linker_version);
    let _ = writeln!(out, "entry point: {:#010x}", exe.address_of_entry_point);
    let _ = writeln!(out, "image base: {:#010x}", exe.image_base);
    let _ = writeln!(out, "base of code: {:#010x}", exe.base_of_code);
    let _ = writeln!(out, "base of data: {:#010x}", exe.base_of_data);
    let _ = writeln!(
        out,
        "alignment: section {:#x} file {:#x}",
        exe.section_alignment, exe.file_alignment
    );
    let _ = writeln!(
        out,
        "size of: code {:#x} init data {:#x} uninit data {:#x}",
        exe.size_of_code, exe.size_of_initialized_data, exe.size_of_uninitialized_data
    );
    let _ = writeln!(
        out,
        "size of image: {:#x}  size of headers: {:#x}",
        exe.size_of_image, exe.size_of_headers
    );
    let _ = writeln!(
        out,
        "os version: {}.{}  subsystem version: {}.{}",
        exe.major_os_version, exe.minor_os_version,
        exe.major_subsystem_version, exe.minor_subsystem_version
    );
    let _ = writeln!(
        out,
        "subsystem: {}  dll characteristics: {:#06x}",
        exe.subsystem, exe.dll_characteristics
    );
    let _ = writeln!(
        out,
        "stack: {:#x} / {:#x}  heap: {:#x} / {:#x}",
        exe.size_of_stack_reserve, exe.size_of_stack_commit,
        exe.size_of_heap_reserve, exe.size_of_heap_commit
    );

    let _ = writeln!(out, "DATA DIRECTORIES");
    for (i, dir) in exe.data_directories.iter().enumerate() {
        let _ = writeln!(out, "[{i:2}] rva {:#010x}  size {:#x}", dir.rva, dir.size);
    }

    for sec in &exe.sections {
        let _ = writeln!(out, "{SEPARATOR}");
        section_lines(&mut out, sec);
    }
    out
}

pub fn dump_oboe(file: &OboeFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "OBOE file");
    let _ = writeln!(out, "sections: {}", file.sections.len());

    for sec in &file.sections {
        let _ = writeln!(out, "{SEPARATOR}");
        match sec {
            OboeSection::Block(block) => {
                let _ = writeln!(out, "{} [{}]", block.name, block.kind);
                hex_rows(&mut out, &block.data);
                let _ = writeln!(out, "IMPORTS");
                if block.imports.is_empty() {
                    let _ = writeln!(out, "none");
                }
                for imp in &block.imports {
                    let _ = writeln!(out, "{:04X}: {} [{}]", imp.addr, imp.name, imp.kind);
                }
                let _ = writeln!(out, "EXPORTS");
                if block.exports.is_empty() {
                    let _ = writeln!(out, "none");
                }
                for exp in &block.exports {
                    let _ = writeln!(out, "{:04X}: {}", exp.addr, exp.name);
                }
            }
            OboeSection::Bss(bss) => {
                let _ = writeln!(out, "{} [BSS]", bss.name);
                let _ = writeln!(out, "size: {:#x}", bss.size);
                let _ = writeln!(out, "EXPORTS");
                if bss.exports.is_empty() {
                    let _ = writeln!(out, "none");
                }
                for exp in &bss.exports {
                    let _ = writeln!(out, "{:04X}: {}", exp.addr, exp.name);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coff::{CoffSymbol, SymbolBinding, SymbolKind};
    use crate::oboe::{BlockKind, BssSection, ImportKind, OboeBlock, OboeImport};

    #[test]
    fn hex_rows_offsets_and_grouping() {
        let mut out = String::new();
        hex_rows(&mut out, &(0u8..18).collect::<Vec<_>>());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 00 01 02"));
        assert_eq!(lines[1], "0010: 10 11");
    }

    #[test]
    fn object_report_shows_symbols() {
        let mut obj = CoffObject::new();
        obj.symbols.push(Some(CoffSymbol {
            name: "_start".to_string(),
            binding: SymbolBinding::External,
            kind: SymbolKind::Function,
            section: None,
            ofs: 0,
            size: 0,
        }));
        obj.symbols.push(None);
        let report = dump_object(&obj);
        assert!(report.contains("_start : EXTERNAL : FUNCTION : UNDEF"));
        assert!(report.contains("[1] none"));
    }

    #[test]
    fn oboe_report_lists_imports_and_placeholders() {
        let mut block = OboeBlock::new(BlockKind::Code, "main");
        block.data = vec![0xc3];
        block.imports.push(OboeImport::new("puts", 0x12, ImportKind::Rel32));
        let file = OboeFile {
            sections: vec![
                OboeSection::Block(block),
                OboeSection::Bss(BssSection::new("heap", 0x100)),
            ],
        };
        let report = dump_oboe(&file);
        assert!(report.contains("main [CODE]"));
        assert!(report.contains("0012: puts [REL32]"));
        // Empty lists still print a placeholder line.
        assert!(report.contains("EXPORTS\nnone"));
        assert!(report.contains("heap [BSS]"));
    }
}
