//! COFF object model.
//!
//! The section/symbol/relocation model shared by `.obj` files and the PE
//! assembler, plus the decode/encode paths for COFF object files:
//! 20-byte COFF header, 0x28-byte section entries, 18-byte symbol entries,
//! 4-byte-length-prefixed string table.
//!
//! Symbol-table indices are load-bearing: relocations reference symbols by
//! slot, and auxiliary records occupy slots of their own. The table is
//! therefore a `Vec<Option<CoffSymbol>>` where `None` keeps the index
//! alignment for slots that decode to no symbol.

use object::pe;

use crate::buffer::{ByteReader, ByteWriter};
use crate::error::Result;

pub const COFF_HDR_SIZE: usize = 0x14;
pub const SECTION_ENTRY_SIZE: usize = 0x28;
pub const SYMBOL_ENTRY_SIZE: usize = 0x12;
pub const RELOCATION_ENTRY_SIZE: usize = 0x0a;

/// Data alignments selectable in the section flag word, indexed by the
/// 4-bit alignment field (bits 20-23). Index 0 means "not specified".
const DATA_ALIGNMENTS: [u32; 15] = [
    0, 1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192,
];

/// Structured view of a section's characteristics flag word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSettings {
    pub has_code: bool,
    pub has_init_data: bool,
    pub has_uninit_data: bool,
    pub has_info: bool,
    pub will_remove: bool,
    pub has_comdat: bool,
    pub has_gprel: bool,
    pub has_ext_relocs: bool,
    pub can_discard: bool,
    pub dont_cache: bool,
    pub not_pageable: bool,
    pub can_share: bool,
    pub can_execute: bool,
    pub can_read: bool,
    pub can_write: bool,
    /// One of `DATA_ALIGNMENTS`; 0 when the flag word left it unspecified.
    pub alignment: u32,
}

impl Default for SectionSettings {
    fn default() -> Self {
        SectionSettings {
            has_code: false,
            has_init_data: false,
            has_uninit_data: false,
            has_info: false,
            will_remove: false,
            has_comdat: false,
            has_gprel: false,
            has_ext_relocs: false,
            can_discard: false,
            dont_cache: false,
            not_pageable: false,
            can_share: false,
            can_execute: false,
            can_read: false,
            can_write: false,
            alignment: 1,
        }
    }
}

impl SectionSettings {
    pub fn decode_flags(flags: u32) -> Self {
        let align_field = ((flags & 0x00f0_0000) >> 20) as usize;
        SectionSettings {
            has_code: flags & pe::IMAGE_SCN_CNT_CODE != 0,
            has_init_data: flags & pe::IMAGE_SCN_CNT_INITIALIZED_DATA != 0,
            has_uninit_data: flags & pe::IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0,
            has_info: flags & pe::IMAGE_SCN_LNK_INFO != 0,
            will_remove: flags & pe::IMAGE_SCN_LNK_REMOVE != 0,
            has_comdat: flags & pe::IMAGE_SCN_LNK_COMDAT != 0,
            has_gprel: flags & pe::IMAGE_SCN_GPREL != 0,
            has_ext_relocs: flags & pe::IMAGE_SCN_LNK_NRELOC_OVFL != 0,
            can_discard: flags & pe::IMAGE_SCN_MEM_DISCARDABLE != 0,
            dont_cache: flags & pe::IMAGE_SCN_MEM_NOT_CACHED != 0,
            not_pageable: flags & pe::IMAGE_SCN_MEM_NOT_PAGED != 0,
            can_share: flags & pe::IMAGE_SCN_MEM_SHARED != 0,
            can_execute: flags & pe::IMAGE_SCN_MEM_EXECUTE != 0,
            can_read: flags & pe::IMAGE_SCN_MEM_READ != 0,
            can_write: flags & pe::IMAGE_SCN_MEM_WRITE != 0,
            alignment: DATA_ALIGNMENTS[align_field.min(DATA_ALIGNMENTS.len() - 1)],
        }
    }

    pub fn encode_flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.has_code {
            flags |= pe::IMAGE_SCN_CNT_CODE;
        }
        if self.has_init_data {
            flags |= pe::IMAGE_SCN_CNT_INITIALIZED_DATA;
        }
        if self.has_uninit_data {
            flags |= pe::IMAGE_SCN_CNT_UNINITIALIZED_DATA;
        }
        if self.has_info {
            flags |= pe::IMAGE_SCN_LNK_INFO;
        }
        if self.will_remove {
            flags |= pe::IMAGE_SCN_LNK_REMOVE;
        }
        if self.has_comdat {
            flags |= pe::IMAGE_SCN_LNK_COMDAT;
        }
        if self.has_gprel {
            flags |= pe::IMAGE_SCN_GPREL;
        }
        if self.has_ext_relocs {
            flags |= pe::IMAGE_SCN_LNK_NRELOC_OVFL;
        }
        if self.can_discard {
            flags |= pe::IMAGE_SCN_MEM_DISCARDABLE;
        }
        if self.dont_cache {
            flags |= pe::IMAGE_SCN_MEM_NOT_CACHED;
        }
        if self.not_pageable {
            flags |= pe::IMAGE_SCN_MEM_NOT_PAGED;
        }
        if self.can_share {
            flags |= pe::IMAGE_SCN_MEM_SHARED;
        }
        if self.can_execute {
            flags |= pe::IMAGE_SCN_MEM_EXECUTE;
        }
        if self.can_read {
            flags |= pe::IMAGE_SCN_MEM_READ;
        }
        if self.can_write {
            flags |= pe::IMAGE_SCN_MEM_WRITE;
        }
        let align_field = DATA_ALIGNMENTS
            .iter()
            .position(|&a| a == self.alignment)
            .unwrap_or(0) as u32;
        flags | (align_field << 20)
    }
}

/// Portable relocation kinds; machine codes map through `from_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    None,
    Absolute,
    Relative,
    Rva,
    SecRel32,
}

impl RelocKind {
    /// Unknown machine codes map to the `None` sentinel, never an error.
    pub fn from_code(code: u16) -> Self {
        match code {
            pe::IMAGE_REL_I386_DIR32 => RelocKind::Absolute,
            pe::IMAGE_REL_I386_DIR32NB => RelocKind::Rva,
            pe::IMAGE_REL_I386_SECREL => RelocKind::SecRel32,
            pe::IMAGE_REL_I386_REL32 => RelocKind::Relative,
            _ => RelocKind::None,
        }
    }

    pub fn to_code(self) -> u16 {
        match self {
            RelocKind::Absolute => pe::IMAGE_REL_I386_DIR32,
            RelocKind::Rva => pe::IMAGE_REL_I386_DIR32NB,
            RelocKind::SecRel32 => pe::IMAGE_REL_I386_SECREL,
            RelocKind::Relative => pe::IMAGE_REL_I386_REL32,
            RelocKind::None => pe::IMAGE_REL_I386_ABSOLUTE,
        }
    }
}

impl std::fmt::Display for RelocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelocKind::None => "NONE",
            RelocKind::Absolute => "ABSOLUTE",
            RelocKind::Relative => "RELATIVE",
            RelocKind::Rva => "RVA",
            RelocKind::SecRel32 => "SECREL32",
        };
        f.write_str(s)
    }
}

/// A fixup request; `address` is relative to the owning section's start,
/// `symbol` is a symbol-table slot index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffRelocation {
    pub address: u32,
    pub symbol: u32,
    pub kind: RelocKind,
}

/// A named contiguous unit of code or data.
#[derive(Debug, Clone, Default)]
pub struct CoffSection {
    pub sec_num: usize,
    pub name: String,
    pub mem_pos: u32,
    pub mem_size: u32,
    pub file_pos: u32,
    pub file_size: u32,
    pub settings: SectionSettings,
    pub data: Vec<u8>,
    pub relocations: Vec<CoffRelocation>,
    /// Relocation-table location from the wire; used by the second decode
    /// pass and recomputed on encode.
    pub reloc_tbl_pos: u32,
    pub reloc_tbl_count: u32,
}

impl CoffSection {
    pub fn new(name: &str) -> Self {
        CoffSection {
            name: name.to_string(),
            ..CoffSection::default()
        }
    }

    pub fn with_settings(name: &str, settings: SectionSettings) -> Self {
        CoffSection {
            name: name.to_string(),
            settings,
            ..CoffSection::default()
        }
    }

    /// Read one 0x28-byte section-table entry. Long-name indirection
    /// (`/offset`) is left to the caller, which owns the string table.
    pub fn read_entry(source: &mut ByteReader) -> Result<CoffSection> {
        let name = source.get_fixed_str(8)?;
        let mem_size = source.get_four()?;
        let mem_pos = source.get_four()?;
        let file_size = source.get_four()?;
        let file_pos = source.get_four()?;
        let reloc_pos = source.get_four()?;
        let _line_num_pos = source.get_four()?; // deprecated
        let reloc_count = source.get_two()?;
        let _line_num_count = source.get_two()?;
        let flagval = source.get_four()?;

        let mut section = CoffSection::with_settings(&name, SectionSettings::decode_flags(flagval));
        section.mem_size = mem_size;
        section.mem_pos = mem_pos;
        section.file_size = file_size;
        section.file_pos = file_pos;
        section.reloc_tbl_pos = reloc_pos;
        section.reloc_tbl_count = reloc_count as u32;
        Ok(section)
    }
}

/// Wire encoding of a symbol name, decided once at construction:
/// eight inline bytes, or a zero sentinel plus a string-table offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolName {
    Inline(String),
    Indirect(u32),
}

impl SymbolName {
    fn read(raw: &[u8]) -> Self {
        if raw[..4] == [0, 0, 0, 0] {
            SymbolName::Indirect(u32::from_le_bytes(raw[4..8].try_into().unwrap()))
        } else {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(8);
            SymbolName::Inline(raw[..end].iter().map(|&b| b as char).collect())
        }
    }

    fn resolve(self, strtbl: Option<&[u8]>) -> String {
        match self {
            SymbolName::Inline(s) => s,
            SymbolName::Indirect(ofs) => read_strtbl(strtbl.unwrap_or(&[]), ofs as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    External,
    Common,
    Global,
    Local,
    Weak,
    Import,
}

impl std::fmt::Display for SymbolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolBinding::External => "EXTERNAL",
            SymbolBinding::Common => "COMMON",
            SymbolBinding::Global => "GLOBAL",
            SymbolBinding::Local => "LOCAL",
            SymbolBinding::Weak => "WEAK",
            SymbolBinding::Import => "IMPORT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
    Section,
    Label,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolKind::Function => "FUNCTION",
            SymbolKind::Data => "DATA",
            SymbolKind::Section => "SECTION",
            SymbolKind::Label => "LABEL",
        };
        f.write_str(s)
    }
}

/// A named binding to a location. `section` is an index into the owning
/// object's section list; `None` means undefined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffSymbol {
    pub name: String,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
    pub section: Option<usize>,
    pub ofs: u32,
    pub size: u32,
}

/// A parsed or under-construction COFF object file.
#[derive(Debug, Default)]
pub struct CoffObject {
    pub machine: u16,
    pub timestamp: u32,
    pub characteristics: u16,
    pub sections: Vec<CoffSection>,
    pub symbols: Vec<Option<CoffSymbol>>,
}

fn read_strtbl(strtbl: &[u8], idx: usize) -> String {
    let mut result = String::new();
    let mut i = idx;
    while i < strtbl.len() && strtbl[i] != 0 {
        result.push(strtbl[i] as char);
        i += 1;
    }
    result
}

/// Complex-type field for a function symbol (DTYPE_FUNCTION << 4).
const SYM_TYPE_FUNCTION: u16 = 0x20;

fn is_function_type(typ: u16) -> bool {
    (typ >> 4) & 0xf == pe::IMAGE_SYM_DTYPE_FUNCTION as u16
}

impl CoffObject {
    pub fn new() -> Self {
        CoffObject {
            machine: pe::IMAGE_FILE_MACHINE_I386,
            ..CoffObject::default()
        }
    }

    pub fn find_section(&self, name: &str) -> Option<&CoffSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn find_symbol(&self, name: &str) -> Option<&CoffSymbol> {
        self.symbols
            .iter()
            .flatten()
            .find(|s| s.name == name)
    }

    //- decoding --------------------------------------------------------------

    pub fn parse(data: &[u8]) -> Result<CoffObject> {
        let mut source = ByteReader::new(data);
        let mut obj = CoffObject::new();

        obj.machine = source.get_two()?;
        let section_count = source.get_two()?;
        obj.timestamp = source.get_four()?;
        let symbol_tbl_addr = source.get_four()?;
        let symbol_count = source.get_four()?;
        let _optional_hdr_size = source.get_two()?;
        obj.characteristics = source.get_two()?;

        // String table follows the symbol table; its length prefix counts
        // itself, so anything over 4 means there are strings.
        let mut strtbl = None;
        if symbol_tbl_addr != 0 {
            let strtbl_pos =
                symbol_tbl_addr as usize + symbol_count as usize * SYMBOL_ENTRY_SIZE;
            source.seek(strtbl_pos)?;
            let len = source.get_four()?;
            if len > 4 {
                strtbl = Some(source.get_range_at(strtbl_pos, len as usize)?);
            }
        }

        source.seek(COFF_HDR_SIZE)?;
        for i in 0..section_count {
            let mut section = CoffSection::read_entry(&mut source)?;
            section.sec_num = i as usize + 1;
            // Long section names are stored as "/offset" into the string table.
            if let Some(idx) = section.name.strip_prefix('/') {
                match idx.parse::<usize>() {
                    Ok(ofs) => section.name = read_strtbl(strtbl.unwrap_or(&[]), ofs),
                    Err(_) => {
                        tracing::debug!("unparseable long section name {:?}", section.name)
                    }
                }
            }
            obj.sections.push(section);
        }

        source.seek(symbol_tbl_addr as usize)?;
        obj.load_symbols(&mut source, symbol_count, strtbl)?;

        for i in 0..obj.sections.len() {
            let (file_pos, file_size) = (obj.sections[i].file_pos, obj.sections[i].file_size);
            if file_size > 0 {
                obj.sections[i].data = source
                    .get_range_at(file_pos as usize, file_size as usize)?
                    .to_vec();
            }
            obj.load_relocations(&mut source, i)?;
        }

        Ok(obj)
    }

    fn load_symbols(
        &mut self,
        source: &mut ByteReader,
        count: u32,
        strtbl: Option<&[u8]>,
    ) -> Result<()> {
        let mut i = 0;
        while i < count {
            let raw_name = source.get_range(8)?;
            let name = SymbolName::read(raw_name).resolve(strtbl);

            let val = source.get_four()?;
            let secval = source.get_two()?;
            let typ = source.get_two()?;
            let storage = source.get_one()?;
            let aux = source.get_one()?;

            let sym = self.dispatch_symbol(name, val, secval, typ, storage);
            self.symbols.push(sym);
            i += 1;

            // Aux records occupy table slots but decode to no symbol; a
            // placeholder keeps the indices relocations reference intact.
            for _ in 0..aux {
                if i >= count {
                    break;
                }
                source.skip(SYMBOL_ENTRY_SIZE)?;
                self.symbols.push(None);
                i += 1;
            }
        }
        Ok(())
    }

    /// Offset of `val` within section `idx`, clamped to 0 when the value
    /// lies below the section start.
    fn section_offset(&self, idx: usize, val: u32) -> u32 {
        let mem_pos = self.sections[idx].mem_pos;
        if val >= mem_pos {
            val - mem_pos
        } else {
            tracing::warn!(
                "symbol value {val:#x} below section start {mem_pos:#x}, clamping offset to 0"
            );
            0
        }
    }

    fn section_index(&self, secval: u16) -> Option<usize> {
        let idx = secval as usize;
        if idx >= 1 && idx <= self.sections.len() {
            Some(idx - 1)
        } else {
            None
        }
    }

    fn dispatch_symbol(
        &self,
        name: String,
        val: u32,
        secval: u16,
        typ: u16,
        storage: u8,
    ) -> Option<CoffSymbol> {
        let kind = if is_function_type(typ) {
            SymbolKind::Function
        } else {
            SymbolKind::Data
        };

        match storage {
            pe::IMAGE_SYM_CLASS_EXTERNAL => {
                if secval == 0 {
                    if val == 0 {
                        Some(CoffSymbol {
                            name,
                            binding: SymbolBinding::External,
                            kind,
                            section: None,
                            ofs: 0,
                            size: 0,
                        })
                    } else {
                        Some(CoffSymbol {
                            name,
                            binding: SymbolBinding::Common,
                            kind,
                            section: None,
                            ofs: 0,
                            size: val,
                        })
                    }
                } else {
                    let sec = self.section_index(secval)?;
                    Some(CoffSymbol {
                        name,
                        binding: SymbolBinding::Global,
                        kind,
                        section: Some(sec),
                        ofs: self.section_offset(sec, val),
                        size: 0,
                    })
                }
            }

            pe::IMAGE_SYM_CLASS_STATIC | pe::IMAGE_SYM_CLASS_LABEL => {
                if secval == 0xffff {
                    return None;
                }
                let sec = self.section_index(secval)?;
                Some(CoffSymbol {
                    name,
                    binding: SymbolBinding::Local,
                    kind: if storage == pe::IMAGE_SYM_CLASS_LABEL {
                        SymbolKind::Label
                    } else {
                        kind
                    },
                    section: Some(sec),
                    ofs: self.section_offset(sec, val),
                    size: 0,
                })
            }

            pe::IMAGE_SYM_CLASS_SECTION => {
                let sec = self.section_index(secval)?;
                Some(CoffSymbol {
                    name,
                    binding: SymbolBinding::Local,
                    kind: SymbolKind::Section,
                    section: Some(sec),
                    ofs: 0,
                    size: 0,
                })
            }

            pe::IMAGE_SYM_CLASS_WEAK_EXTERNAL => Some(CoffSymbol {
                name,
                binding: SymbolBinding::Weak,
                kind,
                section: None,
                ofs: val,
                size: 0,
            }),

            pe::IMAGE_SYM_CLASS_FUNCTION | pe::IMAGE_SYM_CLASS_FILE => None,

            other => {
                tracing::debug!("skipping symbol {name:?} with storage class {other}");
                None
            }
        }
    }

    fn load_relocations(&mut self, source: &mut ByteReader, sec_idx: usize) -> Result<()> {
        let sec = &self.sections[sec_idx];
        if sec.reloc_tbl_count == 0 {
            return Ok(());
        }
        source.seek(sec.reloc_tbl_pos as usize)?;
        let mem_pos = sec.mem_pos;
        let count = sec.reloc_tbl_count;
        let mut relocations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let addr = source.get_four()?;
            let symidx = source.get_four()?;
            let code = source.get_two()?;
            relocations.push(CoffRelocation {
                address: addr.wrapping_sub(mem_pos),
                symbol: symidx,
                kind: RelocKind::from_code(code),
            });
        }
        self.sections[sec_idx].relocations = relocations;
        Ok(())
    }

    //- encoding --------------------------------------------------------------

    pub fn build(&self) -> Vec<u8> {
        let mut outfile = ByteWriter::new();
        let mut strtbl = StringTable::new();

        // Layout: header, section table, per-section payload + relocation
        // table, symbol table, string table.
        let mut filepos = COFF_HDR_SIZE as u32 + self.sections.len() as u32 * SECTION_ENTRY_SIZE as u32;
        let mut placements = Vec::with_capacity(self.sections.len());
        for sec in &self.sections {
            let file_pos = if sec.data.is_empty() { 0 } else { filepos };
            filepos += sec.data.len() as u32;
            let reloc_pos = if sec.relocations.is_empty() { 0 } else { filepos };
            filepos += sec.relocations.len() as u32 * RELOCATION_ENTRY_SIZE as u32;
            placements.push((file_pos, reloc_pos));
        }
        let symbol_tbl_addr = filepos;

        // COFF header.
        outfile.put_two(self.machine);
        outfile.put_two(self.sections.len() as u16);
        outfile.put_four(self.timestamp);
        outfile.put_four(symbol_tbl_addr);
        outfile.put_four(self.symbols.len() as u32);
        outfile.put_two(0); // no optional header in object files
        outfile.put_two(self.characteristics);

        // Section table.
        for (sec, &(file_pos, reloc_pos)) in self.sections.iter().zip(&placements) {
            if sec.name.len() > 8 {
                let ofs = strtbl.add(&sec.name);
                outfile.put_fixed_str(&format!("/{ofs}"), 8);
            } else {
                outfile.put_fixed_str(&sec.name, 8);
            }
            outfile.put_four(sec.mem_size);
            outfile.put_four(sec.mem_pos);
            outfile.put_four(sec.data.len() as u32);
            outfile.put_four(file_pos);
            outfile.put_four(reloc_pos);
            outfile.put_four(0); // line numbers are deprecated
            outfile.put_two(sec.relocations.len() as u16);
            outfile.put_two(0);
            outfile.put_four(sec.settings.encode_flags());
        }

        // Section payloads, each followed by its relocation table.
        for sec in &self.sections {
            outfile.put_range(&sec.data);
            for rel in &sec.relocations {
                outfile.put_four(rel.address.wrapping_add(sec.mem_pos));
                outfile.put_four(rel.symbol);
                outfile.put_two(rel.kind.to_code());
            }
        }

        // Symbol table; `None` placeholders become zeroed slots.
        for slot in &self.symbols {
            match slot {
                None => outfile.put_zeros(SYMBOL_ENTRY_SIZE),
                Some(sym) => self.write_symbol(&mut outfile, sym, &mut strtbl),
            }
        }

        strtbl.write(&mut outfile);
        outfile.finish()
    }

    fn write_symbol(&self, outfile: &mut ByteWriter, sym: &CoffSymbol, strtbl: &mut StringTable) {
        // Names of length <= 8 go inline; longer names go through the
        // string table behind the four-zero-byte sentinel.
        if sym.name.len() <= 8 {
            outfile.put_fixed_str(&sym.name, 8);
        } else {
            outfile.put_four(0);
            outfile.put_four(strtbl.add(&sym.name));
        }

        let (val, secval, storage) = match sym.binding {
            SymbolBinding::External | SymbolBinding::Import => {
                (0, 0, pe::IMAGE_SYM_CLASS_EXTERNAL)
            }
            SymbolBinding::Common => (sym.size, 0, pe::IMAGE_SYM_CLASS_EXTERNAL),
            SymbolBinding::Global => {
                let sec = sym.section.expect("global symbol without section");
                (
                    sym.ofs + self.sections[sec].mem_pos,
                    sec as u16 + 1,
                    pe::IMAGE_SYM_CLASS_EXTERNAL,
                )
            }
            SymbolBinding::Local => {
                let sec = sym.section.expect("local symbol without section");
                let storage = match sym.kind {
                    SymbolKind::Section => pe::IMAGE_SYM_CLASS_SECTION,
                    SymbolKind::Label => pe::IMAGE_SYM_CLASS_LABEL,
                    _ => pe::IMAGE_SYM_CLASS_STATIC,
                };
                (sym.ofs + self.sections[sec].mem_pos, sec as u16 + 1, storage)
            }
            SymbolBinding::Weak => (sym.ofs, 0, pe::IMAGE_SYM_CLASS_WEAK_EXTERNAL),
        };

        outfile.put_four(val);
        outfile.put_two(secval);
        outfile.put_two(if sym.kind == SymbolKind::Function {
            SYM_TYPE_FUNCTION
        } else {
            0
        });
        outfile.put_one(storage);
        outfile.put_one(0); // no aux records on the write path
    }
}

/// COFF string table under construction. Offsets include the 4-byte
/// length prefix, so the first string lands at offset 4.
struct StringTable {
    strings: Vec<u8>,
}

impl StringTable {
    fn new() -> Self {
        StringTable {
            strings: Vec::new(),
        }
    }

    fn add(&mut self, s: &str) -> u32 {
        let ofs = 4 + self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        ofs
    }

    fn write(self, outfile: &mut ByteWriter) {
        outfile.put_four(4 + self.strings.len() as u32);
        outfile.put_range(&self.strings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        let mut settings = SectionSettings::default();
        settings.has_code = true;
        settings.can_execute = true;
        settings.can_read = true;
        settings.alignment = 16;
        let flags = settings.encode_flags();
        assert_eq!(flags & pe::IMAGE_SCN_CNT_CODE, pe::IMAGE_SCN_CNT_CODE);
        assert_eq!((flags >> 20) & 0xf, 5); // 16 is the fifth table entry
        assert_eq!(SectionSettings::decode_flags(flags), settings);
    }

    #[test]
    fn alignment_table_covers_all_powers() {
        for (i, align) in [1u32, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192]
            .iter()
            .enumerate()
        {
            let mut settings = SectionSettings::default();
            settings.alignment = *align;
            let flags = settings.encode_flags();
            assert_eq!((flags >> 20) & 0xf, i as u32 + 1);
            assert_eq!(SectionSettings::decode_flags(flags).alignment, *align);
        }
    }

    #[test]
    fn reloc_kind_codes() {
        assert_eq!(RelocKind::from_code(6), RelocKind::Absolute);
        assert_eq!(RelocKind::from_code(7), RelocKind::Rva);
        assert_eq!(RelocKind::from_code(11), RelocKind::SecRel32);
        assert_eq!(RelocKind::from_code(20), RelocKind::Relative);
        assert_eq!(RelocKind::from_code(99), RelocKind::None);
    }

    fn sample_object() -> CoffObject {
        let mut obj = CoffObject::new();
        let mut text = CoffSection::new(".text");
        text.settings.has_code = true;
        text.settings.can_execute = true;
        text.settings.can_read = true;
        text.settings.alignment = 4;
        text.data = vec![0x55, 0x89, 0xe5, 0xe8, 0, 0, 0, 0, 0x5d, 0xc3];
        text.relocations.push(CoffRelocation {
            address: 4,
            symbol: 1,
            kind: RelocKind::Relative,
        });
        obj.sections.push(text);

        obj.symbols.push(Some(CoffSymbol {
            name: "_main".to_string(),
            binding: SymbolBinding::Global,
            kind: SymbolKind::Function,
            section: Some(0),
            ofs: 0,
            size: 0,
        }));
        obj.symbols.push(Some(CoffSymbol {
            name: "_a_rather_long_external_name".to_string(),
            binding: SymbolBinding::External,
            kind: SymbolKind::Function,
            section: None,
            ofs: 0,
            size: 0,
        }));
        obj
    }

    #[test]
    fn object_round_trip() {
        let obj = sample_object();
        let bytes = obj.build();
        let parsed = CoffObject::parse(&bytes).unwrap();

        assert_eq!(parsed.machine, pe::IMAGE_FILE_MACHINE_I386);
        assert_eq!(parsed.sections.len(), 1);
        let sec = &parsed.sections[0];
        assert_eq!(sec.name, ".text");
        assert_eq!(sec.settings, obj.sections[0].settings);
        assert_eq!(sec.data, obj.sections[0].data);
        assert_eq!(sec.relocations, obj.sections[0].relocations);

        assert_eq!(parsed.symbols.len(), 2);
        assert_eq!(parsed.symbols[0], obj.symbols[0]);
        // The long name must survive the string-table indirection.
        assert_eq!(
            parsed.symbols[1].as_ref().unwrap().name,
            "_a_rather_long_external_name"
        );
    }

    #[test]
    fn long_name_uses_string_table() {
        let obj = sample_object();
        let bytes = obj.build();
        // Symbol table slot 1 starts with the four-zero-byte sentinel.
        let symtbl = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let slot = &bytes[symtbl + SYMBOL_ENTRY_SIZE..symtbl + 2 * SYMBOL_ENTRY_SIZE];
        assert_eq!(&slot[..4], &[0, 0, 0, 0]);
        let ofs = u32::from_le_bytes(slot[4..8].try_into().unwrap());
        assert!(ofs >= 4);
        // Slot 0 holds the short name inline.
        let slot0 = &bytes[symtbl..symtbl + SYMBOL_ENTRY_SIZE];
        assert_eq!(&slot0[..5], b"_main");
    }

    #[test]
    fn common_and_external_dispatch() {
        let obj = CoffObject::new();
        let ext = obj
            .dispatch_symbol("_x".into(), 0, 0, 0, pe::IMAGE_SYM_CLASS_EXTERNAL)
            .unwrap();
        assert_eq!(ext.binding, SymbolBinding::External);

        let common = obj
            .dispatch_symbol("_y".into(), 0x40, 0, 0, pe::IMAGE_SYM_CLASS_EXTERNAL)
            .unwrap();
        assert_eq!(common.binding, SymbolBinding::Common);
        assert_eq!(common.size, 0x40);
    }

    #[test]
    fn offset_clamps_below_section_start() {
        let mut obj = CoffObject::new();
        let mut sec = CoffSection::new(".data");
        sec.mem_pos = 0x100;
        obj.sections.push(sec);
        assert_eq!(obj.section_offset(0, 0x180), 0x80);
        assert_eq!(obj.section_offset(0, 0x80), 0);
    }

    #[test]
    fn aux_records_keep_index_alignment() {
        // Give the first symbol an aux record by hand-editing the build.
        let mut bytes = sample_object().build();
        let symtbl = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        bytes[symtbl + 17] = 1; // aux count of slot 0
        // Grow the declared count and splice in a blank aux slot.
        let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) + 1;
        bytes[12..16].copy_from_slice(&count.to_le_bytes());
        bytes.splice(
            symtbl + SYMBOL_ENTRY_SIZE..symtbl + SYMBOL_ENTRY_SIZE,
            [0u8; SYMBOL_ENTRY_SIZE],
        );

        let parsed = CoffObject::parse(&bytes).unwrap();
        assert_eq!(parsed.symbols.len(), 3);
        assert!(parsed.symbols[1].is_none());
        assert_eq!(
            parsed.symbols[2].as_ref().unwrap().name,
            "_a_rather_long_external_name"
        );
    }
}
