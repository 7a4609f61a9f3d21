//! The OBOE linker container format.
//!
//! An OBOE file is a 4-byte signature, a section count, and a table of
//! (type, addr, size) entries pointing at the section payloads. Code,
//! data, and var sections share the block layout (name, a six-field
//! header of absolute file offsets, raw bytes, import and export
//! lists); bss sections carry only a size and exports.
//!
//! Section loaders are looked up in an explicit [`SectionRegistry`]
//! keyed by type code, so callers decide which section types a parse
//! accepts. Entries whose type has no registered loader are skipped.

use std::collections::HashMap;

use tracing::debug;

use crate::buffer::{ByteReader, ByteWriter};
use crate::error::{Error, Result};

pub const OBOE_SIGNATURE: &[u8; 4] = b"OBOE";

pub const SECTION_TYPE_CODE: u32 = 1000;
pub const SECTION_TYPE_DATA: u32 = 1001;
pub const SECTION_TYPE_VAR: u32 = 1002;
pub const SECTION_TYPE_BSS: u32 = 1003;

/// Container layout revision. `Extended` inserts a 4-byte extension
/// header length after the signature; no extensions are defined yet, so
/// it is written as zero and its span skipped on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRevision {
    Original,
    Extended,
}

/// How an imported address gets fixed up by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Dir32,
    Rel32,
}

impl ImportKind {
    fn from_code(code: u8) -> ImportKind {
        match code {
            1 => ImportKind::Rel32,
            _ => ImportKind::Dir32,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            ImportKind::Dir32 => 0,
            ImportKind::Rel32 => 1,
        }
    }
}

impl std::fmt::Display for ImportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportKind::Dir32 => write!(f, "DIR32"),
            ImportKind::Rel32 => write!(f, "REL32"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OboeImport {
    pub name: String,
    pub addr: u32,
    pub kind: ImportKind,
}

impl OboeImport {
    /// Anything after an embedded space is annotation, not identifier.
    pub fn new(name: &str, addr: u32, kind: ImportKind) -> Self {
        let name = name.split(' ').next().unwrap_or("").to_string();
        OboeImport { name, addr, kind }
    }

    fn parse(source: &mut ByteReader) -> Result<OboeImport> {
        let name = source.get_cstr()?;
        let addr = source.get_four()?;
        let kind = ImportKind::from_code(source.get_one()?);
        Ok(OboeImport { name, addr, kind })
    }

    fn write(&self, outfile: &mut ByteWriter) {
        outfile.put_cstr(&self.name);
        outfile.put_four(self.addr);
        outfile.put_one(self.kind.to_code());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OboeExport {
    pub name: String,
    pub addr: u32,
}

impl OboeExport {
    pub fn new(name: &str, addr: u32) -> Self {
        let name = name.split(' ').next().unwrap_or("").to_string();
        OboeExport { name, addr }
    }

    fn parse(source: &mut ByteReader) -> Result<OboeExport> {
        let name = source.get_cstr()?;
        let addr = source.get_four()?;
        Ok(OboeExport { name, addr })
    }

    fn write(&self, outfile: &mut ByteWriter) {
        outfile.put_cstr(&self.name);
        outfile.put_four(self.addr);
    }
}

/// Distinguishes the three block-layout section types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Code,
    Data,
    Var,
}

impl BlockKind {
    pub fn type_code(self) -> u32 {
        match self {
            BlockKind::Code => SECTION_TYPE_CODE,
            BlockKind::Data => SECTION_TYPE_DATA,
            BlockKind::Var => SECTION_TYPE_VAR,
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Code => write!(f, "CODE"),
            BlockKind::Data => write!(f, "DATA"),
            BlockKind::Var => write!(f, "VAR"),
        }
    }
}

/// A section holding raw bytes plus its import and export lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OboeBlock {
    pub kind: BlockKind,
    pub name: String,
    pub data: Vec<u8>,
    pub imports: Vec<OboeImport>,
    pub exports: Vec<OboeExport>,
}

impl OboeBlock {
    pub fn new(kind: BlockKind, name: &str) -> Self {
        OboeBlock {
            kind,
            name: name.to_string(),
            data: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// The six header fields hold absolute file offsets, so the payload
    /// can be decoded without consulting the section-table entry size.
    fn parse(kind: BlockKind, source: &mut ByteReader) -> Result<OboeBlock> {
        let name = source.get_cstr()?;
        let data_addr = source.get_four()?;
        let data_size = source.get_four()?;
        let import_addr = source.get_four()?;
        let import_count = source.get_four()?;
        let export_addr = source.get_four()?;
        let export_count = source.get_four()?;

        let data = source
            .get_range_at(data_addr as usize, data_size as usize)?
            .to_vec();

        source.seek(import_addr as usize)?;
        let mut imports = Vec::with_capacity(import_count as usize);
        for _ in 0..import_count {
            imports.push(OboeImport::parse(source)?);
        }

        source.seek(export_addr as usize)?;
        let mut exports = Vec::with_capacity(export_count as usize);
        for _ in 0..export_count {
            exports.push(OboeExport::parse(source)?);
        }

        Ok(OboeBlock {
            kind,
            name,
            data,
            imports,
            exports,
        })
    }

    fn write(&self, outfile: &mut ByteWriter) {
        outfile.put_cstr(&self.name);
        let data_addr = outfile.reserve_four();
        let data_size = outfile.reserve_four();
        let import_addr = outfile.reserve_four();
        let import_count = outfile.reserve_four();
        let export_addr = outfile.reserve_four();
        let export_count = outfile.reserve_four();

        outfile.patch_four(data_addr, outfile.pos() as u32);
        outfile.patch_four(data_size, self.data.len() as u32);
        outfile.put_range(&self.data);

        outfile.patch_four(import_addr, outfile.pos() as u32);
        outfile.patch_four(import_count, self.imports.len() as u32);
        for imp in &self.imports {
            imp.write(outfile);
        }

        outfile.patch_four(export_addr, outfile.pos() as u32);
        outfile.patch_four(export_count, self.exports.len() as u32);
        for exp in &self.exports {
            exp.write(outfile);
        }
    }
}

/// Uninitialized storage: a size to reserve at load time plus the names
/// exported out of that span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssSection {
    pub name: String,
    pub size: u32,
    pub exports: Vec<OboeExport>,
}

impl BssSection {
    pub fn new(name: &str, size: u32) -> Self {
        BssSection {
            name: name.to_string(),
            size,
            exports: Vec::new(),
        }
    }

    fn parse(source: &mut ByteReader) -> Result<BssSection> {
        let name = source.get_cstr()?;
        let size = source.get_four()?;
        let export_count = source.get_four()?;
        let mut exports = Vec::with_capacity(export_count as usize);
        for _ in 0..export_count {
            exports.push(OboeExport::parse(source)?);
        }
        Ok(BssSection {
            name,
            size,
            exports,
        })
    }

    fn write(&self, outfile: &mut ByteWriter) {
        outfile.put_cstr(&self.name);
        outfile.put_four(self.size);
        outfile.put_four(self.exports.len() as u32);
        for exp in &self.exports {
            exp.write(outfile);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OboeSection {
    Block(OboeBlock),
    Bss(BssSection),
}

impl OboeSection {
    pub fn name(&self) -> &str {
        match self {
            OboeSection::Block(b) => &b.name,
            OboeSection::Bss(b) => &b.name,
        }
    }

    pub fn type_code(&self) -> u32 {
        match self {
            OboeSection::Block(b) => b.kind.type_code(),
            OboeSection::Bss(_) => SECTION_TYPE_BSS,
        }
    }

    fn write(&self, outfile: &mut ByteWriter) {
        match self {
            OboeSection::Block(b) => b.write(outfile),
            OboeSection::Bss(b) => b.write(outfile),
        }
    }
}

pub type SectionLoader = fn(&mut ByteReader) -> Result<OboeSection>;

fn load_code(source: &mut ByteReader) -> Result<OboeSection> {
    Ok(OboeSection::Block(OboeBlock::parse(BlockKind::Code, source)?))
}

fn load_data(source: &mut ByteReader) -> Result<OboeSection> {
    Ok(OboeSection::Block(OboeBlock::parse(BlockKind::Data, source)?))
}

fn load_var(source: &mut ByteReader) -> Result<OboeSection> {
    Ok(OboeSection::Block(OboeBlock::parse(BlockKind::Var, source)?))
}

fn load_bss(source: &mut ByteReader) -> Result<OboeSection> {
    Ok(OboeSection::Bss(BssSection::parse(source)?))
}

/// Maps section type codes to loader functions. Parsing only accepts
/// the types a registry knows about, so callers choose their own set;
/// `standard()` covers the four defined codes.
#[derive(Default)]
pub struct SectionRegistry {
    loaders: HashMap<u32, SectionLoader>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        SectionRegistry::default()
    }

    pub fn standard() -> Self {
        let mut registry = SectionRegistry::new();
        registry.register(SECTION_TYPE_CODE, load_code);
        registry.register(SECTION_TYPE_DATA, load_data);
        registry.register(SECTION_TYPE_VAR, load_var);
        registry.register(SECTION_TYPE_BSS, load_bss);
        registry
    }

    pub fn register(&mut self, type_code: u32, loader: SectionLoader) {
        self.loaders.insert(type_code, loader);
    }

    pub fn get(&self, type_code: u32) -> Option<SectionLoader> {
        self.loaders.get(&type_code).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OboeFile {
    pub sections: Vec<OboeSection>,
}

impl OboeFile {
    pub fn new() -> Self {
        OboeFile::default()
    }

    pub fn find_section(&self, name: &str) -> Option<&OboeSection> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn parse(
        data: &[u8],
        registry: &SectionRegistry,
        revision: FormatRevision,
    ) -> Result<OboeFile> {
        let mut source = ByteReader::new(data);
        let sig = source.get_range(4)?;
        if sig != OBOE_SIGNATURE {
            return Err(Error::BadSignature("OBOE"));
        }
        if revision == FormatRevision::Extended {
            let ext_len = source.get_four()?;
            source.skip(ext_len as usize)?;
        }

        let count = source.get_four()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let type_code = source.get_four()?;
            let addr = source.get_four()?;
            let _size = source.get_four()?;
            entries.push((type_code, addr));
        }

        let mut file = OboeFile::new();
        for (type_code, addr) in entries {
            let Some(loader) = registry.get(type_code) else {
                debug!("skipping section entry with unregistered type {type_code}");
                continue;
            };
            source.seek(addr as usize)?;
            file.sections.push(loader(&mut source)?);
        }
        Ok(file)
    }

    /// Serialize the container. The section table is reserved up front
    /// and each entry's addr and size backpatched once its payload has
    /// been written.
    pub fn build(&self, revision: FormatRevision) -> Vec<u8> {
        let mut outfile = ByteWriter::new();
        outfile.put_range(OBOE_SIGNATURE);
        if revision == FormatRevision::Extended {
            outfile.put_four(0); // no extension header defined
        }
        outfile.put_four(self.sections.len() as u32);

        let mut entries = Vec::with_capacity(self.sections.len());
        for sec in &self.sections {
            outfile.put_four(sec.type_code());
            let addr = outfile.reserve_four();
            let size = outfile.reserve_four();
            entries.push((addr, size));
        }

        for (sec, (addr, size)) in self.sections.iter().zip(entries) {
            let start = outfile.pos() as u32;
            outfile.patch_four(addr, start);
            sec.write(&mut outfile);
            outfile.patch_four(size, outfile.pos() as u32 - start);
        }
        outfile.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> OboeFile {
        let mut code = OboeBlock::new(BlockKind::Code, "main");
        code.data = vec![0x55, 0x8b, 0xec, 0x5d, 0xc3];
        code.imports.push(OboeImport::new("printf", 0x12, ImportKind::Rel32));
        code.imports.push(OboeImport::new("table", 0x20, ImportKind::Dir32));
        code.exports.push(OboeExport::new("main", 0));

        let mut bss = BssSection::new("heap", 0x4000);
        bss.exports.push(OboeExport::new("freeptr", 0x10));

        OboeFile {
            sections: vec![OboeSection::Block(code), OboeSection::Bss(bss)],
        }
    }

    #[test]
    fn round_trip_original_revision() {
        let file = sample_file();
        let bytes = file.build(FormatRevision::Original);
        assert_eq!(&bytes[..4], OBOE_SIGNATURE);

        let registry = SectionRegistry::standard();
        let parsed = OboeFile::parse(&bytes, &registry, FormatRevision::Original).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn round_trip_extended_revision() {
        let file = sample_file();
        let bytes = file.build(FormatRevision::Extended);
        // Extension header length sits after the signature and is zero.
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 0);

        let registry = SectionRegistry::standard();
        let parsed = OboeFile::parse(&bytes, &registry, FormatRevision::Extended).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn unregistered_types_are_skipped() {
        let file = sample_file();
        let bytes = file.build(FormatRevision::Original);

        let mut registry = SectionRegistry::new();
        registry.register(SECTION_TYPE_BSS, |source| {
            Ok(OboeSection::Bss(BssSection::parse(source)?))
        });
        let parsed = OboeFile::parse(&bytes, &registry, FormatRevision::Original).unwrap();
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].name(), "heap");
    }

    #[test]
    fn entry_names_truncate_at_space() {
        let imp = OboeImport::new("memcpy @4", 0, ImportKind::Dir32);
        assert_eq!(imp.name, "memcpy");
        let exp = OboeExport::new("foo bar", 0);
        assert_eq!(exp.name, "foo");
    }

    #[test]
    fn bad_signature() {
        let registry = SectionRegistry::standard();
        assert_eq!(
            OboeFile::parse(b"ELF\x7f\0\0\0\0", &registry, FormatRevision::Original),
            Err(Error::BadSignature("OBOE"))
        );
    }

    #[test]
    fn section_table_addresses_match_payloads() {
        let file = sample_file();
        let bytes = file.build(FormatRevision::Original);
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(count, 2);

        let ty = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let addr = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        assert_eq!(ty, SECTION_TYPE_CODE);
        // Payload starts with the section name.
        assert_eq!(&bytes[addr..addr + 5], b"main\0");

        let ty2 = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        let addr2 = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
        let size2 = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;
        assert_eq!(ty2, SECTION_TYPE_BSS);
        assert_eq!(&bytes[addr2..addr2 + 5], b"heap\0");
        assert_eq!(addr2 + size2, bytes.len());
    }
}
