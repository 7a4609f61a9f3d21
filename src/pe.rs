//! PE executable assembler and reader.
//!
//! `PeFile` models a PE32 image: MS-DOS header + stub, COFF header, the
//! 0xE0-byte optional header with its sixteen data directories, and the
//! section list. `build` synthesizes a loadable image from the section
//! list in five strictly sequential phases: header reservation, section
//! layout, export-table synthesis, base-relocation synthesis, emission.
//!
//! Fixed headers are written through the `object` crate's raw `pe`
//! structs; variable-length regions (export directory, relocation
//! blocks) go through `ByteWriter` and its patch API.

use object::endian::{LittleEndian as LE, U16, U32};
use object::pe;
use object::pod::bytes_of;

use crate::buffer::{ByteReader, ByteWriter, Patch};
use crate::coff::CoffSection;
use crate::error::{Error, Result};
use crate::utils::align_up;

pub const OPTIONAL_HDR_SIZE: u16 = 0xe0;
pub const DATA_DIRECTORY_COUNT: usize = 16;

/// "Don't even think of running this in WIN mode.\r\n$"
const DOS_STUB: &[u8] = &[
    0x0e, 0x1f, 0xba, 0x0e, 0x00, 0xb4, 0x09, 0xcd, 0x21, 0xb8, 0x01, 0x4c, 0xcd, 0x21, 0x44,
    0x6f, 0x6e, 0x27, 0x74, 0x20, 0x65, 0x76, 0x65, 0x6e, 0x20, 0x74, 0x68, 0x69, 0x6e, 0x6b,
    0x20, 0x6f, 0x66, 0x20, 0x72, 0x75, 0x6e, 0x6e, 0x69, 0x6e, 0x67, 0x20, 0x74, 0x68, 0x69,
    0x73, 0x20, 0x69, 0x6e, 0x20, 0x57, 0x49, 0x4e, 0x20, 0x6d, 0x6f, 0x64, 0x65, 0x0d, 0x0a,
    0x24,
];

fn u16le(v: u16) -> U16<LE> {
    U16::new(LE, v)
}

fn u32le(v: u32) -> U32<LE> {
    U32::new(LE, v)
}

/// The MS-DOS header; only used when reading in and writing out PE files.
#[derive(Debug, Clone)]
pub struct MsDosHeader {
    pub lastsize: u16,
    pub nblocks: u16,
    pub nreloc: u16,
    pub hdrsize: u16,
    pub minalloc: u16,
    pub maxalloc: u16,
    pub ss: u16,
    pub sp: u16,
    pub checksum: u16,
    pub ip: u16,
    pub cs: u16,
    pub relocpos: u16,
    pub noverlay: u16,
    pub oem_id: u16,
    pub oem_info: u16,
    pub e_lfanew: u32,
}

impl Default for MsDosHeader {
    fn default() -> Self {
        MsDosHeader {
            lastsize: 0x90,
            nblocks: 1,
            nreloc: 0,
            hdrsize: 4,
            minalloc: 0,
            maxalloc: 0xffff,
            ss: 0,
            sp: 0xb8,
            checksum: 0,
            ip: 0,
            cs: 0,
            relocpos: 0x40,
            noverlay: 0,
            oem_id: 0,
            oem_info: 0,
            e_lfanew: 0,
        }
    }
}

impl MsDosHeader {
    /// Size of the whole DOS region, including the stub bytes.
    pub const HEADER_SIZE: u32 = 0x40 + DOS_STUB.len() as u32;

    pub fn parse(source: &mut ByteReader) -> Result<MsDosHeader> {
        let signature = source.get_two()?;
        if signature != pe::IMAGE_DOS_SIGNATURE {
            return Err(Error::BadSignature("MS-DOS"));
        }
        let mut hdr = MsDosHeader::default();
        hdr.lastsize = source.get_two()?;
        hdr.nblocks = source.get_two()?;
        hdr.nreloc = source.get_two()?;
        hdr.hdrsize = source.get_two()?;
        hdr.minalloc = source.get_two()?;
        hdr.maxalloc = source.get_two()?;
        hdr.ss = source.get_two()?;
        hdr.sp = source.get_two()?;
        hdr.checksum = source.get_two()?;
        hdr.ip = source.get_two()?;
        hdr.cs = source.get_two()?;
        hdr.relocpos = source.get_two()?;
        hdr.noverlay = source.get_two()?;
        source.skip(8)?; // reserved
        hdr.oem_id = source.get_two()?;
        hdr.oem_info = source.get_two()?;
        source.skip(20)?; // reserved
        hdr.e_lfanew = source.get_four()?;
        Ok(hdr)
    }

    fn write(&self, outfile: &mut ByteWriter) {
        let hdr = pe::ImageDosHeader {
            e_magic: u16le(pe::IMAGE_DOS_SIGNATURE),
            e_cblp: u16le(self.lastsize),
            e_cp: u16le(self.nblocks),
            e_crlc: u16le(self.nreloc),
            e_cparhdr: u16le(self.hdrsize),
            e_minalloc: u16le(self.minalloc),
            e_maxalloc: u16le(self.maxalloc),
            e_ss: u16le(self.ss),
            e_sp: u16le(self.sp),
            e_csum: u16le(self.checksum),
            e_ip: u16le(self.ip),
            e_cs: u16le(self.cs),
            e_lfarlc: u16le(self.relocpos),
            e_ovno: u16le(self.noverlay),
            e_res: [u16le(0); 4],
            e_oemid: u16le(self.oem_id),
            e_oeminfo: u16le(self.oem_info),
            e_res2: [u16le(0); 10],
            e_lfanew: u32le(self.e_lfanew),
        };
        outfile.put_range(bytes_of(&hdr));
        outfile.put_range(DOS_STUB);
    }
}

/// Structured view of the COFF file characteristics word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCharacteristics {
    pub relocations_stripped: bool,
    pub is_executable: bool,
    pub line_numbers_stripped: bool,
    pub symbols_stripped: bool,
    pub large_address: bool,
    pub is_32bit_machine: bool,
    pub debug_stripped: bool,
    pub removable_run_from_swap: bool,
    pub network_run_from_swap: bool,
    pub is_system_file: bool,
    pub is_dll: bool,
    pub run_on_uniprocessor: bool,
}

impl FileCharacteristics {
    pub fn decode_flags(flags: u16) -> Self {
        FileCharacteristics {
            relocations_stripped: flags & pe::IMAGE_FILE_RELOCS_STRIPPED != 0,
            is_executable: flags & pe::IMAGE_FILE_EXECUTABLE_IMAGE != 0,
            line_numbers_stripped: flags & pe::IMAGE_FILE_LINE_NUMS_STRIPPED != 0,
            symbols_stripped: flags & pe::IMAGE_FILE_LOCAL_SYMS_STRIPPED != 0,
            large_address: flags & pe::IMAGE_FILE_LARGE_ADDRESS_AWARE != 0,
            is_32bit_machine: flags & pe::IMAGE_FILE_32BIT_MACHINE != 0,
            debug_stripped: flags & pe::IMAGE_FILE_DEBUG_STRIPPED != 0,
            removable_run_from_swap: flags & pe::IMAGE_FILE_REMOVABLE_RUN_FROM_SWAP != 0,
            network_run_from_swap: flags & pe::IMAGE_FILE_NET_RUN_FROM_SWAP != 0,
            is_system_file: flags & pe::IMAGE_FILE_SYSTEM != 0,
            is_dll: flags & pe::IMAGE_FILE_DLL != 0,
            run_on_uniprocessor: flags & pe::IMAGE_FILE_UP_SYSTEM_ONLY != 0,
        }
    }

    pub fn encode_flags(&self) -> u16 {
        let mut flags = 0u16;
        if self.relocations_stripped {
            flags |= pe::IMAGE_FILE_RELOCS_STRIPPED;
        }
        if self.is_executable {
            flags |= pe::IMAGE_FILE_EXECUTABLE_IMAGE;
        }
        if self.line_numbers_stripped {
            flags |= pe::IMAGE_FILE_LINE_NUMS_STRIPPED;
        }
        if self.symbols_stripped {
            flags |= pe::IMAGE_FILE_LOCAL_SYMS_STRIPPED;
        }
        if self.large_address {
            flags |= pe::IMAGE_FILE_LARGE_ADDRESS_AWARE;
        }
        if self.is_32bit_machine {
            flags |= pe::IMAGE_FILE_32BIT_MACHINE;
        }
        if self.debug_stripped {
            flags |= pe::IMAGE_FILE_DEBUG_STRIPPED;
        }
        if self.removable_run_from_swap {
            flags |= pe::IMAGE_FILE_REMOVABLE_RUN_FROM_SWAP;
        }
        if self.network_run_from_swap {
            flags |= pe::IMAGE_FILE_NET_RUN_FROM_SWAP;
        }
        if self.is_system_file {
            flags |= pe::IMAGE_FILE_SYSTEM;
        }
        if self.is_dll {
            flags |= pe::IMAGE_FILE_DLL;
        }
        if self.run_on_uniprocessor {
            flags |= pe::IMAGE_FILE_UP_SYSTEM_ONLY;
        }
        flags
    }
}

/// One (rva, size) slot of the optional header's data directory table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    fn read(source: &mut ByteReader) -> Result<DataDirectory> {
        Ok(DataDirectory {
            rva: source.get_four()?,
            size: source.get_four()?,
        })
    }

    fn write(&self, outfile: &mut ByteWriter) {
        outfile.put_four(self.rva);
        outfile.put_four(self.size);
    }
}

/// An exported name; ordinals are assigned sequentially by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeExport {
    pub ord: u32,
    pub name: String,
    pub addr: u32,
}

impl PeExport {
    /// Anything after an embedded space is linker annotation, not part of
    /// the identifier.
    pub fn new(ord: u32, name: &str, addr: u32) -> Self {
        let name = name.split(' ').next().unwrap_or("").to_string();
        PeExport { ord, name, addr }
    }
}

/// A PE32 executable image.
#[derive(Debug, Clone)]
pub struct PeFile {
    pub module_name: String,
    pub is_dll: bool,

    pub dos_header: MsDosHeader,

    // coff header fields
    pub machine: u16,
    pub timestamp: u32,
    pub characteristics: FileCharacteristics,

    // optional header fields
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_os_version: u16,
    pub minor_os_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,

    pub data_directories: [DataDirectory; DATA_DIRECTORY_COUNT],

    pub sections: Vec<CoffSection>,
    pub exports: Vec<PeExport>,
    pub reloc_addrs: Vec<u32>,
}

impl Default for PeFile {
    fn default() -> Self {
        PeFile {
            module_name: String::new(),
            is_dll: false,
            dos_header: MsDosHeader::default(),
            machine: pe::IMAGE_FILE_MACHINE_I386,
            timestamp: 0,
            characteristics: FileCharacteristics::default(),
            magic: pe::IMAGE_NT_OPTIONAL_HDR32_MAGIC,
            major_linker_version: 0,
            minor_linker_version: 1,
            size_of_code: 0,
            size_of_initialized_data: 0,
            size_of_uninitialized_data: 0,
            address_of_entry_point: 0,
            base_of_code: 0,
            base_of_data: 0,
            image_base: 0x40_0000, // exe default image base
            section_alignment: 0x1000,
            file_alignment: 0x200,
            major_os_version: 5,
            minor_os_version: 1,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 5,
            minor_subsystem_version: 1,
            win32_version_value: 0, // reserved, must be zero
            size_of_image: 0,
            size_of_headers: 0,
            checksum: 0,
            subsystem: pe::IMAGE_SUBSYSTEM_WINDOWS_GUI,
            dll_characteristics: 0x140,
            size_of_stack_reserve: 0x10_0000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x10_0000,
            size_of_heap_commit: 0x1000,
            loader_flags: 0, // reserved, must be zero
            number_of_rva_and_sizes: DATA_DIRECTORY_COUNT as u32,
            data_directories: [DataDirectory::default(); DATA_DIRECTORY_COUNT],
            sections: Vec::new(),
            exports: Vec::new(),
            reloc_addrs: Vec::new(),
        }
    }
}

impl PeFile {
    pub fn new() -> Self {
        PeFile::default()
    }

    /// Queue a name for the synthesized export table. Ordinals are
    /// assigned sequentially from a base of 1.
    pub fn add_export(&mut self, name: &str, addr: u32) {
        let ord = self.exports.len() as u32 + 1;
        self.exports.push(PeExport::new(ord, name, addr));
    }

    /// Queue absolute fixup addresses for the base-relocation table.
    pub fn add_relocations(&mut self, addrs: &[u32]) {
        self.reloc_addrs.extend_from_slice(addrs);
    }

    //- reading in ------------------------------------------------------------

    pub fn parse(data: &[u8]) -> Result<PeFile> {
        let mut source = ByteReader::new(data);
        let mut exe = PeFile::new();

        exe.dos_header = MsDosHeader::parse(&mut source)?;
        source.seek(exe.dos_header.e_lfanew as usize)?;
        let pesig = source.get_four()?;
        if pesig != pe::IMAGE_NT_SIGNATURE {
            return Err(Error::BadSignature("PE"));
        }

        exe.machine = source.get_two()?;
        let section_count = source.get_two()?;
        exe.timestamp = source.get_four()?;
        let _symbol_tbl_addr = source.get_four()?; // zero in executables
        let _symbol_tbl_count = source.get_four()?;
        let optional_hdr_size = source.get_two()?;
        if optional_hdr_size != OPTIONAL_HDR_SIZE {
            return Err(Error::OptionalHeaderSize(optional_hdr_size));
        }
        exe.characteristics = FileCharacteristics::decode_flags(source.get_two()?);
        exe.is_dll = exe.characteristics.is_dll;

        exe.read_optional_header(&mut source)?;

        for i in 0..section_count {
            let mut sec = CoffSection::read_entry(&mut source)?;
            sec.sec_num = i as usize + 1;
            if sec.file_size > 0 {
                sec.data = source
                    .get_range_at(sec.file_pos as usize, sec.file_size as usize)?
                    .to_vec();
            }
            exe.sections.push(sec);
        }

        Ok(exe)
    }

    fn read_optional_header(&mut self, source: &mut ByteReader) -> Result<()> {
        self.magic = source.get_two()?;
        self.major_linker_version = source.get_one()?;
        self.minor_linker_version = source.get_one()?;
        self.size_of_code = source.get_four()?;
        self.size_of_initialized_data = source.get_four()?;
        self.size_of_uninitialized_data = source.get_four()?;
        self.address_of_entry_point = source.get_four()?;
        self.base_of_code = source.get_four()?;
        self.base_of_data = source.get_four()?;
        self.image_base = source.get_four()?;
        self.section_alignment = source.get_four()?;
        self.file_alignment = source.get_four()?;
        self.major_os_version = source.get_two()?;
        self.minor_os_version = source.get_two()?;
        self.major_image_version = source.get_two()?;
        self.minor_image_version = source.get_two()?;
        self.major_subsystem_version = source.get_two()?;
        self.minor_subsystem_version = source.get_two()?;
        self.win32_version_value = source.get_four()?;
        self.size_of_image = source.get_four()?;
        self.size_of_headers = source.get_four()?;
        self.checksum = source.get_four()?;
        self.subsystem = source.get_two()?;
        self.dll_characteristics = source.get_two()?;
        self.size_of_stack_reserve = source.get_four()?;
        self.size_of_stack_commit = source.get_four()?;
        self.size_of_heap_reserve = source.get_four()?;
        self.size_of_heap_commit = source.get_four()?;
        self.loader_flags = source.get_four()?;
        self.number_of_rva_and_sizes = source.get_four()?;

        for dir in self.data_directories.iter_mut() {
            *dir = DataDirectory::read(source)?;
        }
        Ok(())
    }

    //- writing out -----------------------------------------------------------

    /// Assemble the image. Sections are laid out in list order; export and
    /// base-relocation sections are synthesized and appended when their
    /// input lists are non-empty.
    pub fn build(&mut self) -> Vec<u8> {
        let mut mempos: u32 = 0x1000;

        self.characteristics.is_executable = true;
        self.characteristics.is_32bit_machine = true;
        if self.is_dll {
            self.characteristics.is_dll = true;
            self.image_base = 0x1000_0000; // dll default image base
        }

        // Phase 1: header reservation.
        let win_hdr_pos = align_up(MsDosHeader::HEADER_SIZE, 8);
        self.dos_header.e_lfanew = win_hdr_pos;

        let mut section_count = self.sections.len() as u32;
        if !self.exports.is_empty() {
            section_count += 1;
        }
        if !self.reloc_addrs.is_empty() {
            section_count += 1;
        }
        let mut filepos = align_up(
            win_hdr_pos + 0x18 + OPTIONAL_HDR_SIZE as u32 + section_count * 0x28,
            self.file_alignment,
        );
        self.size_of_headers = filepos;

        // Phase 2: section layout.
        let file_alignment = self.file_alignment;
        let section_alignment = self.section_alignment;
        for i in 0..self.sections.len() {
            let sec = &mut self.sections[i];
            sec.file_pos = filepos;
            let datasize = if sec.file_size > 0 {
                sec.file_size
            } else {
                sec.data.len() as u32
            };
            sec.file_size = align_up(datasize, file_alignment);
            filepos += sec.file_size;

            sec.mem_pos = mempos;
            if sec.mem_size == 0 {
                sec.mem_size = sec.data.len() as u32;
            }
            mempos += align_up(sec.mem_size, section_alignment);

            let msize = align_up(self.sections[i].mem_size, file_alignment);
            if self.sections[i].settings.has_code {
                self.size_of_code += msize;
                if self.base_of_code == 0 {
                    self.base_of_code = self.sections[i].mem_pos;
                }
            }
            if self.sections[i].settings.has_init_data {
                self.size_of_initialized_data += msize;
                if self.base_of_data == 0 {
                    self.base_of_data = self.sections[i].mem_pos;
                }
            }
            if self.sections[i].settings.has_uninit_data {
                self.size_of_uninitialized_data += msize;
            }
        }

        // Phases 3 and 4: synthesized sections.
        if !self.exports.is_empty() {
            self.build_export_section(&mut filepos, &mut mempos);
        }
        if !self.reloc_addrs.is_empty() {
            self.build_reloc_section(&mut filepos, &mut mempos);
        }

        // Phase 5: finalize and emit.
        self.size_of_image = mempos;

        let mut outfile = ByteWriter::new();
        self.dos_header.write(&mut outfile);
        outfile.seek(win_hdr_pos as usize);
        self.write_coff_header(&mut outfile);
        self.write_optional_header(&mut outfile);
        self.write_section_table(&mut outfile);
        outfile.seek(self.size_of_headers as usize);
        self.write_section_data(&mut outfile);
        outfile.finish()
    }

    /// Place a synthesized section at the current file/memory cursors and
    /// point a data directory slot at it.
    fn place_section(
        &mut self,
        mut sec: CoffSection,
        filepos: &mut u32,
        mempos: &mut u32,
        dir_index: usize,
    ) {
        let datasize = sec.data.len() as u32;
        sec.file_pos = *filepos;
        sec.file_size = align_up(datasize, self.file_alignment);
        *filepos += sec.file_size;

        sec.mem_pos = *mempos;
        sec.mem_size = datasize;
        *mempos += align_up(datasize, self.section_alignment);

        self.size_of_initialized_data += align_up(sec.mem_size, self.file_alignment);
        self.data_directories[dir_index] = DataDirectory {
            rva: sec.mem_pos,
            size: sec.mem_size,
        };
        self.sections.push(sec);
    }

    /// Phase 3: lay out the export directory, address table, name-pointer
    /// table, ordinal table, and name-string pool in one `.edata` section.
    /// The section's memory position is fixed in advance (`mempos`), so
    /// every RVA can be computed directly; only the name addresses are
    /// backpatched once the string pool is written.
    fn build_export_section(&mut self, filepos: &mut u32, mempos: &mut u32) {
        const ORDINAL_BASE: u32 = 1;
        let count = self.exports.len() as u32;
        let mut expdata = ByteWriter::new();

        expdata.put_four(0); // export flags, reserved
        expdata.put_four(self.timestamp);
        expdata.put_two(1);
        expdata.put_two(0);
        let name_rva = expdata.reserve_four();
        expdata.put_four(ORDINAL_BASE);
        expdata.put_four(count);
        expdata.put_four(count);
        expdata.put_four(0x28 + *mempos); // address table
        let nametbl = 0x28 + 4 * count;
        expdata.put_four(nametbl + *mempos);
        let ordtbl = nametbl + 4 * count;
        expdata.put_four(ordtbl + *mempos);

        // Export address table, ordinal-indexed.
        for exp in &self.exports {
            expdata.put_four(exp.addr);
        }

        // Name-pointer table, filled in after the string pool is placed.
        let name_ptrs: Vec<Patch> = (0..count).map(|_| expdata.reserve_four()).collect();

        // Ordinal table.
        for exp in &self.exports {
            expdata.put_two((exp.ord - ORDINAL_BASE) as u16);
        }

        // Name-string pool: module name first, then each export name.
        let module_name_rva = expdata.pos() as u32 + *mempos;
        expdata.put_cstr(&self.module_name);
        for (exp, ptr) in self.exports.iter().zip(name_ptrs) {
            let rva = expdata.pos() as u32 + *mempos;
            expdata.patch_four(ptr, rva);
            expdata.put_cstr(&exp.name);
        }
        expdata.patch_four(name_rva, module_name_rva);

        let mut sec = CoffSection::new(".edata");
        sec.data = expdata.finish();
        sec.settings.can_read = true;
        sec.settings.has_init_data = true;
        self.place_section(sec, filepos, mempos, pe::IMAGE_DIRECTORY_ENTRY_EXPORT);
    }

    /// Phase 4: group fixups into 4KB-page blocks and emit one
    /// base-relocation block per page, each padded to a multiple of 4
    /// bytes and its size backpatched.
    fn build_reloc_section(&mut self, filepos: &mut u32, mempos: &mut u32) {
        let mut addrs = self.reloc_addrs.clone();
        addrs.sort_unstable();

        let mut reldata = ByteWriter::new();
        let mut basepage = addrs[0] & 0xffff_f000;
        reldata.put_four(basepage);
        let mut size_patch = reldata.reserve_four();
        let mut blocksize: u32 = 8;

        for addr in addrs {
            let page = addr & 0xffff_f000;
            if page != basepage {
                if blocksize % 4 != 0 {
                    reldata.put_two(0);
                    blocksize += 2;
                }
                reldata.patch_four(size_patch, blocksize);
                basepage = page;
                blocksize = 8;
                reldata.put_four(basepage);
                size_patch = reldata.reserve_four();
            }
            let entry = (addr & 0xfff) as u16 | (pe::IMAGE_REL_BASED_HIGHLOW << 12);
            reldata.put_two(entry);
            blocksize += 2;
        }
        if blocksize % 4 != 0 {
            reldata.put_two(0);
            blocksize += 2;
        }
        reldata.patch_four(size_patch, blocksize);

        let mut sec = CoffSection::new(".reloc");
        sec.data = reldata.finish();
        sec.settings.can_read = true;
        sec.settings.has_init_data = true;
        sec.settings.can_discard = true;
        self.place_section(sec, filepos, mempos, pe::IMAGE_DIRECTORY_ENTRY_BASERELOC);
    }

    fn write_coff_header(&self, outfile: &mut ByteWriter) {
        outfile.put_four(pe::IMAGE_NT_SIGNATURE);
        let hdr = pe::ImageFileHeader {
            machine: u16le(self.machine),
            number_of_sections: u16le(self.sections.len() as u16),
            time_date_stamp: u32le(self.timestamp),
            pointer_to_symbol_table: u32le(0), // no symbol table
            number_of_symbols: u32le(0),
            size_of_optional_header: u16le(OPTIONAL_HDR_SIZE),
            characteristics: u16le(self.characteristics.encode_flags()),
        };
        outfile.put_range(bytes_of(&hdr));
    }

    fn write_optional_header(&self, outfile: &mut ByteWriter) {
        let hdr = pe::ImageOptionalHeader32 {
            magic: u16le(self.magic),
            major_linker_version: self.major_linker_version,
            minor_linker_version: self.minor_linker_version,
            size_of_code: u32le(self.size_of_code),
            size_of_initialized_data: u32le(self.size_of_initialized_data),
            size_of_uninitialized_data: u32le(self.size_of_uninitialized_data),
            address_of_entry_point: u32le(self.address_of_entry_point),
            base_of_code: u32le(self.base_of_code),
            base_of_data: u32le(self.base_of_data),
            image_base: u32le(self.image_base),
            section_alignment: u32le(self.section_alignment),
            file_alignment: u32le(self.file_alignment),
            major_operating_system_version: u16le(self.major_os_version),
            minor_operating_system_version: u16le(self.minor_os_version),
            major_image_version: u16le(self.major_image_version),
            minor_image_version: u16le(self.minor_image_version),
            major_subsystem_version: u16le(self.major_subsystem_version),
            minor_subsystem_version: u16le(self.minor_subsystem_version),
            win32_version_value: u32le(self.win32_version_value),
            size_of_image: u32le(self.size_of_image),
            size_of_headers: u32le(self.size_of_headers),
            check_sum: u32le(self.checksum),
            subsystem: u16le(self.subsystem),
            dll_characteristics: u16le(self.dll_characteristics),
            size_of_stack_reserve: u32le(self.size_of_stack_reserve),
            size_of_stack_commit: u32le(self.size_of_stack_commit),
            size_of_heap_reserve: u32le(self.size_of_heap_reserve),
            size_of_heap_commit: u32le(self.size_of_heap_commit),
            loader_flags: u32le(self.loader_flags),
            number_of_rva_and_sizes: u32le(self.number_of_rva_and_sizes),
        };
        outfile.put_range(bytes_of(&hdr));
        for dir in &self.data_directories {
            dir.write(outfile);
        }
    }

    fn write_section_table(&self, outfile: &mut ByteWriter) {
        for sec in &self.sections {
            let mut name = [0u8; 8];
            for (i, b) in sec.name.bytes().take(8).enumerate() {
                name[i] = b;
            }
            let entry = pe::ImageSectionHeader {
                name,
                virtual_size: u32le(sec.mem_size),
                virtual_address: u32le(sec.mem_pos),
                size_of_raw_data: u32le(sec.file_size),
                pointer_to_raw_data: u32le(sec.file_pos),
                pointer_to_relocations: u32le(0),
                pointer_to_linenumbers: u32le(0),
                number_of_relocations: u16le(0),
                number_of_linenumbers: u16le(0),
                characteristics: u32le(sec.settings.encode_flags()),
            };
            outfile.put_range(bytes_of(&entry));
        }
    }

    fn write_section_data(&self, outfile: &mut ByteWriter) {
        for sec in &self.sections {
            outfile.seek(sec.file_pos as usize);
            outfile.put_range(&sec.data);
            // Zero-pad to the file-aligned size.
            outfile.seek((sec.file_pos + sec.file_size) as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coff::SectionSettings;

    fn code_section(name: &str, len: usize) -> CoffSection {
        let mut settings = SectionSettings::default();
        settings.has_code = true;
        settings.can_execute = true;
        settings.can_read = true;
        let mut sec = CoffSection::with_settings(name, settings);
        sec.data = vec![0x90; len];
        sec
    }

    #[test]
    fn layout_is_file_aligned_and_increasing() {
        let mut exe = PeFile::new();
        exe.sections.push(code_section(".text", 10));
        exe.sections.push(code_section(".t2", 4096));
        exe.sections.push(code_section(".t3", 1));
        let image = exe.build();

        assert_eq!(exe.size_of_headers, 0x200);
        let positions: Vec<u32> = exe.sections.iter().map(|s| s.file_pos).collect();
        assert_eq!(positions, vec![0x200, 0x400, 0x1400]);
        for sec in &exe.sections {
            assert_eq!(sec.file_pos % exe.file_alignment, 0);
            assert_eq!(sec.file_size % exe.file_alignment, 0);
            assert_eq!(sec.mem_pos % exe.section_alignment, 0);
        }
        // Gaps exactly cover the previous section's padded size.
        assert_eq!(exe.sections[1].file_pos - exe.sections[0].file_pos, 0x200);
        assert_eq!(exe.sections[2].file_pos - exe.sections[1].file_pos, 0x1000);
        assert_eq!(
            image.len() as u32,
            exe.sections[2].file_pos + exe.sections[2].file_size
        );
        assert_eq!(exe.size_of_image, 0x4000);
        assert_eq!(exe.base_of_code, 0x1000);
    }

    #[test]
    fn reloc_blocks_group_by_page() {
        let mut exe = PeFile::new();
        exe.sections.push(code_section(".text", 16));
        exe.add_relocations(&[0x2004, 0x1004, 0x1008]);
        exe.build();

        let reloc = exe.sections.iter().find(|s| s.name == ".reloc").unwrap();
        let d = &reloc.data;
        assert_eq!(d.len(), 24);
        // First block: page 0x1000, two entries, no padding needed.
        assert_eq!(u32::from_le_bytes(d[0..4].try_into().unwrap()), 0x1000);
        assert_eq!(u32::from_le_bytes(d[4..8].try_into().unwrap()), 12);
        assert_eq!(u16::from_le_bytes(d[8..10].try_into().unwrap()), 0x3004);
        assert_eq!(u16::from_le_bytes(d[10..12].try_into().unwrap()), 0x3008);
        // Second block: page 0x2000, one entry plus one zero pad entry.
        assert_eq!(u32::from_le_bytes(d[12..16].try_into().unwrap()), 0x2000);
        assert_eq!(u32::from_le_bytes(d[16..20].try_into().unwrap()), 12);
        assert_eq!(u16::from_le_bytes(d[20..22].try_into().unwrap()), 0x3004);
        assert_eq!(u16::from_le_bytes(d[22..24].try_into().unwrap()), 0);

        let dir = exe.data_directories[pe::IMAGE_DIRECTORY_ENTRY_BASERELOC];
        assert_eq!(dir.rva, reloc.mem_pos);
        assert_eq!(dir.size, 24);
    }

    #[test]
    fn export_section_structure() {
        let mut exe = PeFile::new();
        exe.module_name = "demo.dll".to_string();
        exe.is_dll = true;
        exe.sections.push(code_section(".text", 32));
        exe.add_export("alpha", 0x1000);
        exe.add_export("beta gamma", 0x1010); // space-truncated to "beta"
        exe.build();

        let edata = exe.sections.iter().find(|s| s.name == ".edata").unwrap();
        let d = &edata.data;
        let base = edata.mem_pos;

        // Directory fields.
        assert_eq!(u32::from_le_bytes(d[0x10..0x14].try_into().unwrap()), 1); // ordinal base
        assert_eq!(u32::from_le_bytes(d[0x14..0x18].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(d[0x18..0x1c].try_into().unwrap()), 2);
        let addr_tbl = u32::from_le_bytes(d[0x1c..0x20].try_into().unwrap());
        assert_eq!(addr_tbl, base + 0x28);
        // Address table holds the export RVAs in ordinal order.
        assert_eq!(u32::from_le_bytes(d[0x28..0x2c].try_into().unwrap()), 0x1000);
        assert_eq!(u32::from_le_bytes(d[0x2c..0x30].try_into().unwrap()), 0x1010);
        // Module name comes first in the string pool.
        let name_rva = u32::from_le_bytes(d[0x0c..0x10].try_into().unwrap());
        let name_ofs = (name_rva - base) as usize;
        assert_eq!(&d[name_ofs..name_ofs + 9], b"demo.dll\0");
        // First export name pointer resolves to "alpha".
        let name_ptr_tbl = (u32::from_le_bytes(d[0x20..0x24].try_into().unwrap()) - base) as usize;
        let first = (u32::from_le_bytes(d[name_ptr_tbl..name_ptr_tbl + 4].try_into().unwrap())
            - base) as usize;
        assert_eq!(&d[first..first + 6], b"alpha\0");
        let second_ptr = name_ptr_tbl + 4;
        let second = (u32::from_le_bytes(d[second_ptr..second_ptr + 4].try_into().unwrap())
            - base) as usize;
        assert_eq!(&d[second..second + 5], b"beta\0");

        assert_eq!(
            exe.data_directories[pe::IMAGE_DIRECTORY_ENTRY_EXPORT].rva,
            edata.mem_pos
        );
        // DLL defaults applied during build.
        assert_eq!(exe.image_base, 0x1000_0000);
        assert!(exe.characteristics.is_dll);
    }

    #[test]
    fn image_round_trip() {
        let mut exe = PeFile::new();
        exe.address_of_entry_point = 0x1000;
        let mut sec = code_section(".text", 24);
        sec.settings.alignment = 4;
        exe.sections.push(sec);
        let image = exe.build();

        let parsed = PeFile::parse(&image).unwrap();
        assert_eq!(parsed.machine, pe::IMAGE_FILE_MACHINE_I386);
        assert_eq!(parsed.magic, pe::IMAGE_NT_OPTIONAL_HDR32_MAGIC);
        assert_eq!(parsed.address_of_entry_point, 0x1000);
        assert_eq!(parsed.image_base, 0x40_0000);
        assert_eq!(parsed.size_of_image, exe.size_of_image);
        assert_eq!(parsed.size_of_headers, 0x200);
        assert_eq!(parsed.sections.len(), 1);
        let sec = &parsed.sections[0];
        assert_eq!(sec.name, ".text");
        assert_eq!(sec.mem_pos, 0x1000);
        assert_eq!(sec.file_pos, 0x200);
        assert_eq!(sec.file_size, 0x200);
        assert_eq!(&sec.data[..24], &[0x90; 24][..]);
        assert!(parsed.characteristics.is_executable);
        assert!(!parsed.is_dll);
    }

    #[test]
    fn bad_signatures_are_fatal() {
        assert_eq!(
            PeFile::parse(b"ZZ").unwrap_err(),
            Error::BadSignature("MS-DOS")
        );

        let mut exe = PeFile::new();
        exe.sections.push(code_section(".text", 8));
        let mut image = exe.build();
        let pe_ofs = exe.dos_header.e_lfanew as usize;
        image[pe_ofs] = b'X';
        assert_eq!(PeFile::parse(&image).unwrap_err(), Error::BadSignature("PE"));
    }
}
