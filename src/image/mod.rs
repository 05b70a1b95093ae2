//! In-memory ELF image with structural views over a single owned buffer.
//!
//! `ElfImage::load` runs the `elf` parser over the buffer once and records
//! the byte spans of the interpreter segment, the dynamic array, the
//! dynamic symbol table and the dynamic string table. Dynamic entries,
//! symbols and strings are parsed from those spans on demand, so views
//! never go stale after a patch. The only mutation path is
//! [`ElfImage::overwrite`], which refuses any write that leaves its
//! validated region.

pub mod consts;
pub mod layout;

use elf::dynamic::DynamicTable;
use elf::string_table::StringTable;
use elf::symbol::SymbolTable;
use elf::{ElfBytes, ParseError};

use crate::{Error, Result};
use consts::*;
pub use elf::endian::AnyEndian;
pub use elf::file::Class;
pub use layout::Layout;

/// A byte range `[offset, offset + len)` inside the image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.end()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// The validated spans the image permits writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Interp,
    Dynamic,
    DynSym,
    DynStr,
}

/// One `(tag, value)` entry of the dynamic array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynEntry {
    pub index: usize,
    /// File bytes occupied by the entry.
    pub span: Span,
    pub tag: i64,
    pub val: u64,
}

/// One record of the dynamic symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub index: usize,
    /// File bytes occupied by the record.
    pub span: Span,
    /// `st_name`: offset of the name in the dynamic string table.
    pub name: u32,
    pub bind: u8,
    pub symtype: u8,
    pub shndx: u16,
}

pub struct ElfImage {
    data: Vec<u8>,
    loaded_len: usize,
    layout: Layout,
    interp: Option<Span>,
    dynamic: Span,
    dynsym: Span,
    dynstr: Span,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedHeaders(msg.into())
}

fn parse_error(e: ParseError) -> Error {
    match e {
        ParseError::BadMagic(magic) => Error::NotAnElf(format!("bad magic {magic:02x?}")),
        ParseError::UnsupportedElfClass(class) => {
            Error::UnsupportedClass(format!("EI_CLASS {class}"))
        }
        ParseError::UnsupportedElfEndianness(data) => {
            Error::UnsupportedClass(format!("EI_DATA {data}"))
        }
        other => malformed(other.to_string()),
    }
}

/// Convert a file offset/size pair to a span, checking it lies inside `file_len`.
fn file_span(offset: u64, size: u64, file_len: usize, what: &str) -> Result<Span> {
    let offset =
        usize::try_from(offset).map_err(|_| malformed(format!("{what} offset overflows")))?;
    let size = usize::try_from(size).map_err(|_| malformed(format!("{what} size overflows")))?;
    match offset.checked_add(size) {
        Some(end) if end <= file_len => Ok(Span::new(offset, size)),
        _ => Err(malformed(format!(
            "{what} [{offset:#x}, +{size:#x}) extends past end of file ({file_len:#x})"
        ))),
    }
}

/// What `load` keeps from the parsed headers.
struct Headers {
    layout: Layout,
    interp: Option<Span>,
    dynamic: Span,
    dynsym: Span,
    dynstr: Span,
    /// `sh_addr` of the dynamic string table, checked against `DT_STRTAB`.
    dynstr_addr: u64,
}

fn read_headers(data: &[u8]) -> Result<Headers> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(data).map_err(parse_error)?;
    let layout = Layout::new(file.ehdr.class, file.ehdr.endianness);

    let segments = file
        .segments()
        .ok_or_else(|| Error::NoDynamicSection("no program headers".into()))?;
    let dynamic_phdr = segments
        .iter()
        .find(|p| p.p_type == PT_DYNAMIC)
        .ok_or_else(|| Error::NoDynamicSection("no PT_DYNAMIC program header".into()))?;
    let dynamic = file_span(
        dynamic_phdr.p_offset,
        dynamic_phdr.p_filesz,
        data.len(),
        "PT_DYNAMIC",
    )?;
    if dynamic.len % layout.dyn_size() != 0 {
        return Err(malformed(format!(
            "PT_DYNAMIC size {:#x} is not a multiple of the entry size",
            dynamic.len
        )));
    }
    let interp = segments
        .iter()
        .find(|p| p.p_type == PT_INTERP)
        .map(|p| file_span(p.p_offset, p.p_filesz, data.len(), "PT_INTERP"))
        .transpose()?;

    let shdrs = file
        .section_headers()
        .ok_or_else(|| Error::NoDynamicSection("no section header table".into()))?;
    let dynsym_hdr = shdrs
        .iter()
        .find(|s| s.sh_type == SHT_DYNSYM)
        .ok_or_else(|| Error::NoDynamicSection("no SHT_DYNSYM section".into()))?;
    let dynstr_hdr = shdrs
        .get(dynsym_hdr.sh_link as usize)
        .ok()
        .filter(|s| s.sh_type == SHT_STRTAB)
        .ok_or_else(|| {
            Error::NoDynamicSection("dynamic symbol table has no string table".into())
        })?;

    let sym_size = layout.sym_size() as u64;
    if dynsym_hdr.sh_entsize != 0 && dynsym_hdr.sh_entsize != sym_size {
        return Err(malformed(format!(
            "dynamic symbol entry size {} (expected {sym_size})",
            dynsym_hdr.sh_entsize
        )));
    }
    if dynsym_hdr.sh_size % sym_size != 0 {
        return Err(malformed("dynamic symbol table size is not a whole number of entries"));
    }
    let dynsym = file_span(
        dynsym_hdr.sh_offset,
        dynsym_hdr.sh_size,
        data.len(),
        "dynamic symbol table",
    )?;
    let dynstr = file_span(
        dynstr_hdr.sh_offset,
        dynstr_hdr.sh_size,
        data.len(),
        "dynamic string table",
    )?;
    if dynstr.len == 0 || data[dynstr.offset] != 0 {
        return Err(malformed("dynamic string table does not start with a NUL byte"));
    }

    Ok(Headers {
        layout,
        interp,
        dynamic,
        dynsym,
        dynstr,
        dynstr_addr: dynstr_hdr.sh_addr,
    })
}

impl ElfImage {
    /// Parse and validate `data` as a dynamically linked ELF object.
    pub fn load(data: Vec<u8>) -> Result<Self> {
        if data.len() < EI_NIDENT {
            return Err(Error::NotAnElf("shorter than an ELF identification".into()));
        }
        let headers = read_headers(&data)?;
        let image = Self {
            loaded_len: data.len(),
            data,
            layout: headers.layout,
            interp: headers.interp,
            dynamic: headers.dynamic,
            dynsym: headers.dynsym,
            dynstr: headers.dynstr,
        };

        if let Some(strtab) = image.find_dynamic(DT_STRTAB) {
            if strtab.val != headers.dynstr_addr {
                return Err(malformed(format!(
                    "DT_STRTAB {:#x} does not match the dynamic string table at {:#x}",
                    strtab.val, headers.dynstr_addr
                )));
            }
        }

        Ok(image)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the buffer `load` was given.
    pub fn loaded_len(&self) -> usize {
        self.loaded_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn interp_span(&self) -> Option<Span> {
        self.interp
    }

    pub fn dynstr_span(&self) -> Span {
        self.dynstr
    }

    pub fn region_span(&self, region: Region) -> Option<Span> {
        match region {
            Region::Interp => self.interp,
            Region::Dynamic => Some(self.dynamic),
            Region::DynSym => Some(self.dynsym),
            Region::DynStr => Some(self.dynstr),
        }
    }

    fn bytes(&self, span: Span) -> &[u8] {
        &self.data[span.offset..span.end()]
    }

    /// Current interpreter path, up to the first NUL of `PT_INTERP`.
    pub fn interpreter(&self) -> Option<String> {
        let bytes = self.bytes(self.interp?);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// All entries of the dynamic array, including any trailing `DT_NULL`s.
    pub fn dynamic_entries(&self) -> Vec<DynEntry> {
        let size = self.layout.dyn_size();
        let table = DynamicTable::new(
            self.layout.endian,
            self.layout.class,
            self.bytes(self.dynamic),
        );
        table
            .iter()
            .enumerate()
            .map(|(index, d)| DynEntry {
                index,
                span: Span::new(self.dynamic.offset + index * size, size),
                tag: d.d_tag,
                val: d.d_val(),
            })
            .collect()
    }

    /// First entry with `tag` that comes before the array's terminator.
    pub fn find_dynamic(&self, tag: i64) -> Option<DynEntry> {
        self.dynamic_entries()
            .into_iter()
            .take_while(|e| e.tag != DT_NULL || tag == DT_NULL)
            .find(|e| e.tag == tag)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let size = self.layout.sym_size();
        let table = SymbolTable::new(
            self.layout.endian,
            self.layout.class,
            self.bytes(self.dynsym),
        );
        table
            .iter()
            .enumerate()
            .map(|(index, s)| Symbol {
                index,
                span: Span::new(self.dynsym.offset + index * size, size),
                name: s.st_name,
                bind: s.st_bind(),
                symtype: s.st_symtype(),
                shndx: s.st_shndx,
            })
            .collect()
    }

    /// The NUL-terminated string at `offset` in the dynamic string table,
    /// without its terminator. `None` if the offset is out of range or the
    /// string runs off the end of the table.
    pub fn string_at(&self, offset: u64) -> Option<&[u8]> {
        let offset = usize::try_from(offset).ok()?;
        StringTable::new(self.bytes(self.dynstr))
            .get_raw(offset)
            .ok()
    }

    pub fn dynstr_string(&self, offset: u64) -> Option<String> {
        self.string_at(offset)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn symbol_name(&self, sym: &Symbol) -> Option<String> {
        self.dynstr_string(u64::from(sym.name))
    }

    pub fn runpath(&self) -> Option<String> {
        self.dynstr_string(self.find_dynamic(DT_RUNPATH)?.val)
    }

    pub fn rpath(&self) -> Option<String> {
        self.dynstr_string(self.find_dynamic(DT_RPATH)?.val)
    }

    /// Check that `len` bytes at `offset` fall inside `region`.
    pub fn check_write(&self, region: Region, offset: usize, len: usize) -> Result<()> {
        let out_of_bounds = || Error::PatchOutOfBounds { offset, len };
        let span = self.region_span(region).ok_or_else(out_of_bounds)?;
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if offset < span.offset || end > span.end() || end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(())
    }

    /// Overwrite bytes inside a validated region. Never extends the buffer.
    pub fn overwrite(&mut self, region: Region, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_write(region, offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
