// elf.rs: dynamic ELF fixture builder for tests
//
// Builds a small but structurally complete dynamically linked ELF object
// in any class/byte-order combination: an ELF header, program headers
// (PT_LOAD covering the file, optional PT_INTERP, optional PT_DYNAMIC),
// the interpreter string, .dynsym, .dynstr, the dynamic array and a
// section header table at the very end of the file. Virtual addresses
// equal file offsets. Nothing here is meant to run, only to be parsed
// and patched.

use elf::abi::{
    ELFMAG0, ELFMAG1, ELFMAG2, ELFMAG3, EM_386, EM_PPC, EM_PPC64, EM_X86_64, ET_DYN, EV_CURRENT,
    PF_R, PF_W, PF_X, SHN_ABS, SHT_DYNAMIC, SHT_PROGBITS, STB_GLOBAL, STB_WEAK, STT_FUNC,
    STT_NOTYPE,
};

use crate::image::consts::*;
use crate::image::{AnyEndian, Class, Layout};

/// `(e_ehsize, e_phentsize, e_shentsize)` for a class.
fn header_sizes(class: Class) -> (usize, usize, usize) {
    match class {
        Class::ELF32 => (52, 32, 40),
        Class::ELF64 => (64, 56, 64),
    }
}

/// A dynamic symbol in the fixture.
pub(crate) struct FixtureSym {
    pub name: &'static str,
    pub undefined: bool,
}

impl FixtureSym {
    pub(crate) fn undefined(name: &'static str) -> Self {
        Self {
            name,
            undefined: true,
        }
    }

    pub(crate) fn defined(name: &'static str) -> Self {
        Self {
            name,
            undefined: false,
        }
    }
}

pub(crate) struct Fixture {
    pub layout: Layout,
    pub interp: Option<&'static str>,
    pub needed: Vec<&'static str>,
    pub runpath: Option<&'static str>,
    pub rpath: Option<&'static str>,
    pub symbols: Vec<FixtureSym>,
    /// `DT_NULL` entries after the terminating one.
    pub spare_nulls: usize,
    /// Emit PT_DYNAMIC and .dynamic. Off models a static binary.
    pub dynamic: bool,
    pub section_headers: bool,
    /// Reuse the tail of an existing string when a new one is its suffix,
    /// like `ld -O1` does for .dynstr.
    pub tail_merge: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            layout: Layout::new(Class::ELF64, AnyEndian::Little),
            interp: Some("/lib64/ld-linux-x86-64.so.2"),
            needed: vec!["libc.so.6"],
            runpath: None,
            rpath: None,
            symbols: vec![
                FixtureSym::undefined("_ITM_deregisterTMCloneTable"),
                FixtureSym::undefined("puts"),
                FixtureSym::undefined("__libc_start_main"),
                FixtureSym::undefined("__gmon_start__"),
                FixtureSym::undefined("_ITM_registerTMCloneTable"),
                FixtureSym::defined("_IO_stdin_used"),
            ],
            spare_nulls: 1,
            dynamic: true,
            section_headers: true,
            tail_merge: false,
        }
    }
}

/// String table under construction. Starts with the mandatory NUL.
struct StrTab {
    bytes: Vec<u8>,
    entries: Vec<(usize, &'static str)>,
    tail_merge: bool,
}

impl StrTab {
    fn new(tail_merge: bool) -> Self {
        Self {
            bytes: vec![0],
            entries: Vec::new(),
            tail_merge,
        }
    }

    fn add(&mut self, s: &'static str) -> usize {
        if self.tail_merge {
            if let Some((off, existing)) = self.entries.iter().find(|(_, e)| e.ends_with(s)) {
                return off + existing.len() - s.len();
            }
        }
        let off = self.bytes.len();
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.entries.push((off, s));
        off
    }
}

/// Byte sink that encodes fields in the fixture's class and byte order.
struct Out {
    l: Layout,
    buf: Vec<u8>,
}

impl Out {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend(self.l.u16_bytes(v));
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend(self.l.u32_bytes(v));
    }
    fn word(&mut self, v: u64) {
        self.buf.extend(self.l.word_bytes(v).unwrap());
    }
    fn sword(&mut self, v: i64) {
        self.buf.extend(self.l.sword_bytes(v).unwrap());
    }
    fn pad_to(&mut self, off: usize) {
        assert!(self.buf.len() <= off);
        self.buf.resize(off, 0);
    }
}

fn align(v: usize, to: usize) -> usize {
    (v + to - 1) & !(to - 1)
}

impl Fixture {
    pub(crate) fn new(layout: Layout) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let l = self.layout;
        let w = l.word_size();
        let (ehdr_size, phdr_size, shdr_size) = header_sizes(l.class);

        // ---- String tables ----
        let mut dynstr = StrTab::new(self.tail_merge);
        let needed: Vec<usize> = self.needed.iter().map(|&n| dynstr.add(n)).collect();
        let rpath = self.rpath.map(|s| dynstr.add(s));
        let runpath = self.runpath.map(|s| dynstr.add(s));
        let sym_names: Vec<usize> = self.symbols.iter().map(|s| dynstr.add(s.name)).collect();

        let mut shstr = StrTab::new(false);
        let sh_interp = shstr.add(".interp");
        let sh_dynsym = shstr.add(".dynsym");
        let sh_dynstr = shstr.add(".dynstr");
        let sh_dynamic = shstr.add(".dynamic");
        let sh_shstrtab = shstr.add(".shstrtab");

        // ---- Layout planning ----
        let phnum = 1 + usize::from(self.interp.is_some()) + usize::from(self.dynamic);
        let phdrs_offset = ehdr_size;
        let interp_offset = phdrs_offset + phnum * phdr_size;
        let interp_len = self.interp.map_or(0, |s| s.len() + 1);
        let dynsym_offset = align(interp_offset + interp_len, w);
        let dynsym_len = (1 + self.symbols.len()) * l.sym_size();
        let dynstr_offset = dynsym_offset + dynsym_len;
        let dynamic_offset = align(dynstr_offset + dynstr.bytes.len(), w);
        let dyn_count = self.needed.len()
            + usize::from(self.rpath.is_some())
            + usize::from(self.runpath.is_some())
            + 4
            + 1
            + self.spare_nulls;
        let dynamic_len = if self.dynamic {
            dyn_count * l.dyn_size()
        } else {
            0
        };
        let shstrtab_offset = dynamic_offset + dynamic_len;
        let shdrs_offset = align(shstrtab_offset + shstr.bytes.len(), w);
        let shnum = 1 + usize::from(self.interp.is_some()) + 3 + usize::from(self.dynamic);
        let file_len = shdrs_offset + shnum * shdr_size;

        let mut out = Out {
            l,
            buf: Vec::with_capacity(file_len),
        };

        // ---- ELF header ----
        out.buf.extend_from_slice(&[ELFMAG0, ELFMAG1, ELFMAG2, ELFMAG3]);
        out.u8(match l.class {
            Class::ELF32 => ELFCLASS32,
            Class::ELF64 => ELFCLASS64,
        });
        out.u8(match l.endian {
            AnyEndian::Little => ELFDATA2LSB,
            AnyEndian::Big => ELFDATA2MSB,
        });
        out.u8(EV_CURRENT);
        out.u8(0); // ELFOSABI_NONE
        out.buf.extend_from_slice(&[0u8; 8]);
        out.u16(ET_DYN);
        out.u16(match (l.class, l.endian) {
            (Class::ELF64, AnyEndian::Little) => EM_X86_64,
            (Class::ELF32, AnyEndian::Little) => EM_386,
            (Class::ELF64, AnyEndian::Big) => EM_PPC64,
            (Class::ELF32, AnyEndian::Big) => EM_PPC,
        });
        out.u32(u32::from(EV_CURRENT)); // e_version
        out.word(0); // e_entry
        out.word(phdrs_offset as u64);
        out.word(if self.section_headers {
            shdrs_offset as u64
        } else {
            0
        });
        out.u32(0); // e_flags
        out.u16(ehdr_size as u16);
        out.u16(phdr_size as u16);
        out.u16(phnum as u16);
        if self.section_headers {
            out.u16(shdr_size as u16);
            out.u16(shnum as u16);
            out.u16((shnum - 1) as u16); // .shstrtab is last
        } else {
            out.u16(0);
            out.u16(0);
            out.u16(0);
        }
        debug_assert_eq!(out.buf.len(), phdrs_offset);

        // ---- Program headers ----
        let phdr = |out: &mut Out,
                    p_type: u32,
                    flags: u32,
                    offset: usize,
                    size: usize,
                    p_align: u64| {
            let (offset, size) = (offset as u64, size as u64);
            out.u32(p_type);
            if l.class == Class::ELF64 {
                out.u32(flags);
            }
            out.word(offset); // p_offset
            out.word(offset); // p_vaddr
            out.word(offset); // p_paddr
            out.word(size); // p_filesz
            out.word(size); // p_memsz
            if l.class == Class::ELF32 {
                out.u32(flags);
            }
            out.word(p_align);
        };
        if self.interp.is_some() {
            phdr(&mut out, PT_INTERP, PF_R, interp_offset, interp_len, 1);
        }
        phdr(&mut out, PT_LOAD, PF_R | PF_W | PF_X, 0, file_len, 0x1000);
        if self.dynamic {
            phdr(&mut out, PT_DYNAMIC, PF_R | PF_W, dynamic_offset, dynamic_len, w as u64);
        }
        debug_assert_eq!(out.buf.len(), interp_offset);

        // ---- .interp ----
        if let Some(interp) = self.interp {
            out.buf.extend_from_slice(interp.as_bytes());
            out.u8(0);
        }

        // ---- .dynsym ----
        out.pad_to(dynsym_offset);
        out.buf.resize(dynsym_offset + l.sym_size(), 0); // STN_UNDEF
        for (sym, &name) in self.symbols.iter().zip(&sym_names) {
            let (info, shndx, value) = if sym.undefined {
                ((STB_WEAK << 4) | STT_NOTYPE, SHN_UNDEF, 0u64)
            } else {
                ((STB_GLOBAL << 4) | STT_FUNC, SHN_ABS, 0x1000u64)
            };
            out.u32(name as u32);
            match l.class {
                Class::ELF64 => {
                    out.u8(info);
                    out.u8(0);
                    out.u16(shndx);
                    out.word(value);
                    out.word(0);
                }
                Class::ELF32 => {
                    out.word(value);
                    out.word(0);
                    out.u8(info);
                    out.u8(0);
                    out.u16(shndx);
                }
            }
        }
        debug_assert_eq!(out.buf.len(), dynstr_offset);

        // ---- .dynstr ----
        out.buf.extend_from_slice(&dynstr.bytes);

        // ---- .dynamic ----
        out.pad_to(dynamic_offset);
        if self.dynamic {
            for off in &needed {
                out.sword(DT_NEEDED);
                out.word(*off as u64);
            }
            if let Some(off) = rpath {
                out.sword(DT_RPATH);
                out.word(off as u64);
            }
            if let Some(off) = runpath {
                out.sword(DT_RUNPATH);
                out.word(off as u64);
            }
            for (tag, val) in [
                (DT_STRTAB, dynstr_offset),
                (DT_SYMTAB, dynsym_offset),
                (DT_STRSZ, dynstr.bytes.len()),
                (DT_SYMENT, l.sym_size()),
            ] {
                out.sword(tag);
                out.word(val as u64);
            }
            for _ in 0..=self.spare_nulls {
                out.sword(DT_NULL);
                out.word(0);
            }
        }
        debug_assert_eq!(out.buf.len(), shstrtab_offset);

        // ---- .shstrtab ----
        out.buf.extend_from_slice(&shstr.bytes);

        // ---- Section headers ----
        out.pad_to(shdrs_offset);
        let dynstr_index = 1 + usize::from(self.interp.is_some()) + 1;
        let shdr = |out: &mut Out,
                    name: usize,
                    sh_type: u32,
                    offset: usize,
                    size: usize,
                    link: usize,
                    entsize: usize| {
            out.u32(name as u32);
            out.u32(sh_type);
            out.word(0); // sh_flags
            out.word(offset as u64); // sh_addr
            out.word(offset as u64);
            out.word(size as u64);
            out.u32(link as u32);
            out.u32(0); // sh_info
            out.word(1); // sh_addralign
            out.word(entsize as u64);
        };
        out.buf.resize(shdrs_offset + shdr_size, 0); // SHN_UNDEF
        if self.interp.is_some() {
            shdr(&mut out, sh_interp, SHT_PROGBITS, interp_offset, interp_len, 0, 0);
        }
        shdr(
            &mut out,
            sh_dynsym,
            SHT_DYNSYM,
            dynsym_offset,
            dynsym_len,
            dynstr_index,
            l.sym_size(),
        );
        shdr(&mut out, sh_dynstr, SHT_STRTAB, dynstr_offset, dynstr.bytes.len(), 0, 0);
        if self.dynamic {
            shdr(
                &mut out,
                sh_dynamic,
                SHT_DYNAMIC,
                dynamic_offset,
                dynamic_len,
                dynstr_index,
                l.dyn_size(),
            );
        }
        shdr(
            &mut out,
            sh_shstrtab,
            SHT_STRTAB,
            shstrtab_offset,
            shstr.bytes.len(),
            0,
            0,
        );
        debug_assert_eq!(out.buf.len(), file_len);

        out.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_identifies_layout() {
        let elf = Fixture::new(Layout::new(Class::ELF32, AnyEndian::Big)).build();
        assert_eq!(&elf[0..4], b"\x7fELF");
        assert_eq!(elf[4], ELFCLASS32);
        assert_eq!(elf[5], ELFDATA2MSB);
        // e_type is big-endian ET_DYN
        assert_eq!(&elf[16..18], &[0, 3]);
    }

    #[test]
    fn dynstr_contains_all_names() {
        let fixture = Fixture::default();
        let elf = fixture.build();
        let elf_str = String::from_utf8_lossy(&elf);
        for sym in &fixture.symbols {
            assert!(elf_str.contains(sym.name), "dynstr missing symbol: {}", sym.name);
        }
        assert!(elf_str.contains("libc.so.6"));
    }

    #[test]
    fn tail_merge_reuses_suffix() {
        let mut tab = StrTab::new(true);
        let long = tab.add("foo__gmon_start__");
        let short = tab.add("__gmon_start__");
        assert_eq!(short, long + 3);
        assert_eq!(tab.bytes.len(), 1 + "foo__gmon_start__".len() + 1);
    }
}
