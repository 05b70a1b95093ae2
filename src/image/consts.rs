// ELF constants used by the image model and the patcher.

pub use elf::abi::{
    DT_NEEDED, DT_NULL, DT_RPATH, DT_RUNPATH, DT_SONAME, DT_STRSZ, DT_STRTAB, DT_SYMENT,
    DT_SYMTAB, EI_CLASS, EI_DATA, EI_NIDENT, ELFCLASS32, ELFCLASS64, ELFDATA2LSB, ELFDATA2MSB,
    PT_DYNAMIC, PT_INTERP, PT_LOAD, SHN_UNDEF, SHT_DYNSYM, SHT_STRTAB,
};

// Filter and audit tags.
pub const DT_CONFIG: i64 = 0x6fff_fefa;
pub const DT_DEPAUDIT: i64 = 0x6fff_fefb;
pub const DT_AUDIT: i64 = 0x6fff_fefc;
pub const DT_AUXILIARY: i64 = 0x7fff_fffd;
pub const DT_FILTER: i64 = 0x7fff_ffff;

/// Dynamic tags whose value is an offset into the dynamic string table.
pub const STRING_VALUED_TAGS: [i64; 9] = [
    DT_NEEDED,
    DT_SONAME,
    DT_RPATH,
    DT_RUNPATH,
    DT_CONFIG,
    DT_DEPAUDIT,
    DT_AUDIT,
    DT_AUXILIARY,
    DT_FILTER,
];
