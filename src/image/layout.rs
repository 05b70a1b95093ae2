// layout.rs: class and byte-order aware encoding for in-place writes
//
// Reading goes through the `elf` crate; this side only turns values back
// into the bytes a given file expects. ELF32 and ELF64 differ in word size
// and the byte order is chosen per file. `Layout` captures both, so the
// planner never branches on class or endianness itself.

use std::fmt;

use elf::endian::AnyEndian;
use elf::file::Class;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub class: Class,
    pub endian: AnyEndian,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.class {
            Class::ELF32 => "ELF32",
            Class::ELF64 => "ELF64",
        };
        let endian = match self.endian {
            AnyEndian::Little => "little-endian",
            AnyEndian::Big => "big-endian",
        };
        write!(f, "{class} {endian}")
    }
}

impl Layout {
    pub fn new(class: Class, endian: AnyEndian) -> Self {
        Self { class, endian }
    }

    /// Size of an address/offset/`Xword` field.
    pub fn word_size(&self) -> usize {
        match self.class {
            Class::ELF32 => 4,
            Class::ELF64 => 8,
        }
    }

    pub fn sym_size(&self) -> usize {
        match self.class {
            Class::ELF32 => 16,
            Class::ELF64 => 24,
        }
    }

    /// Size of one dynamic entry: a signed tag plus a value, each one word.
    pub fn dyn_size(&self) -> usize {
        2 * self.word_size()
    }

    pub fn u16_bytes(&self, value: u16) -> Vec<u8> {
        match self.endian {
            AnyEndian::Little => value.to_le_bytes().to_vec(),
            AnyEndian::Big => value.to_be_bytes().to_vec(),
        }
    }

    pub fn u32_bytes(&self, value: u32) -> Vec<u8> {
        match self.endian {
            AnyEndian::Little => value.to_le_bytes().to_vec(),
            AnyEndian::Big => value.to_be_bytes().to_vec(),
        }
    }

    fn u64_bytes(&self, value: u64) -> Vec<u8> {
        match self.endian {
            AnyEndian::Little => value.to_le_bytes().to_vec(),
            AnyEndian::Big => value.to_be_bytes().to_vec(),
        }
    }

    /// Encode an unsigned word, or `None` if it does not fit in an ELF32 word.
    pub fn word_bytes(&self, value: u64) -> Option<Vec<u8>> {
        match self.class {
            Class::ELF32 => u32::try_from(value).ok().map(|v| self.u32_bytes(v)),
            Class::ELF64 => Some(self.u64_bytes(value)),
        }
    }

    /// Encode a signed word (a dynamic tag), or `None` if it does not fit in
    /// an ELF32 word.
    pub fn sword_bytes(&self, value: i64) -> Option<Vec<u8>> {
        match self.class {
            Class::ELF32 => i32::try_from(value)
                .ok()
                .map(|v| self.u32_bytes(v as u32)),
            Class::ELF64 => Some(self.u64_bytes(value as u64)),
        }
    }
}
