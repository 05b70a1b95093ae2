//! Slot finder: locates dynamic symbol names whose string-table bytes can be
//! reclaimed to hold a new RUNPATH.
//!
//! Only a fixed allow-list of linker artifacts is ever considered. Both are
//! weak undefined references emitted by the C runtime startup files that
//! nothing needs at run time in an ordinary build.

use crate::image::consts::{SHN_UNDEF, STRING_VALUED_TAGS};
use crate::image::{ElfImage, Span, Symbol};

pub const GMON_START: &str = "__gmon_start__";
pub const ITM_DEREGISTER: &str = "_ITM_deregisterTMCloneTable";

/// Symbol names that may be sacrificed, in no particular order.
pub const SACRIFICIAL_SYMBOLS: [&str; 2] = [GMON_START, ITM_DEREGISTER];

/// A symbol whose name bytes can be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub symbol: Symbol,
    pub name: &'static str,
    /// Offset of the name inside the dynamic string table.
    pub str_offset: u64,
    /// File bytes of the name including its NUL terminator.
    pub span: Span,
}

impl Candidate {
    /// Bytes available for a replacement string: the span minus the
    /// terminator it carried.
    pub fn capacity(&self) -> usize {
        self.span.len - 1
    }
}

/// Find every reclaimable sacrificial symbol, largest capacity first.
/// Ties keep symbol table order.
pub fn find_candidates(image: &ElfImage) -> Vec<Candidate> {
    let symbols = image.symbols();
    let dynstr = image.dynstr_span();
    let profiled = is_profiled(image);

    let mut candidates: Vec<Candidate> = symbols
        .iter()
        .filter(|sym| sym.shndx == SHN_UNDEF && sym.index != 0)
        .filter_map(|sym| {
            let bytes = image.string_at(u64::from(sym.name))?;
            let name = *SACRIFICIAL_SYMBOLS.iter().find(|n| n.as_bytes() == bytes)?;
            if name == GMON_START && profiled {
                return None;
            }
            let span = Span::new(dynstr.offset + sym.name as usize, bytes.len() + 1);
            Some(Candidate {
                symbol: *sym,
                name,
                str_offset: u64::from(sym.name),
                span,
            })
        })
        .filter(|c| exclusively_owned(image, &symbols, c))
        .collect();

    candidates.sort_by(|a, b| b.capacity().cmp(&a.capacity()));
    candidates
}

/// An object built with `-pg` calls `mcount`, and then `__gmon_start__`
/// is live.
fn is_profiled(image: &ElfImage) -> bool {
    let span = image.dynstr_span();
    image.as_bytes()[span.offset..span.end()]
        .windows(b"mcount".len())
        .any(|w| w == b"mcount")
}

/// True if nothing but the candidate's own symbol references any byte of
/// its span. Linkers may merge a string into the tail of a longer one, in
/// which case the bytes are shared and must stay.
fn exclusively_owned(image: &ElfImage, symbols: &[Symbol], candidate: &Candidate) -> bool {
    let dynstr = image.dynstr_span();
    let overlaps = |offset: u64| {
        image.string_at(offset).is_some_and(|s| {
            let other = Span::new(dynstr.offset + offset as usize, s.len() + 1);
            other.overlaps(&candidate.span)
        })
    };

    let symbol_refs = symbols
        .iter()
        .filter(|s| s.index != candidate.symbol.index)
        .map(|s| u64::from(s.name));
    let dynamic_refs = image
        .dynamic_entries()
        .into_iter()
        .filter(|e| STRING_VALUED_TAGS.contains(&e.tag))
        .map(|e| e.val);

    !symbol_refs.chain(dynamic_refs).any(overlaps)
}
