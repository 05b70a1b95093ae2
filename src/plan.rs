//! Patch planner: turns a request into a list of bounded byte writes.
//!
//! Planning reads the image but never mutates it. Every feasibility error
//! is raised here, so the executor only ever sees plans that fit.

use crate::image::consts::{DT_NULL, DT_RUNPATH};
use crate::image::{ElfImage, Region, Span};
use crate::slots::Candidate;
use crate::{Error, Result};

/// The changes a caller asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub interpreter: Option<String>,
    pub runpath: Option<String>,
}

impl Request {
    pub fn is_empty(&self) -> bool {
        self.interpreter.is_none() && self.runpath.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Interpreter,
    RunpathString,
    SymbolName,
    DynamicEntry,
}

/// One bounded write into a validated region of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub region: Region,
    pub offset: usize,
    pub bytes: Vec<u8>,
    pub purpose: Purpose,
}

impl Write {
    pub fn span(&self) -> Span {
        Span::new(self.offset, self.bytes.len())
    }
}

/// How the dynamic array comes to reference the new RUNPATH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicEdit {
    /// An existing `DT_RUNPATH` gets a new value.
    Rewrite { index: usize },
    /// A spare `DT_NULL` becomes `DT_RUNPATH`.
    Convert { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunpathPlan {
    pub candidate: Candidate,
    pub dynamic: DynamicEdit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Writes in the order they are applied.
    pub writes: Vec<Write>,
    pub interpreter: Option<String>,
    pub runpath: Option<RunpathPlan>,
}

/// Decide whether `request` can be satisfied in place and, if so, how.
///
/// `candidates` must come from [`crate::slots::find_candidates`] on the
/// same image; the first one large enough wins.
pub fn plan(image: &ElfImage, candidates: &[Candidate], request: &Request) -> Result<Plan> {
    if request.is_empty() {
        return Err(Error::NothingToPatch);
    }
    if request.interpreter.as_deref().is_some_and(|s| s.contains('\0')) {
        return Err(Error::EmbeddedNul {
            what: "interpreter path",
        });
    }
    if request.runpath.as_deref().is_some_and(|s| s.contains('\0')) {
        return Err(Error::EmbeddedNul { what: "RUNPATH" });
    }

    let mut writes = Vec::new();

    if let Some(interp) = &request.interpreter {
        writes.push(plan_interpreter(image, interp)?);
    }

    let runpath = match &request.runpath {
        Some(runpath) => {
            let (rp, rp_writes) = plan_runpath(image, candidates, runpath)?;
            writes.extend(rp_writes);
            Some(rp)
        }
        None => None,
    };

    for (i, a) in writes.iter().enumerate() {
        for b in &writes[i + 1..] {
            if a.span().overlaps(&b.span()) {
                return Err(Error::MalformedHeaders(format!(
                    "{:?} and {:?} regions overlap at {:#x}",
                    a.purpose, b.purpose, b.offset
                )));
            }
        }
    }

    Ok(Plan {
        writes,
        interpreter: request.interpreter.clone(),
        runpath,
    })
}

/// `value` followed by zeros up to `len` bytes.
fn zero_filled(value: &str, len: usize) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.resize(len, 0);
    bytes
}

fn plan_interpreter(image: &ElfImage, interp: &str) -> Result<Write> {
    let span = image.interp_span().ok_or(Error::NoInterpreterSegment)?;
    let requested = interp.len() + 1;
    if requested > span.len {
        return Err(Error::InterpreterTooLong {
            requested,
            capacity: span.len,
        });
    }
    Ok(Write {
        region: Region::Interp,
        offset: span.offset,
        bytes: zero_filled(interp, span.len),
        purpose: Purpose::Interpreter,
    })
}

fn plan_runpath(
    image: &ElfImage,
    candidates: &[Candidate],
    runpath: &str,
) -> Result<(RunpathPlan, Vec<Write>)> {
    let layout = image.layout();
    let requested = runpath.len() + 1;
    let candidate = match candidates.iter().find(|c| c.capacity() >= requested) {
        Some(c) => c.clone(),
        None => {
            let capacity = candidates
                .iter()
                .map(Candidate::capacity)
                .max()
                .ok_or(Error::NoSacrificialSymbol)?;
            return Err(Error::RunpathTooLong {
                requested,
                capacity,
            });
        }
    };

    let entries = image.dynamic_entries();
    let (dynamic, entry) = match image.find_dynamic(DT_RUNPATH) {
        Some(e) => (DynamicEdit::Rewrite { index: e.index }, e),
        None => {
            // The array must stay terminated, so only a DT_NULL with
            // another DT_NULL after it can be taken.
            let spare = entries
                .windows(2)
                .find(|pair| pair[0].tag == DT_NULL && pair[1].tag == DT_NULL)
                .map(|pair| pair[0])
                .ok_or(Error::NoSpareDynamicEntry)?;
            (DynamicEdit::Convert { index: spare.index }, spare)
        }
    };

    let unencodable = || Error::MalformedHeaders("value does not fit in an ELF32 word".into());
    let mut entry_bytes = layout.sword_bytes(DT_RUNPATH).ok_or_else(unencodable)?;
    entry_bytes.extend(layout.word_bytes(candidate.str_offset).ok_or_else(unencodable)?);

    // st_name is the first field of a symbol in both classes; offset 0 of
    // the string table is always the empty string.
    let writes = vec![
        Write {
            region: Region::DynStr,
            offset: candidate.span.offset,
            bytes: zero_filled(runpath, candidate.span.len),
            purpose: Purpose::RunpathString,
        },
        Write {
            region: Region::DynSym,
            offset: candidate.symbol.span.offset,
            bytes: layout.u32_bytes(0),
            purpose: Purpose::SymbolName,
        },
        Write {
            region: Region::Dynamic,
            offset: entry.span.offset,
            bytes: entry_bytes,
            purpose: Purpose::DynamicEntry,
        },
    ];

    Ok((RunpathPlan { candidate, dynamic }, writes))
}
