//! Error taxonomy for loading, planning, patching and writing an ELF image.
//!
//! Every variant except `WriteFailure` is raised before anything touches
//! storage, so a failed run always leaves the input file unchanged.

use std::io;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not an ELF file: {0}")]
    NotAnElf(String),

    #[error("unsupported ELF format: {0}")]
    UnsupportedClass(String),

    #[error("malformed ELF headers: {0}")]
    MalformedHeaders(String),

    #[error("no dynamic section: {0}")]
    NoDynamicSection(String),

    #[error("no PT_INTERP segment to rewrite")]
    NoInterpreterSegment,

    #[error(
        "interpreter path needs {requested} bytes (with NUL) but PT_INTERP holds {capacity}"
    )]
    InterpreterTooLong { requested: usize, capacity: usize },

    #[error(
        "no reclaimable dynamic symbol name found \
         (looked for __gmon_start__ and _ITM_deregisterTMCloneTable)"
    )]
    NoSacrificialSymbol,

    #[error(
        "RUNPATH needs {requested} bytes (with NUL) but the largest reclaimable \
         symbol name holds {capacity}"
    )]
    RunpathTooLong { requested: usize, capacity: usize },

    #[error(
        "no spare dynamic entry: DT_RUNPATH is absent and there is no DT_NULL \
         followed by another DT_NULL to convert"
    )]
    NoSpareDynamicEntry,

    #[error("nothing to patch: neither an interpreter nor a RUNPATH was requested")]
    NothingToPatch,

    #[error("{what} contains a NUL byte")]
    EmbeddedNul { what: &'static str },

    #[error("failed to read {}: {source}", path.display())]
    ReadFailure { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailure { path: PathBuf, source: io::Error },

    /// A planned write fell outside the span it was validated against.
    /// Plans are bounds-checked up front, so this indicates a bug.
    #[error("internal error: write of {len} bytes at {offset:#x} is outside its region")]
    PatchOutOfBounds { offset: usize, len: usize },
}

impl Error {
    /// Process exit code for the CLI. Each kind gets its own code so
    /// scripts can tell them apart.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NotAnElf(_) => 2,
            Error::UnsupportedClass(_) => 3,
            Error::MalformedHeaders(_) => 4,
            Error::NoDynamicSection(_) => 5,
            Error::NoInterpreterSegment => 6,
            Error::InterpreterTooLong { .. } => 7,
            Error::NoSacrificialSymbol => 8,
            Error::RunpathTooLong { .. } => 9,
            Error::NoSpareDynamicEntry => 10,
            Error::NothingToPatch => 11,
            Error::EmbeddedNul { .. } => 12,
            Error::ReadFailure { .. } => 13,
            Error::WriteFailure { .. } => 14,
            Error::PatchOutOfBounds { .. } => 70,
        }
    }
}
