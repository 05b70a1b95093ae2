//! Rewrite the program interpreter and RUNPATH of a dynamically linked ELF
//! object without moving, resizing or appending anything.
//!
//! The interpreter is rewritten inside its existing `PT_INTERP` segment. A
//! new RUNPATH is stored in the dynamic string table bytes of a symbol name
//! nobody needs (`__gmon_start__` or `_ITM_deregisterTMCloneTable`); that
//! symbol is renamed to the empty string so the dynamic linker no longer
//! finds it. The file keeps its exact length and every byte outside the
//! touched regions.
//!
//! The pipeline is load → find candidates → plan → apply → write. Every
//! feasibility check happens before the first byte changes, and the file
//! on disk is only ever replaced atomically.

pub mod apply;
pub mod error;
pub mod image;
pub mod plan;
pub mod slots;
pub mod write;

pub use error::{Error, Result};
pub use image::{ElfImage, Layout};
pub use plan::{DynamicEdit, Plan, Request};
pub use slots::Candidate;

use std::fs;
use std::path::{Path, PathBuf};

/// How `patch_file` runs.
#[derive(Debug, Clone, Default)]
pub struct PatchOptions<'a> {
    /// Write here instead of replacing the input.
    pub output: Option<&'a Path>,
    /// Plan and apply in memory only.
    pub dry_run: bool,
    pub verbose: bool,
}

/// What a successful `patch_file` did.
#[derive(Debug)]
pub struct Report {
    pub plan: Plan,
    pub destination: PathBuf,
    /// False for a dry run.
    pub written: bool,
}

/// The current dynamic-linking attributes of a file.
#[derive(Debug)]
pub struct Inspection {
    pub layout: Layout,
    pub size: usize,
    pub interpreter: Option<String>,
    pub runpath: Option<String>,
    pub rpath: Option<String>,
    pub candidates: Vec<Candidate>,
}

/// Read and validate an ELF file.
pub fn read_image(path: &Path) -> Result<ElfImage> {
    let data = fs::read(path).map_err(|source| Error::ReadFailure {
        path: path.to_path_buf(),
        source,
    })?;
    ElfImage::load(data)
}

/// Plan `request` against `image` and apply it in memory.
pub fn patch_image(
    mut image: ElfImage,
    request: &Request,
    verbose: bool,
) -> Result<(ElfImage, Plan)> {
    let candidates = slots::find_candidates(&image);
    if verbose {
        for c in &candidates {
            eprintln!(
                "candidate: {} at .dynstr+{:#x}, {} bytes",
                c.name,
                c.str_offset,
                c.capacity()
            );
        }
        if candidates.is_empty() {
            eprintln!("no reclaimable symbol names");
        }
    }

    let plan = plan::plan(&image, &candidates, request)?;
    if verbose {
        if let Some(rp) = &plan.runpath {
            eprintln!(
                "selected {} ({} bytes); dynamic entry: {:?}",
                rp.candidate.name,
                rp.candidate.capacity(),
                rp.dynamic
            );
        }
    }

    apply::apply(&mut image, &plan, verbose)?;
    Ok((image, plan))
}

/// Patch the file at `path`. On error the file is left untouched.
pub fn patch_file(path: &Path, request: &Request, opts: &PatchOptions) -> Result<Report> {
    let image = read_image(path)?;
    if opts.verbose {
        eprintln!(
            "loaded {}: {}, {} bytes",
            path.display(),
            image.layout(),
            image.len()
        );
    }

    let (image, plan) = patch_image(image, request, opts.verbose)?;
    if let Some(rp) = &plan.runpath {
        eprintln!(
            "warning: disabling dynamic symbol {} to store the new RUNPATH",
            rp.candidate.name
        );
    }

    let destination = opts.output.unwrap_or(path);
    if !opts.dry_run {
        write::write(image, destination, path, opts.verbose)?;
    }
    Ok(Report {
        plan,
        destination: destination.to_path_buf(),
        written: !opts.dry_run,
    })
}

/// Report the interpreter, RUNPATH and reclaim candidates of a file.
pub fn inspect_file(path: &Path) -> Result<Inspection> {
    let image = read_image(path)?;
    Ok(Inspection {
        layout: image.layout(),
        size: image.len(),
        interpreter: image.interpreter(),
        runpath: image.runpath(),
        rpath: image.rpath(),
        candidates: slots::find_candidates(&image),
    })
}
