//! Patch executor: applies a plan's writes to the in-memory image.

use crate::image::ElfImage;
use crate::plan::Plan;
use crate::Result;

/// Apply every write of `plan` to `image`, in plan order.
///
/// All writes are bounds-checked before the first byte changes, so an
/// error leaves the image exactly as it was.
pub fn apply(image: &mut ElfImage, plan: &Plan, verbose: bool) -> Result<()> {
    for w in &plan.writes {
        image.check_write(w.region, w.offset, w.bytes.len())?;
    }
    for w in &plan.writes {
        if verbose {
            eprintln!(
                "writing {} bytes at {:#x} ({:?})",
                w.bytes.len(),
                w.offset,
                w.purpose
            );
        }
        image.overwrite(w.region, w.offset, &w.bytes)?;
    }
    Ok(())
}
