//! Writer: puts a patched image on disk with an atomic replace.
//!
//! The image goes to a hidden sibling temp file, is flushed to stable
//! storage, takes over the permission bits and ownership of the file it
//! replaces, and is then renamed over the destination. A reader of the
//! destination sees either the old file or the new one, never a mix.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::image::ElfImage;
use crate::{Error, Result};

/// Write `image` to `dest`, replacing it atomically.
///
/// Permissions and ownership come from `dest` if it exists, otherwise from
/// `template` (normally the file the image was read from).
pub fn write(image: ElfImage, dest: &Path, template: &Path, verbose: bool) -> Result<()> {
    let failure = |path: &Path, source: io::Error| Error::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    if image.len() != image.loaded_len() {
        return Err(failure(
            dest,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "image is {} bytes but was loaded as {}",
                    image.len(),
                    image.loaded_len()
                ),
            ),
        ));
    }

    // Replace the target of a symlink, not the link itself.
    let dest = fs::canonicalize(dest).unwrap_or_else(|_| dest.to_path_buf());
    let meta = fs::metadata(&dest)
        .or_else(|_| fs::metadata(template))
        .map_err(|e| failure(template, e))?;

    let tmp_path = temp_path(&dest);
    if verbose {
        eprintln!("writing {} via {}", dest.display(), tmp_path.display());
    }
    let _ = fs::remove_file(&tmp_path);

    let result = write_temp(&tmp_path, image.as_bytes(), &meta)
        .and_then(|()| fs::rename(&tmp_path, &dest));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(failure(&dest, e));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// `.<name>.elfdd.tmp` next to `path`, so the rename never crosses a
/// filesystem boundary.
fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.elfdd.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ))
}

fn write_temp(tmp_path: &Path, data: &[u8], meta: &Metadata) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(tmp_path)?;
    file.write_all(data)?;
    file.flush()?;

    // Ownership before mode: chown clears the setuid/setgid bits.
    let current = file.metadata()?;
    if current.uid() != meta.uid() || current.gid() != meta.gid() {
        let ret = unsafe { libc::fchown(file.as_raw_fd(), meta.uid(), meta.gid()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    file.set_permissions(fs::Permissions::from_mode(meta.mode() & 0o7777))?;
    file.sync_all()
}
