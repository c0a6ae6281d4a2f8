//! Merging directory moves and copies.
//!
//! Both walk the source tree and overlay it on the destination: directories are created as
//! needed, existing files and links are replaced, anything else already in the destination
//! is left alone. Symlinks are recreated rather than followed.

use std::{
    fs::{self, FileType},
    io,
    path::Path,
};

use anyhow::Context;
use walkdir::WalkDir;

/// Move everything under `src` into `dst`, merging with existing content
///
/// # Errors
/// If walking `src` or writing into `dst` fails.
pub fn move_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    overlay(src, dst, |from, to, file_type| match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Extraction happens in the system temp dir, which is often a different mount
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_entry(from, to, file_type)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    })
}

/// Copy everything under `src` into `dst`, merging with existing content
///
/// # Errors
/// If walking `src` or writing into `dst` fails.
pub fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    overlay(src, dst, copy_entry)
}

fn overlay(
    src: &Path,
    dst: &Path,
    mut place: impl FnMut(&Path, &Path, FileType) -> io::Result<()>,
) -> anyhow::Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        let target = dst.join(entry.path().strip_prefix(src)?);

        if file_type.is_dir() {
            if target.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
                fs::remove_file(&target)?;
            }
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
            continue;
        }

        clear(&target)?;
        place(entry.path(), &target, file_type).with_context(|| {
            format!("{} -> {}", entry.path().display(), target.display())
        })?;
    }

    Ok(())
}

/// Remove whatever occupies `path` so a file can be placed there
fn clear(path: &Path) -> io::Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_entry(from: &Path, to: &Path, file_type: FileType) -> io::Result<()> {
    #[cfg(unix)]
    if file_type.is_symlink() {
        return std::os::unix::fs::symlink(fs::read_link(from)?, to);
    }
    #[cfg(not(unix))]
    let _ = file_type;

    fs::copy(from, to).map(|_| ())
}
