//! Extract gzipped tarballs, dropping their top-level directory.

use std::{
    fs::File,
    io::BufReader,
    path::{Component, Path},
};

use anyhow::Context;
use flate2::bufread::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::{ProvisionError, tree};

/// Extract `archive` and move the contents of its `strip_prefix` directory into `dst`.
///
/// `dst` may already exist; unpacked files replace what is there. Extraction happens in a
/// temporary directory that is removed whatever the outcome.
///
/// # Errors
/// If any entry would land outside the extraction directory, if the archive has no
/// `strip_prefix` directory, or on I/O failure.
pub async fn unpack(archive: &Path, strip_prefix: &str, dst: &Path) -> anyhow::Result<()> {
    let archive = archive.to_owned();
    let strip_prefix = strip_prefix.to_owned();
    let dst = dst.to_owned();
    tokio::task::spawn_blocking(move || unpack_blocking(&archive, &strip_prefix, &dst)).await?
}

fn unpack_blocking(archive: &Path, strip_prefix: &str, dst: &Path) -> anyhow::Result<()> {
    let tmp = tempfile::Builder::new().prefix("build_wasi_sdk-").tempdir()?;

    // Every entry is checked before anything is written
    check_entries(archive)?;
    debug!("extract {} to {}", archive.display(), tmp.path().display());
    open(archive)?
        .unpack(tmp.path())
        .with_context(|| format!("extract {}", archive.display()))?;

    let prefix_dir = tmp.path().join(strip_prefix);
    if !prefix_dir.is_dir() {
        return Err(ProvisionError::MissingStripPrefix {
            archive: archive.to_owned(),
            prefix: strip_prefix.to_owned(),
        }
        .into());
    }

    debug!("move {} to {}", prefix_dir.display(), dst.display());
    tree::move_tree(&prefix_dir, dst)
}

fn open(archive: &Path) -> anyhow::Result<Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
}

fn check_entries(archive: &Path) -> anyhow::Result<()> {
    let mut tar = open(archive)?;
    for entry in tar.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        if escapes_root(&path) {
            return Err(ProvisionError::PathTraversal {
                archive: archive.to_owned(),
                entry: path.into_owned(),
            }
            .into());
        }
    }
    Ok(())
}

/// Whether joining `path` onto a directory could resolve outside of it
fn escapes_root(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return true,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::Normal(_) => depth += 1,
        }
    }
    false
}
