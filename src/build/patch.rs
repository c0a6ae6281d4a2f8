use std::{
    fs::File,
    io::{self, Seek, SeekFrom},
    path::Path,
    process::Stdio,
};

use anyhow::Context;
use tokio::{fs, process::Command};
use tracing::debug;

use crate::{CommandRunner, ProvisionError};

/// Apply `patch_file` to the tree at `target` with `patch -f -p1`.
///
/// A `--dry-run` goes first; the real application only happens if it succeeds, reading the
/// patch from the same handle rewound to the start.
///
/// # Errors
/// If the patch file is missing or either `patch` invocation fails.
pub async fn apply_patch<R: CommandRunner>(
    runner: &R,
    patch_file: &Path,
    target: &Path,
) -> anyhow::Result<()> {
    if !fs::try_exists(patch_file).await? {
        return Err(ProvisionError::PatchNotFound(patch_file.to_owned()).into());
    }
    let mut patch = File::open(patch_file)?;

    debug!("patch dry-run {}", target.display());
    runner
        .run(&mut patch_command(&patch, target, true)?)
        .await
        .with_context(|| format!("patch dry-run {} failed", target.display()))?;

    patch.seek(SeekFrom::Start(0))?;
    debug!("patch {} with {}", target.display(), patch_file.display());
    runner
        .run(&mut patch_command(&patch, target, false)?)
        .await
        .with_context(|| format!("patch {} failed", target.display()))?;

    Ok(())
}

fn patch_command(patch: &File, target: &Path, dry_run: bool) -> io::Result<Command> {
    let mut command = Command::new("patch");
    command
        .args(["-f", "-p1"])
        .current_dir(target)
        // Cloned handles share the file offset with `patch`
        .stdin(Stdio::from(patch.try_clone()?));
    if dry_run {
        command.arg("--dry-run");
    }
    Ok(command)
}
