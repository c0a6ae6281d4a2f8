use anyhow::Context;
use tokio::process::Command;
use tracing::info;

use crate::{
    CommandRunner, Layout, ProvisionError, Registry,
    flags::{Flags, Stage},
    registry::{EMSCRIPTEN, WASI_LIBC, WASI_SDK},
};

mod install;
mod patch;

pub use install::{HEADERS, HeaderMapping};
pub use patch::apply_patch;

/// Patch, build and install the WASI SDK from its already unpacked checkout.
///
/// Each of the three phases is skipped when its marker exists in the SDK store directory,
/// and marked only once it has fully completed.
///
/// # Errors
/// If the SDK has not been fetched, or if any phase fails.
pub async fn build_and_install<R: CommandRunner>(
    registry: &Registry,
    layout: &Layout,
    runner: &R,
) -> anyhow::Result<()> {
    let store_dir = layout.store_dir(registry.get(WASI_SDK)?);
    if !store_dir.is_dir() {
        return Err(ProvisionError::StoreDirMissing(store_dir).into());
    }
    let flags = Flags::new(&store_dir);

    if flags.is_done(Stage::Patched).await {
        info!("bypass the patch phase");
    } else {
        info!("patch {WASI_LIBC} and {WASI_SDK}");
        let patches = layout.patches_dir();
        apply_patch(
            runner,
            &patches.join("wasi_libc.patch"),
            &layout.store_dir(registry.get(WASI_LIBC)?),
        )
        .await?;
        apply_patch(runner, &patches.join("wasi_sdk.patch"), &store_dir).await?;
        flags.mark_done(Stage::Patched).await?;
    }

    if flags.is_done(Stage::Built).await {
        info!("bypass the build phase");
    } else {
        info!("build {WASI_SDK}, this takes a while");
        runner
            .run(Command::new("make").arg("build").current_dir(&store_dir))
            .await
            .with_context(|| format!("build {WASI_SDK} failed"))?;
        flags.mark_done(Stage::Built).await?;
    }

    if flags.is_done(Stage::Installed).await {
        info!("bypass the install phase");
    } else {
        info!("install into '{}'", layout.install_dir().display());
        install::install(
            &store_dir,
            &layout.store_dir(registry.get(EMSCRIPTEN)?),
            layout,
        )
        .await?;
        flags.mark_done(Stage::Installed).await?;
    }

    Ok(())
}
