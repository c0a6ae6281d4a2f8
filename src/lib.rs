//! Provisioning of the pinned WASI SDK used by the test tools.
//!
//! Sources are fetched into a shared cache, verified against pinned hashes, unpacked into the
//! project's `core/deps`, patched, built with the SDK's own `make build`, and installed under
//! `test-tools`. Every stage leaves a marker file so re-running only redoes unfinished work.

use std::iter;

use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

mod build;
mod error;
mod fetch;
mod flags;
mod layout;
mod registry;
mod tree;
mod unpack;

pub use build::{HEADERS, HeaderMapping, apply_patch, build_and_install};
pub use error::ProvisionError;
pub use fetch::{HttpTransport, Transport, ensure_repository, sha256_file};
pub use flags::{Flags, Stage, ToolchainState, is_fetched};
pub use layout::{CACHE_DIR, Layout, PROJECT_ROOT};
pub use registry::{EMSCRIPTEN, Registry, RepositorySpec, WASI_LIBC, WASI_SDK};
pub use unpack::unpack;

/// Run a given command with common error handling behavior
///
/// # Errors
///
/// Returns error if the command fails for any reason.
pub async fn run(command: &mut Command) -> anyhow::Result<()> {
    let command_string = iter::once(command.as_std().get_program())
        .chain(command.as_std().get_args())
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("run `{command_string}`");

    let status = command.status().await.with_context({
        let command_string = command_string.clone();
        move || command_string
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(ProvisionError::CommandFailed {
            command: command_string,
            status,
        }
        .into())
    }
}

/// Executes the external tools the pipeline shells out to
pub trait CommandRunner {
    /// Run the command to completion, failing on launch errors or a non-zero exit
    fn run(&self, command: &mut Command) -> impl Future<Output = anyhow::Result<()>>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &mut Command) -> anyhow::Result<()> {
        run(command).await
    }
}

/// Fetch every registered repository in order, then patch, build and install the SDK.
///
/// Stops at the first failure.
///
/// # Errors
/// If any stage fails.
pub async fn provision<T: Transport, R: CommandRunner>(
    registry: &Registry,
    layout: &Layout,
    transport: &T,
    runner: &R,
) -> anyhow::Result<()> {
    for repo in registry.iter() {
        ensure_repository(registry, layout, transport, &repo.name).await?;
    }
    build_and_install(registry, layout, runner).await
}
