//! Sentinel files recording which stages already completed.
//!
//! A marker is an empty file next to (or inside) the directory the stage produced. Its
//! presence means the stage is done; removing it by hand forces the stage to run again.

use std::path::{Path, PathBuf};

use strum::EnumIter;
use tokio::fs;

use crate::{Layout, Registry, registry::WASI_SDK};

/// Pipeline stages that leave a marker behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, strum::Display)]
pub enum Stage {
    /// Archive fetched, verified and unpacked
    #[strum(serialize = "DOWNLOADED")]
    Downloaded,
    /// Patches applied to the toolchain sources
    #[strum(serialize = "PATCHED")]
    Patched,
    /// `make build` finished
    #[strum(serialize = "BUILDED")]
    Built,
    /// Build output and headers copied into the install root
    #[strum(serialize = "INSTALLED")]
    Installed,
}

/// Markers of one store directory
#[derive(Debug, Clone)]
pub struct Flags {
    dir: PathBuf,
}

impl Flags {
    /// Markers living in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Marker file for a stage
    #[must_use]
    pub fn path(&self, stage: Stage) -> PathBuf {
        self.dir.join(stage.to_string())
    }

    /// Whether the stage's marker exists
    pub async fn is_done(&self, stage: Stage) -> bool {
        fs::try_exists(self.path(stage)).await.unwrap_or(false)
    }

    /// Record the stage as complete.
    ///
    /// The marker is created under a temporary name, synced, then renamed into place, so it
    /// only ever appears whole.
    ///
    /// # Errors
    /// If the marker cannot be written.
    pub async fn mark_done(&self, stage: Stage) -> anyhow::Result<()> {
        let marker = self.path(stage);
        let partial = self.dir.join(format!(".{stage}.partial"));
        let file = fs::File::create(&partial).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, &marker).await?;
        Ok(())
    }
}

/// Overall progress of the toolchain, ordered from least to most complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ToolchainState {
    /// At least one repository has not been fetched
    NotFetched,
    /// Every repository is fetched and unpacked
    Fetched,
    /// Toolchain sources are patched
    Patched,
    /// Toolchain is built
    Built,
    /// Toolchain is installed
    Installed,
}

impl ToolchainState {
    /// Derive the state from the markers on disk.
    ///
    /// A stage only counts if every earlier stage is also marked.
    pub async fn read(registry: &Registry, layout: &Layout) -> Self {
        for repo in registry.iter() {
            if !is_fetched(&layout.store_dir(repo)).await {
                return Self::NotFetched;
            }
        }
        let Ok(sdk) = registry.get(WASI_SDK) else {
            return Self::Fetched;
        };
        let flags = Flags::new(layout.store_dir(sdk));

        let mut state = Self::Fetched;
        for (stage, reached) in [
            (Stage::Patched, Self::Patched),
            (Stage::Built, Self::Built),
            (Stage::Installed, Self::Installed),
        ] {
            if !flags.is_done(stage).await {
                break;
            }
            state = reached;
        }
        state
    }
}

/// Whether a store directory holds a completed download
pub async fn is_fetched(store_dir: &Path) -> bool {
    store_dir.is_dir() && Flags::new(store_dir).is_done(Stage::Downloaded).await
}
