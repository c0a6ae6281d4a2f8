//! Filesystem layout of the project the toolchain is provisioned into.

use std::{
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use crate::RepositorySpec;

/// Project root, two levels above this crate (`test-tools/build-wasi-sdk`)
pub static PROJECT_ROOT: LazyLock<PathBuf> =
    LazyLock::new(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("../.."));
/// Shared download cache, kept across runs
pub static CACHE_DIR: LazyLock<PathBuf> = LazyLock::new(|| env::temp_dir().join("build_wasi_sdk"));

/// Resolves every path the pipeline reads or writes
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    cache_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(PROJECT_ROOT.clone(), CACHE_DIR.clone())
    }
}

impl Layout {
    /// Layout rooted at `root`, downloading archives into `cache_dir`
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where a repository is unpacked
    #[must_use]
    pub fn store_dir(&self, repo: &RepositorySpec) -> PathBuf {
        self.root.join(&repo.store_dir)
    }

    /// Directory holding the patch files
    #[must_use]
    pub fn patches_dir(&self) -> PathBuf {
        self.root.join("test-tools/build-wasi-sdk/patches")
    }

    /// Installation root for the built toolchain
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.root.join("test-tools")
    }

    /// Include directory of the installed sysroot
    #[must_use]
    pub fn sysroot_include_dir(&self) -> PathBuf {
        self.install_dir().join("wasi-sdk/share/wasi-sysroot/include")
    }
}
