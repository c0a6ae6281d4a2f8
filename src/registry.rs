//! Pinned source archives the toolchain is built from.

use std::path::PathBuf;

use url::Url;

use crate::ProvisionError;

/// Name of the toolchain checkout that gets patched and built
pub const WASI_SDK: &str = "wasi-sdk";
/// Name of the libc checkout nested in the toolchain checkout
pub const WASI_LIBC: &str = "wasi-libc";
/// Name of the checkout headers are borrowed from during install
pub const EMSCRIPTEN: &str = "emscripten";

/// Where to fetch one dependency from and where it lives once unpacked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    /// Logical name used for lookups
    pub name: String,
    /// Archive location
    pub url: String,
    /// Hex encoded SHA-256 of the archive
    pub sha256: String,
    /// Destination, relative to the project root
    pub store_dir: PathBuf,
    /// Top-level directory inside the archive that is dropped on unpack
    pub strip_prefix: String,
}

impl RepositorySpec {
    /// Create a new spec
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        sha256: impl Into<String>,
        store_dir: impl Into<PathBuf>,
        strip_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            sha256: sha256.into(),
            store_dir: store_dir.into(),
            strip_prefix: strip_prefix.into(),
        }
    }

    /// Parsed archive URL
    ///
    /// # Errors
    /// If the URL is malformed.
    pub fn parsed_url(&self) -> Result<Url, ProvisionError> {
        Url::parse(&self.url).map_err(|_| self.invalid_url())
    }

    /// File name the archive is cached under, the last segment of the URL path
    ///
    /// # Errors
    /// If the URL is malformed or its path has no final segment.
    pub fn archive_name(&self) -> Result<String, ProvisionError> {
        self.parsed_url()?
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| self.invalid_url())
    }

    fn invalid_url(&self) -> ProvisionError {
        ProvisionError::InvalidUrl {
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

/// Ordered, immutable lookup table of repositories
#[derive(Debug, Clone)]
pub struct Registry {
    repositories: Vec<RepositorySpec>,
}

impl Registry {
    /// Build a registry from specs, kept in the given order
    #[must_use]
    pub fn new(repositories: Vec<RepositorySpec>) -> Self {
        Self { repositories }
    }

    /// The pinned set used to build the test toolchain
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![
            RepositorySpec::new(
                "config",
                "https://git.savannah.gnu.org/cgit/config.git/snapshot/config-c179db1b6f2ae484bfca1e9f8bae273e3319fa7d.tar.gz",
                "6e29664a65277c10f73682893ad12a52e8ce8051a82ae839581d20c18da0d2cc",
                "core/deps/wasi-sdk/src/config",
                "config-c179db1b6f2ae484bfca1e9f8bae273e3319fa7d",
            ),
            RepositorySpec::new(
                EMSCRIPTEN,
                "https://github.com/emscripten-core/emscripten/archive/refs/tags/3.1.28.tar.gz",
                "0f8b25cac5b2a55007a45c5bfa2b918add1df90bf624bb47510d8bc887c39901",
                "core/deps/emscripten",
                "emscripten-3.1.28",
            ),
            RepositorySpec::new(
                "llvm-project",
                "https://github.com/llvm/llvm-project/archive/088f33605d8a61ff519c580a71b1dd57d16a03f8.tar.gz",
                "97db80c61c10ad7ffaffa2c14b413fb6e6537a523b574fd953c2ccd9be68d8bc",
                "core/deps/wasi-sdk/src/llvm-project",
                "llvm-project-088f33605d8a61ff519c580a71b1dd57d16a03f8",
            ),
            RepositorySpec::new(
                WASI_SDK,
                "https://github.com/WebAssembly/wasi-sdk/archive/b738c9d5530402ca145f2be495cda65b1e2a5389.tar.gz",
                "0bccaaa16dfdf006ea4f704ac749db65eba701b382e38a2b152f1d6f2b54bc75",
                "core/deps/wasi-sdk",
                "wasi-sdk-b738c9d5530402ca145f2be495cda65b1e2a5389",
            ),
            RepositorySpec::new(
                WASI_LIBC,
                "https://github.com/WebAssembly/wasi-libc/archive/a00bf321eeeca836ee2a0d2d25aeb8524107b8cc.tar.gz",
                "0f4c49e34dfd0d9ec4822f3422aff019c6cfd18ac652b86092c4459a10eef5bc",
                "core/deps/wasi-sdk/src/wasi-libc",
                "wasi-libc-a00bf321eeeca836ee2a0d2d25aeb8524107b8cc",
            ),
        ])
    }

    /// Look up a repository by name
    ///
    /// # Errors
    /// If no repository with this name is registered.
    pub fn get(&self, name: &str) -> Result<&RepositorySpec, ProvisionError> {
        self.repositories
            .iter()
            .find(|repo| repo.name == name)
            .ok_or_else(|| ProvisionError::UnknownRepository(name.to_owned()))
    }

    /// Whether a repository with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.repositories.iter().any(|repo| repo.name == name)
    }

    /// Repositories in fetch order
    pub fn iter(&self) -> impl Iterator<Item = &RepositorySpec> {
        self.repositories.iter()
    }

    /// Number of registered repositories
    #[must_use]
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// Whether the registry has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}
