//! Error types for provisioning failures.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort the provisioning pipeline.
///
/// Stage functions return [`anyhow::Result`]; these variants can be recovered from it with
/// [`anyhow::Error::downcast_ref`].
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Name is not in the registry
    #[error("{0} is not a known repository")]
    UnknownRepository(String),

    /// URL can't be parsed or has no file name to cache the archive under
    #[error("invalid archive url for {name}: {url}")]
    InvalidUrl {
        /// Repository name
        name: String,
        /// Offending URL
        url: String,
    },

    /// Archive content does not match the pinned hash
    #[error("checksum mismatch for {name} ({}): expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// Repository name
        name: String,
        /// Archive on disk
        path: PathBuf,
        /// Pinned hash
        expected: String,
        /// Hash of the bytes that were actually read
        actual: String,
    },

    /// Extraction produced no directory matching the strip prefix
    #[error("extract {} failed: no top-level directory {prefix}", archive.display())]
    MissingStripPrefix {
        /// Archive being unpacked
        archive: PathBuf,
        /// Expected top-level directory
        prefix: String,
    },

    /// An archive entry would be written outside of the extraction directory
    #[error("attempted path traversal in {}: {}", archive.display(), entry.display())]
    PathTraversal {
        /// Archive being unpacked
        archive: PathBuf,
        /// Offending entry path
        entry: PathBuf,
    },

    /// External command exited unsuccessfully
    #[error("command `{command}` failed with {status}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status as reported by the OS
        status: std::process::ExitStatus,
    },

    /// Required patch file is absent
    #[error("{} not found", .0.display())]
    PatchNotFound(PathBuf),

    /// Build requested before the toolchain checkout exists
    #[error("{} does not exist, fetch it first", .0.display())]
    StoreDirMissing(PathBuf),

    /// Header to install is absent from the dependency checkout
    #[error("header {} not found", .0.display())]
    HeaderMissing(PathBuf),
}
