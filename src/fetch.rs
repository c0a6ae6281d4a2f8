//! Download, verify and unpack pinned repositories.

use std::path::{Path, PathBuf};

use anyhow::Context;
use futures_util::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info};
use url::Url;

use crate::{
    Layout, ProvisionError, Registry, RepositorySpec,
    flags::{self, Flags, Stage},
    unpack::unpack,
};

/// Retrieves an archive to a local path
pub trait Transport {
    /// Download `url` to `dst`, replacing anything already there
    fn fetch(&self, url: &Url, dst: &Path) -> impl Future<Output = anyhow::Result<()>>;
}

/// Plain HTTP(S) GET without retries
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// New transport backed by a rustls client
    ///
    /// # Errors
    /// If the TLS backend cannot be initialized.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().use_rustls_tls().build()?,
        })
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, dst: &Path) -> anyhow::Result<()> {
        debug!("download from {url}");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        // Stream into a side file so an interrupted download never sits under the real name
        let partial = dst.with_extension("part");
        let mut file = fs::File::create(&partial).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);

        fs::rename(&partial, dst).await?;
        Ok(())
    }
}

/// Hex encoded SHA-256 of a file, read in fixed-size chunks
///
/// # Errors
/// If the file cannot be read.
pub async fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Make sure the named repository is unpacked in its store directory.
///
/// Skips everything when the store directory is already marked as downloaded. Otherwise an
/// archive already in the cache is reused if its hash still matches, and fetched again if
/// not. Archives stay in the cache afterwards.
///
/// Returns the store directory.
///
/// # Errors
/// If the name is unknown, the download fails or does not match its hash, or unpacking
/// fails.
pub async fn ensure_repository<T: Transport>(
    registry: &Registry,
    layout: &Layout,
    transport: &T,
    name: &str,
) -> anyhow::Result<PathBuf> {
    let repo = registry.get(name)?;
    let store_dir = layout.store_dir(repo);
    let display_dir = store_dir.strip_prefix(layout.root()).unwrap_or(&store_dir);

    if flags::is_fetched(&store_dir).await {
        info!(
            "keep using '{}'. Or remove it and try again",
            display_dir.display()
        );
        return Ok(store_dir);
    }

    fs::create_dir_all(layout.cache_dir())
        .await
        .with_context(|| format!("create {}", layout.cache_dir().display()))?;
    let archive = layout.cache_dir().join(repo.archive_name()?);

    if fs::try_exists(&archive).await? {
        if verify(repo, &archive).await.is_ok() {
            debug!("use pre-downloaded {}", archive.display());
        } else {
            debug!("{} is broken, remove it", archive.display());
            fs::remove_file(&archive).await?;
        }
    }

    if !fs::try_exists(&archive).await? {
        info!("download {name}");
        transport
            .fetch(&repo.parsed_url()?, &archive)
            .await
            .with_context(|| format!("download {name} failed"))?;
        if let Err(err) = verify(repo, &archive).await {
            fs::remove_file(&archive).await.ok();
            return Err(err);
        }
    }

    info!("unpack {name} into '{}'", display_dir.display());
    unpack(&archive, &repo.strip_prefix, &store_dir).await?;
    Flags::new(&store_dir).mark_done(Stage::Downloaded).await?;

    Ok(store_dir)
}

async fn verify(repo: &RepositorySpec, archive: &Path) -> anyhow::Result<()> {
    let actual = sha256_file(archive).await?;
    if actual.eq_ignore_ascii_case(&repo.sha256) {
        Ok(())
    } else {
        Err(ProvisionError::ChecksumMismatch {
            name: repo.name.clone(),
            path: archive.to_owned(),
            expected: repo.sha256.clone(),
            actual,
        }
        .into())
    }
}
