//! End-to-end pipeline runs against an in-memory transport and a scripted command runner.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::bail;
use build_wasi_sdk::{
    CommandRunner, EMSCRIPTEN, HEADERS, Layout, ProvisionError, Registry, RepositorySpec,
    Transport, WASI_LIBC, WASI_SDK, build_and_install, ensure_repository, provision,
};
use flate2::{Compression, write::GzEncoder};
use sha2::{Digest, Sha256};
use tar::{Builder, Header};
use tempfile::{TempDir, tempdir};
use tokio::process::Command;
use url::Url;

#[derive(Debug, Default)]
struct FakeTransport {
    archives: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    async fn fetch(&self, url: &Url, dst: &Path) -> anyhow::Result<()> {
        self.fetched.lock().unwrap().push(url.to_string());
        let Some(bytes) = self.archives.get(url.as_str()) else {
            bail!("404 for {url}");
        };
        fs::write(dst, bytes)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
}

/// Records commands; `make build` drops a fake install tree into the build output
#[derive(Debug, Default)]
struct FakeRunner {
    fail_dry_run: bool,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn count(&self, program: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|i| i.program == program)
            .count()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, command: &mut Command) -> anyhow::Result<()> {
        let inner = command.as_std();
        let invocation = Invocation {
            program: inner.get_program().to_string_lossy().into_owned(),
            args: inner
                .get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
            cwd: inner.get_current_dir().unwrap().to_owned(),
        };
        self.invocations.lock().unwrap().push(invocation.clone());

        match invocation.program.as_str() {
            "patch" if self.fail_dry_run && invocation.args.iter().any(|a| a == "--dry-run") => {
                bail!("hunk FAILED")
            }
            "make" => {
                let bin = invocation.cwd.join("build/install/opt/wasi-sdk/bin");
                fs::create_dir_all(&bin)?;
                fs::write(bin.join("clang"), "clang")?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn tar_gz(entries: &[(String, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in entries {
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, contents.as_slice())?;
    }
    Ok(builder.into_inner()?.finish()?)
}

struct Fixture {
    root: TempDir,
    cache: TempDir,
    registry: Registry,
    transport: FakeTransport,
}

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        let root = tempdir()?;
        let cache = tempdir()?;
        let mut transport = FakeTransport::default();
        let mut specs = vec![];

        let headers = HEADERS
            .iter()
            .map(|h| (format!("system/{}", h.src), h.src.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        let repos: [(&str, &str, Vec<(String, Vec<u8>)>); 4] = [
            (
                "config",
                "core/deps/wasi-sdk/src/config",
                vec![("config.guess".into(), b"#!/bin/sh".to_vec())],
            ),
            (EMSCRIPTEN, "core/deps/emscripten", headers),
            (
                WASI_SDK,
                "core/deps/wasi-sdk",
                vec![("Makefile".into(), b"build:".to_vec())],
            ),
            (
                WASI_LIBC,
                "core/deps/wasi-sdk/src/wasi-libc",
                vec![("Makefile".into(), b"libc:".to_vec())],
            ),
        ];

        for (name, store_dir, files) in repos {
            let prefix = format!("{name}-0123abcd");
            let entries = files
                .into_iter()
                .map(|(path, contents)| (format!("{prefix}/{path}"), contents))
                .collect::<Vec<_>>();
            let bytes = tar_gz(&entries)?;
            let url = format!("https://archives.test/{name}/0123abcd.tar.gz");
            specs.push(RepositorySpec::new(
                name,
                &url,
                hex::encode(Sha256::digest(&bytes)),
                store_dir,
                prefix,
            ));
            transport.archives.insert(url, bytes);
        }

        let patches = root.path().join("test-tools/build-wasi-sdk/patches");
        fs::create_dir_all(&patches)?;
        fs::write(patches.join("wasi_libc.patch"), "--- a/x\n+++ b/x\n")?;
        fs::write(patches.join("wasi_sdk.patch"), "--- a/y\n+++ b/y\n")?;

        Ok(Self {
            root,
            cache,
            registry: Registry::new(specs),
            transport,
        })
    }

    fn layout(&self) -> Layout {
        Layout::new(self.root.path(), self.cache.path())
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn archive(&self, name: &str) -> anyhow::Result<PathBuf> {
        Ok(self
            .cache
            .path()
            .join(self.registry.get(name)?.archive_name()?))
    }
}

#[tokio::test]
async fn second_run_skips_every_stage() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let runner = FakeRunner::default();

    provision(&fixture.registry, &fixture.layout(), &fixture.transport, &runner).await?;

    assert_eq!(fixture.transport.fetch_count(), 4);
    assert_eq!(runner.count("make"), 1);
    assert_eq!(runner.count("patch"), 4);
    assert_eq!(
        fs::read_to_string(fixture.path("test-tools/wasi-sdk/bin/clang"))?,
        "clang"
    );
    for header in HEADERS {
        let installed = fixture
            .path("test-tools/wasi-sdk/share/wasi-sysroot/include")
            .join(header.dst);
        assert_eq!(fs::read_to_string(installed)?, header.src);
    }
    assert!(fixture.path("core/deps/wasi-sdk/src/wasi-libc/Makefile").is_file());
    assert!(fixture.path("core/deps/wasi-sdk/src/config/config.guess").is_file());

    provision(&fixture.registry, &fixture.layout(), &fixture.transport, &runner).await?;

    assert_eq!(fixture.transport.fetch_count(), 4);
    assert_eq!(runner.count("make"), 1);
    assert_eq!(runner.count("patch"), 4);
    Ok(())
}

#[tokio::test]
async fn patches_target_libc_then_sdk() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let runner = FakeRunner::default();

    provision(&fixture.registry, &fixture.layout(), &fixture.transport, &runner).await?;

    let patches = runner
        .invocations()
        .into_iter()
        .filter(|i| i.program == "patch")
        .collect::<Vec<_>>();
    let libc = fixture.path("core/deps/wasi-sdk/src/wasi-libc");
    let sdk = fixture.path("core/deps/wasi-sdk");
    assert_eq!(patches[0].args, ["-f", "-p1", "--dry-run"]);
    assert_eq!(patches[0].cwd, libc);
    assert_eq!(patches[1].args, ["-f", "-p1"]);
    assert_eq!(patches[1].cwd, libc);
    assert_eq!(patches[2].cwd, sdk);
    assert_eq!(patches[3].args, ["-f", "-p1"]);
    assert_eq!(patches[3].cwd, sdk);
    Ok(())
}

#[tokio::test]
async fn corrupted_cache_is_fetched_again() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let layout = fixture.layout();

    ensure_repository(&fixture.registry, &layout, &fixture.transport, WASI_SDK).await?;
    assert_eq!(fixture.transport.fetch_count(), 1);

    fs::remove_dir_all(fixture.path("core/deps/wasi-sdk"))?;
    fs::write(fixture.archive(WASI_SDK)?, "corrupted")?;

    ensure_repository(&fixture.registry, &layout, &fixture.transport, WASI_SDK).await?;

    assert_eq!(fixture.transport.fetch_count(), 2);
    assert_eq!(
        fs::read_to_string(fixture.path("core/deps/wasi-sdk/Makefile"))?,
        "build:"
    );
    Ok(())
}

#[tokio::test]
async fn valid_cache_survives_store_removal() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let layout = fixture.layout();

    ensure_repository(&fixture.registry, &layout, &fixture.transport, "config").await?;
    fs::remove_dir_all(fixture.path("core/deps/wasi-sdk/src/config"))?;
    ensure_repository(&fixture.registry, &layout, &fixture.transport, "config").await?;

    assert_eq!(fixture.transport.fetch_count(), 1);
    assert!(fixture.path("core/deps/wasi-sdk/src/config/DOWNLOADED").is_file());
    assert!(fixture.archive("config")?.is_file());
    Ok(())
}

#[tokio::test]
async fn download_with_wrong_hash_is_rejected() -> anyhow::Result<()> {
    let mut fixture = Fixture::new()?;
    let url = fixture.registry.get("config")?.url.clone();
    fixture.transport.archives.insert(url, tar_gz(&[])?);

    let err = ensure_repository(
        &fixture.registry,
        &fixture.layout(),
        &fixture.transport,
        "config",
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::ChecksumMismatch { name, .. }) if name == "config"
    ));
    assert!(!fixture.path("core/deps/wasi-sdk/src/config").exists());
    assert!(!fixture.archive("config")?.exists());
    Ok(())
}

#[tokio::test]
async fn unknown_repository_aborts() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;

    let err = ensure_repository(
        &fixture.registry,
        &fixture.layout(),
        &fixture.transport,
        "llvm-project",
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::UnknownRepository(_))
    ));
    assert_eq!(fixture.transport.fetch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn removing_build_flag_reruns_only_build() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let runner = FakeRunner::default();
    provision(&fixture.registry, &fixture.layout(), &fixture.transport, &runner).await?;

    fs::remove_file(fixture.path("core/deps/wasi-sdk/BUILDED"))?;
    // Would be restored if the install phase ran again
    fs::remove_file(fixture.path("test-tools/wasi-sdk/bin/clang"))?;

    provision(&fixture.registry, &fixture.layout(), &fixture.transport, &runner).await?;

    assert_eq!(runner.count("make"), 2);
    assert_eq!(runner.count("patch"), 4);
    assert_eq!(fixture.transport.fetch_count(), 4);
    assert!(fixture.path("core/deps/wasi-sdk/BUILDED").is_file());
    assert!(!fixture.path("test-tools/wasi-sdk/bin/clang").exists());
    Ok(())
}

#[tokio::test]
async fn failed_dry_run_never_applies() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let layout = fixture.layout();
    for name in [WASI_SDK, WASI_LIBC, EMSCRIPTEN] {
        ensure_repository(&fixture.registry, &layout, &fixture.transport, name).await?;
    }
    let runner = FakeRunner {
        fail_dry_run: true,
        ..FakeRunner::default()
    };

    let err = build_and_install(&fixture.registry, &layout, &runner)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("patch dry-run"));
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].args.contains(&"--dry-run".to_owned()));
    assert!(!fixture.path("core/deps/wasi-sdk/PATCHED").exists());
    assert!(!fixture.path("core/deps/wasi-sdk/BUILDED").exists());
    Ok(())
}

#[tokio::test]
async fn build_requires_fetched_sdk() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let runner = FakeRunner::default();

    let err = build_and_install(&fixture.registry, &fixture.layout(), &runner)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::StoreDirMissing(_))
    ));
    assert!(runner.invocations().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_header_fails_install() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let layout = fixture.layout();
    for name in [WASI_SDK, WASI_LIBC, EMSCRIPTEN] {
        ensure_repository(&fixture.registry, &layout, &fixture.transport, name).await?;
    }
    fs::remove_file(
        fixture.path("core/deps/emscripten/system/lib/libc/musl/include/netdb.h"),
    )?;
    let runner = FakeRunner::default();

    let err = build_and_install(&fixture.registry, &layout, &runner)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::HeaderMissing(path)) if path.ends_with("netdb.h")
    ));
    assert!(fixture.path("core/deps/wasi-sdk/BUILDED").is_file());
    assert!(!fixture.path("core/deps/wasi-sdk/INSTALLED").exists());
    Ok(())
}
