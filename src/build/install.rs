use std::path::Path;

use anyhow::Context;
use tokio::fs;
use tracing::debug;

use crate::{Layout, ProvisionError, tree};

/// A header copied from the emscripten checkout into the installed sysroot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMapping {
    /// Relative to `<emscripten>/system`
    pub src: &'static str,
    /// Relative to the sysroot include directory
    pub dst: &'static str,
}

const fn header(src: &'static str, dst: &'static str) -> HeaderMapping {
    HeaderMapping { src, dst }
}

/// SSE and musl headers the sysroot lacks
pub const HEADERS: &[HeaderMapping] = &[
    header("include/compat/emmintrin.h", "sse/emmintrin.h"),
    header("include/compat/immintrin.h", "sse/immintrin.h"),
    header("include/compat/smmintrin.h", "sse/smmintrin.h"),
    header("include/compat/xmmintrin.h", "sse/xmmintrin.h"),
    header("lib/libc/musl/include/pthread.h", "libc/musl/pthread.h"),
    header("lib/libc/musl/include/signal.h", "libc/musl/signal.h"),
    header("lib/libc/musl/include/netdb.h", "libc/musl/netdb.h"),
    header("lib/libc/musl/include/sys/wait.h", "libc/musl/sys/wait.h"),
    header("lib/libc/musl/include/sys/socket.h", "libc/musl/sys/socket.h"),
    header("lib/libc/musl/include/setjmp.h", "libc/musl/setjmp.h"),
    header(
        "lib/libc/musl/arch/emscripten/bits/setjmp.h",
        "libc/musl/bits/setjmp.h",
    ),
];

/// Copy the build output into the install root, then the extra headers into its sysroot
pub(super) async fn install(
    sdk_dir: &Path,
    emscripten_dir: &Path,
    layout: &Layout,
) -> anyhow::Result<()> {
    let output = sdk_dir.join("build/install/opt");
    let install_dir = layout.install_dir();
    debug!("copy {} to {}", output.display(), install_dir.display());
    tokio::task::spawn_blocking(move || tree::copy_tree(&output, &install_dir)).await??;

    let system = emscripten_dir.join("system");
    let include = layout.sysroot_include_dir();
    for HeaderMapping { src, dst } in HEADERS {
        let src = system.join(src);
        let dst = include.join(dst);
        if !fs::try_exists(&src).await? {
            return Err(ProvisionError::HeaderMissing(src).into());
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, &dst)
            .await
            .with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;
    }

    Ok(())
}
