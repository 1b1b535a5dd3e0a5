//! Read-only FUSE mount of a WFS volume.
//!
//! [`vfs`] holds the path-based adapter over an opened [`MountContext`];
//! [`fs`] turns it into a `fuser` filesystem.

pub mod fs;
pub mod vfs;

use anyhow::Context;
use fuser::MountOption;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use wfs_core::{Engine, MountContext};

pub use fs::{Dispatch, InodeTable, WfsFs};
pub use vfs::{Attributes, DirListing, Vfs, VfsError};

/// Options handed through to the mount host.
#[derive(Clone, Debug, Default)]
pub struct MountConfig {
    /// Run the FUSE session on the calling thread until unmounted.
    pub foreground: bool,
    /// Service requests one at a time on the session thread.
    pub single_thread: bool,
    pub allow_other: bool,
    pub allow_root: bool,
    pub auto_unmount: bool,
}

impl MountConfig {
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName("wfs".to_string()),
            MountOption::Subtype("wfs".to_string()),
            MountOption::RO,
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.allow_root {
            options.push(MountOption::AllowRoot);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

/// Mounts `ctx` read-only at `mountpoint` and blocks until shutdown.
///
/// In foreground mode the session runs on this thread until the volume is
/// unmounted; otherwise it runs in the background until ctrl-c.
pub fn mount<E: Engine + 'static>(
    ctx: Arc<MountContext<E>>,
    mountpoint: &Path,
    config: &MountConfig,
) -> anyhow::Result<()> {
    info!(
        "wfs_fuse: mounting at '{}' (foreground={}, single_thread={}, allow_other={}, allow_root={}, auto_unmount={})",
        mountpoint.display(),
        config.foreground,
        config.single_thread,
        config.allow_other,
        config.allow_root,
        config.auto_unmount,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start request runtime")?;
    let dispatch = if config.single_thread {
        Dispatch::Inline
    } else {
        Dispatch::Pool(runtime.handle().clone())
    };

    let fs = WfsFs::new(Vfs::new(ctx), dispatch);
    let options = config.mount_options();

    if config.foreground {
        info!("wfs_fuse: calling fuser::mount2 on '{}'", mountpoint.display());
        fuser::mount2(fs, mountpoint, &options)
            .with_context(|| format!("failed to mount {}", mountpoint.display()))?;
        info!("wfs_fuse: session ended");
        return Ok(());
    }

    info!(
        "wfs_fuse: calling fuser::spawn_mount2 on '{}'",
        mountpoint.display()
    );
    let session = fuser::spawn_mount2(fs, mountpoint, &options)
        .with_context(|| format!("failed to mount {}", mountpoint.display()))?;
    info!("wfs_fuse: mount established, waiting for ctrl-c");
    if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
        info!("wfs_fuse: ctrl-c waiter failed: {e}");
    }
    info!("wfs_fuse: ctrl-c received, shutting down");
    drop(session);
    Ok(())
}
