use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wfs_core::{KeyOptions, MediumSelection, SectorSizeChoice, ValidationError, open_volume};
use wfs_engine_local::LocalBackend;
use wfs_fuse::MountConfig;

#[derive(Parser)]
#[command(name = "wfs-fuse", version, about = "Mount a WFS volume read-only via FUSE")]
struct Cli {
    /// Device or image holding the volume
    device: PathBuf,
    /// Mount point for the FUSE filesystem
    mount_point: PathBuf,
    /// Path to otp.bin
    #[arg(long, value_name = "PATH")]
    otp: PathBuf,
    /// Path to seeprom.bin (required for usb devices)
    #[arg(long, value_name = "PATH")]
    seeprom: Option<PathBuf>,
    /// Device is the internal mlc storage
    #[arg(long, action = ArgAction::SetTrue)]
    mlc: bool,
    /// Device is a usb storage
    #[arg(long, action = ArgAction::SetTrue)]
    usb: bool,
    /// Enable debug output
    #[arg(short, long, action = ArgAction::SetTrue)]
    debug: bool,
    /// Keep the FUSE session on the main thread until unmounted
    #[arg(short, long, action = ArgAction::SetTrue)]
    foreground: bool,
    /// Service one request at a time
    #[arg(short, long = "single-thread", action = ArgAction::SetTrue)]
    single_thread: bool,
    /// Allow other users to access the filesystem
    #[arg(long, action = ArgAction::SetTrue)]
    allow_other: bool,
    /// Allow root user to access filesystem
    #[arg(long, action = ArgAction::SetTrue)]
    allow_root: bool,
    /// Automatically unmount on process exit
    #[arg(long, action = ArgAction::SetTrue)]
    auto_unmount: bool,
}

fn usage_error(err: &ValidationError) -> ! {
    let kind = match err {
        ValidationError::MediumConflict => ErrorKind::ArgumentConflict,
        ValidationError::NoMedium | ValidationError::MissingSeed => {
            ErrorKind::MissingRequiredArgument
        }
    };
    Cli::command().error(kind, err).exit()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();

    let keys = KeyOptions {
        otp: cli.otp,
        seeprom: cli.seeprom,
        medium: MediumSelection {
            mlc: cli.mlc,
            usb: cli.usb,
        },
    };
    if let Err(err) = keys.validate() {
        usage_error(&err);
    }

    let ctx = open_volume(
        &LocalBackend,
        &cli.device,
        &keys,
        SectorSizeChoice::Detect,
    )
    .with_context(|| format!("failed to open {}", cli.device.display()))?;
    info!("wfs-fuse: opened {}", cli.device.display());

    let config = MountConfig {
        foreground: cli.foreground,
        single_thread: cli.single_thread,
        allow_other: cli.allow_other,
        allow_root: cli.allow_root,
        auto_unmount: cli.auto_unmount,
    };
    wfs_fuse::mount(Arc::new(ctx), &cli.mount_point, &config)
}
