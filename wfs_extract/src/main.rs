use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wfs_core::{
    KeyOptions, MediumSelection, SectorSize, SectorSizeChoice, ValidationError, open_volume,
};
use wfs_engine_local::LocalBackend;
use wfs_extract::{ExtractOptions, extract};

#[derive(Parser)]
#[command(
    name = "wfs-extract",
    version,
    about = "Dump the contents of a WFS volume to a directory"
)]
struct Cli {
    /// Device or image holding the volume
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Directory to write the extracted tree to
    #[arg(long, value_name = "DIR")]
    output: PathBuf,
    /// Path to otp.bin
    #[arg(long, value_name = "PATH")]
    otp: PathBuf,
    /// Path to seeprom.bin (required for usb devices)
    #[arg(long, value_name = "PATH")]
    seeprom: Option<PathBuf>,
    /// Directory inside the volume to dump
    #[arg(long, value_name = "PATH", default_value = "/")]
    dump_path: String,
    /// Device is the internal mlc storage
    #[arg(long, action = ArgAction::SetTrue)]
    mlc: bool,
    /// Device is a usb storage
    #[arg(long, action = ArgAction::SetTrue)]
    usb: bool,
    /// Sector size of the device in bytes (512, 2048 or 4096)
    #[arg(long, value_name = "BYTES", default_value = "512", value_parser = parse_sector_size)]
    sector_size: SectorSize,
    /// Print every path as it is dumped
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn parse_sector_size(value: &str) -> Result<SectorSize, String> {
    let bytes: u32 = value.parse().map_err(|e| format!("{e}"))?;
    SectorSize::try_from(bytes).map_err(|_| {
        let supported: Vec<String> = SectorSize::ALL.iter().map(ToString::to_string).collect();
        format!("unsupported sector size {bytes}, expected one of {}", supported.join(", "))
    })
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
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
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
        &cli.input,
        &keys,
        SectorSizeChoice::Fixed(cli.sector_size),
    )
    .with_context(|| format!("failed to open {}", cli.input.display()))?;

    let options = ExtractOptions {
        source: cli.dump_path,
        output: cli.output,
        verbose: cli.verbose,
    };
    let stdout = std::io::stdout();
    extract(ctx.engine(), &options, stdout.lock())?;
    Ok(())
}
