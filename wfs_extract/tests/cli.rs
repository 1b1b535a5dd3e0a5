//! Drives the `wfs-extract` binary against a decoded tree on the host.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use wfs_core::{DEVICE_BLOB_SIZE, SEED_BLOB_SIZE};

struct Fixture {
    _temp: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    otp: PathBuf,
    seeprom: PathBuf,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("volume");
    fs::create_dir_all(input.join("usr/save")).unwrap();
    fs::create_dir(input.join("usr/empty")).unwrap();
    fs::write(input.join("usr/save/profile.dat"), vec![0x42; 0x5000]).unwrap();

    let otp = temp.path().join("otp.bin");
    fs::write(&otp, vec![0x11; DEVICE_BLOB_SIZE]).unwrap();
    let seeprom = temp.path().join("seeprom.bin");
    fs::write(&seeprom, vec![0x22; SEED_BLOB_SIZE]).unwrap();

    Fixture {
        output: temp.path().join("out"),
        _temp: temp,
        input,
        otp,
        seeprom,
    }
}

fn run(fx: &Fixture, otp: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wfs-extract"))
        .arg("--input")
        .arg(&fx.input)
        .arg("--output")
        .arg(&fx.output)
        .arg("--otp")
        .arg(otp)
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn help_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_wfs-extract"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--dump-path"));
}

#[test]
fn invalid_medium_flags_are_usage_errors() {
    let fx = fixture();
    let seeprom = fx.seeprom.to_str().unwrap();
    for extra in [
        vec!["--mlc", "--usb", "--seeprom", seeprom],
        vec!["--seeprom", seeprom],
        vec![],
        vec!["--usb"],
    ] {
        let output = run(&fx, &fx.otp, &extra);
        assert!(!output.status.success(), "{extra:?} succeeded");
        assert!(
            String::from_utf8_lossy(&output.stderr).contains("Usage"),
            "{extra:?} printed no usage"
        );
        assert!(!fx.output.exists());
    }
}

#[test]
fn short_key_file_aborts_before_writing() {
    let fx = fixture();
    let short = fx.otp.with_file_name("short.bin");
    fs::write(&short, vec![0; DEVICE_BLOB_SIZE - 1]).unwrap();

    let output = run(&fx, &short, &["--mlc"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("wrong size"));
    assert!(!fx.output.exists());
}

#[test]
fn missing_dump_path_aborts_before_writing() {
    let fx = fixture();
    let output = run(&fx, &fx.otp, &["--mlc", "--dump-path", "/usr/title"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("/usr/title"));
    assert!(!fx.output.exists());
}

#[test]
fn unsupported_sector_size_is_rejected() {
    let fx = fixture();
    let output = run(&fx, &fx.otp, &["--mlc", "--sector-size", "1024"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("512, 2048, 4096"));
    assert!(!fx.output.exists());
}

#[test]
fn usb_extraction_mirrors_the_tree() {
    let fx = fixture();
    let seeprom = fx.seeprom.to_str().unwrap();
    let output = run(
        &fx,
        &fx.otp,
        &["--usb", "--seeprom", seeprom, "--dump-path", "/usr", "-v"],
    );
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let data = fs::read(fx.output.join("save/profile.dat")).unwrap();
    assert_eq!(
        blake3::hash(&data),
        blake3::hash(&vec![0x42; 0x5000])
    );
    assert!(fx.output.join("empty").is_dir());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|l| l == "dumping /empty"));
    assert!(stdout.lines().any(|l| l == "dumping /save/profile.dat"));
}
