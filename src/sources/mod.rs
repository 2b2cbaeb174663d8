pub mod docker;
pub mod history_file;
pub mod nerdctl;
pub mod source;
pub mod tar;

pub use docker::DockerSource;
pub use history_file::HistoryFileSource;
pub use nerdctl::NerdctlSource;
pub use source::{archive_history, open_archive, HistorySource, Source};
pub use tar::TarSource;

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

use crate::notifier::Notifier;

/// Runs `<binary> save -o <tmp>/image.tar <image>` and returns the tarball path with
/// the temp directory that owns it.
pub(crate) fn save_with_cli(
    binary: &str,
    image_name: &str,
    notifier: &Notifier,
) -> Result<(PathBuf, Option<TempDir>)> {
    let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
    let tarball_path = temp_dir.path().join("image.tar");

    notifier.info(&format!("Exporting image '{}' with {}...", image_name, binary));

    let output = Command::new(binary)
        .arg("save")
        .arg("-o")
        .arg(&tarball_path)
        .arg(image_name)
        .output()
        .with_context(|| format!("Failed to execute {} command. Is it installed?", binary))?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} save failed: {}", binary, error.trim()));
    }

    Ok((tarball_path, Some(temp_dir)))
}

/// Runs `<binary> <args..>` and returns its stdout.
pub(crate) fn run_cli(binary: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(binary)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {} command. Is it installed?", binary))?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} {} failed: {}", binary, args.join(" "), error.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
