use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tempfile::TempDir;

use super::{archive_history, HistorySource, Source};
use crate::history::LayerRecord;
use crate::notifier::Notifier;

/// Tar implementation of the Source trait for pre-downloaded tarballs
pub struct TarSource;

impl TarSource {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl Source for TarSource {
    fn name(&self) -> &str {
        "tar"
    }

    fn get_image_tarball(
        &self,
        image_path: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        let tarball_path = PathBuf::from(image_path);

        if !tarball_path.exists() {
            return Err(anyhow!(
                "Tarball file does not exist: {}",
                tarball_path.display()
            ));
        }

        if !tarball_path.is_file() {
            return Err(anyhow!("Path is not a file: {}", tarball_path.display()));
        }

        let extension = tarball_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        if extension != "tar" {
            notifier.warn("File does not have .tar extension. Proceeding anyway, but this might not be a valid image tarball.");
        }

        // The tarball is used in place
        Ok((tarball_path, None))
    }
}

impl HistorySource for TarSource {
    fn name(&self) -> &str {
        Source::name(self)
    }

    fn fetch_history(&self, image_path: &str, notifier: &Notifier) -> Result<Vec<LayerRecord>> {
        archive_history(self, image_path, notifier)
    }
}
