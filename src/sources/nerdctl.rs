use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;

use super::{archive_history, save_with_cli, HistorySource, Source};
use crate::history::LayerRecord;
use crate::notifier::Notifier;

/// nerdctl (containerd) implementation of the Source trait
pub struct NerdctlSource;

impl NerdctlSource {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl Source for NerdctlSource {
    fn name(&self) -> &str {
        "nerdctl"
    }

    fn get_image_tarball(
        &self,
        image_name: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        save_with_cli("nerdctl", image_name, notifier)
    }
}

impl HistorySource for NerdctlSource {
    fn name(&self) -> &str {
        Source::name(self)
    }

    fn fetch_history(&self, image_name: &str, notifier: &Notifier) -> Result<Vec<LayerRecord>> {
        archive_history(self, image_name, notifier)
    }
}
