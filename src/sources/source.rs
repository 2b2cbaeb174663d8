use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::history::LayerRecord;
use crate::image_archive::ImageArchive;
use crate::notifier::Notifier;

/// Source of image tarballs (`docker save` layout) from different container tools.
pub trait Source {
    /// Returns the name of the source for identification purposes
    fn name(&self) -> &str;

    /// Retrieves an image tarball and returns the path to it along with the temp directory
    /// that must stay alive while the tarball is in use, if one was created.
    ///
    /// `image_name` is an image reference for engine sources or a filesystem path for
    /// local ones.
    fn get_image_tarball(
        &self,
        image_name: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)>;
}

/// Source of engine-style layer history, newest layer first.
pub trait HistorySource {
    fn name(&self) -> &str;

    fn fetch_history(&self, image_name: &str, notifier: &Notifier) -> Result<Vec<LayerRecord>>;
}

/// Opens the tarball `source` yields for `image_name` as an [`ImageArchive`].
pub fn open_archive<S: Source + ?Sized>(
    source: &S,
    image_name: &str,
    notifier: &Notifier,
) -> Result<ImageArchive> {
    let (tarball_path, _temp_dir) = source.get_image_tarball(image_name, notifier)?;
    // The archive unpacks into its own temp dir, the tarball can go afterwards
    ImageArchive::from_tarball(&tarball_path, notifier)
}

/// History of the image archive `source` yields for `image_name`.
pub fn archive_history<S: Source + ?Sized>(
    source: &S,
    image_name: &str,
    notifier: &Notifier,
) -> Result<Vec<LayerRecord>> {
    Ok(open_archive(source, image_name, notifier)?.history())
}
