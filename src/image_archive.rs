//! `docker save` / OCI image tarballs as a source of history and filesystem.
//!
//! [`ImageArchive`] unpacks a tarball into a scoped temporary directory and reads:
//! - `manifest.json` → config blob path, repo tags and ordered layer tarballs,
//! - the config blob → OCI [`ImageConfiguration`] (runtime settings + history).
//!
//! From that it produces the engine-style, newest-first [`LayerRecord`] list the
//! decoder consumes, the [`RuntimeInfo`] for the synthesizer, and a flattened copy of
//! the image filesystem.
//!
//! Image id is `sha256:<hash>` of the config blob, the same value `docker images`
//! reports. Layer ids are the layer blob digests.

use crate::history::LayerRecord;
use crate::metadata;
use crate::notifier::Notifier;
use crate::synthesizer::RuntimeInfo;
use crate::tar_extractor;
use anyhow::{anyhow, Context, Result};
use oci_spec::image::ImageConfiguration;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ImageArchive {
    extract_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
    image_id: String,
    repo_tags: Vec<String>,
    config: ImageConfiguration,
    layer_tarballs: Vec<PathBuf>,
}

/// `sha256:<hash>` for blob paths like `blobs/sha256/<hash>` or `<hash>.json`.
pub fn digest_from_blob_path(blob_path: &str) -> Option<String> {
    if let Some(hash) = blob_path.strip_prefix("blobs/sha256/") {
        return Some(format!("sha256:{}", hash));
    }
    if let Some(hash) = blob_path.strip_suffix(".json") {
        return Some(format!("sha256:{}", hash));
    }
    // Legacy layout: <hash>/layer.tar
    blob_path
        .strip_suffix("/layer.tar")
        .map(|hash| format!("sha256:{}", hash))
}

impl ImageArchive {
    pub fn from_tarball<P: AsRef<Path>>(tarball_path: P, notifier: &Notifier) -> Result<Self> {
        let tarball_path = tarball_path.as_ref();
        notifier.debug(&format!("Extracting image tarball: {}", tarball_path.display()));

        let temp_dir = tempfile::tempdir().context("Failed to create temporary directory")?;
        let extract_dir = temp_dir.path().join("extracted");
        fs::create_dir_all(&extract_dir)?;

        tar_extractor::extract_tar(tarball_path, &extract_dir).with_context(|| {
            format!("Failed to extract image tarball: {}", tarball_path.display())
        })?;

        let manifest_path = extract_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Err(anyhow!(
                "Invalid image tarball: manifest.json not found. This does not appear to be a valid OCI/Docker image tarball."
            ));
        }

        let manifest_content =
            fs::read_to_string(&manifest_path).context("Failed to read manifest.json")?;
        let manifest: Vec<serde_json::Value> =
            serde_json::from_str(&manifest_content).context("Failed to parse manifest.json")?;
        let image = manifest
            .first()
            .ok_or_else(|| anyhow!("Empty manifest.json"))?;

        let config_file = image["Config"]
            .as_str()
            .ok_or_else(|| anyhow!("Invalid manifest format - missing Config"))?;
        let config_content = fs::read_to_string(extract_dir.join(config_file))
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        let config: ImageConfiguration =
            serde_json::from_str(&config_content).context("Failed to parse image configuration")?;

        let image_id =
            digest_from_blob_path(config_file).unwrap_or_else(|| config_file.to_string());

        let repo_tags = image["RepoTags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let layer_tarballs = image["Layers"]
            .as_array()
            .ok_or_else(|| anyhow!("Invalid manifest format - missing Layers array"))?
            .iter()
            .map(|layer| {
                layer
                    .as_str()
                    .map(|p| extract_dir.join(p))
                    .ok_or_else(|| anyhow!("Invalid layer reference"))
            })
            .collect::<Result<Vec<_>>>()?;

        notifier.info(&format!(
            "Loaded image {} with {} layers",
            image_id,
            layer_tarballs.len()
        ));

        Ok(Self {
            extract_dir,
            _temp_dir: temp_dir,
            image_id,
            repo_tags,
            config,
            layer_tarballs,
        })
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn repo_tags(&self) -> &[String] {
        &self.repo_tags
    }

    pub fn layer_tarballs(&self) -> &[PathBuf] {
        &self.layer_tarballs
    }

    fn layer_ids(&self) -> Vec<String> {
        self.layer_tarballs
            .iter()
            .enumerate()
            .map(|(i, tarball)| {
                tarball
                    .strip_prefix(&self.extract_dir)
                    .ok()
                    .and_then(|rel| rel.to_str())
                    .and_then(digest_from_blob_path)
                    .unwrap_or_else(|| format!("layer-{}", i))
            })
            .collect()
    }

    /// Engine-style history, newest first, tags on the newest record.
    pub fn history(&self) -> Vec<LayerRecord> {
        metadata::history_records(
            &metadata::config_history(&self.config),
            &self.layer_ids(),
            &self.image_id,
            &self.repo_tags,
        )
    }

    pub fn runtime_info(&self) -> RuntimeInfo {
        metadata::runtime_info(&self.config)
    }

    /// Applies every layer, oldest first, onto `dest`.
    pub fn flatten_into<P: AsRef<Path>>(&self, dest: P, notifier: &Notifier) -> Result<()> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

        let total = self.layer_tarballs.len() as u64;
        let progress = notifier.create_progress_bar(total, "Flattening layers");

        for (i, tarball) in self.layer_tarballs.iter().enumerate() {
            notifier.progress(i as u64 + 1, total, "Applying layer");
            tar_extractor::extract_tar(tarball, dest)
                .with_context(|| format!("Failed to apply layer {}", tarball.display()))?;
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        Ok(())
    }
}
