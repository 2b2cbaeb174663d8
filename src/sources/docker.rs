use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

use super::{archive_history, run_cli, save_with_cli, HistorySource, Source};
use crate::history::{LayerRecord, MISSING_ID};
use crate::notifier::Notifier;

const UNTAGGED: &str = "<none>:<none>";

/// Docker implementation of the Source trait
pub struct DockerSource;

impl DockerSource {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl Source for DockerSource {
    fn name(&self) -> &str {
        "docker"
    }

    fn get_image_tarball(
        &self,
        image_name: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        save_with_cli("docker", image_name, notifier)
    }
}

impl HistorySource for DockerSource {
    fn name(&self) -> &str {
        Source::name(self)
    }

    fn fetch_history(&self, image_name: &str, notifier: &Notifier) -> Result<Vec<LayerRecord>> {
        let mut history = archive_history(self, image_name, notifier)?;

        // `docker save` only tags the newest record; the daemon knows the other
        // locally built images in the stack.
        match local_image_ids(image_name) {
            Ok((history_ids, tags)) => {
                if !apply_local_tags(&mut history, &history_ids, &tags) {
                    notifier.warn(&format!(
                        "docker history reports {} records, archive has {}; keeping archive tags",
                        history_ids.len(),
                        history.len()
                    ));
                }
            }
            Err(e) => notifier.warn(&format!("Could not read local image tags: {:#}", e)),
        }

        Ok(history)
    }
}

/// Newest-first image ids from `docker history` and the tags of every local image.
fn local_image_ids(image_name: &str) -> Result<(Vec<String>, HashMap<String, Vec<String>>)> {
    let history_ids = run_cli("docker", &["history", "--no-trunc", "-q", image_name])?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let listing = run_cli(
        "docker",
        &[
            "image",
            "ls",
            "--no-trunc",
            "--format",
            "{{.ID}}\t{{.Repository}}:{{.Tag}}",
        ],
    )?;

    Ok((history_ids, parse_image_listing(&listing)))
}

/// Parses `<id>\t<repo>:<tag>` lines into tags per image id.
fn parse_image_listing(listing: &str) -> HashMap<String, Vec<String>> {
    let mut tags: HashMap<String, Vec<String>> = HashMap::new();

    for line in listing.lines() {
        let Some((id, tag)) = line.trim().split_once('\t') else {
            continue;
        };
        if tag == UNTAGGED {
            continue;
        }
        tags.entry(id.to_string()).or_default().push(tag.to_string());
    }

    tags
}

/// Copies daemon image ids and tags onto archive records, index by index.
/// Returns `false` without touching `history` when the two disagree in length.
fn apply_local_tags(
    history: &mut [LayerRecord],
    history_ids: &[String],
    tags: &HashMap<String, Vec<String>>,
) -> bool {
    if history.len() != history_ids.len() {
        return false;
    }

    for (record, id) in history.iter_mut().zip(history_ids) {
        if id == MISSING_ID {
            continue;
        }
        record.id = id.clone();
        if record.tags.is_empty() {
            if let Some(image_tags) = tags.get(id) {
                record.tags = image_tags.clone();
            }
        }
    }

    true
}
