use anyhow::Result;

use super::HistorySource;
use crate::history::{self, LayerRecord};
use crate::notifier::Notifier;

/// Reads history saved from the engine history API (`GET /images/{name}/history`).
///
/// Unlike an image archive this keeps every tag the engine knows about, so a history
/// spanning several locally built images decodes into all of them.
pub struct HistoryFileSource;

impl HistoryFileSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HistoryFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HistorySource for HistoryFileSource {
    fn name(&self) -> &str {
        "history-json"
    }

    fn fetch_history(&self, path: &str, notifier: &Notifier) -> Result<Vec<LayerRecord>> {
        notifier.debug(&format!("Reading history JSON from {}", path));
        history::load_history_file(path)
    }
}
