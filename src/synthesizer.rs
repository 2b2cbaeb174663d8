//! Minimal from-scratch Dockerfile for a captured filesystem.
//!
//! The caller captures the image filesystem into a `files/` tree next to the output;
//! the recipe copies it into an empty image and restores the runtime settings.

use crate::error::{RecipeError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DOCKERFILE_NAME: &str = "Dockerfile";
/// Directory holding the captured filesystem, relative to the Dockerfile.
pub const FILES_DIR: &str = "files";

/// Runtime settings restored on top of the captured filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub working_dir: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub exposed_ports: BTreeSet<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
}

fn exec_form(instruction: &str, args: &[String]) -> String {
    let quoted: Vec<String> = args.iter().map(|arg| quote(arg)).collect();
    format!("{} [{}]", instruction, quoted.join(","))
}

/// Double-quotes `value` with JSON escaping so the exec form parses back exactly.
fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Dockerfile lines for `info`, in fixed instruction order.
pub fn synthesize(info: &RuntimeInfo) -> Vec<String> {
    let mut lines = vec![
        "FROM scratch".to_string(),
        format!("COPY {} /", FILES_DIR),
    ];

    if !info.working_dir.is_empty() {
        lines.push(format!("WORKDIR {}", info.working_dir));
    }

    // Entries without `=` carry no value to restore
    lines.extend(
        info.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(key, value)| format!("ENV {} {}", key, value)),
    );

    lines.extend(info.exposed_ports.iter().map(|port| format!("EXPOSE {}", port)));

    if !info.entrypoint.is_empty() {
        lines.push(exec_form("ENTRYPOINT", &info.entrypoint));
    }

    if !info.cmd.is_empty() {
        lines.push(exec_form("CMD", &info.cmd));
    }

    lines
}

/// Dockerfile text for `info`, every line newline-terminated.
pub fn render(info: &RuntimeInfo) -> String {
    synthesize(info)
        .into_iter()
        .map(|line| line + "\n")
        .collect()
}

/// Writes `<location>/Dockerfile` for `info` and returns its path.
pub fn generate_from_info<P: AsRef<Path>>(location: P, info: &RuntimeInfo) -> Result<PathBuf> {
    let path = location.as_ref().join(DOCKERFILE_NAME);
    log::debug!("Writing synthesized Dockerfile to {}", path.display());

    fs::write(&path, render(info)).map_err(|source| RecipeError::Write {
        path: path.clone(),
        source,
    })?;

    Ok(path)
}
