//! Reverse a Dockerfile out of flat image layer history.
//!
//! The engine reports history newest-first as opaque `created_by` strings with tags
//! on the topmost layer of each tagged image. Nothing else marks where one image ends
//! and the next one built on top of it begins, so a "fat" history of stacked images
//! is split using tags and the position of the oldest layer only.
//!
//! Decoding runs in three independent steps over the build-ordered (oldest-first) list:
//! 1. [`classify`] assigns every layer a [`Region`].
//! 2. [`decode_instruction`] turns each `created_by` string into an instruction using
//!    an ordered table of recognizers, falling back to the raw string.
//! 3. [`render_lines`] assembles the instructions with `# new image` delimiters and an
//!    end-of-image summary after every tagged layer.
//!
//! Nothing here fails: unknown shapes pass through verbatim. The only fallible entry
//! point is [`reverse_dockerfile`], which propagates history fetch errors.

use crate::error::{RecipeError, Result};
use crate::history::LayerRecord;
use crate::notifier::{NoTrace, Notifier, Trace};
use crate::sources::HistorySource;
use std::fs;
use std::path::Path;

/// Prefix the builder records for instructions that changed only metadata.
pub const NOP_PREFIX: &str = "/bin/sh -c #(nop) ";
/// Prefix the builder records for `RUN` instructions.
pub const EXEC_PREFIX: &str = "/bin/sh -c ";

pub const NEW_IMAGE_MARKER: &str = "# new image";

const AND_SEPARATOR: &str = "&&";
const LINE_CONTINUATION: &str = " && \\\n";

/// Tag information carried by the topmost layer of a tagged image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageTags {
    pub image_name: String,
    pub short_tags: Vec<String>,
    pub full_tags: Vec<String>,
}

impl ImageTags {
    pub fn from_tags(tags: &[String]) -> Self {
        // Only the first tag names the image; later tags may point at other repositories.
        let image_name = tags
            .first()
            .and_then(|tag| {
                let parts: Vec<&str> = tag.split(':').collect();
                (parts.len() > 1).then(|| parts[0].to_string())
            })
            .unwrap_or_default();

        let short_tags = tags
            .iter()
            .filter_map(|tag| tag.split(':').nth(1).map(str::to_string))
            .collect();

        Self {
            image_name,
            short_tags,
            full_tags: tags.to_vec(),
        }
    }
}

/// Position of a layer relative to the logical image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    /// Oldest layer of the whole history.
    First,
    Intermediate,
    /// Topmost layer of a tagged image.
    Last(ImageTags),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub command: String,
    pub comment: String,
    pub region: Region,
    pub created_at: i64,
    pub layer_id: String,
}

impl DecodedInstruction {
    pub fn image_name(&self) -> &str {
        match &self.region {
            Region::Last(tags) => &tags.image_name,
            _ => "",
        }
    }

    pub fn short_tags(&self) -> &[String] {
        match &self.region {
            Region::Last(tags) => &tags.short_tags,
            _ => &[],
        }
    }

    pub fn full_tags(&self) -> &[String] {
        match &self.region {
            Region::Last(tags) => &tags.full_tags,
            _ => &[],
        }
    }
}

type Recognizer = fn(&str) -> Option<String>;

/// Instruction shapes in match order. The first recognizer that accepts the raw
/// `created_by` string produces the instruction.
const RECOGNIZERS: &[(&str, Recognizer)] = &[
    ("scratch", recognize_scratch),
    ("nop", recognize_nop),
    ("exec", recognize_exec),
];

fn recognize_scratch(raw: &str) -> Option<String> {
    raw.is_empty().then(|| "FROM scratch".to_string())
}

fn recognize_nop(raw: &str) -> Option<String> {
    raw.strip_prefix(NOP_PREFIX).map(str::to_string)
}

fn recognize_exec(raw: &str) -> Option<String> {
    raw.strip_prefix(EXEC_PREFIX)
        .map(|run| format!("RUN {}", format_run_block(run)))
}

/// Splits a flattened `a && b && c` shell line into a continued multi-line block.
pub fn format_run_block(run: &str) -> String {
    if !run.contains(AND_SEPARATOR) {
        return run.to_string();
    }

    run.split(AND_SEPARATOR)
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                part.trim().to_string()
            } else {
                format!("\t{}", part.trim())
            }
        })
        .collect::<Vec<_>>()
        .join(LINE_CONTINUATION)
}

/// Undoes the engine's Go-struct rendering of exec-form entrypoints (`&{[..]}`).
fn normalize_entrypoint(instruction: String) -> String {
    if instruction.starts_with("ENTRYPOINT ") {
        instruction.replace("&{[", "[").replace("]}", "]")
    } else {
        instruction
    }
}

/// Decodes one `created_by` string into a Dockerfile instruction.
pub fn decode_instruction(created_by: &str) -> String {
    let instruction = RECOGNIZERS
        .iter()
        .find_map(|(_, recognize)| recognize(created_by))
        .unwrap_or_else(|| created_by.to_string());

    normalize_entrypoint(instruction)
}

/// Returns the name of the recognizer that handles `created_by`, if any.
pub fn instruction_shape(created_by: &str) -> Option<&'static str> {
    RECOGNIZERS
        .iter()
        .find(|(_, recognize)| recognize(created_by).is_some())
        .map(|(name, _)| *name)
}

/// Regions for `history` (newest-first), returned in build order (oldest-first).
pub fn classify(history: &[LayerRecord]) -> Vec<Region> {
    let oldest = history.len().saturating_sub(1);

    history
        .iter()
        .enumerate()
        .rev()
        .map(|(idx, record)| {
            if record.is_tagged() {
                Region::Last(ImageTags::from_tags(&record.tags))
            } else if idx == oldest {
                Region::First
            } else {
                Region::Intermediate
            }
        })
        .collect()
}

/// Decodes `history` (newest-first) into build-ordered instructions.
pub fn decode_instructions(history: &[LayerRecord], trace: &dyn Trace) -> Vec<DecodedInstruction> {
    let regions = classify(history);

    history
        .iter()
        .rev()
        .zip(regions)
        .map(|(record, region)| {
            let command = decode_instruction(&record.created_by);
            trace.record(&format!(
                "layer {} [{:?}] {} {:?} => {:?}",
                record.id,
                region,
                instruction_shape(&record.created_by).unwrap_or("verbatim"),
                record.created_by,
                command
            ));
            DecodedInstruction {
                command,
                comment: record.comment.clone(),
                region,
                created_at: record.created,
                layer_id: record.id.clone(),
            }
        })
        .collect()
}

/// Assembles the annotated Dockerfile lines for build-ordered instructions.
pub fn render_lines(instructions: &[DecodedInstruction]) -> Vec<String> {
    let mut lines = Vec::new();
    let final_idx = instructions.len().saturating_sub(1);

    for (idx, inst) in instructions.iter().enumerate() {
        if inst.region == Region::First {
            lines.push(NEW_IMAGE_MARKER.to_string());
        }

        lines.push(inst.command.clone());

        if !inst.comment.is_empty() {
            lines.push(format!("# {}", inst.comment));
        }

        if let Region::Last(tags) = &inst.region {
            lines.push(format!(
                "# end of image: {} (id: {} tags: {})",
                tags.image_name,
                inst.layer_id,
                tags.short_tags.join(",")
            ));
            lines.push(String::new());
            if idx < final_idx {
                lines.push(NEW_IMAGE_MARKER.to_string());
            }
        }
    }

    lines
}

pub fn decode_with_trace(history: &[LayerRecord], trace: &dyn Trace) -> Vec<String> {
    let instructions = decode_instructions(history, trace);
    let lines = render_lines(&instructions);

    trace.record("image instructions:");
    for line in &lines {
        trace.record(line);
    }

    lines
}

/// Decodes newest-first layer history into Dockerfile lines in build order.
pub fn decode(history: &[LayerRecord]) -> Vec<String> {
    decode_with_trace(history, &NoTrace)
}

/// Fetches the history of `image` from `source` and decodes it.
pub fn reverse_dockerfile(
    source: &dyn HistorySource,
    image: &str,
    notifier: &Notifier,
) -> Result<Vec<String>> {
    notifier.info(&format!(
        "Fetching history of {} from {} source...",
        image,
        source.name()
    ));

    let history = source
        .fetch_history(image, notifier)
        .map_err(|err| RecipeError::Fetch {
            image: image.to_string(),
            source: err,
        })?;

    notifier.debug(&format!("Decoding {} history records", history.len()));
    Ok(decode_with_trace(&history, notifier))
}

/// Writes decoded lines to `path`, newline-separated.
pub fn save_dockerfile_data<P: AsRef<Path>>(path: P, lines: &[String]) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, lines.join("\n")).map_err(|source| RecipeError::Write {
        path: path.to_path_buf(),
        source,
    })
}
