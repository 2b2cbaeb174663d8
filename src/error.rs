use std::path::PathBuf;

/// Failures of the recipe operations.
///
/// Decoding and synthesis themselves are total; only the collaborators at
/// the edges (history fetch, file write) can fail.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("failed to fetch history for '{image}'")]
    Fetch {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RecipeError>;
