pub mod decoder;
pub mod error;
pub mod history;
pub mod image_archive;
pub mod metadata;
pub mod notifier;
pub mod sources;
pub mod synthesizer;
pub mod tar_extractor;

// Re-exports for easy access
pub use decoder::{decode, reverse_dockerfile, save_dockerfile_data, DecodedInstruction, Region};
pub use error::RecipeError;
pub use history::LayerRecord;
pub use image_archive::ImageArchive;
pub use notifier::{Notifier, Trace};
pub use sources::{DockerSource, HistoryFileSource, HistorySource, NerdctlSource, Source, TarSource};
pub use synthesizer::{generate_from_info, synthesize, RuntimeInfo};
