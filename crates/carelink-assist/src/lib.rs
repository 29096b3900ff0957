//! Advisory side of the messaging core: turns a persisted patient message
//! into a pending doctor-facing suggestion, and optionally mines the same
//! message for vital-sign readings.

pub mod context;
pub mod extract;
pub mod fallback;
pub mod pipeline;
pub mod prompt;

pub use context::SuggestionContext;
pub use extract::{ExtractError, ReadingExtractor};
pub use fallback::{fallback_for, FallbackTemplate};
pub use pipeline::{PipelineConfig, PipelineStores, SuggestionPipeline};
