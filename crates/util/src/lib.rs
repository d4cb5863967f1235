//! Small helpers shared across the studio crates: path resolution, id
//! generation and log redaction.

pub mod ids;
pub mod path_processing;
pub mod text_processing;

pub use ids::*;
pub use path_processing::*;
pub use text_processing::redact_sensitive;
