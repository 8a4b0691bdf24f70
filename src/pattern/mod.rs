//! Regex pattern handling for manifests and queries.
//!
//! Provides the destination-path template compiler and the pattern
//! optimizer that validates and merges user filter patterns.

pub mod optimizer;
pub mod template;

pub use optimizer::{compile_patterns, validate_patterns, CompiledFilter};
pub use template::{compile_template, TEMPLATE_VARIABLES};
