//! Rendering of run summaries and instance listings

mod formatter;

pub use formatter::{write_results_to_file, OutputFormat, ResultFormatter};
