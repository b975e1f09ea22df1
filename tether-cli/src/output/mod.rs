//! Output formatting for CLI.

mod json;
mod text;

pub use json::{CheckOutput, JsonFormatter, SampleOutput};
pub use text::TextFormatter;
