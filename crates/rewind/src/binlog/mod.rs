//! Binary-log handling: event parsing, window extraction and replay script
//! generation.

pub mod event;
pub mod script;
pub mod window;

pub use event::{EventParser, ReplayEvent, RowImage, RowOp, SqlValue};
pub use script::{ScriptArtifact, ScriptGenerator};
pub use window::LogWindowExtractor;
