//! CLI command implementations.

pub mod add_word;
pub mod status;
pub mod sync;
