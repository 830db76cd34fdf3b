//! SQL worksheet script engine.
//!
//! Splits worksheet scripts into statements, resolves substitution prompts
//! and runs statements in order over a database session, returning per-statement
//! responses as paginated JSON, a text transcript, or a streamed byte encoding.

pub mod app;
pub mod db;
pub mod error;
pub mod format;
pub mod utils;
pub mod worksheet;

pub use error::{Error, Result};
