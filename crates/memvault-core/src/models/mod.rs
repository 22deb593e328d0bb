//! Data models for memvault entities.
//!
//! - `Record`: one memory entry with its denormalized tags
//! - `Tag`: a key/value label attached to a record

pub mod record;

pub use record::{Record, Tag};
