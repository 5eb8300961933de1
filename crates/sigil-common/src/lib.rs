//! Shared utilities for the sigil crates
//!
//! - [`atomic`]: temp-file-then-rename replacement used by every writer
//! - [`json_store`]: small JSON documents persisted atomically
//! - [`logging`]: `tracing-subscriber` initialization
//! - [`error`]: error cause-chain formatting

pub mod atomic;
pub mod error;
pub mod json_store;
pub mod logging;

pub use atomic::{write_atomic, StagedFile};
pub use error::format_error;
pub use json_store::{
    load_json, load_json_or_default, save_json_atomic, JsonStoreError, JsonStoreResult,
};
pub use logging::{init as init_logging, LogLevel, LogOptions};
