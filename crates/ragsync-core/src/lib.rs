//! ragsync Core Components
//!
//! This crate resolves profiles into index contexts: configuration layering,
//! embedding specs and the wiring of sources, splitters and node stores into a
//! synchronizer.

mod config;
mod context;
mod error;

pub use config::{
    ragsync_home, EmbedBackend, EmbedSpec, Profile, ProfileLoader, ProfileOverrides,
    LOCAL_CONFIG_FILE,
};
pub use context::{inspect, IndexContext, IndexSummary, SourceSpec};
pub use error::CoreError;
