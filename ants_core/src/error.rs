use std::path::PathBuf;

use crate::Vector2;

/// Errors produced by the simulation core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("grid of size ({width}, {height}) has no free cell left for {entity}")]
    GridFull {
        width: i32,
        height: i32,
        entity: &'static str,
    },

    #[error("invalid map: {0}")]
    InvalidMap(String),

    #[error("subscriber {0} is not connected to this event")]
    SubscriberNotFound(u64),

    #[error("expected {expected} policy lookups (one per agent), found {found}")]
    LookupCountMismatch { expected: usize, found: usize },

    #[error("location ({}, {}) is outside the policy table", .0.x, .0.y)]
    LocationOutsideTable(Vector2),

    #[error("unsupported store format version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("front end I/O failed: {0}")]
    Frontend(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
