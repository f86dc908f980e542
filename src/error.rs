// Copyright Catenary Transit Initiatives

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a [`crate::surface::MapSurface`] implementation.
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("marker library failed to load: {0}")]
    MarkerLibrary(String),
    #[error("map surface is not available: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ClusterError {
    /// Fatal setup error. `initialize()` does not complete and may be retried.
    #[error("could not acquire the marker capability: {0}")]
    MarkerLibraryUnavailable(#[source] SurfaceError),
    #[error("invalid cluster option `{field}`: {reason}")]
    InvalidOption { field: &'static str, reason: String },
    #[error("failed to parse cluster options: {0}")]
    Config(#[from] ron::error::SpannedError),
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
