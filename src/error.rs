use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the map rendering core.
///
/// Every variant is terminal for the render call that raised it; nothing in
/// the core retries.
#[derive(Error, Debug)]
pub enum SkyplotError {
    #[error("unrecognised or malformed map file {path}: {reason}")]
    FileFormat { path: PathBuf, reason: String },

    #[error("dataset '{dataset}' not found in {path}")]
    DatasetNotFound { path: PathBuf, dataset: String },

    #[error("invalid resolution nside={0}: must be a positive power of two")]
    Resolution(u32),

    #[error("cannot change resolution from nside={from} to nside={to}")]
    UnsupportedResolutionChange { from: u32, to: u32 },

    #[error("degenerate mask: {needed} usable pixels required, {available} available")]
    DegenerateMask { needed: usize, available: usize },

    #[error("invalid parameter combination: {0}")]
    InvalidParameterCombination(String),

    #[error("unknown colormap '{0}'")]
    UnknownColormap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("drawing failed: {0}")]
    Render(String),
}

impl SkyplotError {
    /// Short machine-friendly name of the error kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SkyplotError::FileFormat { .. } => "FileFormatError",
            SkyplotError::DatasetNotFound { .. } => "DatasetNotFoundError",
            SkyplotError::Resolution(_) => "ResolutionError",
            SkyplotError::UnsupportedResolutionChange { .. } => "UnsupportedResolutionChange",
            SkyplotError::DegenerateMask { .. } => "DegenerateMaskError",
            SkyplotError::InvalidParameterCombination(_) => "InvalidParameterCombination",
            SkyplotError::UnknownColormap(_) => "UnknownColormap",
            SkyplotError::Io(_) => "IoError",
            SkyplotError::Render(_) => "RenderError",
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SkyplotError::InvalidParameterCombination(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SkyplotError>;

/// A failed render, tagged with the input it was working on.
#[derive(Error, Debug)]
#[error("{} while rendering {input} [{selector}]: {source}", .source.kind())]
pub struct RenderFailure {
    pub input: String,
    pub selector: String,
    #[source]
    pub source: SkyplotError,
    /// Files completed for earlier signals of the same request.
    pub written: Vec<PathBuf>,
}
