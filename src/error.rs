use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse template '{path}': {message}")]
    TemplateParse { path: PathBuf, message: String },

    #[error("invalid pattern for field '{field}': {message}")]
    InvalidPattern { field: String, message: String },

    #[error("malformed template for {page_type}: {message}")]
    MalformedTemplate { page_type: String, message: String },

    #[error("unknown page type: {0}")]
    UnknownPageType(String),

    #[error("invalid page selection: {0}")]
    InvalidPageSelection(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no pages available after applying selection")]
    NoPagesSelected,
}
