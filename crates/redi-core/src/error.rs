//! Error types for redi-core

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Invalid model {}: {reason}", path.display())]
    InvalidModel { path: PathBuf, reason: String },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
