// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Seek journal error: {0}")]
    Journal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Decoder not found: {0}")]
    DecoderNotFound(String),

    #[error("Input {name} failed to start: {reason}")]
    InputStart { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
