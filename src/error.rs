use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("failed to open workbook {}: {message}", path.display())]
    Workbook { path: PathBuf, message: String },

    #[error("workbook has no worksheet: {}", .0.display())]
    MissingWorksheet(PathBuf),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to serialize document: {0}")]
    Serialization(String),

    #[error("Dataverse client setup failed: {0}")]
    DataverseHttp(String),
}
