use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeoError {
    #[error("search for {term:?} returned no usable session (WebEnv/query_key)")]
    #[diagnostic(help("the E-utilities history server may be unavailable; retry later"))]
    SessionUnavailable { term: String },

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search API returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("failed to parse search response: {0}")]
    SearchParse(String),

    #[error("transient FTP failure: {0}")]
    TransientTransfer(String),

    #[error("FTP request refused: {0}")]
    PermissionTransfer(String),

    #[error("no file matching {pattern:?} in {directory}")]
    NoMatchingFile { directory: String, pattern: String },

    #[error("failed to decode {filename}: {message}")]
    Decode { filename: String, message: String },

    #[error("retrieved {filename} is empty after decompression")]
    EmptyContent { filename: String },

    #[error("compute service query failed: {0}")]
    Analysis(String),

    #[error("no backend registered under {0:?}")]
    #[diagnostic(help("available backends: local, distributed"))]
    UnknownBackend(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("run cancelled")]
    Cancelled,
}

impl GeoError {
    /// Faults worth exactly one reconnect-and-retry of an FTP transfer.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoError::TransientTransfer(_))
    }

    /// Faults confined to a single pipeline item. Everything else aborts the run.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            GeoError::TransientTransfer(_)
                | GeoError::PermissionTransfer(_)
                | GeoError::NoMatchingFile { .. }
                | GeoError::Decode { .. }
                | GeoError::EmptyContent { .. }
                | GeoError::Analysis(_)
                | GeoError::Filesystem(_)
        )
    }
}
