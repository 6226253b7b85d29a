use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::error::GeoError;

pub const DEFAULT_OUTPUT_DIR: &str = "geoduck-output";

/// Stage-specific output layout under one root directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn extracted_path(&self, filename: &str) -> Utf8PathBuf {
        self.root
            .join("metadata")
            .join("raw")
            .join(format!("{}.json", file_key(filename)))
    }

    pub fn normalized_path(&self, filename: &str) -> Utf8PathBuf {
        self.root
            .join("metadata")
            .join("normalized")
            .join(format!("{}.json", file_key(filename)))
    }

    pub fn links_path(&self, filename: &str) -> Utf8PathBuf {
        self.root
            .join("metadata")
            .join("links")
            .join(format!("{}.json", file_key(filename)))
    }

    pub fn data_path(&self, filename: &str) -> Utf8PathBuf {
        self.root.join("data").join(file_key(filename))
    }

    pub fn ensure_root(&self) -> Result<(), GeoError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| GeoError::Filesystem(err.to_string()))
    }

    pub fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), GeoError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GeoError> {
        let parent = path
            .parent()
            .ok_or_else(|| GeoError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".geoduck-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Last path segment of a remote filename, safe to use as a local file name.
fn file_key(filename: &str) -> &str {
    filename
        .rsplit('/')
        .find(|part| !part.is_empty() && *part != "..")
        .unwrap_or("unnamed")
}
