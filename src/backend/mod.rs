//! Processing backends.
//!
//! A backend carries one archive through extraction, normalization, link
//! resolution and data download. Every stage has a matching save operation
//! that persists its output into the [`Store`] layout.

pub mod distributed;
pub mod local;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::domain::ArchiveLocation;
use crate::error::GeoError;
use crate::links::{DEFAULT_TITLE_HEADER, LinkSet, extract_links};
use crate::normalize::{NormalizedRecord, normalize, normalize_rows};
use crate::retrieval::{FtpConfig, RawContent};
use crate::store::Store;

pub use distributed::{
    CollectRequest, ComputeService, DeferredTable, DistributedBackend, HttpComputeService,
};
pub use local::LocalBackend;

pub const BACKEND_LOCAL: &str = "local";
pub const BACKEND_DISTRIBUTED: &str = "distributed";

/// Archive text after the format pre-parser ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub directory: String,
    pub filename: String,
    pub format: String,
    pub retrieved_at: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum Extracted {
    Text(ExtractedText),
    /// Planned on a compute service; evaluated on first use.
    Deferred(DeferredTable),
}

impl Extracted {
    pub fn filename(&self) -> &str {
        match self {
            Extracted::Text(text) => &text.filename,
            Extracted::Deferred(table) => table.filename(),
        }
    }

    pub fn directory(&self) -> &str {
        match self {
            Extracted::Text(text) => &text.directory,
            Extracted::Deferred(table) => table.directory(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CollectedTable<'a> {
    uri: &'a str,
    rows: Vec<Vec<String>>,
}

/// Terminal output of one item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum BackendResult {
    Extracted { path: String },
    Normalized { path: String },
    Links { path: String },
    Records { record: NormalizedRecord, links: LinkSet },
    Data { paths: Vec<String> },
}

pub trait Backend {
    fn name(&self) -> &'static str;

    fn store(&self) -> &Store;

    fn extract_item(&mut self, directory: &str, filename: &str) -> Result<Extracted, GeoError>;

    fn fetch_data(&mut self, location: &ArchiveLocation) -> Result<RawContent, GeoError>;

    fn save_extracted(
        &self,
        extracted: &Extracted,
        path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, GeoError> {
        let path = resolve_path(path, || self.store().extracted_path(extracted.filename()));
        match extracted {
            Extracted::Text(text) => Store::write_json(&path, text)?,
            Extracted::Deferred(table) => {
                let rows = table.collect()?;
                Store::write_json(
                    &path,
                    &CollectedTable {
                        uri: table.uri(),
                        rows,
                    },
                )?
            }
        }
        debug!(path = %path, "saved extracted item");
        Ok(path)
    }

    fn normalize_item(&self, extracted: Extracted) -> Result<NormalizedRecord, GeoError> {
        match extracted {
            Extracted::Text(text) => Ok(normalize(text.text, true)),
            Extracted::Deferred(table) => Ok(normalize_rows(table.collect()?, true)),
        }
    }

    fn save_normalized(
        &self,
        source_filename: &str,
        record: &NormalizedRecord,
        path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, GeoError> {
        let path = resolve_path(path, || self.store().normalized_path(source_filename));
        Store::write_json(&path, record)?;
        debug!(path = %path, "saved normalized record");
        Ok(path)
    }

    fn retrieve_data_links(&self, record: &NormalizedRecord) -> LinkSet {
        extract_links(record, None, DEFAULT_TITLE_HEADER)
    }

    fn save_links(
        &self,
        source_filename: &str,
        links: &LinkSet,
        path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, GeoError> {
        let path = resolve_path(path, || self.store().links_path(source_filename));
        Store::write_json(&path, links)?;
        debug!(path = %path, "saved data links");
        Ok(path)
    }

    fn save_data(
        &self,
        content: &RawContent,
        path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, GeoError> {
        let path = resolve_path(path, || self.store().data_path(&content.filename));
        Store::write_bytes_atomic(&path, &content.bytes)?;
        debug!(path = %path, bytes = content.bytes.len(), "saved data file");
        Ok(path)
    }
}

fn resolve_path(path: Option<&Utf8Path>, default: impl FnOnce() -> Utf8PathBuf) -> Utf8PathBuf {
    path.map(Utf8Path::to_path_buf).unwrap_or_else(default)
}

/// Everything a backend factory may need.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub ftp: FtpConfig,
    pub store: Store,
    pub compute_endpoint: Option<String>,
    /// Forces a parser instead of inferring it from the file extension.
    pub format: Option<String>,
}

impl BackendSettings {
    pub fn new(store: Store) -> Self {
        Self {
            ftp: FtpConfig::default(),
            store,
            compute_endpoint: None,
            format: None,
        }
    }
}

pub type BackendFactory = fn(&BackendSettings) -> Result<Box<dyn Backend>, GeoError>;

/// Backend key to factory, filled once at startup.
pub struct BackendRegistry {
    factories: Vec<(&'static str, BackendFactory)>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(BACKEND_LOCAL, local::create);
        registry.register(BACKEND_DISTRIBUTED, distributed::create);
        registry
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Adds a factory. A repeated key replaces the earlier entry.
    pub fn register(&mut self, key: &'static str, factory: BackendFactory) {
        match self.factories.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = factory,
            None => self.factories.push((key, factory)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|(key, _)| *key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.iter().any(|(k, _)| *k == key)
    }

    pub fn create(
        &self,
        key: &str,
        settings: &BackendSettings,
    ) -> Result<Box<dyn Backend>, GeoError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(k, _)| *k == key)
            .ok_or_else(|| GeoError::UnknownBackend(key.to_string()))?;
        factory(settings)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn settings() -> BackendSettings {
        BackendSettings::new(Store::new_with_root(Utf8PathBuf::from("/tmp/geoduck-test")))
    }

    #[test]
    fn default_registry_keys() {
        let registry = BackendRegistry::default();
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys, vec![BACKEND_LOCAL, BACKEND_DISTRIBUTED]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let registry = BackendRegistry::default();
        let err = registry.create("spark", &settings()).err().unwrap();
        assert_matches!(err, GeoError::UnknownBackend(key) if key == "spark");
    }

    #[test]
    fn distributed_requires_endpoint() {
        let registry = BackendRegistry::default();
        let err = registry
            .create(BACKEND_DISTRIBUTED, &settings())
            .err()
            .unwrap();
        assert_matches!(err, GeoError::InvalidConfig(_));
    }

    #[test]
    fn local_backend_builds_without_connecting() {
        let registry = BackendRegistry::default();
        let backend = registry.create(BACKEND_LOCAL, &settings()).unwrap();
        assert_eq!(backend.name(), BACKEND_LOCAL);
    }
}
