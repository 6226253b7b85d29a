use chrono::Utc;
use tracing::info;

use crate::backend::{BACKEND_LOCAL, Backend, BackendSettings, Extracted, ExtractedText};
use crate::domain::ArchiveLocation;
use crate::error::GeoError;
use crate::parsers::{infer_format, parse_format};
use crate::retrieval::{FtpConnector, RawContent, RetrievalClient, SuppaFtpConnector};
use crate::store::Store;

/// In-process backend: FTP download, parser table, normalization, file writes.
pub struct LocalBackend<C: FtpConnector = SuppaFtpConnector> {
    retrieval: RetrievalClient<C>,
    store: Store,
    format: Option<String>,
}

impl<C: FtpConnector> LocalBackend<C> {
    pub fn new(connector: C, store: Store) -> Self {
        Self {
            retrieval: RetrievalClient::new(connector),
            store,
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    pub fn retrieval(&self) -> &RetrievalClient<C> {
        &self.retrieval
    }
}

pub(crate) fn create(settings: &BackendSettings) -> Result<Box<dyn Backend>, GeoError> {
    let connector = SuppaFtpConnector::new(settings.ftp.clone());
    let backend =
        LocalBackend::new(connector, settings.store.clone()).with_format(settings.format.clone());
    Ok(Box::new(backend))
}

impl<C: FtpConnector> Backend for LocalBackend<C> {
    fn name(&self) -> &'static str {
        BACKEND_LOCAL
    }

    fn store(&self) -> &Store {
        &self.store
    }

    fn extract_item(&mut self, directory: &str, filename: &str) -> Result<Extracted, GeoError> {
        let retrieved = self.retrieval.fetch_text(directory, filename)?;
        let format = infer_format(&retrieved.filename, self.format.as_deref());
        let text = parse_format(&retrieved.text, &format);
        info!(
            directory,
            filename = %retrieved.filename,
            format = %format,
            "extracted archive"
        );
        Ok(Extracted::Text(ExtractedText {
            directory: retrieved.directory,
            filename: retrieved.filename,
            format,
            retrieved_at: Utc::now().to_rfc3339(),
            text,
        }))
    }

    fn fetch_data(&mut self, location: &ArchiveLocation) -> Result<RawContent, GeoError> {
        self.retrieval.fetch(&location.directory, &location.filename)
    }
}
