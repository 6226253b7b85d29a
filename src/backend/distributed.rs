//! Backend that plans extraction on a remote compute service.
//!
//! `extract_item` only resolves the exact remote filename and returns a
//! [`DeferredTable`]. The service reads and splits the file when the table
//! is first collected, which happens on normalize or save.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{BACKEND_DISTRIBUTED, Backend, BackendSettings, Extracted};
use crate::domain::ArchiveLocation;
use crate::error::GeoError;
use crate::parsers::infer_format;
use crate::retrieval::{FtpConnector, RawContent, RetrievalClient, SuppaFtpConnector};
use crate::store::Store;

const FIELD_DELIMITER: &str = "\t";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectRequest {
    pub uri: String,
    pub format: String,
    pub delimiter: String,
    pub compression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectResponse {
    rows: Vec<Vec<String>>,
}

/// Evaluates table plans. The engine behind it is opaque.
pub trait ComputeService: Send + Sync {
    fn collect(&self, request: &CollectRequest) -> Result<Vec<Vec<String>>, GeoError>;
}

pub struct HttpComputeService {
    client: Client,
    endpoint: String,
}

impl HttpComputeService {
    pub fn new(endpoint: &str) -> Result<Self, GeoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("geoduck/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeoError::Analysis(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| GeoError::Analysis(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ComputeService for HttpComputeService {
    fn collect(&self, request: &CollectRequest) -> Result<Vec<Vec<String>>, GeoError> {
        let url = format!("{}/tables/collect", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(|err| GeoError::Analysis(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().unwrap_or_default();
            return Err(GeoError::Analysis(format!(
                "{url} returned status {status}: {message}"
            )));
        }
        let body: CollectResponse = response
            .json()
            .map_err(|err| GeoError::Analysis(err.to_string()))?;
        Ok(body.rows)
    }
}

/// Lazy table handle. The first `collect` evaluates it; later calls reuse the rows.
#[derive(Clone)]
pub struct DeferredTable {
    directory: String,
    filename: String,
    request: CollectRequest,
    service: Arc<dyn ComputeService>,
    rows: OnceLock<Vec<Vec<String>>>,
}

impl DeferredTable {
    pub fn new(
        directory: impl Into<String>,
        filename: impl Into<String>,
        request: CollectRequest,
        service: Arc<dyn ComputeService>,
    ) -> Self {
        Self {
            directory: directory.into(),
            filename: filename.into(),
            request,
            service,
            rows: OnceLock::new(),
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn uri(&self) -> &str {
        &self.request.uri
    }

    pub fn request(&self) -> &CollectRequest {
        &self.request
    }

    pub fn is_evaluated(&self) -> bool {
        self.rows.get().is_some()
    }

    pub fn collect(&self) -> Result<Vec<Vec<String>>, GeoError> {
        if let Some(rows) = self.rows.get() {
            return Ok(rows.clone());
        }
        debug!(uri = %self.request.uri, "collecting deferred table");
        let rows = self.service.collect(&self.request)?;
        Ok(self.rows.get_or_init(|| rows).clone())
    }
}

impl fmt::Debug for DeferredTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTable")
            .field("uri", &self.request.uri)
            .field("format", &self.request.format)
            .field("evaluated", &self.is_evaluated())
            .finish()
    }
}

pub struct DistributedBackend<C: FtpConnector = SuppaFtpConnector> {
    retrieval: RetrievalClient<C>,
    store: Store,
    service: Arc<dyn ComputeService>,
    ftp_host: String,
    format: Option<String>,
}

impl<C: FtpConnector> DistributedBackend<C> {
    pub fn new(
        connector: C,
        ftp_host: impl Into<String>,
        store: Store,
        service: Arc<dyn ComputeService>,
    ) -> Self {
        Self {
            retrieval: RetrievalClient::new(connector),
            store,
            service,
            ftp_host: ftp_host.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    /// Builds the table plan for one resolved remote file.
    pub fn plan(&self, directory: &str, filename: &str) -> DeferredTable {
        let format = infer_format(filename, self.format.as_deref());
        let (format, compression) = match format.strip_suffix(".gz") {
            Some(base) => (base.to_string(), Some("gzip".to_string())),
            None if format == "gz" => (String::new(), Some("gzip".to_string())),
            None => (format, None),
        };
        let directory = match directory.trim_matches('/') {
            "" => String::new(),
            trimmed => format!("{trimmed}/"),
        };
        let uri = format!("ftp://{}/{}{}", self.ftp_host, directory, filename);
        let request = CollectRequest {
            uri,
            format,
            delimiter: FIELD_DELIMITER.to_string(),
            compression,
        };
        DeferredTable::new(
            directory,
            filename,
            request,
            Arc::clone(&self.service),
        )
    }
}

pub(crate) fn create(settings: &BackendSettings) -> Result<Box<dyn Backend>, GeoError> {
    let endpoint = settings
        .compute_endpoint
        .as_deref()
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .ok_or_else(|| {
            GeoError::InvalidConfig(
                "the distributed backend requires compute_endpoint".to_string(),
            )
        })?;
    let service = HttpComputeService::new(endpoint)?;
    let connector = SuppaFtpConnector::new(settings.ftp.clone());
    let backend = DistributedBackend::new(
        connector,
        settings.ftp.host.clone(),
        settings.store.clone(),
        Arc::new(service),
    )
    .with_format(settings.format.clone());
    Ok(Box::new(backend))
}

impl<C: FtpConnector> Backend for DistributedBackend<C> {
    fn name(&self) -> &'static str {
        BACKEND_DISTRIBUTED
    }

    fn store(&self) -> &Store {
        &self.store
    }

    fn extract_item(&mut self, directory: &str, filename: &str) -> Result<Extracted, GeoError> {
        let resolved = self.retrieval.locate(directory, filename)?;
        let table = self.plan(directory, &resolved);
        info!(uri = %table.uri(), "planned deferred extraction");
        Ok(Extracted::Deferred(table))
    }

    fn fetch_data(&mut self, location: &ArchiveLocation) -> Result<RawContent, GeoError> {
        self.retrieval.fetch(&location.directory, &location.filename)
    }
}
