use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::{Database, SearchSession};
use crate::error::GeoError;

pub const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
pub const ESUMMARY_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

const QUERY_RESULT_FIELD: &str = "esearchresult";
const QUERY_WEBENV_FIELD: &str = "webenv";
const QUERY_QRYKEY_FIELD: &str = "querykey";
const SEARCH_RESULT_FIELD: &str = "result";
const SEARCH_UIDS_FIELD: &str = "uids";
pub const FTP_LINK_FIELD: &str = "ftplink";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Search,
    Summary,
}

pub type QueryParams = Vec<(&'static str, String)>;

/// Raw GET access to the two E-utilities endpoints.
pub trait SearchTransport: Send + Sync {
    fn get(&self, endpoint: Endpoint, params: &QueryParams) -> Result<String, GeoError>;
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    search_url: String,
    summary_url: String,
    api_key: Option<String>,
}

impl EntrezHttpClient {
    pub fn new() -> Result<Self, GeoError> {
        Self::with_base_urls(ESEARCH_URL, ESUMMARY_URL)
    }

    pub fn with_base_urls(search_url: &str, summary_url: &str) -> Result<Self, GeoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("geoduck/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeoError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| GeoError::SearchHttp(err.to_string()))?;
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            search_url: search_url.to_string(),
            summary_url: summary_url.to_string(),
            api_key,
        })
    }
}

impl SearchTransport for EntrezHttpClient {
    fn get(&self, endpoint: Endpoint, params: &QueryParams) -> Result<String, GeoError> {
        let url = match endpoint {
            Endpoint::Search => &self.search_url,
            Endpoint::Summary => &self.summary_url,
        };
        let mut request = self.client.get(url).query(params);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }
        let response = request
            .send()
            .map_err(|err| GeoError::SearchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "E-utilities request failed".to_string());
            return Err(GeoError::SearchStatus { status, message });
        }
        response
            .text()
            .map_err(|err| GeoError::SearchHttp(err.to_string()))
    }
}

/// Result object of one esummary call, filtered to the declared identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryPage {
    pub uids: Vec<String>,
    pub records: BTreeMap<String, Value>,
}

impl SummaryPage {
    /// Identifier to raw `ftplink` in `uids` order, for records that carry a
    /// non-empty link.
    pub fn ftp_links(&self) -> Vec<(String, String)> {
        self.uids
            .iter()
            .filter_map(|uid| {
                self.records
                    .get(uid)
                    .and_then(|data| data.get(FTP_LINK_FIELD))
                    .and_then(|v| v.as_str())
                    .filter(|link| !link.trim().is_empty())
                    .map(|link| (uid.clone(), link.to_string()))
            })
            .collect()
    }
}

pub struct SearchClient<T: SearchTransport> {
    transport: T,
}

impl<T: SearchTransport> SearchClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs a single-record esearch to obtain the history-server tokens.
    pub fn open_session(&self, term: &str, database: Database) -> Result<SearchSession, GeoError> {
        let params = search_params(term, database, 1, 1);
        let body = self.transport.get(Endpoint::Search, &params)?;
        parse_search_response(&body)?.ok_or_else(|| GeoError::SessionUnavailable {
            term: term.to_string(),
        })
    }

    pub fn fetch_summary(
        &self,
        session: &SearchSession,
        database: Database,
        position: usize,
        page_size: usize,
    ) -> Result<SummaryPage, GeoError> {
        let params = summary_params(session, database, position, page_size);
        debug!(position, page_size, "requesting summary page");
        let body = self.transport.get(Endpoint::Summary, &params)?;
        parse_summary_response(&body)
    }
}

pub fn search_params(term: &str, database: Database, retstart: usize, retmax: usize) -> QueryParams {
    vec![
        ("db", database.as_str().to_string()),
        ("term", term.to_string()),
        ("usehistory", "y".to_string()),
        ("retmode", "json".to_string()),
        ("retstart", retstart.max(1).to_string()),
        ("retmax", retmax.max(1).to_string()),
    ]
}

pub fn summary_params(
    session: &SearchSession,
    database: Database,
    retstart: usize,
    retmax: usize,
) -> QueryParams {
    vec![
        ("db", database.as_str().to_string()),
        ("version", "2.0".to_string()),
        ("query_key", session.query_key().to_string()),
        ("WebEnv", session.web_env().to_string()),
        ("retmode", "json".to_string()),
        ("retstart", retstart.max(1).to_string()),
        ("retmax", retmax.max(1).to_string()),
    ]
}

pub fn parse_search_response(body: &str) -> Result<Option<SearchSession>, GeoError> {
    let doc: Value =
        serde_json::from_str(body).map_err(|err| GeoError::SearchParse(err.to_string()))?;
    let result = doc.get(QUERY_RESULT_FIELD);
    let field = |name: &str| {
        result
            .and_then(|r| r.get(name))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    Ok(SearchSession::new(
        field(QUERY_WEBENV_FIELD),
        field(QUERY_QRYKEY_FIELD),
    ))
}

/// Keeps only the entries of `result` whose keys appear in its `uids` list.
pub fn parse_summary_response(body: &str) -> Result<SummaryPage, GeoError> {
    if body.trim().is_empty() {
        return Ok(SummaryPage::default());
    }
    let doc: Value =
        serde_json::from_str(body).map_err(|err| GeoError::SearchParse(err.to_string()))?;
    let Some(result) = doc.get(SEARCH_RESULT_FIELD).and_then(|v| v.as_object()) else {
        return Ok(SummaryPage::default());
    };
    let uids: Vec<String> = result
        .get(SEARCH_UIDS_FIELD)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let records = result
        .iter()
        .filter(|(key, _)| uids.iter().any(|uid| uid == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(SummaryPage { uids, records })
}
