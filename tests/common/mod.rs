#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use geoduck::error::GeoError;
use geoduck::retrieval::{FtpConnector, FtpSession};
use geoduck::search::{Endpoint, QueryParams, SearchTransport};

/// Serves one esearch body and a queue of esummary bodies. An exhausted
/// queue answers with an empty body.
pub struct ScriptedTransport {
    search_body: String,
    summaries: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<(Endpoint, QueryParams)>>,
}

impl ScriptedTransport {
    pub fn new(search_body: impl Into<String>, summaries: Vec<String>) -> Self {
        Self {
            search_body: search_body.into(),
            summaries: Mutex::new(summaries.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_session(summaries: Vec<String>) -> Self {
        Self::new(session_body("MCID_TEST", "1"), summaries)
    }

    pub fn summary_calls(&self) -> Vec<QueryParams> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(endpoint, _)| *endpoint == Endpoint::Summary)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

impl SearchTransport for ScriptedTransport {
    fn get(&self, endpoint: Endpoint, params: &QueryParams) -> Result<String, GeoError> {
        self.calls.lock().unwrap().push((endpoint, params.clone()));
        match endpoint {
            Endpoint::Search => Ok(self.search_body.clone()),
            Endpoint::Summary => Ok(self
                .summaries
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()),
        }
    }
}

pub fn session_body(web_env: &str, query_key: &str) -> String {
    json!({"esearchresult": {"count": "1", "webenv": web_env, "querykey": query_key}}).to_string()
}

/// esummary body declaring `entries` as its uids, each with the given ftplink.
pub fn summary_body(entries: &[(&str, &str)]) -> String {
    let mut result = Map::new();
    let uids: Vec<Value> = entries.iter().map(|(uid, _)| json!(uid)).collect();
    result.insert("uids".to_string(), Value::Array(uids));
    for (uid, link) in entries {
        result.insert(uid.to_string(), json!({"ftplink": link}));
    }
    json!({ "result": result }).to_string()
}

pub fn param<'a>(params: &'a QueryParams, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}

/// Shared counters and canned behavior for [`MockConnector`] sessions.
#[derive(Clone, Default)]
pub struct FtpScript {
    pub connects: Arc<Mutex<usize>>,
    pub retrieves: Arc<Mutex<usize>>,
    pub quits: Arc<Mutex<usize>>,
    pub cwds: Arc<Mutex<Vec<String>>>,
    pub failures: Arc<Mutex<VecDeque<GeoError>>>,
    pub names: Vec<String>,
    pub payload: Vec<u8>,
}

impl FtpScript {
    pub fn serving(names: &[&str], payload: impl Into<Vec<u8>>) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, err: GeoError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }

    pub fn retrieves(&self) -> usize {
        *self.retrieves.lock().unwrap()
    }

    pub fn quits(&self) -> usize {
        *self.quits.lock().unwrap()
    }
}

pub struct MockConnector {
    pub script: FtpScript,
}

impl FtpConnector for MockConnector {
    type Session = MockSession;

    fn connect(&self) -> Result<MockSession, GeoError> {
        *self.script.connects.lock().unwrap() += 1;
        Ok(MockSession {
            script: self.script.clone(),
        })
    }
}

pub struct MockSession {
    pub script: FtpScript,
}

impl FtpSession for MockSession {
    fn cwd(&mut self, path: &str) -> Result<(), GeoError> {
        self.script.cwds.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn list_names(&mut self) -> Result<Vec<String>, GeoError> {
        Ok(self.script.names.clone())
    }

    fn retrieve(&mut self, _filename: &str, sink: &mut dyn Write) -> Result<u64, GeoError> {
        *self.script.retrieves.lock().unwrap() += 1;
        if let Some(err) = self.script.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        sink.write_all(&self.script.payload)
            .map_err(|err| GeoError::TransientTransfer(err.to_string()))?;
        Ok(self.script.payload.len() as u64)
    }

    fn quit(&mut self) -> Result<(), GeoError> {
        *self.script.quits.lock().unwrap() += 1;
        Ok(())
    }
}

pub fn gzip(text: &str) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// A small series-matrix file with two samples.
pub const SERIES_MATRIX: &str = "!Series_title\t\"Liver cancer cohort\"\n\
!Sample_title\t\"tumor_1\"\t\"normal_1\"\n\
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\n\
!Sample_supplementary_file\t\"ftp://ftp.ncbi.nlm.nih.gov/geo/samples/GSM1nnn/GSM1/suppl/GSM1.CEL.gz\"\t\"NONE\"\n\
\n\
!series_matrix_table_begin\n\
\"ID_REF\"\t\"GSM1\"\t\"GSM2\"\n\
\"1007_s_at\"\t5.1\t6.2\n\
!series_matrix_table_end\n";
