mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use geoduck::backend::{
    Backend, CollectRequest, ComputeService, DistributedBackend, Extracted, LocalBackend,
};
use geoduck::domain::ArchiveLocation;
use geoduck::error::GeoError;
use geoduck::store::Store;

use common::{FtpScript, MockConnector, SERIES_MATRIX, gzip};

const MATRIX_DIR: &str = "geo/series/GSE1nnn/GSE1/matrix/";

fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, Store::new_with_root(root))
}

fn local(script: &FtpScript, store: Store) -> LocalBackend<MockConnector> {
    LocalBackend::new(
        MockConnector {
            script: script.clone(),
        },
        store,
    )
}

#[test]
fn local_extract_applies_text_parser() {
    let (_dir, store) = temp_store();
    let script = FtpScript::serving(&["GSE1_series_matrix.txt.gz"], gzip(SERIES_MATRIX));
    let mut backend = local(&script, store);

    let extracted = backend.extract_item(MATRIX_DIR, "GSE1").unwrap();
    let Extracted::Text(text) = &extracted else {
        panic!("local backend should extract text");
    };
    assert_eq!(text.filename, "GSE1_series_matrix.txt.gz");
    assert_eq!(text.format, "txt.gz");
    assert!(!text.text.contains("\n\n"));
    assert_eq!(script.retrieves(), 1);
}

#[test]
fn local_stages_save_under_store_layout() {
    let (_dir, store) = temp_store();
    let script = FtpScript::serving(&["GSE1_series_matrix.txt.gz"], gzip(SERIES_MATRIX));
    let mut backend = local(&script, store.clone());

    let extracted = backend.extract_item(MATRIX_DIR, "GSE1").unwrap();
    let raw_path = backend.save_extracted(&extracted, None).unwrap();
    assert_eq!(raw_path, store.extracted_path("GSE1_series_matrix.txt.gz"));
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&raw_path).unwrap()).unwrap();
    assert_eq!(saved["format"], "txt.gz");
    assert!(saved["retrieved_at"].as_str().is_some());

    let record = backend.normalize_item(extracted).unwrap();
    let normalized_path = backend
        .save_normalized("GSE1_series_matrix.txt.gz", &record, None)
        .unwrap();
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&normalized_path).unwrap()).unwrap();
    assert_eq!(saved["Sample_title"][1], "normal_1");

    let links = backend.retrieve_data_links(&record);
    let links_path = backend
        .save_links("GSE1_series_matrix.txt.gz", &links, None)
        .unwrap();
    assert!(links_path.ends_with("metadata/links/GSE1_series_matrix.txt.gz.json"));
}

#[test]
fn explicit_path_overrides_layout() {
    let (dir, store) = temp_store();
    let script = FtpScript::serving(&["GSM1.CEL.gz"], b"binary".to_vec());
    let mut backend = local(&script, store);

    let content = backend
        .fetch_data(&ArchiveLocation::new("geo/samples/GSM1nnn/GSM1/suppl/", "GSM1.CEL.gz"))
        .unwrap();
    let target = Utf8PathBuf::from_path_buf(dir.path().join("custom/GSM1.bin")).unwrap();
    let path = backend.save_data(&content, Some(&target)).unwrap();
    assert_eq!(path, target);
    assert_eq!(std::fs::read(&path).unwrap(), b"binary");
}

#[test]
fn forced_format_replaces_inference() {
    let (_dir, store) = temp_store();
    let script = FtpScript::serving(&["GSE1_series_matrix.txt.gz"], gzip("!a\tx\n\n!b\ty\n"));
    let mut backend = local(&script, store).with_format(Some("generic".to_string()));

    let Extracted::Text(text) = backend.extract_item(MATRIX_DIR, "GSE1").unwrap() else {
        panic!("expected text");
    };
    assert_eq!(text.format, "generic");
    assert!(text.text.contains("\n\n"));
}

struct RowService {
    calls: Mutex<Vec<CollectRequest>>,
}

impl ComputeService for RowService {
    fn collect(&self, request: &CollectRequest) -> Result<Vec<Vec<String>>, GeoError> {
        self.calls.lock().unwrap().push(request.clone());
        Ok(vec![
            vec!["!Sample_title".to_string(), "s1".to_string(), "s2".to_string()],
            vec!["!Series_title".to_string(), "cohort".to_string()],
        ])
    }
}

#[test]
fn distributed_extract_only_plans() {
    let (_dir, store) = temp_store();
    let script = FtpScript::serving(&["GSE1_series_matrix.txt.gz"], gzip(SERIES_MATRIX));
    let service = Arc::new(RowService {
        calls: Mutex::new(Vec::new()),
    });
    let mut backend = DistributedBackend::new(
        MockConnector {
            script: script.clone(),
        },
        "ftp.ncbi.nlm.nih.gov",
        store,
        service.clone(),
    );

    let extracted = backend.extract_item(MATRIX_DIR, "GSE1").unwrap();
    assert_eq!(script.retrieves(), 0);
    assert!(service.calls.lock().unwrap().is_empty());

    let Extracted::Deferred(table) = &extracted else {
        panic!("distributed backend should defer");
    };
    assert_eq!(
        table.uri(),
        "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE1nnn/GSE1/matrix/GSE1_series_matrix.txt.gz"
    );
    assert_eq!(table.request().format, "txt");
    assert_eq!(table.request().compression.as_deref(), Some("gzip"));
    assert_eq!(extracted.directory(), MATRIX_DIR);

    let record = backend.normalize_item(extracted).unwrap();
    assert_eq!(service.calls.lock().unwrap().len(), 1);
    assert_eq!(record.get("Series_title").unwrap(), ["cohort", "cohort"]);
}

struct DownService;

impl ComputeService for DownService {
    fn collect(&self, _request: &CollectRequest) -> Result<Vec<Vec<String>>, GeoError> {
        Err(GeoError::Analysis("503 from compute endpoint".to_string()))
    }
}

#[test]
fn distributed_service_fault_surfaces_on_collect() {
    let (_dir, store) = temp_store();
    let script = FtpScript::serving(&["GSE1_series_matrix.txt.gz"], gzip(SERIES_MATRIX));
    let mut backend = DistributedBackend::new(
        MockConnector { script },
        "ftp.ncbi.nlm.nih.gov",
        store,
        Arc::new(DownService),
    );

    let extracted = backend.extract_item(MATRIX_DIR, "GSE1").unwrap();
    let err = backend.save_extracted(&extracted, None).unwrap_err();
    assert_matches!(err, GeoError::Analysis(_));
    assert!(err.is_item_level());
}
