mod common;

use assert_matches::assert_matches;

use geoduck::cancel::CancellationToken;
use geoduck::cursor::SearchCursor;
use geoduck::domain::{ArchiveLocation, Database, LinkConvention};
use geoduck::error::GeoError;
use geoduck::search::{Endpoint, SearchClient};

use common::{ScriptedTransport, param, session_body, summary_body};

#[test]
fn summary_request_carries_session_and_window() {
    let transport = ScriptedTransport::with_session(vec![summary_body(&[(
        "200001",
        "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE1nnn/GSE1/",
    )])]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();
    cursor.step(None).unwrap().unwrap();

    let calls = client.transport().calls.lock().unwrap().clone();
    let (endpoint, search) = &calls[0];
    assert_eq!(*endpoint, Endpoint::Search);
    assert_eq!(param(search, "term"), Some("cancer"));
    assert_eq!(param(search, "usehistory"), Some("y"));
    assert_eq!(param(search, "retstart"), Some("1"));
    assert_eq!(param(search, "retmax"), Some("1"));

    let (endpoint, summary) = &calls[1];
    assert_eq!(*endpoint, Endpoint::Summary);
    let keys: Vec<&str> = summary.iter().map(|(k, _)| *k).collect();
    assert_eq!(
        keys,
        vec!["db", "version", "query_key", "WebEnv", "retmode", "retstart", "retmax"]
    );
    assert_eq!(param(summary, "db"), Some("gds"));
    assert_eq!(param(summary, "version"), Some("2.0"));
    assert_eq!(param(summary, "WebEnv"), Some("MCID_TEST"));
    assert_eq!(param(summary, "query_key"), Some("1"));
    assert_eq!(param(summary, "retstart"), Some("1"));
    assert_eq!(param(summary, "retmax"), Some("10"));
}

#[test]
fn page_size_override_applies_now_and_position_advances_by_previous_request() {
    let link = "ftp://host/geo/series/GSE1/";
    let transport = ScriptedTransport::with_session(vec![
        summary_body(&[("1", link)]),
        summary_body(&[("2", link)]),
        summary_body(&[("3", link)]),
    ]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    cursor.step(None).unwrap();
    cursor.step(Some(5)).unwrap();
    cursor.step(Some(20)).unwrap();

    let windows: Vec<(String, String)> = client
        .transport()
        .summary_calls()
        .iter()
        .map(|params| {
            (
                param(params, "retstart").unwrap().to_string(),
                param(params, "retmax").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        windows,
        vec![
            ("1".to_string(), "10".to_string()),
            ("11".to_string(), "5".to_string()),
            ("16".to_string(), "20".to_string()),
        ]
    );
}

#[test]
fn page_keeps_only_declared_uids_with_links() {
    let body = r#"{"result": {
        "uids": ["1", "2"],
        "1": {"ftplink": "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE1nnn/GSE1/"},
        "2": {"ftplink": ""},
        "3": {"ftplink": "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE3nnn/GSE3/"}
    }}"#;
    let transport = ScriptedTransport::with_session(vec![body.to_string()]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    let page = cursor.step(None).unwrap().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(
        page.get("1"),
        Some(&ArchiveLocation::new("geo/series/GSE1nnn/GSE1/matrix/", "GSE1"))
    );
    assert!(!cursor.is_done());
}

#[test]
fn cancer_search_maps_uid_to_matrix_location() {
    let transport = ScriptedTransport::with_session(vec![summary_body(&[(
        "UID1",
        "ftp://ftp.ncbi.nlm.nih.gov/path/UID1/",
    )])]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    let page = cursor.step(None).unwrap().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(
        page.get("UID1"),
        Some(&ArchiveLocation::new("path/UID1/matrix/", "UID1"))
    );
}

#[test]
fn soft_convention_targets_family_file() {
    let transport = ScriptedTransport::with_session(vec![summary_body(&[(
        "1",
        "ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE1nnn/GSE1/",
    )])]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10)
        .unwrap()
        .with_convention(LinkConvention::Soft);

    let page = cursor.step(None).unwrap().unwrap();
    assert_eq!(
        page.get("1"),
        Some(&ArchiveLocation::new("geo/series/GSE1nnn/GSE1/soft/", "GSE1_family.soft.gz"))
    );
}

#[test]
fn empty_page_ends_the_cursor_without_further_requests() {
    let transport = ScriptedTransport::with_session(vec![
        summary_body(&[("1", "ftp://host/geo/series/GSE1/")]),
        summary_body(&[]),
    ]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    assert_eq!(cursor.step(None).unwrap().unwrap().len(), 1);
    let last = cursor.step(None).unwrap().unwrap();
    assert!(last.is_empty());
    assert!(cursor.is_done());

    assert!(cursor.step(None).unwrap().is_none());
    assert!(cursor.step(Some(50)).unwrap().is_none());
    assert_eq!(client.transport().summary_calls().len(), 2);
}

#[test]
fn page_without_usable_links_ends_the_cursor() {
    let body = r#"{"result": {"uids": ["1"], "1": {"ftplink": ""}}}"#;
    let transport = ScriptedTransport::with_session(vec![
        body.to_string(),
        summary_body(&[("2", "ftp://host/geo/series/GSE2/")]),
    ]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    let page = cursor.step(None).unwrap().unwrap();
    assert!(page.is_empty());
    assert!(cursor.is_done());
    assert!(cursor.step(None).unwrap().is_none());
    assert_eq!(client.transport().summary_calls().len(), 1);
}

#[test]
fn page_keeps_declared_uid_order() {
    let link = "ftp://host/geo/series/GSE1/";
    let transport = ScriptedTransport::with_session(vec![summary_body(&[
        ("20002", link),
        ("200010", link),
        ("3", link),
    ])]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();

    let page = cursor.step(None).unwrap().unwrap();
    let ids: Vec<&str> = page.ids().collect();
    assert_eq!(ids, vec!["20002", "200010", "3"]);
}

#[test]
fn zero_position_and_page_size_are_clamped_to_one() {
    let link = "ftp://host/geo/series/GSE1/";
    let transport = ScriptedTransport::with_session(vec![
        summary_body(&[("1", link)]),
        summary_body(&[("2", link)]),
        summary_body(&[("3", link)]),
    ]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 0).unwrap();
    assert_eq!(cursor.page_size(), 1);

    cursor.next_page(0, 0).unwrap();
    cursor.step(Some(0)).unwrap();
    cursor.step(Some(0)).unwrap();

    let windows: Vec<(String, String)> = client
        .transport()
        .summary_calls()
        .iter()
        .map(|params| {
            (
                param(params, "retstart").unwrap().to_string(),
                param(params, "retmax").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        windows,
        vec![
            ("1".to_string(), "1".to_string()),
            ("1".to_string(), "1".to_string()),
            ("2".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn iterator_yields_every_page_once() {
    let link = "ftp://host/geo/series/GSE1/";
    let transport = ScriptedTransport::with_session(vec![
        summary_body(&[("1", link), ("2", link)]),
        summary_body(&[("3", link)]),
    ]);
    let client = SearchClient::new(transport);
    let cursor = SearchCursor::open(&client, "cancer", Database::Gds, 2).unwrap();

    let pages: Vec<_> = cursor.collect::<Result<Vec<_>, _>>().unwrap();
    let sizes: Vec<usize> = pages.iter().map(|page| page.len()).collect();
    assert_eq!(sizes, vec![2, 1, 0]);
}

#[test]
fn missing_session_tokens_fail_before_paging() {
    let transport = ScriptedTransport::new(
        r#"{"esearchresult": {"count": "0", "idlist": []}}"#,
        vec![summary_body(&[("1", "ftp://host/x/")])],
    );
    let client = SearchClient::new(transport);
    let err = SearchCursor::open(&client, "nothing", Database::Gds, 10)
        .err()
        .unwrap();
    assert_matches!(err, GeoError::SessionUnavailable { term } if term == "nothing");
    assert!(client.transport().summary_calls().is_empty());
}

#[test]
fn blank_web_env_is_unavailable() {
    let transport = ScriptedTransport::new(session_body("", "1"), Vec::new());
    let client = SearchClient::new(transport);
    assert_matches!(
        SearchCursor::open(&client, "cancer", Database::Gds, 10).err(),
        Some(GeoError::SessionUnavailable { .. })
    );
}

#[test]
fn cancelled_cursor_issues_no_request() {
    let transport =
        ScriptedTransport::with_session(vec![summary_body(&[("1", "ftp://host/x/")])]);
    let client = SearchClient::new(transport);
    let token = CancellationToken::new();
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10)
        .unwrap()
        .with_cancellation(token.clone());

    token.cancel();
    assert!(cursor.step(None).unwrap().is_none());
    assert!(client.transport().summary_calls().is_empty());
}

#[test]
fn invalid_summary_json_is_a_parse_error() {
    let transport = ScriptedTransport::with_session(vec!["<html>busy</html>".to_string()]);
    let client = SearchClient::new(transport);
    let mut cursor = SearchCursor::open(&client, "cancer", Database::Gds, 10).unwrap();
    assert_matches!(cursor.step(None), Err(GeoError::SearchParse(_)));
}
