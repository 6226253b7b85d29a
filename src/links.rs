use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::ArchiveLocation;
use crate::normalize::NormalizedRecord;

pub const DEFAULT_TITLE_HEADER: &str = "Sample_title";

/// Sample title to the data files it references.
pub type LinkSet = BTreeMap<String, Vec<ArchiveLocation>>;

fn data_header_re() -> &'static Regex {
    static DATA_HEADER_RE: OnceLock<Regex> = OnceLock::new();
    DATA_HEADER_RE.get_or_init(|| {
        Regex::new(r"^Sample_supplementary_file.*$").expect("valid data header regex")
    })
}

/// Column names that point at downloadable data files.
pub fn data_headers(record: &NormalizedRecord) -> Vec<String> {
    record
        .column_names()
        .filter(|name| is_data_header(name))
        .map(|name| name.to_string())
        .collect()
}

pub fn is_data_header(name: &str) -> bool {
    data_header_re()
        .find(name)
        .is_some_and(|m| m.start() == 0 && m.end() == name.len())
}

/// Turns one supplementary-file cell into a download target.
pub fn download_target(value: &str) -> Option<ArchiveLocation> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("NONE") {
        return None;
    }
    ArchiveLocation::from_file_link(value)
}

pub fn extract_links(
    record: &NormalizedRecord,
    data_headers: Option<&[String]>,
    title_header: &str,
) -> LinkSet {
    let computed;
    let headers = match data_headers {
        Some(headers) => headers,
        None => {
            computed = self::data_headers(record);
            computed.as_slice()
        }
    };

    let mut links = LinkSet::new();
    let Some(titles) = record.get(title_header) else {
        return links;
    };
    let columns: Vec<&[String]> = headers
        .iter()
        .filter_map(|header| record.get(header))
        .collect();

    for (idx, title) in titles.iter().enumerate() {
        let targets: Vec<ArchiveLocation> = columns
            .iter()
            .filter_map(|values| values.get(idx))
            .filter_map(|value| download_target(value))
            .collect();
        if targets.is_empty() {
            continue;
        }
        links.entry(title.clone()).or_default().extend(targets);
    }
    links
}
