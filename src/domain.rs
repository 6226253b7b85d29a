use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Entrez databases the pipeline knows how to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Gds,
}

impl Database {
    pub fn as_str(&self) -> &'static str {
        match self {
            Database::Gds => "gds",
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Database {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "gds" => Ok(Database::Gds),
            _ => Err(GeoError::InvalidConfig(format!(
                "unsupported database: {value}"
            ))),
        }
    }
}

/// History-server handle shared by every page request of one search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSession {
    web_env: String,
    query_key: String,
}

impl SearchSession {
    /// Returns `None` unless both tokens are non-empty.
    pub fn new(web_env: impl Into<String>, query_key: impl Into<String>) -> Option<Self> {
        let web_env = web_env.into();
        let query_key = query_key.into();
        if web_env.trim().is_empty() || query_key.trim().is_empty() {
            return None;
        }
        Some(Self { web_env, query_key })
    }

    pub fn web_env(&self) -> &str {
        &self.web_env
    }

    pub fn query_key(&self) -> &str {
        &self.query_key
    }
}

/// How a GEO `ftplink` is turned into a directory/filename pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkConvention {
    /// `<entry>/matrix/` with the entry name as the filename pattern.
    #[default]
    Matrix,
    /// `<entry>/soft/<entry>_family.soft.gz`.
    Soft,
}

/// A remote file on the GEO FTP server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub directory: String,
    pub filename: String,
}

impl ArchiveLocation {
    pub fn new(directory: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            filename: filename.into(),
        }
    }

    /// Builds the archive location for a series/dataset `ftplink`.
    pub fn from_ftp_link(raw_link: &str, convention: LinkConvention) -> Option<Self> {
        let path = strip_ftp_host(raw_link.trim())?;
        let entry_name = path.trim_end_matches('/').rsplit('/').next()?;
        if entry_name.is_empty() {
            return None;
        }
        let base = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let location = match convention {
            LinkConvention::Matrix => Self::new(format!("{base}matrix/"), entry_name),
            LinkConvention::Soft => Self::new(
                format!("{base}soft/"),
                format!("{entry_name}_family.soft.gz"),
            ),
        };
        Some(location)
    }

    /// Splits a direct file link (`ftp://host/dir/file`) into directory and filename.
    pub fn from_file_link(raw_link: &str) -> Option<Self> {
        let path = strip_ftp_host(raw_link.trim())?;
        if path.ends_with('/') {
            return None;
        }
        match path.rsplit_once('/') {
            Some((directory, filename)) if !filename.is_empty() => {
                Some(Self::new(format!("{directory}/"), filename))
            }
            Some(_) => None,
            None if !path.is_empty() => Some(Self::new("", path)),
            None => None,
        }
    }
}

impl fmt::Display for ArchiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.directory, self.filename)
    }
}

/// Drops `ftp://<host>/` (or `https://<host>/`), leaving the server-relative path.
fn strip_ftp_host(link: &str) -> Option<&str> {
    let rest = link
        .strip_prefix("ftp://")
        .or_else(|| link.strip_prefix("https://"))
        .or_else(|| link.strip_prefix("http://"))?;
    let (_host, path) = rest.split_once('/')?;
    Some(path)
}

/// One step of search results: identifier to archive location, in the order
/// the summary declared its identifiers. An empty page ends the search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    pub entries: Vec<(String, ArchiveLocation)>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&ArchiveLocation> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, location)| location)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }
}
