use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::BACKEND_LOCAL;
use crate::cursor::DEFAULT_PAGE_SIZE;
use crate::domain::{ArchiveLocation, Database, LinkConvention};
use crate::error::GeoError;
use crate::retrieval::FtpConfig;
use crate::store::DEFAULT_OUTPUT_DIR;

pub const CONFIG_FILENAME: &str = "geoduck.json";
pub const DEFAULT_FILEFORMAT: &str = "csv";
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub database: Option<Database>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub backend: Option<String>,
    /// Precomputed sources; when present the search is skipped.
    #[serde(default)]
    pub accession_numbers: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub ftp: Option<FtpConfig>,
    #[serde(default)]
    pub compute_endpoint: Option<String>,
    #[serde(default)]
    pub link_convention: Option<LinkConvention>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub entrytype: Option<String>,
    #[serde(default)]
    pub fileformat: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    /// A series `ftplink`, resolved with the configured link convention.
    Shorthand(String),
    Detailed(ArchiveLocation),
}

/// Values given on the command line. Anything set here wins over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub query: Vec<String>,
    pub organism: Option<String>,
    pub entrytype: Option<String>,
    pub fileformat: Option<String>,
    pub database: Option<Database>,
    pub page_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub backend: Option<String>,
    pub dry_run: bool,
    pub save: SaveStages,
    pub download_data: bool,
    pub output_dir: Option<String>,
    pub compute_endpoint: Option<String>,
    pub link_convention: Option<LinkConvention>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStages {
    pub extracted: bool,
    pub normalized: bool,
    pub links: bool,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub database: Database,
    pub term: String,
    pub sources: Option<BTreeMap<String, ArchiveLocation>>,
    pub page_size: usize,
    pub batch_size: usize,
    pub backend: String,
    pub dry_run: bool,
    pub save: SaveStages,
    pub download_data: bool,
    pub output_dir: Utf8PathBuf,
    pub ftp: FtpConfig,
    pub compute_endpoint: Option<String>,
    pub link_convention: LinkConvention,
    pub format: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the first config file found (explicit path, `./geoduck.json`,
    /// then the user config dir) and applies `overrides`. No file at all
    /// is fine unless a path was given explicitly.
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<RunSettings, GeoError> {
        let config = match Self::locate(path)? {
            Some(config_path) => {
                debug!(path = %config_path.display(), "loading config");
                Self::load(&config_path)?
            }
            None => Config::default(),
        };
        Self::resolve_config(config, overrides)
    }

    pub fn load(path: &Path) -> Result<Config, GeoError> {
        let content =
            fs::read_to_string(path).map_err(|_| GeoError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| GeoError::ConfigParse(err.to_string()))
    }

    fn locate(path: Option<&str>) -> Result<Option<PathBuf>, GeoError> {
        if let Some(path) = path {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(GeoError::ConfigRead(path));
            }
            return Ok(Some(path));
        }
        let local = PathBuf::from(CONFIG_FILENAME);
        if local.exists() {
            return Ok(Some(local));
        }
        Ok(user_config_path().filter(|path| path.exists()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<RunSettings, GeoError> {
        let words = if overrides.query.is_empty() {
            config.query.text
        } else {
            overrides.query
        };
        let term = build_query(
            &words,
            overrides.organism.or(config.query.organism).as_deref(),
            overrides.entrytype.or(config.query.entrytype).as_deref(),
            overrides.fileformat.or(config.query.fileformat).as_deref(),
        );

        let link_convention = overrides
            .link_convention
            .or(config.link_convention)
            .unwrap_or_default();

        let sources = if config.accession_numbers.is_empty() {
            None
        } else {
            let resolved = config
                .accession_numbers
                .into_iter()
                .map(|(id, entry)| match entry {
                    SourceEntry::Detailed(location) => Ok((id, location)),
                    SourceEntry::Shorthand(link) => {
                        ArchiveLocation::from_ftp_link(&link, link_convention)
                            .map(|location| (id.clone(), location))
                            .ok_or_else(|| {
                                GeoError::InvalidConfig(format!(
                                    "accession {id}: unusable ftp link {link:?}"
                                ))
                            })
                    }
                })
                .collect::<Result<BTreeMap<_, _>, GeoError>>()?;
            Some(resolved)
        };

        let page_size = overrides
            .page_size
            .or(config.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let batch_size = overrides
            .batch_size
            .or(config.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        if page_size == 0 || batch_size == 0 {
            return Err(GeoError::InvalidConfig(
                "page_size and batch_size must be at least 1".to_string(),
            ));
        }

        let output_dir = overrides
            .output_dir
            .or(config.output_dir)
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());

        Ok(RunSettings {
            database: overrides.database.or(config.database).unwrap_or_default(),
            term,
            sources,
            page_size,
            batch_size,
            backend: overrides
                .backend
                .or(config.backend)
                .unwrap_or_else(|| BACKEND_LOCAL.to_string()),
            dry_run: overrides.dry_run || config.dry_run.unwrap_or(false),
            save: overrides.save,
            download_data: overrides.download_data,
            output_dir: Utf8PathBuf::from(output_dir),
            ftp: config.ftp.unwrap_or_default(),
            compute_endpoint: overrides.compute_endpoint.or(config.compute_endpoint),
            link_convention,
            format: overrides.format,
        })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `<config_dir>/geoduck/geoduck.json` for the current user.
pub fn user_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("geoduck").join(CONFIG_FILENAME))
}

/// Joins free-text words and field filters into one Entrez term.
pub fn build_query(
    words: &[String],
    organism: Option<&str>,
    entrytype: Option<&str>,
    fileformat: Option<&str>,
) -> String {
    let free_text = words
        .iter()
        .map(|word| word.trim())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" AND ");
    let fileformat = fileformat.unwrap_or(DEFAULT_FILEFORMAT);

    [
        Some(free_text).filter(|text| !text.is_empty()),
        present(organism).map(|value| format!("{value}[Organism]")),
        present(entrytype).map(|value| format!("{value}[EntryType]")),
        present(Some(fileformat)).map(|value| format!("{value}[Supplementary Files]")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" AND ")
}
