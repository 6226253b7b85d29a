//! Run orchestration.
//!
//! The pipeline moves `Idle -> Fetching -> Processing -> Fetching | Done`.
//! Targets come either from a precomputed source map, processed in one
//! pass, or from a search cursor, one page at a time. Each page is cut into
//! batches of `batch_size` targets, independent of the search page size.
//! An item that fails with an item-level error is logged and recorded; any
//! other error ends the run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{Backend, BackendRegistry, BackendResult, BackendSettings};
use crate::cancel::CancellationToken;
use crate::config::{RunSettings, SaveStages};
use crate::cursor::SearchCursor;
use crate::domain::{ArchiveLocation, Database, LinkConvention};
use crate::error::GeoError;
use crate::search::{SearchClient, SearchTransport};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Fetching,
    Processing,
    Done,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub enum Sources {
    Search { database: Database, term: String },
    Precomputed(BTreeMap<String, ArchiveLocation>),
}

impl Sources {
    pub fn from_settings(settings: &RunSettings) -> Self {
        match &settings.sources {
            Some(sources) => Sources::Precomputed(sources.clone()),
            None => Sources::Search {
                database: settings.database,
                term: settings.term.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub page_size: usize,
    pub batch_size: usize,
    pub save: SaveStages,
    pub download_data: bool,
    pub convention: LinkConvention,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            page_size: crate::cursor::DEFAULT_PAGE_SIZE,
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            save: SaveStages::default(),
            download_data: false,
            convention: LinkConvention::default(),
        }
    }
}

impl From<&RunSettings> for PipelineOptions {
    fn from(settings: &RunSettings) -> Self {
        Self {
            page_size: settings.page_size,
            batch_size: settings.batch_size,
            save: settings.save,
            download_data: settings.download_data,
            convention: settings.link_convention,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Saved {
        stage: &'static str,
        paths: Vec<String>,
    },
    InMemory {
        columns: usize,
        rows: usize,
        samples_with_links: usize,
    },
    Failed {
        error: String,
    },
}

impl From<&BackendResult> for ItemStatus {
    fn from(result: &BackendResult) -> Self {
        match result {
            BackendResult::Extracted { path } => ItemStatus::Saved {
                stage: "extracted",
                paths: vec![path.clone()],
            },
            BackendResult::Normalized { path } => ItemStatus::Saved {
                stage: "normalized",
                paths: vec![path.clone()],
            },
            BackendResult::Links { path } => ItemStatus::Saved {
                stage: "links",
                paths: vec![path.clone()],
            },
            BackendResult::Records { record, links } => ItemStatus::InMemory {
                columns: record.len(),
                rows: record.row_count(),
                samples_with_links: links.len(),
            },
            BackendResult::Data { paths } => ItemStatus::Saved {
                stage: "data",
                paths: paths.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub directory: String,
    pub filename: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub pages: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    fn record(&mut self, id: &str, location: &ArchiveLocation, status: ItemStatus) {
        match status {
            ItemStatus::Failed { .. } => self.failed += 1,
            _ => self.succeeded += 1,
        }
        self.items.push(ItemReport {
            id: id.to_string(),
            directory: location.directory.clone(),
            filename: location.filename.clone(),
            status,
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTarget {
    pub id: String,
    pub directory: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub term: Option<String>,
    pub pages: usize,
    pub targets: Vec<PlannedTarget>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunOutcome {
    DryRun(DryRunReport),
    Completed(RunSummary),
}

pub struct Pipeline<'a, T: SearchTransport> {
    search: &'a SearchClient<T>,
    backend: &'a mut dyn Backend,
    options: PipelineOptions,
    cancel: CancellationToken,
    state: PipelineState,
}

impl<'a, T: SearchTransport> Pipeline<'a, T> {
    pub fn new(
        search: &'a SearchClient<T>,
        backend: &'a mut dyn Backend,
        options: PipelineOptions,
    ) -> Self {
        Self {
            search,
            backend,
            options,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run(
        &mut self,
        sources: &Sources,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, GeoError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let result = self.drive(sources, &mut summary, sink, started);
        self.state = PipelineState::Done;
        if let Err(err) = result {
            error!(
                pages = summary.pages,
                succeeded = summary.succeeded,
                failed = summary.failed,
                error = %err,
                "run aborted"
            );
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Aborted; {} pages, {} succeeded, {} failed: {err}",
                    summary.pages, summary.succeeded, summary.failed
                ),
                elapsed: Some(started.elapsed()),
            });
            return Err(err);
        }

        summary.cancelled = self.cancel.is_cancelled();
        info!(
            pages = summary.pages,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "run finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} succeeded, {} failed",
                summary.succeeded, summary.failed
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(summary)
    }

    fn drive(
        &mut self,
        sources: &Sources,
        summary: &mut RunSummary,
        sink: &dyn ProgressSink,
        started: Instant,
    ) -> Result<(), GeoError> {
        match sources {
            Sources::Precomputed(map) => {
                self.state = PipelineState::Processing;
                let targets: Vec<(String, ArchiveLocation)> =
                    map.iter().map(|(id, loc)| (id.clone(), loc.clone())).collect();
                self.process_targets(&targets, summary, sink, started)
            }
            Sources::Search { database, term } => {
                self.state = PipelineState::Fetching;
                let search = self.search;
                let mut cursor =
                    SearchCursor::open(search, term, *database, self.options.page_size)?
                        .with_convention(self.options.convention)
                        .with_cancellation(self.cancel.clone());
                while let Some(page) = cursor.step(None)? {
                    summary.pages += 1;
                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Fetching; page {} at position {} with {} targets",
                            summary.pages,
                            cursor.position(),
                            page.len()
                        ),
                        elapsed: Some(started.elapsed()),
                    });
                    if page.is_empty() {
                        continue;
                    }
                    self.state = PipelineState::Processing;
                    self.process_targets(&page.entries, summary, sink, started)?;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.state = PipelineState::Fetching;
                }
                Ok(())
            }
        }
    }

    fn process_targets(
        &mut self,
        targets: &[(String, ArchiveLocation)],
        summary: &mut RunSummary,
        sink: &dyn ProgressSink,
        started: Instant,
    ) -> Result<(), GeoError> {
        for batch in targets.chunks(self.options.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                warn!("run cancelled, skipping remaining batches");
                return Ok(());
            }
            summary.batches += 1;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Processing; batch {} with {} items",
                    summary.batches,
                    batch.len()
                ),
                elapsed: Some(started.elapsed()),
            });
            for (id, location) in batch {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                match self.process_item(location) {
                    Ok(result) => summary.record(id, location, ItemStatus::from(&result)),
                    Err(GeoError::Cancelled) => return Ok(()),
                    Err(err) if err.is_item_level() => {
                        error!(
                            id = %id,
                            directory = %location.directory,
                            filename = %location.filename,
                            error = %err,
                            "item failed"
                        );
                        summary.record(
                            id,
                            location,
                            ItemStatus::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Runs the backend chain for one target, stopping at the first
    /// requested save.
    pub fn process_item(&mut self, location: &ArchiveLocation) -> Result<BackendResult, GeoError> {
        let save = self.options.save;
        let extracted = self
            .backend
            .extract_item(&location.directory, &location.filename)?;
        let source = extracted.filename().to_string();
        if save.extracted {
            let path = self.backend.save_extracted(&extracted, None)?;
            return Ok(BackendResult::Extracted {
                path: path.to_string(),
            });
        }

        let record = self.backend.normalize_item(extracted)?;
        if save.normalized {
            let path = self.backend.save_normalized(&source, &record, None)?;
            return Ok(BackendResult::Normalized {
                path: path.to_string(),
            });
        }

        let links = self.backend.retrieve_data_links(&record);
        if save.links {
            let path = self.backend.save_links(&source, &links, None)?;
            return Ok(BackendResult::Links {
                path: path.to_string(),
            });
        }
        if !self.options.download_data {
            return Ok(BackendResult::Records { record, links });
        }

        let mut paths = Vec::new();
        for target in links.values().flatten() {
            self.cancel.check()?;
            let content = self.backend.fetch_data(target)?;
            let path = self.backend.save_data(&content, None)?;
            paths.push(path.to_string());
        }
        Ok(BackendResult::Data { paths })
    }
}

/// Lists what a run would process without building a backend or touching FTP.
pub fn plan_run<T: SearchTransport>(
    search: &SearchClient<T>,
    sources: &Sources,
    options: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<DryRunReport, GeoError> {
    let to_target = |(id, location): (&String, &ArchiveLocation)| PlannedTarget {
        id: id.clone(),
        directory: location.directory.clone(),
        filename: location.filename.clone(),
    };
    match sources {
        Sources::Precomputed(map) => Ok(DryRunReport {
            term: None,
            pages: 0,
            targets: map.iter().map(to_target).collect(),
        }),
        Sources::Search { database, term } => {
            let mut report = DryRunReport {
                term: Some(term.clone()),
                ..DryRunReport::default()
            };
            let mut cursor = SearchCursor::open(search, term, *database, options.page_size)?
                .with_convention(options.convention)
                .with_cancellation(cancel.clone());
            while let Some(page) = cursor.step(None)? {
                report.pages += 1;
                report
                    .targets
                    .extend(page.entries.iter().map(|(id, location)| to_target((id, location))));
            }
            Ok(report)
        }
    }
}

/// Builds the backend named in `settings` and runs, or plans, the whole job.
pub fn execute<T: SearchTransport>(
    settings: &RunSettings,
    search: &SearchClient<T>,
    registry: &BackendRegistry,
    sink: &dyn ProgressSink,
    cancel: CancellationToken,
) -> Result<RunOutcome, GeoError> {
    let sources = Sources::from_settings(settings);
    let options = PipelineOptions::from(settings);

    if settings.dry_run {
        info!("dry run; no backend will be built");
        return plan_run(search, &sources, &options, &cancel).map(RunOutcome::DryRun);
    }

    let store = Store::new_with_root(settings.output_dir.clone());
    store.ensure_root()?;
    let backend_settings = BackendSettings {
        ftp: settings.ftp.clone(),
        store,
        compute_endpoint: settings.compute_endpoint.clone(),
        format: settings.format.clone(),
    };
    let mut backend = registry.create(&settings.backend, &backend_settings)?;
    info!(backend = backend.name(), "starting run");

    let mut pipeline =
        Pipeline::new(search, backend.as_mut(), options).with_cancellation(cancel);
    pipeline.run(&sources, sink).map(RunOutcome::Completed)
}
