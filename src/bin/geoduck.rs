use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geoduck::backend::BackendRegistry;
use geoduck::cancel::CancellationToken;
use geoduck::config::{ConfigLoader, ConfigOverrides, SaveStages};
use geoduck::domain::{Database, LinkConvention};
use geoduck::error::GeoError;
use geoduck::output::{JsonOutput, OutputMode, StderrProgress, print_outcome_summary};
use geoduck::pipeline::{ProgressSink, execute};
use geoduck::search::{EntrezHttpClient, SearchClient};

#[derive(Parser)]
#[command(name = "geoduck")]
#[command(about = "Search NCBI GEO and turn the matching archives into tables")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline with explicit save flags")]
    Run(RunArgs),
    #[command(about = "Run the pipeline up to one stage and save its output")]
    Fetch(FetchArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum FetchStage {
    /// Decompressed archive text
    Raw,
    /// Normalized column tables
    Normalized,
    /// Sample title to data-file links
    Links,
    /// The linked data files themselves
    Data,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[arg(value_enum)]
    stage: FetchStage,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Free-text search words, joined with AND
    words: Vec<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum)]
    db: Option<Database>,

    #[arg(short, long)]
    organism: Option<String>,

    #[arg(long)]
    entrytype: Option<String>,

    #[arg(long)]
    fileformat: Option<String>,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    backend: Option<String>,

    #[arg(long)]
    compute_endpoint: Option<String>,

    #[arg(long, value_enum)]
    convention: Option<LinkConvention>,

    /// Parser key to use instead of the file extension
    #[arg(long)]
    format: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    save_extracted: bool,

    #[arg(long)]
    save_normalized: bool,

    #[arg(long)]
    save_links: bool,

    #[arg(long)]
    download_data: bool,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            query: self.words.clone(),
            organism: self.organism.clone(),
            entrytype: self.entrytype.clone(),
            fileformat: self.fileformat.clone(),
            database: self.db,
            page_size: self.page_size,
            batch_size: self.batch_size,
            backend: self.backend.clone(),
            dry_run: self.dry_run,
            save: SaveStages {
                extracted: self.save_extracted,
                normalized: self.save_normalized,
                links: self.save_links,
            },
            download_data: self.download_data,
            output_dir: self.output_dir.clone(),
            compute_endpoint: self.compute_endpoint.clone(),
            link_convention: self.convention,
            format: self.format.clone(),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(geo) = report.downcast_ref::<GeoError>() {
            return ExitCode::from(map_exit_code(geo));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeoError) -> u8 {
    match error {
        GeoError::InvalidConfig(_)
        | GeoError::UnknownBackend(_)
        | GeoError::ConfigRead(_)
        | GeoError::ConfigParse(_) => 2,
        GeoError::SessionUnavailable { .. }
        | GeoError::SearchHttp(_)
        | GeoError::SearchStatus { .. }
        | GeoError::SearchParse(_)
        | GeoError::TransientTransfer(_)
        | GeoError::PermissionTransfer(_) => 3,
        GeoError::Cancelled => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let (args, overrides) = match cli.command {
        Commands::Run(args) => {
            let overrides = args.overrides();
            (args, overrides)
        }
        Commands::Fetch(fetch) => {
            let mut overrides = fetch.run.overrides();
            apply_stage(&mut overrides, fetch.stage);
            (fetch.run, overrides)
        }
    };

    let settings = ConfigLoader::resolve(args.config.as_deref(), overrides)?;
    if settings.sources.is_none() && settings.term.trim().is_empty() {
        return Err(miette::Report::msg(
            "nothing to search for (pass query words or set accession_numbers in geoduck.json)",
        ));
    }

    let search = SearchClient::new(EntrezHttpClient::new()?);
    let registry = BackendRegistry::default();
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let outcome = execute(
        &settings,
        &search,
        &registry,
        sink,
        CancellationToken::new(),
    )?;

    match output_mode {
        OutputMode::Interactive => print_outcome_summary(&outcome),
        OutputMode::NonInteractive => JsonOutput::print_outcome(&outcome).into_diagnostic()?,
    }
    Ok(())
}

/// `fetch <stage>` saves exactly that stage and stops there.
fn apply_stage(overrides: &mut ConfigOverrides, stage: FetchStage) {
    overrides.save = SaveStages::default();
    overrides.download_data = false;
    match stage {
        FetchStage::Raw => overrides.save.extracted = true,
        FetchStage::Normalized => overrides.save.normalized = true,
        FetchStage::Links => overrides.save.links = true,
        FetchStage::Data => overrides.download_data = true,
    }
}
