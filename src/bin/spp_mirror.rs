use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use spp_mirror::app::{App, AppOptions, ProgressSink};
use spp_mirror::config::{ConfigLoader, ResolvedConfig};
use spp_mirror::domain::{Doi, ExperimentId};
use spp_mirror::error::SppError;
use spp_mirror::output::{JsonOutput, OutputMode, StderrProgress};
use spp_mirror::paginate::{Paginator, StopSignal};
use spp_mirror::search::{SearchQuery, SolrHttpClient};
use spp_mirror::spp::SppHttpClient;
use spp_mirror::store::CacheStore;

#[derive(Parser)]
#[command(name = "spp-mirror")]
#[command(about = "Mirror Signaling Pathways Project datasets into a local JSON cache")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Search datasets by DOI, name or description")]
    Search(SearchArgs),
    #[command(about = "Fetch one dataset, from the cache when present")]
    Dataset(DatasetArgs),
    #[command(about = "Mirror all datasets added since a date")]
    Datasets(DatasetsArgs),
    #[command(about = "Show one experiment's cached data points")]
    Datapoints(DatapointsArgs),
    #[command(about = "Re-fetch every cached dataset")]
    Refresh,
}

#[derive(Args)]
struct SearchArgs {
    term: String,

    #[arg(long)]
    start: Option<usize>,

    #[arg(long)]
    size: Option<usize>,
}

#[derive(Args)]
struct DatasetArgs {
    doi: String,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct DatasetsArgs {
    #[arg(long)]
    added_since: String,
}

#[derive(Args)]
struct DatapointsArgs {
    doi: String,
    experiment_id: String,
}

type HttpApp = App<SppHttpClient, Option<SolrHttpClient>>;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(spp) = report.downcast_ref::<SppError>() {
            return ExitCode::from(map_exit_code(spp));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SppError) -> u8 {
    match error {
        SppError::MissingConfig
        | SppError::InvalidDoi(_)
        | SppError::InvalidDate(_)
        | SppError::InvalidExperimentId(_)
        | SppError::DatasetNotFound(_)
        | SppError::CacheFileNotFound(_) => 2,
        SppError::Transport { .. }
        | SppError::UpstreamStatus { .. }
        | SppError::Decode { .. }
        | SppError::EmptyPage { .. }
        | SppError::FetchHalted { .. }
        | SppError::SearchHttp(_)
        | SppError::SearchStatus { .. } => 3,
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
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let stop = StopSignal::new();
    if matches!(cli.command, Command::Dataset(_) | Command::Datasets(_) | Command::Refresh) {
        install_interrupt(stop.clone())?;
    }
    let app = build_app(&config, stop)?;

    match cli.command {
        Command::Search(args) => {
            let result = app.search(&SearchQuery {
                term: args.term,
                start: args.start,
                size: args.size,
            })?;
            JsonOutput::print_search(&result).into_diagnostic()
        }
        Command::Dataset(args) => {
            let doi: Doi = args.doi.parse()?;
            let result = app.dataset(&doi, args.refresh, sink)?;
            JsonOutput::print_dataset(&result).into_diagnostic()
        }
        Command::Datasets(args) => {
            let date = parse_date(&args.added_since)?;
            let result = app.datasets_added_since(date, sink)?;
            JsonOutput::print_datasets(&result).into_diagnostic()
        }
        Command::Datapoints(args) => {
            let doi: Doi = args.doi.parse()?;
            let experiment_id = args
                .experiment_id
                .trim()
                .parse::<ExperimentId>()
                .map_err(|_| SppError::InvalidExperimentId(args.experiment_id.clone()))?;
            let result = app.datapoints(&doi, experiment_id)?;
            JsonOutput::print_datapoints(&result).into_diagnostic()
        }
        Command::Refresh => {
            let report = app.refresh_all(sink)?;
            JsonOutput::print_refresh(&report).into_diagnostic()
        }
    }
}

// The first Ctrl-C halts paged fetches at their next pause; a second one exits.
fn install_interrupt(stop: StopSignal) -> miette::Result<()> {
    ctrlc::set_handler(move || {
        if stop.escalate() {
            std::process::exit(130);
        }
        eprintln!("interrupt received; stopping after the current page (Ctrl-C again to exit)");
    })
    .into_diagnostic()
}

fn build_app(config: &ResolvedConfig, stop: StopSignal) -> Result<HttpApp, SppError> {
    let spp = SppHttpClient::new(&config.upstream)?;
    let search = config
        .search
        .as_ref()
        .map(SolrHttpClient::new)
        .transpose()?;
    let paginator = Paginator::new(config.upstream.page_size, config.upstream.page_delay, stop)?;
    Ok(App::new(
        CacheStore::new(config.cache_root.clone()),
        spp,
        search,
        paginator,
        AppOptions {
            refresh_workers: config.refresh_workers,
            gmt_path: config.gmt_path.clone(),
        },
    ))
}

fn parse_date(value: &str) -> Result<NaiveDate, SppError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| SppError::InvalidDate(value.to_string()))
}
