use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use odds_history::api_football::ApiFootball;
use odds_history::config::{ApiSettings, Cli, RunConfig, load_env_file};
use odds_history::fetch::ApiFetcher;
use odds_history::http_client::http_client;
use odds_history::pipeline::{self, LiveSource, MatchSource, PipelineError, RunReport};
use odds_history::sample::SampleSource;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_files = load_env_file(cli.env_file.as_deref());
    init_tracing();

    match env_files {
        Ok(files) => {
            for file in files {
                info!(path = %file.display(), "loaded env file");
            }
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    }

    let cfg = match RunConfig::from_cli(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let outcome = match ApiSettings::from_env() {
        Some(settings) => run_live(&cfg, &settings),
        None => {
            warn!("no API key found, using the built-in sample dataset (set API_FOOTBALL_KEY for live data)");
            run_sample(&cfg)
        }
    };

    match outcome {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(err) => report_error(err),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("odds_history=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_live(cfg: &RunConfig, settings: &ApiSettings) -> Result<RunReport> {
    let client = http_client()?;
    let fetcher = ApiFetcher::new(
        client,
        &settings.base_url,
        &settings.api_key,
        settings.retry.clone(),
    );
    let source = LiveSource::new(ApiFootball::new(fetcher), settings.request_spacing);
    run_with(cfg, &source)
}

fn run_sample(cfg: &RunConfig) -> Result<RunReport> {
    let source = SampleSource::builtin()?;
    run_with(cfg, &source)
}

fn run_with(cfg: &RunConfig, source: &dyn MatchSource) -> Result<RunReport> {
    Ok(pipeline::run(cfg, source)?)
}

fn print_report(report: &RunReport) {
    println!("Export complete");
    println!("Source: {}", report.source);
    println!("Team: {}", report.team);
    println!("Fixtures: {}", report.fixtures);
    println!(
        "Rows: {} (with odds: {})",
        report.records.len(),
        report.summary.with_odds
    );
    if !report.odds_failures.is_empty() {
        println!("Odds lookups failed: {}", report.odds_failures.len());
        for failure in report.odds_failures.iter().take(8) {
            println!(" - fixture {}: {}", failure.fixture_id, failure.error);
        }
    }
    println!("Saved workbook to {}", report.export.path.display());
}

fn report_error(err: anyhow::Error) -> ExitCode {
    let pipeline_err = err.downcast_ref::<PipelineError>();
    if pipeline_err.is_some_and(PipelineError::is_auth) {
        eprintln!("error: authentication failed: {err:#}");
        eprintln!(
            "hint: check API_FOOTBALL_KEY in the environment or your .env file; \
             unset it to run against the built-in sample data"
        );
        return ExitCode::from(EXIT_FAILURE);
    }
    eprintln!("error: {err:#}");
    match pipeline_err {
        Some(PipelineError::TeamNotFound(_)) => ExitCode::from(EXIT_USAGE),
        _ => ExitCode::from(EXIT_FAILURE),
    }
}
