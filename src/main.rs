use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use kidsvillage_collector::models::{Target, load_targets};
use kidsvillage_collector::report::{RunTotals, write_results_json, write_summary};
use kidsvillage_collector::{AppConfig, Orchestrator, ProgressEvent};

#[derive(Parser, Debug)]
#[command(
    name = "kidsvillage-collector",
    version,
    about = "Collect product pages, images and messages"
)]
struct Args {
    /// Extra targets (product URLs or site ids), processed after the CSV rows
    targets: Vec<String>,

    /// Settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV with `url,selling_price` columns
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory for images, messages and the summary
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, env = "KIDSVILLAGE_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "KIDSVILLAGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Site adapter to use
    #[arg(long)]
    adapter: Option<String>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump every result as JSON to this path
    #[arg(long)]
    results_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = init_tracing(&args)?;

    info!("Starting KidsVillage collector...");

    let mut config = AppConfig::load(args.config.as_deref()).context("loading settings")?;
    apply_overrides(&mut config, &args);
    config.validate().context("validating settings")?;

    let mut targets = match args.input.clone().or_else(|| config.paths.input_csv.clone()) {
        Some(path) => load_targets(&path)
            .with_context(|| format!("reading targets from {}", path.display()))?,
        None => Vec::new(),
    };
    targets.extend(args.targets.iter().map(Target::new));

    if targets.is_empty() {
        warn!("no targets given, pass a CSV with --input or list targets on the command line");
        return Ok(ExitCode::from(RunTotals::from_results(&[]).exit_code() as u8));
    }
    info!(targets = targets.len(), "targets loaded");

    let orchestrator = Orchestrator::new(&config).await.context("preparing pipeline")?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            ctrl_c_token.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let progress_log = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            info!(
                "[{}/{}] {} -> {:?}",
                event.completed, event.total, event.current_target, event.stage
            );
        }
    });

    let results = orchestrator.run(targets, Some(progress_tx), cancel).await;
    let _ = progress_log.await;

    write_summary(&config.paths.output_dir, &config.paths.summary_file, &results).await?;
    if let Some(path) = &args.results_json {
        write_results_json(path, &results).await?;
    }

    let totals = RunTotals::from_results(&results);
    info!(
        "=== DONE: {}/{} succeeded, {} failed ===",
        totals.done, totals.total, totals.failed
    );
    Ok(ExitCode::from(totals.exit_code() as u8))
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(output) = &args.output {
        config.paths.output_dir = output.clone();
    }
    if let Some(username) = &args.username {
        config.site.username = Some(username.clone());
    }
    if let Some(password) = &args.password {
        config.site.password = Some(password.clone());
    }
    if let Some(adapter) = &args.adapter {
        config.site.adapter = adapter.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.scraper.concurrency = concurrency;
    }
}

fn init_tracing(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("kidsvillage_collector={}", args.log_level)))
        .context("invalid log level")?;

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."));
            let name = path.file_name().context("--log-file needs a file name")?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}
