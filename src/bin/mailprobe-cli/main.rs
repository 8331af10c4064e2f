mod args;
mod lists;
mod output;
#[cfg(feature = "with-serde")]
mod sink;
mod source;

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use mailprobe::{BatchReport, CancelToken, DisposableRegistry, Engine};
use tracing::{Level, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::args::{Cli, Format};

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // stdout est réservé au rapport
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

fn load_registry(cli: &Cli) -> Result<DisposableRegistry> {
    let Some(path) = &cli.disposable else {
        return Ok(DisposableRegistry::empty());
    };
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let registry = DisposableRegistry::from_reader(BufReader::new(file))
        .with_context(|| format!("read {}", path.display()))?;
    info!(domains = registry.len(), "disposable registry loaded");
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut addresses = source::collect(&cli)?;
    if addresses.is_empty() {
        Cli::clap_command().print_help()?;
        println!();
        return Ok(());
    }
    if cli.resume {
        if !matches!(cli.format, Format::Csv | Format::Ndjson) {
            anyhow::bail!("--resume nécessite --format csv ou ndjson");
        }
        if let Some(out) = &cli.out {
            let done = source::previously_validated(out, cli.format)?;
            let before = addresses.len();
            addresses.retain(|address| !done.contains(address));
            info!(skipped = before - addresses.len(), remaining = addresses.len(), "resuming report");
        }
        if addresses.is_empty() {
            info!("no new addresses to validate");
            return Ok(());
        }
    }

    let registry = load_registry(&cli)?;
    let engine = Engine::new(cli.engine_config(), registry).context("initialize engine")?;

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight probes");
                cancel.cancel();
            }
        }
    });

    let report = run(&cli, &engine, addresses, &cancel).await?;
    if let Some(dir) = &cli.domain_lists {
        lists::update(dir, &report.records)?;
    }

    // codes de sortie : 0 OK, 2 invalides ou refusées, 1 fatal
    if output::any_rejected(&report) {
        std::process::exit(2);
    }
    Ok(())
}

/// csv/ndjson vers un fichier : écrits au fil de l'eau ; sinon rapport
/// complet en fin de lot.
async fn run(
    cli: &Cli,
    engine: &Engine,
    addresses: Vec<String>,
    cancel: &CancelToken,
) -> Result<BatchReport> {
    #[cfg(feature = "with-serde")]
    if let Some(out) = cli.out.as_deref().filter(|_| sink::streams(cli.format)) {
        let mut rows = sink::RecordSink::open(out, cli.format, cli.resume, cli.flush_every)?;
        let report = engine
            .validate_each(addresses, cancel, |record| rows.push(record))
            .await;
        let written = rows.finish()?;
        info!(written, path = %out.display(), "report written");
        println!("{}", output::summary_line(&report.stats(), report.interrupted));
        return Ok(report);
    }

    let report = engine.validate_until(addresses, cancel).await;
    output::write_report(&report, cli.format, cli.out.as_deref())?;
    Ok(report)
}
