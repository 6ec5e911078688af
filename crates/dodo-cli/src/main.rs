//! dodo command-line entry point

mod args;
mod config;
mod reporter;
mod ui;

use anyhow::Result;
use args::Args;
use clap::Parser;
use dodo_core::progress::{AcceptDefault, Confirm, ProgressListener};
use dodo_core::{builtin_registry, summarize, ClientPool, DodoError, LoadEngine};
use reporter::TerminalReporter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        if matches!(err.downcast_ref::<DodoError>(), Some(DodoError::Interrupted)) {
            TerminalReporter::print_warning("interrupted before any request completed");
            std::process::exit(130);
        }
        TerminalReporter::print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(source) => {
            TerminalReporter::print_progress(&format!("Loading config from {source}"));
            Some(config::load(source).await?)
        }
        None => None,
    };
    let plan = config::build_plan(&args, file)?;

    let registry = Arc::new(builtin_registry());
    let compiled = Arc::new(plan.compile(&registry)?);
    TerminalReporter::print_header(&compiled);

    // A single interrupt cancels the whole run; workers observe it within
    // one request-timeout.
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            signal_token.cancel();
        }
    });

    let progress: Arc<dyn ProgressListener> = Arc::new(ui::IndicatifProgress::new());
    let confirm: Box<dyn Confirm> = if args.yes {
        Box::new(AcceptDefault)
    } else {
        Box::new(ui::DialoguerConfirm)
    };

    let pool = Arc::new(ClientPool::build(&compiled, Arc::clone(&progress), confirm.as_ref()).await?);
    let engine = LoadEngine::new(Arc::clone(&compiled), pool, registry);
    let outcomes = engine.run(Arc::clone(&progress), token).await?;

    TerminalReporter::print_summary(&summarize(&outcomes));
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
