use anyhow::Context;
use clap::Parser;
use futures::stream::{self, Stream, StreamExt};
use sql_warehouse_transfer::domain::ports::ProgressSink;
use sql_warehouse_transfer::utils::{logger, monitor::SystemMonitor};
use sql_warehouse_transfer::{
    CliArgs, CloudConnector, PipelineController, ProgressEvent, RunOutcome, RunStatus,
    TracingSink, TransferConfig,
};
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIGURATION: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

fn build_config(args: CliArgs) -> anyhow::Result<TransferConfig> {
    let base = match &args.config {
        Some(path) => TransferConfig::from_file(path)
            .with_context(|| format!("reading config file {}", path.display()))?,
        None => TransferConfig::default(),
    };
    Ok(args.apply(base))
}

fn print_summary(outcome: &RunOutcome) {
    let summary = &outcome.summary;
    println!("Transfer {}", outcome.status());
    println!("  rows exported:    {}", outcome.state.rows_transferred);
    println!("  tables loaded:    {}", summary.loaded.len());
    for table in &summary.skipped_existing {
        println!("  skipped (exists): {}", table);
    }
    for (table, cause) in &summary.failed {
        println!("  failed:           {} ({})", table, cause);
    }
    if let Some(error) = &outcome.state.error {
        eprintln!("❌ {}", error);
    }
}

/// The first interrupt asks the run to stop at its next checkpoint; a second
/// one gives up waiting.
async fn watch_interrupts<S>(mut interrupts: S, on_cancel: impl Fn(), on_force: impl FnOnce())
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return;
    }
    tracing::warn!("Interrupt received, stopping after the current step (Ctrl-C again to quit)");
    on_cancel();

    if interrupts.next().await.is_some() {
        tracing::warn!("Second interrupt, exiting now");
        on_force();
    }
}

fn ctrl_c_presses() -> impl Stream<Item = ()> + Unpin {
    Box::pin(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("Starting sql-warehouse-transfer");

    let monitor = Arc::new(SystemMonitor::new(args.monitor));
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };
    tracing::debug!("Transfer config: {:?}", config);

    let controller = Arc::new(PipelineController::new(CloudConnector::new()));
    let on_interrupt = Arc::clone(&controller);
    tokio::spawn(async move {
        watch_interrupts(
            ctrl_c_presses(),
            || on_interrupt.request_cancel(),
            || std::process::exit(i32::from(EXIT_CANCELLED)),
        )
        .await;
    });

    let sink_monitor = Arc::clone(&monitor);
    let sink = move |event: ProgressEvent| {
        if let ProgressEvent::TableExported { table, .. } = &event {
            sink_monitor.log_stats(table);
        }
        TracingSink.emit(event);
    };

    match controller.start(&config, &sink).await {
        Ok(outcome) => {
            monitor.log_final_stats();
            print_summary(&outcome);
            match outcome.status() {
                RunStatus::Completed => ExitCode::SUCCESS,
                RunStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
                _ => ExitCode::from(EXIT_FAILED),
            }
        }
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e);
            if e.is_configuration() {
                ExitCode::from(EXIT_CONFIGURATION)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}
