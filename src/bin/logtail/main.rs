// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logtail::init::args::StartArgs;
use logtail::init::runner::{StdoutInputFactory, StdoutRunner};
use logtail::init::wait;
use logtail::logfile::config::is_glob;
use logtail::logfile::{DecoderSet, LogfileDirectoryManager, LogfileInput};

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail a file (or every file matching a glob) and print messages as JSON lines
    Start(Box<StartArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "logtail")]
#[command(bin_name = "logtail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGTAIL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version());
        }
        Some(Commands::Start(args)) => {
            // Messages go to stdout, so logs go to stderr.
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run(args) {
                error!(error = e, "Failed to run logtail.");
                return ExitCode::from(1);
            }
        }
        None => {
            // Not reachable: a subcommand is required
            error!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run(args: Box<StartArgs>) -> Result<(), BoxError> {
    let config = args.input.build_config();
    let decoders = Arc::new(DecoderSet::with_builtin());
    let shutdown_timeout = Duration::from_millis(args.shutdown_timeout_ms);

    let cancel = CancellationToken::new();
    let mut task_set: JoinSet<Result<(), BoxError>> = JoinSet::new();

    if is_glob(&config.log_file) {
        let mut manager = LogfileDirectoryManager::new(args.name.clone(), config)?;
        let mut factory = StdoutInputFactory::new(decoders, args.pack_pool_size, cancel.clone());
        let token = cancel.clone();

        task_set.spawn(async move {
            let result = manager.run(&mut factory, token.clone()).await;
            // Inputs share the token; make sure they stop even if the manager failed.
            token.cancel();
            factory.wait(shutdown_timeout).await?;
            result.map_err(|e| e.into())
        });
    } else {
        let input = LogfileInput::init_with_cancel(config, cancel.clone())?;
        let runner = Arc::new(StdoutRunner::new(args.name.clone(), args.pack_pool_size));
        input.start(&mut task_set, runner, decoders);
    }

    select! {
        res = signal_wait() => {
            res?;
            info!("Shutdown signal received.");
        }
        e = wait::wait_for_any_task(&mut task_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of input."),
                Err(e) => return Err(e),
            }
        }
    }

    cancel.cancel();
    wait::wait_for_tasks_with_timeout(&mut task_set, shutdown_timeout + Duration::from_secs(1))
        .await
}

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = std::io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn signal_wait() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
