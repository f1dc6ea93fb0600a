use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpStream;
use tracing::{debug, info};

use deeplinkd::activation;
use deeplinkd::config::HostConfig;
use deeplinkd::host;
use deeplinkd::HostContext;

#[derive(Parser)]
#[command(
    name = "deeplinkd",
    version,
    about = "Deep-link host shell — forwards OS link activations into the embedded app runtime"
)]
struct Args {
    /// Port for the local socket (runtime WebSocket + activation frames).
    #[arg(long)]
    port: Option<u16>,

    /// Bind address for the local socket.
    #[arg(long, env = "DEEPLINKD_BIND")]
    bind_address: Option<String>,

    /// Data directory holding config.toml.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level filter, e.g. "info" or "deeplinkd=debug".
    #[arg(long)]
    log: Option<String>,

    /// Also write logs to this file (daily rolling).
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the host shell and wait for the runtime to attach.
    Serve,

    /// Hand a deep link to the running instance — or become the instance,
    /// buffering the link until the runtime attaches.
    ///
    /// This is the command the OS scheme handler should invoke:
    ///   deeplinkd open app://movie/42
    Open {
        /// The deep-link URL. Passed through unvalidated — the runtime owns
        /// the payload.
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("DEEPLINKD_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    let config = HostConfig::new(args.port, args.data_dir, args.log, args.bind_address);

    match args.command {
        Some(Command::Open { url }) => run_open(config, url).await,
        None | Some(Command::Serve) => run_server(config, None).await,
    }
}

/// Single-instance activation: forward to a running instance if one is
/// listening, otherwise become the instance with `url` as the cold-start link.
async fn run_open(config: HostConfig, url: String) -> Result<()> {
    let addr = config.socket_addr();
    match TcpStream::connect(&addr).await {
        Ok(stream) => {
            activation::forward_link(stream, &url).await?;
            info!(addr = %addr, "deep link forwarded to running instance");
            Ok(())
        }
        Err(e) => {
            debug!(addr = %addr, err = %e, "no running instance — cold start");
            run_server(config, Some(url)).await
        }
    }
}

async fn run_server(config: HostConfig, initial_link: Option<String>) -> Result<()> {
    let ctx = Arc::new(HostContext::new(config));

    if let Some(link) = initial_link {
        // The runtime cannot have attached yet, so this always buffers.
        ctx.deliver_link(&link).await?;
    }

    host::run(ctx).await
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("deeplinkd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
