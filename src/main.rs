use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use mpacklog::config::DEFAULT_PORT;
use mpacklog::{read_log, FileWatcher, LogServer, ServerConfig, Value, WatcherConfig};

#[derive(Debug, Parser)]
#[command(name = "mpacklog", version, about = "Manipulate MessagePack log files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dump log file as JSON Lines to the standard output
    Dump {
        /// Log file to open
        logfile: PathBuf,

        /// Keep the file open and follow it, as in `tail -f`
        #[arg(short, long)]
        follow: bool,
    },

    /// Serve most recent values from log file
    Serve {
        /// Path to a log directory (open most recent log) or a log file
        log_path: PathBuf,

        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Delay between two checks of the log file, in milliseconds
        #[arg(long, default_value_t = 1)]
        poll_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let (writer, _guard) = tracing_appender::non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Dump { logfile, follow } => dump(logfile, follow).await,
        Command::Serve {
            log_path,
            host,
            port,
            poll_interval_ms,
        } => {
            let config = ServerConfig::new(log_path)
                .with_host(host)
                .with_port(port)
                .with_poll_interval(Duration::from_millis(poll_interval_ms));
            serve(config).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "mpacklog failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: ServerConfig) -> mpacklog::Result<()> {
    let server = LogServer::bind(config).await?;
    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });
    server.run().await
}

async fn dump(logfile: PathBuf, follow: bool) -> mpacklog::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !follow {
        for record in read_log(&logfile)? {
            if !print_record(&mut out, &record?)? {
                break;
            }
        }
        return Ok(());
    }

    let watcher = FileWatcher::open(&logfile, &WatcherConfig::default()).await?;
    let records = watcher.into_stream();
    futures::pin_mut!(records);
    while let Some(record) = records.next().await {
        if !print_record(&mut out, &record?)? {
            break;
        }
    }
    Ok(())
}

/// Writes one JSON line. Returns `false` once stdout is closed, e.g. when
/// piped into `head`.
fn print_record(out: &mut impl Write, record: &Value) -> io::Result<bool> {
    let written = serde_json::to_writer(&mut *out, record)
        .map_err(io::Error::from)
        .and_then(|()| writeln!(out))
        .and_then(|()| out.flush());
    match written {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e),
    }
}
