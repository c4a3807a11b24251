mod handlers;
mod state;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::{Parser, ValueEnum};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use devinfo_core::export::{ChartExporter, ChartLayout, CsvExporter};
use devinfo_core::{
    Collector, CommandSpec, DeviceMonitor, MemInfoParser, SampleParser, VmStatParser,
};

use state::{SharedState, WebAppInner};

// ============================================================
// CLI
// ============================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Meminfo,
    Vmstat,
}

#[derive(Parser, Debug)]
#[command(name = "devinfo-web", about = "devinfo live query API server", version = devinfo_core::VERSION)]
struct Args {
    /// Metric source to sample.
    #[arg(value_enum, env = "DEVINFO_SOURCE")]
    source: SourceKind,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8050", env = "DEVINFO_LISTEN")]
    listen: String,

    /// Samples returned by /api/v1/info when the request sets no window.
    #[arg(long, default_value = "10", env = "DEVINFO_WINDOW")]
    window: usize,

    /// Command prefix that reaches the device. Empty runs commands locally.
    #[arg(long, default_value = "adb shell", env = "DEVINFO_SHELL")]
    shell: String,

    /// Device serial, passed to the shell program as `-s <SERIAL>`.
    #[arg(short, long, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// Seconds between memory dumps (meminfo only).
    #[arg(short, long, default_value = "1", env = "DEVINFO_INTERVAL")]
    interval: u64,

    /// Directory for the CSV and HTML files written on shutdown.
    #[arg(short, long, default_value = ".", env = "DEVINFO_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Skip the HTML chart export.
    #[arg(long)]
    no_chart: bool,

    /// Skip the CSV export.
    #[arg(long)]
    no_csv: bool,
}

fn build<P: SampleParser>(parser: P, args: &Args) -> (Box<dyn DeviceMonitor>, ChartLayout) {
    let layout = parser.chart_layout();
    let mut collector = Collector::new(parser)
        .shell(CommandSpec::shell_prefix(&args.shell, args.serial.as_deref()));
    if !args.no_csv {
        collector = collector.exporter(Box::new(CsvExporter::new(args.output_dir.clone())));
    }
    if !args.no_chart {
        collector = collector.exporter(Box::new(ChartExporter::new(
            args.output_dir.clone(),
            layout.clone(),
        )));
    }
    (Box::new(collector), layout)
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::handle_health))
        .route("/api/v1/columns", get(handlers::handle_columns))
        .route("/api/v1/info", get(handlers::handle_info))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

// ============================================================
// Main
// ============================================================

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("devinfo_web=info,devinfo_core=info")),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> ExitCode {
    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    let (mut monitor, layout) = match args.source {
        SourceKind::Meminfo => build(
            MemInfoParser::new().with_interval(Duration::from_secs(args.interval.max(1))),
            &args,
        ),
        SourceKind::Vmstat => build(VmStatParser::new(), &args),
    };
    info!(version = devinfo_core::VERSION, collector = monitor.name(), "starting");

    if let Err(e) = monitor.start() {
        error!(collector = monitor.name(), error = %e, "failed to start collector");
        return ExitCode::FAILURE;
    }

    let state: SharedState = Arc::new(WebAppInner::new(monitor, layout, args.window));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            shutdown(state).await;
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "listening");

    let signal_state = state.clone();
    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("received shutdown signal");
            shutdown(signal_state).await;
        })
        .await;

    if let Err(e) = served {
        error!(error = %e, "server error");
        shutdown(state).await;
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Stops the collector and waits for its exports, off the async runtime.
async fn shutdown(state: SharedState) {
    let joined = tokio::task::spawn_blocking(move || {
        state.with_monitor(|monitor| {
            monitor.stop();
            monitor.join()
        })
    })
    .await;

    match joined {
        Ok(Ok(termination)) => info!(?termination, "collector stopped"),
        Ok(Err(e)) => warn!(error = %e, "collector ended with error"),
        Err(e) => error!(error = %e, "shutdown task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["devinfo-web", "vmstat"]).unwrap();
        assert_eq!(args.source, SourceKind::Vmstat);
        assert_eq!(args.listen, "127.0.0.1:8050");
        assert_eq!(args.window, 10);
        assert_eq!(args.shell, "adb shell");
    }
}
