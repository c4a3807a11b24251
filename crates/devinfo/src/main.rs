//! devinfo - Android device resource sampler.
//!
//! Runs `cat /proc/meminfo` (polled) or `vmstat 1` (streamed) through
//! `adb shell`, accumulates samples until interrupted or the device goes
//! away, then writes a CSV table and an HTML chart of the run.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use devinfo_core::export::{ChartExporter, CsvExporter, render_table};
use devinfo_core::{
    CollectError, Collector, CommandSpec, DeviceMonitor, MemInfoParser, SampleParser, Termination, VmStatParser,
};

/// Android device memory and vmstat sampler.
#[derive(Parser, Debug)]
#[command(name = "devinfo", about = "Android device memory and vmstat sampler", version = devinfo_core::VERSION)]
struct Args {
    #[command(subcommand)]
    source: Source,

    /// Command prefix that reaches the device. Empty runs commands locally.
    #[arg(long, default_value = "adb shell", global = true)]
    shell: String,

    /// Device serial, passed to the shell program as `-s <SERIAL>`.
    #[arg(short, long, global = true, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// Directory for the exported CSV and HTML files.
    #[arg(short, long, default_value = ".", global = true)]
    output_dir: PathBuf,

    /// Skip the HTML chart export.
    #[arg(long, global = true)]
    no_chart: bool,

    /// Skip the CSV export.
    #[arg(long, global = true)]
    no_csv: bool,

    /// Number of trailing samples printed when the run ends (0 disables).
    #[arg(long, default_value = "10", global = true)]
    tail: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Source {
    /// Poll /proc/meminfo.
    Meminfo {
        /// Seconds between dumps.
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },
    /// Follow `vmstat 1`.
    Vmstat,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["devinfo", "devinfo_core"] {
        let directive: Directive = format!("{}={}", target, level)
            .parse()
            .unwrap_or_else(|_| LevelFilter::from_level(level).into());
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Wires a parser to the exporters selected on the command line.
fn build<P: SampleParser>(parser: P, args: &Args) -> Box<dyn DeviceMonitor> {
    let layout = parser.chart_layout();
    let mut collector = Collector::new(parser)
        .shell(CommandSpec::shell_prefix(&args.shell, args.serial.as_deref()));
    if !args.no_csv {
        collector = collector.exporter(Box::new(CsvExporter::new(args.output_dir.clone())));
    }
    if !args.no_chart {
        collector = collector.exporter(Box::new(ChartExporter::new(args.output_dir.clone(), layout)));
    }
    Box::new(collector)
}

fn monitor(args: &Args) -> Box<dyn DeviceMonitor> {
    match args.source {
        Source::Meminfo { interval } => build(
            MemInfoParser::new().with_interval(Duration::from_secs(interval.max(1))),
            args,
        ),
        Source::Vmstat => build(VmStatParser::new(), args),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("devinfo {} starting", devinfo_core::VERSION);
    if args.no_csv && args.no_chart {
        warn!("both exports disabled, samples are only kept in memory");
    }

    let mut monitor = monitor(&args);
    info!(
        "Config: source={}, shell='{}', output={}",
        monitor.name(),
        args.shell,
        args.output_dir.display()
    );

    let stop = monitor.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        if stop.stop() {
            info!("Received shutdown signal");
        }
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    if let Err(e) = monitor.start() {
        error!("Failed to start {}: {}", monitor.name(), e);
        return ExitCode::FAILURE;
    }
    info!("Sampling, press Ctrl-C to stop");

    let outcome = monitor.join();
    let snapshot = monitor.info();
    if args.tail > 0 && !snapshot.is_empty() {
        print!("{}", render_table(&snapshot.window(args.tail)));
    }

    match outcome {
        Ok(Termination::Stopped) => {
            info!("Stopped after {} samples", snapshot.len());
            ExitCode::SUCCESS
        }
        Ok(Termination::EndOfStream) => {
            info!("Command finished after {} samples", snapshot.len());
            ExitCode::SUCCESS
        }
        Err(CollectError::Source(e)) => {
            error!("Sampling ended: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_meminfo_defaults() {
        let args = Args::try_parse_from(["devinfo", "meminfo"]).unwrap();
        assert_eq!(args.source, Source::Meminfo { interval: 1 });
        assert_eq!(args.shell, "adb shell");
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert_eq!(args.tail, 10);
        assert!(!args.no_csv && !args.no_chart);
    }

    #[test]
    fn test_args_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "devinfo", "vmstat", "--shell", "", "-o", "/tmp/runs", "--no-chart", "-vv",
        ])
        .unwrap();
        assert_eq!(args.source, Source::Vmstat);
        assert_eq!(args.shell, "");
        assert_eq!(args.output_dir, PathBuf::from("/tmp/runs"));
        assert!(args.no_chart);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_monitor_names() {
        let args = Args::try_parse_from(["devinfo", "meminfo", "-i", "5"]).unwrap();
        assert_eq!(monitor(&args).name(), "meminfo");
        let args = Args::try_parse_from(["devinfo", "vmstat"]).unwrap();
        assert_eq!(monitor(&args).name(), "vmstat");
    }
}
