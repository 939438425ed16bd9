//! tailbuild - follow every log of a build, matrix sub-configurations
//! included, until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Latest build of a job
//! tailbuild myproject
//!
//! # A given build, from a non-default jobs directory
//! tailbuild --jobsdir /srv/jenkins/jobs --buildnumber 42 myproject
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use futures_util::stream::{self, Stream};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailbuild::{
    discover, ColorFormatter, FailurePolicy, Formatter, Multiplexer, PlainFormatter, Tailer,
    TailerConfig,
};

/// Missing or malformed arguments.
const EXIT_USAGE: u8 = 64;
/// Log discovery failed; nothing was tailed.
const EXIT_DISCOVERY: u8 = 4;
/// A log could not be tailed.
const EXIT_TAILING: u8 = 1;

/// Tail the logs of a build, including all of its sub-configurations
#[derive(Parser, Debug)]
#[command(name = "tailbuild")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name of the project (job) whose logs to tail
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    project: String,

    /// Job directory that contains the project's builds/ subdirectory
    #[arg(long, env = "TAILBUILD_JOBSDIR", default_value = "/var/lib/jenkins")]
    jobsdir: PathBuf,

    /// Build number of logs to tail (0 = latest)
    #[arg(long, default_value_t = 0)]
    buildnumber: u64,

    /// Only tail the top-level build log, not its sub-configurations
    #[arg(long)]
    no_axes: bool,

    /// Milliseconds between polls of missing or idle files
    #[arg(long, value_name = "MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Only poll, don't wake up on filesystem events
    #[arg(long)]
    no_watch: bool,

    /// Keep tailing the other logs when one of them cannot be read
    #[arg(long)]
    keep_going: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(EXIT_USAGE);
    }

    run(cli).await
}

async fn run(cli: Cli) -> ExitCode {
    let project_dir = cli.jobsdir.join(&cli.project);
    let build = Some(cli.buildnumber).filter(|n| *n > 0);

    let discovery = match discover(&project_dir, build, !cli.no_axes) {
        Ok(discovery) => discovery,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_DISCOVERY);
        }
    };

    if !discovery.is_clean() {
        for e in &discovery.errors {
            eprintln!("error: {}", e);
        }
        return ExitCode::from(EXIT_DISCOVERY);
    }

    tracing::info!(
        project = %project_dir.display(),
        build = discovery.build,
        logs = discovery.sources.len(),
        "tailing (Ctrl+C to stop)"
    );

    let use_color = !cli.no_color && std::io::stdout().is_terminal();
    let formatter: Box<dyn Formatter + Send> = if use_color {
        Box::new(ColorFormatter::new())
    } else {
        Box::new(PlainFormatter::new())
    };

    let policy = if cli.keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::Abort
    };

    let config = TailerConfig {
        retry_interval: Duration::from_millis(cli.poll_interval),
        watch: !cli.no_watch,
    };

    let mut mux = Multiplexer::new(formatter, tokio::io::stdout()).with_failure_policy(policy);
    for source in discovery.sources {
        if let Err(e) = mux.add(Tailer::new(source, config.clone())) {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_TAILING);
        }
    }

    match mux.run(interrupts()).await {
        Ok(report) if report.failures.is_empty() => {
            tracing::info!(lines = report.lines, "all logs drained");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            for (_, e) in &report.failures {
                eprintln!("error: {}", e);
            }
            ExitCode::from(EXIT_TAILING)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_TAILING)
        }
    }
}

/// One item per Ctrl+C received.
fn interrupts() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(((), ())),
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for interrupts");
                None
            }
        }
    })
}

/// Initialize the tracing subscriber for logging, on stderr so stdout only
/// carries log lines
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}
