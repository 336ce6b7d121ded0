mod app;
mod block;
mod config;
mod dashboard;
mod error;
mod events;
mod line;
mod logging;
mod processor;
mod render;
mod tracker;
mod ui;

use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoadStatus, DisplayConfig, DisplayMode};
use crate::dashboard::Input;
use crate::line::{LineOutput, NoIndicator, TerminalIndicator};

/// Decode an agent CLI's NDJSON stream into a readable transcript.
#[derive(Debug, Parser)]
#[command(name = "streamlens", version, about)]
struct Cli {
    /// Full-screen dashboard instead of a plain transcript
    #[arg(long, conflicts_with = "line")]
    dashboard: bool,

    /// Plain transcript on stdout
    #[arg(long)]
    line: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level or filter directive (e.g. "debug")
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// NDJSON file to replay; reads stdin when omitted
    file: Option<PathBuf>,
}

impl Cli {
    fn mode(&self, configured: DisplayMode) -> DisplayMode {
        if self.dashboard {
            DisplayMode::Dashboard
        } else if self.line {
            DisplayMode::Line
        } else {
            configured
        }
    }

    fn input(&self) -> Input {
        match &self.file {
            Some(path) => Input::File(path.clone()),
            None => Input::Stdin,
        }
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let loaded_config = config::load_config(cli.config.as_deref());
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| loaded_config.config.logging.level.clone());

    // Initialize logging before anything else that logs
    let (session_id, _guard) = match logging::init(&level) {
        Ok(ctx) => {
            logging::cleanup_old_logs(&ctx.log_directory);
            (Some(ctx.session_id), Some(ctx._guard))
        }
        Err(e) => {
            eprintln!("Warning: Failed to initialize logging: {}", e);
            (None, None)
        }
    };

    debug!(
        config_path = %loaded_config.config_path.display(),
        status = ?loaded_config.status,
        "config_loaded"
    );
    if let ConfigLoadStatus::Error(message) = &loaded_config.status {
        eprintln!(
            "Warning: {} ({}); using defaults",
            message,
            loaded_config.config_path.display()
        );
    }

    let display = loaded_config.config.display;
    let mode = cli.mode(display.mode);
    let input = cli.input();
    info!(%mode, source = %input.label(), "run_start");

    let result = match mode {
        DisplayMode::Line => run_line(&input, &display),
        DisplayMode::Dashboard => run_dashboard(input, display),
    };

    if let Some(sid) = session_id {
        info!(
            session_id = %sid,
            duration_secs = start_time.elapsed().as_secs_f64(),
            ok = result.is_ok(),
            "session_end"
        );
    }

    result
}

fn run_line(input: &Input, display: &DisplayConfig) -> Result<()> {
    let result = match input {
        Input::Stdin => write_transcript(io::stdin().lock(), display),
        Input::File(path) => {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            write_transcript(BufReader::new(file), display)
        }
    };

    match result {
        // the reader went away; nothing left to show
        Err(e) if is_broken_pipe(&e) => {
            debug!("stdout_closed");
            Ok(())
        }
        other => other,
    }
}

fn write_transcript<R: BufRead>(reader: R, display: &DisplayConfig) -> Result<()> {
    let stdout = io::stdout();
    let stats = if stdout.is_terminal() {
        let mut output = LineOutput::new(
            stdout.lock(),
            TerminalIndicator::default(),
            display.show_diagnostics,
        );
        line::run(reader, &mut output, display)?
    } else {
        let mut output = LineOutput::new(stdout.lock(), NoIndicator, display.show_diagnostics);
        line::run(reader, &mut output, display)?
    };
    debug!(?stats, "transcript_written");
    Ok(())
}

fn is_broken_pipe(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}

fn run_dashboard(input: Input, display: DisplayConfig) -> Result<()> {
    if !io::stdout().is_terminal() {
        bail!("dashboard mode needs a terminal on stdout; use --line when piping");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(dashboard::run(input, display));

    // stdin reads run on a blocking thread that may never return
    runtime.shutdown_background();
    if let Err(e) = &result {
        warn!(error = %e, "dashboard_failed");
    }
    result
}
