//! Dashboard mode: a single-consumer actor around [`App`].
//!
//! Producer tasks turn input lines, ticks and terminal events into [`Msg`]
//! values on one unbounded channel. The consumer loop owns the app state,
//! applies messages in arrival order and redraws.

use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{App, Msg};
use crate::config::DisplayConfig;
use crate::ui::draw_ui;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Messages applied between two redraws at most.
const MAX_BATCH: usize = 256;

/// Where NDJSON lines come from.
#[derive(Debug, Clone)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    pub fn label(&self) -> String {
        match self {
            Input::Stdin => "stdin".to_string(),
            Input::File(path) => path.display().to_string(),
        }
    }
}

type Term = Terminal<CrosstermBackend<Stdout>>;

/// Restores the terminal when dropped, including on error paths.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<(Self, Term)> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen, EnableMouseCapture) {
            let _ = disable_raw_mode();
            return Err(e.into());
        }
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok((Self, terminal))
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "raw_mode_restore_failed");
        }
        if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture) {
            warn!(error = %e, "screen_restore_failed");
        }
    }
}

/// Runs the dashboard until the user quits.
pub async fn run(input: Input, display: DisplayConfig) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    let reader = match &input {
        Input::Stdin => spawn_reader(tokio::io::stdin(), tx.clone()),
        Input::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            spawn_reader(file, tx.clone())
        }
    };
    let ticker = spawn_ticker(tx.clone());
    let terminal_events = spawn_terminal_events(tx);

    let app = App::new(&display, input.label());
    info!(source = %app.source, "dashboard_started");

    let result = match TerminalGuard::enter() {
        Ok((guard, mut terminal)) => {
            let result = event_loop(&mut terminal, app, rx).await;
            drop(guard);
            result
        }
        Err(e) => Err(e),
    };

    for task in [reader, ticker, terminal_events] {
        task.abort();
    }
    result
}

async fn event_loop(terminal: &mut Term, mut app: App, mut rx: UnboundedReceiver<Msg>) -> Result<()> {
    terminal.draw(|f| draw_ui(f, &mut app))?;

    while let Some(msg) = rx.recv().await {
        app.update(msg);

        let mut batch = 1;
        while batch < MAX_BATCH && !app.should_quit {
            let Ok(msg) = rx.try_recv() else {
                break;
            };
            app.update(msg);
            batch += 1;
        }

        if app.should_quit {
            info!(events = app.events, diagnostics = app.diagnostics, "dashboard_quit");
            return Ok(());
        }
        terminal.draw(|f| draw_ui(f, &mut app))?;
    }

    debug!("inbox_closed");
    Ok(())
}

/// Sends each input line, then `InputClosed` at EOF or `InputError`.
///
/// A line that is not UTF-8 becomes `InvalidLine` and reading continues.
fn spawn_reader<R>(reader: R, tx: UnboundedSender<Msg>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut count = 0usize;
        loop {
            buf.clear();
            let msg = match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    debug!(lines = count, "input_eof");
                    let _ = tx.send(Msg::InputClosed);
                    break;
                }
                Ok(_) => {
                    count += 1;
                    match std::str::from_utf8(strip_line_ending(&buf)) {
                        Ok(line) => Msg::Line(line.to_string()),
                        Err(e) => {
                            warn!(error = %e, line = count, "input_line_not_utf8");
                            Msg::InvalidLine
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, lines = count, "input_read_failed");
                    let _ = tx.send(Msg::InputError(e.to_string()));
                    break;
                }
            };
            if tx.send(msg).is_err() {
                break;
            }
        }
    })
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn spawn_ticker(tx: UnboundedSender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if tx.send(Msg::Tick).is_err() {
                break;
            }
        }
    })
}

fn spawn_terminal_events(tx: UnboundedSender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = EventStream::new();
        while let Some(event) = events.next().await {
            let msg = match event {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Msg::Key(key),
                Ok(Event::Mouse(mouse)) => Msg::Mouse(mouse),
                Ok(Event::Resize(_, _)) => Msg::Resize,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal_event_failed");
                    break;
                }
            };
            if tx.send(msg).is_err() {
                break;
            }
        }
    })
}
