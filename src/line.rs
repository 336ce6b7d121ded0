//! Line mode: a synchronous, append-only transcript on stdout.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{Clear, ClearType};
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::events::{Event, classify};
use crate::processor::{EventProcessor, NOT_UTF8_DIAGNOSTIC, Rendered, SessionInfo};
use crate::render::{PlainRenderer, contract_home, indent_nested};

/// Shows that assistant text is being streamed.
pub trait StreamingIndicator {
    fn show<W: Write>(&mut self, out: &mut W) -> io::Result<()>;
    fn clear<W: Write>(&mut self, out: &mut W) -> io::Result<()>;
}

/// Indicator for non-terminal output: does nothing.
#[derive(Debug, Default)]
pub struct NoIndicator;

impl StreamingIndicator for NoIndicator {
    fn show<W: Write>(&mut self, _out: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn clear<W: Write>(&mut self, _out: &mut W) -> io::Result<()> {
        Ok(())
    }
}

/// A dim status line that is erased in place once streaming stops.
#[derive(Debug, Default)]
pub struct TerminalIndicator {
    visible: bool,
}

impl StreamingIndicator for TerminalIndicator {
    fn show<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.visible {
            return Ok(());
        }
        queue!(
            out,
            SetAttribute(Attribute::Dim),
            Print("● streaming…"),
            SetAttribute(Attribute::Reset)
        )?;
        out.flush()?;
        self.visible = true;
        Ok(())
    }

    fn clear<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if !self.visible {
            return Ok(());
        }
        queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        out.flush()?;
        self.visible = false;
        Ok(())
    }
}

/// Counters reported when the input ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub events: usize,
    pub skipped: usize,
}

/// Writes rendered items to a transcript.
pub struct LineOutput<W: Write, I: StreamingIndicator> {
    out: W,
    indicator: I,
    show_diagnostics: bool,
}

impl<W: Write, I: StreamingIndicator> LineOutput<W, I> {
    pub fn new(out: W, indicator: I, show_diagnostics: bool) -> Self {
        Self {
            out,
            indicator,
            show_diagnostics,
        }
    }

    pub fn write_item(&mut self, item: Rendered) -> io::Result<()> {
        if let Rendered::Streaming(visible) = item {
            return if visible {
                self.indicator.show(&mut self.out)
            } else {
                self.indicator.clear(&mut self.out)
            };
        }
        self.indicator.clear(&mut self.out)?;

        match item {
            Rendered::SessionStart(info) => writeln!(self.out, "{}", session_banner(&info))?,
            Rendered::Text { text, nested } => {
                writeln!(self.out)?;
                self.write_block(&text, nested)?;
            }
            Rendered::ToolHeader { text, nested }
            | Rendered::ToolResult { text, nested, .. }
            | Rendered::Orphan { text, nested } => self.write_block(&text, nested)?,
            // the task block is printed with the TodoWrite result
            Rendered::Todos(_) => {}
            Rendered::Summary { text, .. } => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", text)?;
            }
            Rendered::Diagnostic(message) if self.show_diagnostics => {
                writeln!(self.out, "{}", message)?;
            }
            Rendered::Diagnostic(_) | Rendered::Streaming(_) => {}
        }
        self.out.flush()
    }

    fn write_block(&mut self, text: &str, nested: bool) -> io::Result<()> {
        if nested {
            writeln!(self.out, "{}", indent_nested(text))
        } else {
            writeln!(self.out, "{}", text)
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn session_banner(info: &SessionInfo) -> String {
    let mut parts = vec!["● Session started".to_string()];
    if let Some(model) = &info.model {
        parts.push(model.clone());
    }
    if let Some(cwd) = &info.cwd {
        parts.push(contract_home(cwd));
    }
    if !info.tools.is_empty() {
        parts.push(format!("{} tools", info.tools.len()));
    }
    let mut banner = parts.join(" · ");
    if !info.agents.is_empty() {
        banner.push_str(&format!("\n  agents: {}", info.agents.join(", ")));
    }
    banner
}

/// Decodes NDJSON from `reader` and writes the transcript through `output`.
///
/// A write failure stops the run and is returned.
pub fn run<R, W, I>(reader: R, output: &mut LineOutput<W, I>, display: &DisplayConfig) -> Result<RunStats>
where
    R: BufRead,
    W: Write,
    I: StreamingIndicator,
{
    let mut processor = EventProcessor::new(PlainRenderer::from_config(display))
        .with_thinking(display.show_thinking);
    let mut stats = RunStats::default();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "input_line_not_utf8");
                stats.skipped += 1;
                output
                    .write_item(Rendered::Diagnostic(NOT_UTF8_DIAGNOSTIC.to_string()))
                    .context("failed to write output")?;
                continue;
            }
            Err(e) => return Err(e).context("failed to read input"),
        };
        stats.lines += 1;

        let Some(event) = classify(&line) else {
            continue;
        };
        if matches!(event, Event::ParseError { .. }) {
            stats.skipped += 1;
        } else {
            stats.events += 1;
        }
        debug!(kind = event.kind(), "event_received");

        processor.process(event, |item| {
            output.write_item(item).context("failed to write output")
        })?;
    }

    info!(
        lines = stats.lines,
        events = stats.events,
        skipped = stats.skipped,
        pending = processor.tracker().len(),
        "input_finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    /// Records indicator calls as markers in the output.
    #[derive(Default)]
    struct MarkerIndicator {
        visible: bool,
    }

    impl StreamingIndicator for MarkerIndicator {
        fn show<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
            self.visible = true;
            write!(out, "<on>")
        }

        fn clear<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
            if self.visible {
                self.visible = false;
                write!(out, "<off>")?;
            }
            Ok(())
        }
    }

    fn ndjson(lines: &[Value]) -> String {
        lines
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn transcript(input: &str, display: &DisplayConfig) -> (String, RunStats) {
        let mut output = LineOutput::new(Vec::new(), NoIndicator, display.show_diagnostics);
        let stats = run(input.as_bytes(), &mut output, display).unwrap();
        (String::from_utf8(output.into_inner()).unwrap(), stats)
    }

    #[test]
    fn test_tool_session_transcript() {
        let input = ndjson(&[
            json!({"type": "system", "subtype": "init", "model": "opus", "tools": ["Bash", "Read"]}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "Listing files."},
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "a.rs\nb.rs"}
            ]}}),
            json!({"type": "result", "is_error": false, "num_turns": 1}),
        ]);

        let (out, stats) = transcript(&input, &DisplayConfig::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "● Session started · opus · 2 tools");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "Listing files.");
        assert_eq!(lines[3], "[Tool: Bash] ls");
        assert_eq!(lines[4], "  ⎿ a.rs");
        assert_eq!(lines[5], "    b.rs");
        assert!(out.contains("Result: success | Turns: 1"));
        assert_eq!(
            stats,
            RunStats {
                lines: 4,
                events: 4,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_nested_output_is_indented() {
        let input = ndjson(&[
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "P", "name": "Task", "input": {"description": "Dig"}}
            ]}}),
            json!({"type": "assistant", "parent_tool_use_id": "P", "message": {"content": [
                {"type": "tool_use", "id": "C", "name": "Read", "input": {"file_path": "/x"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "C", "content": "body"}
            ]}}),
        ]);

        let (out, _) = transcript(&input, &DisplayConfig::default());
        assert_eq!(
            out,
            "[Tool: Task] Dig\n    [Tool: Read] /x\n      ⎿ body\n"
        );
    }

    #[test]
    fn test_diagnostics_respect_config() {
        let input = "not json\n\n{\"type\":\"ping\"}\n";

        let (out, stats) = transcript(input, &DisplayConfig::default());
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().all(|l| l.starts_with("[skipped line:")));
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.lines, 3);

        let quiet = DisplayConfig {
            show_diagnostics: false,
            ..DisplayConfig::default()
        };
        let (out, _) = transcript(input, &quiet);
        assert!(out.is_empty());
    }

    #[test]
    fn test_indicator_wraps_streamed_text() {
        let input = ndjson(&[
            json!({"type": "stream_event", "event": {"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}}),
            json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}}),
            json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 0}}),
        ]);
        let display = DisplayConfig::default();
        let mut output = LineOutput::new(Vec::new(), MarkerIndicator::default(), true);
        run(input.as_bytes(), &mut output, &display).unwrap();

        let out = String::from_utf8(output.into_inner()).unwrap();
        assert_eq!(out, "<on><off>\nHi\n");
    }

    #[test]
    fn test_write_failure_halts_run() {
        struct FailingWriter;
        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let input = ndjson(&[
            json!({"type": "system", "model": "m"}),
            json!({"type": "system", "model": "n"}),
        ]);
        let mut output = LineOutput::new(FailingWriter, NoIndicator, true);
        let err = run(input.as_bytes(), &mut output, &DisplayConfig::default()).unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().expect("io error source");
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_session_banner_lists_agents() {
        let info = SessionInfo {
            model: Some("sonnet".to_string()),
            cwd: Some("/srv/app".to_string()),
            tools: vec![],
            agents: vec!["explore".to_string(), "plan".to_string()],
        };
        assert_eq!(
            session_banner(&info),
            "● Session started · sonnet · /srv/app\n  agents: explore, plan"
        );
    }
}
