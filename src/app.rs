//! Dashboard state and the message handler that drives it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::style::Color;
use ratatui::text::Line;
use ratatui::widgets::{BorderType, Paragraph, Wrap};
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::events::classify;
use crate::processor::{EventProcessor, NOT_UTF8_DIAGNOSTIC, Rendered, SessionInfo};
use crate::render::{PlainRenderer, TodoItem, TodoStatus};

/// Oldest transcript lines are dropped past this many.
pub const MAX_TRANSCRIPT_LINES: usize = 10_000;

/// Everything the dashboard reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// One raw NDJSON line from the input.
    Line(String),
    /// An input line that is not valid UTF-8.
    InvalidLine,
    /// The input reached EOF.
    InputClosed,
    /// Reading the input failed; no more lines will arrive.
    InputError(String),
    Tick,
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize,
}

/// Session status shown in the sidebar and border.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    /// No event seen yet.
    Idle,
    Waiting,
    Streaming,
    Finished,
    Failed,
    /// Input ended before a result event.
    InputClosed,
}

impl AppStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AppStatus::Idle => "idle",
            AppStatus::Waiting => "waiting",
            AppStatus::Streaming => "streaming",
            AppStatus::Finished => "finished",
            AppStatus::Failed => "failed",
            AppStatus::InputClosed => "input closed",
        }
    }

    pub fn border_type(&self) -> BorderType {
        match self {
            AppStatus::Waiting | AppStatus::Streaming => BorderType::Double,
            _ => BorderType::Rounded,
        }
    }

    /// Status color; streaming pulses between green and dark green at ~1Hz
    /// with a 100ms tick.
    pub fn pulsing_color(&self, frame_count: u64) -> Color {
        match self {
            AppStatus::Idle | AppStatus::InputClosed => Color::DarkGray,
            AppStatus::Waiting => Color::Yellow,
            AppStatus::Streaming => {
                if (frame_count / 5).is_multiple_of(2) {
                    Color::Green
                } else {
                    Color::Rgb(0, 128, 0)
                }
            }
            AppStatus::Finished => Color::Cyan,
            AppStatus::Failed => Color::Red,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, AppStatus::Finished | AppStatus::Failed)
    }
}

/// How a transcript line is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    Session,
    ToolHeader,
    ToolResult,
    Error,
    Orphan,
    Summary,
    Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub text: String,
    pub style: LineStyle,
    /// Rows this line takes when wrapped at the current pane width.
    height: usize,
}

/// A tool still waiting for its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolView {
    pub name: String,
    pub nested: bool,
}

/// Main application state.
pub struct App {
    pub status: AppStatus,
    pub lines: VecDeque<TranscriptLine>,
    pub scroll_offset: u16,
    pub is_auto_following: bool,
    /// Inner height of the transcript pane; set through `set_pane_size`.
    pub main_pane_height: u16,
    /// Outer width of the transcript pane; set through `set_pane_size`.
    pub main_pane_width: u16,
    /// Sum of `TranscriptLine::height` over `lines`.
    visual_lines: usize,
    /// Name of the input source for the title bar.
    pub source: String,
    pub session: Option<SessionInfo>,
    /// Current task list (replaced by each TodoWrite).
    pub tasks: Vec<TodoItem>,
    pub diagnostics: usize,
    pub events: usize,
    pub input_closed: bool,
    pub should_quit: bool,
    /// Frame counter for animations (incremented each tick).
    pub frame_count: u64,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
    show_diagnostics: bool,
    processor: EventProcessor,
}

impl App {
    pub fn new(display: &DisplayConfig, source: impl Into<String>) -> Self {
        Self {
            status: AppStatus::Idle,
            lines: VecDeque::new(),
            scroll_offset: 0,
            is_auto_following: true,
            main_pane_height: 0,
            main_pane_width: 0,
            visual_lines: 0,
            source: source.into(),
            session: None,
            tasks: Vec::new(),
            diagnostics: 0,
            events: 0,
            input_closed: false,
            should_quit: false,
            frame_count: 0,
            started_at: None,
            finished_after: None,
            show_diagnostics: display.show_diagnostics,
            processor: EventProcessor::new(PlainRenderer::from_config(display))
                .with_thinking(display.show_thinking),
        }
    }

    pub fn update(&mut self, msg: Msg) {
        match msg {
            Msg::Line(line) => self.handle_line(&line),
            Msg::InvalidLine => self.apply(Rendered::Diagnostic(NOT_UTF8_DIAGNOSTIC.to_string())),
            Msg::InputClosed => {
                info!(events = self.events, pending = self.processor.tracker().len(), "input_closed");
                self.input_closed = true;
                if !self.status.is_terminal() {
                    self.status = AppStatus::InputClosed;
                }
            }
            Msg::InputError(error) => {
                warn!(error = %error, "input_failed");
                self.input_closed = true;
                self.status = AppStatus::Failed;
                self.push_line(format!("[input error: {}]", error), LineStyle::Error);
            }
            Msg::Tick => self.frame_count = self.frame_count.wrapping_add(1),
            Msg::Key(key) => self.handle_key(key),
            Msg::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => self.scroll_up(3),
                MouseEventKind::ScrollDown => self.scroll_down(3),
                _ => {}
            },
            Msg::Resize => {
                if self.is_auto_following {
                    self.scroll_to_bottom();
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(event) = classify(line) else {
            return;
        };
        self.events += 1;
        self.started_at.get_or_insert_with(Instant::now);
        debug!(kind = event.kind(), "event_received");

        let mut rendered = Vec::new();
        if let Err(e) = self.processor.process(event, |item| {
            rendered.push(item);
            Ok(())
        }) {
            warn!(error = %e, "event_processing_failed");
        }
        for item in rendered {
            self.apply(item);
        }
    }

    fn apply(&mut self, item: Rendered) {
        match item {
            Rendered::SessionStart(info) => {
                if !self.lines.is_empty() {
                    self.push_line(String::new(), LineStyle::Plain);
                }
                let model = info.model.as_deref().unwrap_or("unknown model");
                self.push_line(format!("● Session started · {}", model), LineStyle::Session);
                self.session = Some(info);
                self.finished_after = None;
                self.status = AppStatus::Waiting;
            }
            Rendered::Text { text, nested } => {
                self.push_line(String::new(), LineStyle::Plain);
                self.push_block(&text, nested, LineStyle::Plain);
            }
            Rendered::ToolHeader { text, nested } => {
                self.push_block(&text, nested, LineStyle::ToolHeader)
            }
            Rendered::ToolResult {
                text,
                nested,
                is_error,
            } => {
                let style = if is_error {
                    LineStyle::Error
                } else {
                    LineStyle::ToolResult
                };
                self.push_block(&text, nested, style);
            }
            Rendered::Orphan { text, nested } => self.push_block(&text, nested, LineStyle::Orphan),
            Rendered::Todos(tasks) => self.update_tasks(tasks),
            Rendered::Summary { text, is_error } => {
                self.push_line(String::new(), LineStyle::Plain);
                self.push_block(&text, false, LineStyle::Summary);
                self.status = if is_error {
                    AppStatus::Failed
                } else {
                    AppStatus::Finished
                };
                self.finished_after = self.started_at.map(|s| s.elapsed());
            }
            Rendered::Streaming(active) => {
                if !self.status.is_terminal() {
                    self.status = if active {
                        AppStatus::Streaming
                    } else {
                        AppStatus::Waiting
                    };
                }
            }
            Rendered::Diagnostic(message) => {
                self.diagnostics += 1;
                if self.show_diagnostics {
                    self.push_line(message, LineStyle::Diagnostic);
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let half_page = (self.main_pane_height / 2).max(1);
        let page = self.main_pane_height.max(1);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('d') if ctrl => self.scroll_down(half_page),
            KeyCode::Char('u') if ctrl => self.scroll_up(half_page),
            KeyCode::Char('f') if ctrl => self.scroll_down(page),
            KeyCode::Char('b') if ctrl => self.scroll_up(page),
            KeyCode::PageDown => self.scroll_down(page),
            KeyCode::PageUp => self.scroll_up(page),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_down(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_up(1),
            KeyCode::Char('g') | KeyCode::Home => {
                self.scroll_offset = 0;
                self.is_auto_following = self.max_scroll() == 0;
            }
            KeyCode::Char('G') | KeyCode::End => self.scroll_to_bottom(),
            _ => {}
        }
    }

    /// Tools still waiting for a result, oldest first.
    pub fn pending_tools(&self) -> Vec<PendingToolView> {
        let tracker = self.processor.tracker();
        tracker
            .pending()
            .into_iter()
            .map(|tool| PendingToolView {
                name: tool.block.name.clone(),
                nested: tracker.is_nested(tool),
            })
            .collect()
    }

    /// Time since the first event, frozen once the session finishes.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_after
            .or_else(|| self.started_at.map(|s| s.elapsed()))
    }

    /// Records the transcript pane size, re-wrapping lines when the width changes.
    pub fn set_pane_size(&mut self, width: u16, inner_height: u16) {
        self.main_pane_height = inner_height;
        if width == self.main_pane_width {
            return;
        }
        self.main_pane_width = width;
        let mut total = 0;
        for line in self.lines.iter_mut() {
            line.height = wrapped_height(&line.text, width);
            total += line.height;
        }
        self.visual_lines = total;
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
    }

    /// Wrapped transcript rows, saturating at what `Paragraph::scroll` can address.
    pub fn visual_line_count(&self) -> u16 {
        u16::try_from(self.visual_lines).unwrap_or(u16::MAX)
    }

    pub fn max_scroll(&self) -> u16 {
        self.visual_line_count()
            .saturating_sub(self.main_pane_height)
    }

    pub fn scroll_up(&mut self, amount: u16) {
        if self.scroll_offset > 0 {
            self.scroll_offset = self.scroll_offset.saturating_sub(amount);
            self.is_auto_following = false;
        }
    }

    pub fn scroll_down(&mut self, amount: u16) {
        let max = self.max_scroll();
        self.scroll_offset = self.scroll_offset.saturating_add(amount).min(max);
        if self.scroll_offset >= max {
            self.is_auto_following = true;
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.max_scroll();
        self.is_auto_following = true;
    }

    fn push_line(&mut self, text: String, style: LineStyle) {
        let height = wrapped_height(&text, self.main_pane_width);
        self.visual_lines += height;
        self.lines.push_back(TranscriptLine {
            text,
            style,
            height,
        });

        while self.lines.len() > MAX_TRANSCRIPT_LINES {
            let Some(dropped) = self.lines.pop_front() else {
                break;
            };
            self.visual_lines -= dropped.height;
            let shift = u16::try_from(dropped.height).unwrap_or(u16::MAX);
            self.scroll_offset = self.scroll_offset.saturating_sub(shift);
        }

        if self.is_auto_following {
            self.scroll_to_bottom();
        }
    }

    fn push_block(&mut self, text: &str, nested: bool, style: LineStyle) {
        let indent = if nested { "    " } else { "" };
        for line in text.lines() {
            self.push_line(format!("{}{}", indent, line), style);
        }
    }

    /// Replaces the task list from a TodoWrite event.
    fn update_tasks(&mut self, tasks: Vec<TodoItem>) {
        let count = |status: TodoStatus| tasks.iter().filter(|t| t.status == status).count();
        info!(
            task_count = tasks.len(),
            completed = count(TodoStatus::Completed),
            in_progress = count(TodoStatus::InProgress),
            pending = count(TodoStatus::Pending),
            "tasks_updated"
        );
        self.tasks = tasks;
    }

    pub fn completed_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count()
    }
}

/// Rows `text` occupies inside a bordered pane `width` columns wide.
fn wrapped_height(text: &str, width: u16) -> usize {
    let inner = width.saturating_sub(2);
    if inner == 0 {
        return 1;
    }
    Paragraph::new(Line::raw(text))
        .wrap(Wrap { trim: false })
        .line_count(inner)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> App {
        let mut app = App::new(&DisplayConfig::default(), "stdin");
        app.set_pane_size(40, 5);
        app
    }

    fn line(value: serde_json::Value) -> Msg {
        Msg::Line(value.to_string())
    }

    fn texts(app: &App) -> Vec<&str> {
        app.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_session_flow_updates_status() {
        let mut app = app();
        assert_eq!(app.status, AppStatus::Idle);

        app.update(line(json!({"type": "system", "model": "opus", "cwd": "/w"})));
        assert_eq!(app.status, AppStatus::Waiting);
        assert_eq!(app.session.as_ref().and_then(|s| s.model.as_deref()), Some("opus"));

        app.update(line(json!({"type": "stream_event", "event": {
            "type": "content_block_start", "index": 0, "content_block": {"type": "text"}
        }})));
        assert_eq!(app.status, AppStatus::Streaming);

        app.update(line(json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 0}})));
        assert_eq!(app.status, AppStatus::Waiting);

        app.update(line(json!({"type": "result", "is_error": false, "num_turns": 1})));
        assert_eq!(app.status, AppStatus::Finished);
        assert!(app.elapsed().is_some());

        app.update(Msg::InputClosed);
        assert_eq!(app.status, AppStatus::Finished);
        assert!(app.input_closed);
    }

    #[test]
    fn test_input_closed_before_result() {
        let mut app = app();
        app.update(line(json!({"type": "system"})));
        app.update(Msg::InputClosed);
        assert_eq!(app.status, AppStatus::InputClosed);
    }

    #[test]
    fn test_pending_tools_follow_tracker() {
        let mut app = app();
        app.update(line(json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "P", "name": "Task", "input": {"description": "d"}}
        ]}})));
        app.update(line(json!({"type": "assistant", "parent_tool_use_id": "P", "message": {"content": [
            {"type": "tool_use", "id": "C", "name": "Grep", "input": {"pattern": "x"}}
        ]}})));
        assert_eq!(
            app.pending_tools(),
            vec![
                PendingToolView {
                    name: "Task".to_string(),
                    nested: false
                },
                PendingToolView {
                    name: "Grep".to_string(),
                    nested: true
                },
            ]
        );

        app.update(line(json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "C", "content": "hit", "is_error": true}
        ]}})));
        assert_eq!(app.pending_tools().len(), 1);
        assert_eq!(
            texts(&app),
            vec!["[Tool: Task] d", "    [Tool: Grep] x", "      ⎿ Error: hit"]
        );
        assert_eq!(app.lines[2].style, LineStyle::Error);
    }

    #[test]
    fn test_todos_replace_task_list() {
        let mut app = app();
        app.update(line(json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "t", "name": "TodoWrite", "input": {"todos": [
                {"content": "a", "status": "completed"},
                {"content": "b", "status": "pending"}
            ]}}
        ]}})));
        // buffered tools surface their input at result time
        assert!(app.tasks.is_empty());

        app.update(line(json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "t", "content": "ok"}
        ]}})));
        assert_eq!(app.tasks.len(), 2);
        assert_eq!(app.completed_task_count(), 1);
    }

    #[test]
    fn test_diagnostics_counted_even_when_hidden() {
        let display = DisplayConfig {
            show_diagnostics: false,
            ..DisplayConfig::default()
        };
        let mut app = App::new(&display, "replay.ndjson");
        app.update(Msg::Line("{oops".to_string()));
        app.update(Msg::Line("   ".to_string()));
        assert_eq!(app.diagnostics, 1);
        assert_eq!(app.events, 1);
        assert!(app.lines.is_empty());
    }

    #[test]
    fn test_input_error_fails_session() {
        let mut app = app();
        app.update(Msg::InputError("device gone".to_string()));
        assert_eq!(app.status, AppStatus::Failed);
        assert!(app.input_closed);
        assert_eq!(app.lines[0].style, LineStyle::Error);
    }

    #[test]
    fn test_scroll_and_auto_follow() {
        let mut app = app();
        for i in 0..20 {
            app.update(line(json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": format!("line {}", i)}
            ]}})));
        }
        let max = app.max_scroll();
        assert!(max > 0);
        assert_eq!(app.scroll_offset, max);

        app.update(Msg::Key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE)));
        assert_eq!(app.scroll_offset, max - 1);
        assert!(!app.is_auto_following);

        // new content does not move a detached view
        app.update(line(json!({"type": "assistant", "message": {"content": [
            {"type": "text", "text": "more"}
        ]}})));
        assert_eq!(app.scroll_offset, max - 1);

        app.update(Msg::Key(KeyEvent::new(KeyCode::Char('G'), KeyModifiers::NONE)));
        assert!(app.is_auto_following);
        assert_eq!(app.scroll_offset, app.max_scroll());
    }

    fn assistant_text(text: &str) -> Msg {
        line(json!({"type": "assistant", "message": {"content": [
            {"type": "text", "text": text}
        ]}}))
    }

    #[test]
    fn test_long_transcript_follows_to_bottom() {
        let mut app = app();
        let rows: Vec<String> = (0..70_000).map(|i| format!("row {}", i)).collect();
        app.update(assistant_text(&rows.join("\n")));

        assert_eq!(app.lines.len(), MAX_TRANSCRIPT_LINES);
        assert_eq!(app.visual_line_count() as usize, MAX_TRANSCRIPT_LINES);
        assert_eq!(app.max_scroll() as usize, MAX_TRANSCRIPT_LINES - 5);
        assert_eq!(app.scroll_offset, app.max_scroll());
        assert_eq!(app.lines.back().map(|l| l.text.as_str()), Some("row 69999"));
    }

    #[test]
    fn test_dropped_lines_shift_detached_view() {
        let mut app = app();
        let rows: Vec<String> = (0..MAX_TRANSCRIPT_LINES - 1).map(|i| format!("row {}", i)).collect();
        app.update(assistant_text(&rows.join("\n")));
        assert_eq!(app.lines.len(), MAX_TRANSCRIPT_LINES);

        app.update(Msg::Key(KeyEvent::new(KeyCode::Char('k'), KeyModifiers::NONE)));
        let offset = app.scroll_offset;
        assert!(!app.is_auto_following);

        // blank separator plus one line of text
        app.update(assistant_text("more"));
        assert_eq!(app.lines.len(), MAX_TRANSCRIPT_LINES);
        assert_eq!(app.scroll_offset, offset - 2);
    }

    #[test]
    fn test_width_change_rewraps_transcript() {
        let mut app = app();
        app.update(assistant_text("alpha beta gamma delta epsilon zeta"));
        assert_eq!(app.visual_line_count(), 2);

        app.set_pane_size(14, 5);
        assert!(app.visual_line_count() > 2);

        app.set_pane_size(40, 5);
        assert_eq!(app.visual_line_count(), 2);
    }

    #[test]
    fn test_invalid_line_is_skipped_with_diagnostic() {
        let mut app = app();
        app.update(Msg::InvalidLine);
        app.update(line(json!({"type": "result", "is_error": false, "num_turns": 1})));

        assert_eq!(app.diagnostics, 1);
        assert_eq!(app.lines[0].text, NOT_UTF8_DIAGNOSTIC);
        assert_eq!(app.lines[0].style, LineStyle::Diagnostic);
        assert!(!app.input_closed);
        assert_eq!(app.status, AppStatus::Finished);
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app();
        app.update(Msg::Key(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE)));
        assert!(!app.should_quit);
        app.update(Msg::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(app.should_quit);
    }

    #[test]
    fn test_status_pulse() {
        assert_eq!(AppStatus::Streaming.pulsing_color(0), Color::Green);
        assert_eq!(AppStatus::Streaming.pulsing_color(5), Color::Rgb(0, 128, 0));
        assert_eq!(AppStatus::Failed.pulsing_color(5), Color::Red);
        assert_eq!(AppStatus::Streaming.border_type(), BorderType::Double);
        assert_eq!(AppStatus::Finished.border_type(), BorderType::Rounded);
    }
}
