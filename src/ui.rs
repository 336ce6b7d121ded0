//! UI rendering functions.

use std::time::Duration;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
};
use unicode_width::UnicodeWidthStr;

use crate::app::{App, AppStatus, LineStyle};
use crate::render::{contract_home, truncate_str};

const SIDEBAR_WIDTH: u16 = 34;

/// Formats a duration as M:SS (under 1 hour) or H:MM:SS (1+ hours).
pub fn format_elapsed(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn line_style(style: LineStyle) -> Style {
    match style {
        LineStyle::Plain => Style::default(),
        LineStyle::Session => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        LineStyle::ToolHeader => Style::default().fg(Color::Yellow),
        LineStyle::ToolResult => Style::default().fg(Color::Gray),
        LineStyle::Error => Style::default().fg(Color::Red),
        LineStyle::Orphan => Style::default().fg(Color::Magenta),
        LineStyle::Summary => Style::default().fg(Color::Cyan),
        LineStyle::Diagnostic => Style::default().fg(Color::DarkGray),
    }
}

/// Draw the main UI.
pub fn draw_ui(f: &mut Frame, app: &mut App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Transcript and sidebar
            Constraint::Length(3), // Command panel (border + 1 content row + border)
        ])
        .split(f.area());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(SIDEBAR_WIDTH)])
        .split(rows[0]);

    // Update main pane dimensions for scroll calculations
    app.set_pane_size(columns[0].width, columns[0].height.saturating_sub(2)); // Account for borders
    if app.is_auto_following {
        app.scroll_to_bottom();
    }

    draw_transcript(f, app, columns[0]);
    draw_sidebar(f, app, columns[1]);
    draw_command_panel(f, app, rows[1]);
}

fn draw_transcript(f: &mut Frame, app: &App, area: Rect) {
    let content: Vec<Line> = app
        .lines
        .iter()
        .map(|l| Line::styled(l.text.as_str(), line_style(l.style)))
        .collect();

    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_type(app.status.border_type())
        .border_style(Style::default().fg(app.status.pulsing_color(app.frame_count)))
        .title(Line::from(format!(" {} ", app.source)).left_aligned());
    if !app.is_auto_following {
        block = block.title_bottom(Line::from(" scrolled ").right_aligned());
    }

    let transcript = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll_offset, 0));
    f.render_widget(transcript, area);

    // Scrollbar - only visible when content exceeds viewport
    let visual_lines = app.visual_line_count();
    if visual_lines > app.main_pane_height {
        let scrollbar = Scrollbar::default()
            .orientation(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("▲"))
            .end_symbol(Some("▼"));

        let mut scrollbar_state = ScrollbarState::default()
            .content_length(visual_lines as usize)
            .position(app.scroll_offset as usize)
            .viewport_content_length(app.main_pane_height as usize);

        f.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }
}

fn sidebar_lines(app: &App, width: usize) -> Vec<Line<'static>> {
    let heading = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines = Vec::new();

    if let Some(session) = &app.session {
        if let Some(model) = &session.model {
            lines.push(Line::from(truncate_str(model, width)));
        }
        if let Some(cwd) = &session.cwd {
            lines.push(Line::styled(truncate_str(&contract_home(cwd), width), dim));
        }
        if !session.tools.is_empty() {
            lines.push(Line::styled(format!("{} tools", session.tools.len()), dim));
        }
        lines.push(Line::raw(""));
    }

    let pending = app.pending_tools();
    lines.push(Line::styled(format!("Pending tools ({})", pending.len()), heading));
    for tool in &pending {
        let indent = if tool.nested { "  └ " } else { "• " };
        lines.push(Line::raw(truncate_str(&format!("{}{}", indent, tool.name), width)));
    }
    lines.push(Line::raw(""));

    if !app.tasks.is_empty() {
        lines.push(Line::styled(
            format!("Tasks ({}/{})", app.completed_task_count(), app.tasks.len()),
            heading,
        ));
        for task in &app.tasks {
            let text = format!("{} {}", task.status.marker(), task.label());
            lines.push(Line::raw(truncate_str(&text, width)));
        }
        lines.push(Line::raw(""));
    }

    lines.push(Line::styled(
        format!("{} events · {} skipped", app.events, app.diagnostics),
        dim,
    ));
    if app.input_closed {
        lines.push(Line::styled("input closed", dim));
    }
    lines
}

fn draw_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let width = area.width.saturating_sub(2) as usize;
    let sidebar = Paragraph::new(sidebar_lines(app, width)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Line::from(" Session ").left_aligned()),
    );
    f.render_widget(sidebar, area);
}

fn draw_command_panel(f: &mut Frame, app: &App, area: Rect) {
    let shortcuts = "[j/k] Scroll  [G] Follow  [q] Quit";

    // Status indicator: colored dot + status and elapsed time
    let status_dot = "● ";
    let status_text = match app.elapsed() {
        Some(elapsed) if app.status != AppStatus::Idle => {
            format!("{} {}", app.status.label().to_uppercase(), format_elapsed(elapsed))
        }
        _ => app.status.label().to_uppercase(),
    };
    let status_color = app.status.pulsing_color(app.frame_count);

    // Calculate spacing to right-align the status indicator
    let inner_width = area.width.saturating_sub(2) as usize;
    let used = shortcuts.width() + status_dot.width() + status_text.width();
    let spacing = inner_width.saturating_sub(used);

    let command_line = Line::from(vec![
        Span::styled(shortcuts, Style::default().fg(Color::DarkGray)),
        Span::raw(" ".repeat(spacing)),
        Span::styled(status_dot, Style::default().fg(status_color)),
        Span::styled(status_text, Style::default().fg(status_color)),
    ]);

    let command_panel = Paragraph::new(command_line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(app.status.border_type())
            .border_style(Style::default().fg(status_color)),
    );

    f.render_widget(command_panel, area);
}
