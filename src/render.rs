//! Text formatting collaborators used by the event processor.
//!
//! The processor decides *what* to show; a [`Renderer`] decides how it
//! reads. [`PlainRenderer`] is the built-in plain-text implementation shared
//! by the line-mode output and the dashboard transcript.

use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::DisplayConfig;
use crate::events::{ResultEvent, ToolResultBlock, ToolUseBlock};

/// Maximum length for truncated tool input display.
pub const TOOL_INPUT_MAX_LEN: usize = 60;

/// Maximum number of diff lines shown for a single edit.
const DIFF_MAX_LINES: usize = 20;

const RESULT_PREFIX: &str = "  ⎿ ";
const RESULT_CONTINUATION: &str = "    ";

/// Hint carried from the most recent tool header to later rendering calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub tool_name: Option<String>,
    pub file_path: Option<String>,
}

impl ToolContext {
    /// Language of the file the last tool touched, for labelling code.
    pub fn language(&self) -> Option<&'static str> {
        let path = self.file_path.as_deref()?;
        let ext = path.rsplit_once('.')?.1;
        let lang = match ext {
            "rs" => "rust",
            "go" => "go",
            "py" => "python",
            "ts" | "tsx" => "typescript",
            "js" | "jsx" | "mjs" => "javascript",
            "rb" => "ruby",
            "java" => "java",
            "c" | "h" => "c",
            "cc" | "cpp" | "hpp" => "cpp",
            "sh" | "bash" => "bash",
            "toml" => "toml",
            "json" => "json",
            "yaml" | "yml" => "yaml",
            "md" => "markdown",
            _ => return None,
        };
        Some(lang)
    }
}

/// How a tool's headline argument is pulled out of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRule {
    /// Show one string field.
    Field(&'static str),
    /// Show the length of an array field.
    Count {
        key: &'static str,
        noun: &'static str,
    },
    /// Show nothing but the tool name.
    Nothing,
}

/// Known tools and their headline argument. Anything else shows compact JSON.
pub const TOOL_RULES: &[(&str, ArgRule)] = &[
    ("Bash", ArgRule::Field("command")),
    ("BashOutput", ArgRule::Field("bash_id")),
    ("KillShell", ArgRule::Field("shell_id")),
    ("Read", ArgRule::Field("file_path")),
    ("Write", ArgRule::Field("file_path")),
    ("Edit", ArgRule::Field("file_path")),
    ("MultiEdit", ArgRule::Field("file_path")),
    ("NotebookEdit", ArgRule::Field("notebook_path")),
    ("Grep", ArgRule::Field("pattern")),
    ("Glob", ArgRule::Field("pattern")),
    ("WebFetch", ArgRule::Field("url")),
    ("WebSearch", ArgRule::Field("query")),
    ("Task", ArgRule::Field("description")),
    ("Skill", ArgRule::Field("skill")),
    ("SlashCommand", ArgRule::Field("command")),
    (
        "TodoWrite",
        ArgRule::Count {
            key: "todos",
            noun: "tasks",
        },
    ),
    ("ExitPlanMode", ArgRule::Nothing),
];

pub fn arg_rule(tool_name: &str) -> Option<ArgRule> {
    TOOL_RULES
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, rule)| *rule)
}

/// Formatting collaborator interface.
pub trait Renderer {
    /// Formats a finished assistant text passage.
    fn markdown(&self, text: &str, context: &ToolContext) -> String;

    /// Formats a tool header. `input` is `None` when the input could not be
    /// parsed; the header then shows the bare name.
    fn tool_header(&self, name: &str, input: Option<&Map<String, Value>>) -> (String, ToolContext);

    /// Formats a tool's result; `None` shows nothing.
    fn tool_result(
        &self,
        tool: &ToolUseBlock,
        result: &ToolResultBlock,
        payload: Option<&Value>,
    ) -> Option<String>;

    /// Marker for a tool whose result never arrived.
    fn orphan(&self, tool: &ToolUseBlock) -> String;

    /// Session summary for a `result` event.
    fn summary(&self, result: &ResultEvent) -> String;

    fn thinking(&self, text: &str) -> String {
        let body: Vec<String> = text.lines().map(|l| format!("  {}", l)).collect();
        format!("✻ Thinking\n{}", body.join("\n"))
    }
}

/// Plain-text renderer.
#[derive(Debug, Clone)]
pub struct PlainRenderer {
    pub tool_input_max_len: usize,
    pub result_preview_lines: usize,
}

impl Default for PlainRenderer {
    fn default() -> Self {
        Self {
            tool_input_max_len: TOOL_INPUT_MAX_LEN,
            result_preview_lines: 4,
        }
    }
}

impl PlainRenderer {
    pub fn from_config(display: &DisplayConfig) -> Self {
        Self {
            tool_input_max_len: display.tool_input_max_len,
            result_preview_lines: display.result_preview_lines,
        }
    }

    fn headline(&self, name: &str, input: &Map<String, Value>) -> Option<String> {
        match arg_rule(name) {
            Some(ArgRule::Field(key)) => input
                .get(key)
                .and_then(Value::as_str)
                .map(|s| truncate_str(s, self.tool_input_max_len)),
            Some(ArgRule::Count { key, noun }) => input
                .get(key)
                .and_then(Value::as_array)
                .map(|items| format!("{} {}", items.len(), noun)),
            Some(ArgRule::Nothing) => None,
            None if input.is_empty() => None,
            None => Some(truncate_str(
                &Value::Object(input.clone()).to_string(),
                self.tool_input_max_len,
            )),
        }
    }

    fn preview(&self, text: &str) -> Option<String> {
        let lines: Vec<&str> = text.trim_end().lines().collect();
        if lines.is_empty() {
            return Some(format!("{}(no output)", RESULT_PREFIX));
        }
        let shown = lines.len().min(self.result_preview_lines.max(1));
        let mut out: Vec<String> = lines[..shown]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let prefix = if i == 0 { RESULT_PREFIX } else { RESULT_CONTINUATION };
                format!("{}{}", prefix, truncate_str(line, 100))
            })
            .collect();
        if lines.len() > shown {
            out.push(format!(
                "{}… +{} lines",
                RESULT_CONTINUATION,
                lines.len() - shown
            ));
        }
        Some(out.join("\n"))
    }
}

impl Renderer for PlainRenderer {
    fn markdown(&self, text: &str, context: &ToolContext) -> String {
        label_code_fences(text.trim_end(), context.language())
    }

    fn tool_header(&self, name: &str, input: Option<&Map<String, Value>>) -> (String, ToolContext) {
        let prefix = format!("[Tool: {}]", name);
        let context = ToolContext {
            tool_name: Some(name.to_string()),
            file_path: input.and_then(file_path_of),
        };
        let header = match input.and_then(|input| self.headline(name, input)) {
            Some(summary) => format!("{} {}", prefix, summary),
            None => prefix,
        };
        (header, context)
    }

    fn tool_result(
        &self,
        tool: &ToolUseBlock,
        result: &ToolResultBlock,
        payload: Option<&Value>,
    ) -> Option<String> {
        if result.is_error {
            let text = result.text();
            let first = text.lines().next().unwrap_or("tool failed");
            return Some(format!(
                "{}Error: {}",
                RESULT_PREFIX,
                truncate_str(first, 100)
            ));
        }

        if let Some(payload) = payload.filter(|p| p.is_object()) {
            if let Some(todos) = payload.get("newTodos") {
                return Some(format_todo_block(&parse_todos(todos)));
            }
            if let Some(diff) = format_edit_diff(payload) {
                return Some(diff);
            }
            if let Some(summary) = format_write_summary(payload) {
                return Some(summary);
            }
        }

        if tool.name == "TodoWrite" {
            let todos = tool.input.get("todos").map(parse_todos).unwrap_or_default();
            return (!todos.is_empty()).then(|| format_todo_block(&todos));
        }
        self.preview(&result.text())
    }

    fn orphan(&self, _tool: &ToolUseBlock) -> String {
        format!("{}(no result: session ended)", RESULT_PREFIX)
    }

    fn summary(&self, result: &ResultEvent) -> String {
        format_usage_summary(result)
    }
}

fn file_path_of(input: &Map<String, Value>) -> Option<String> {
    ["file_path", "notebook_path", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

/// Adds `lang` to bare opening code fences.
fn label_code_fences(text: &str, lang: Option<&str>) -> String {
    let Some(lang) = lang else {
        return text.to_string();
    };
    let mut in_fence = false;
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            if !line.trim_start().starts_with("```") {
                return line.to_string();
            }
            let opening = !in_fence;
            in_fence = !in_fence;
            if opening && line.trim() == "```" {
                format!("{}{}", line.trim_end(), lang)
            } else {
                line.to_string()
            }
        })
        .collect();
    lines.join("\n")
}

/// Replaces a leading home directory with `~`.
pub fn contract_home(path: &str) -> String {
    if let Some(home) = dirs::home_dir()
        && let Some(home) = home.to_str()
        && !home.is_empty()
        && let Some(rest) = path.strip_prefix(home)
        && (rest.is_empty() || rest.starts_with('/'))
    {
        return format!("~{}", rest);
    }
    path.to_string()
}

/// Indents a block of text one nesting level.
pub fn indent_nested(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncates to `max_width` display columns, appending "..." if truncated.
pub fn truncate_str(s: &str, max_width: usize) -> String {
    // Replace newlines with spaces for single-line display
    let single_line: String = s.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();

    if single_line.width() <= max_width {
        return single_line;
    }

    let budget = max_width.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for ch in single_line.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push_str("...");
    out
}

/// Formats a number with thousands separators (e.g., 7371 -> "7,371").
pub fn format_with_thousands(n: u64) -> String {
    let s = n.to_string();
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::new();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(*c);
    }
    result
}

fn format_edit_diff(payload: &Value) -> Option<String> {
    let old = payload.get("oldString").and_then(Value::as_str)?;
    let new = payload.get("newString").and_then(Value::as_str)?;
    let path = payload
        .get("filePath")
        .and_then(Value::as_str)
        .unwrap_or("file");

    let diff = TextDiff::from_lines(old, new);
    let mut added = 0;
    let mut removed = 0;
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => {
                removed += 1;
                "-"
            }
            ChangeTag::Insert => {
                added += 1;
                "+"
            }
            ChangeTag::Equal => continue,
        };
        if lines.len() < DIFF_MAX_LINES {
            lines.push(format!(
                "{}{} {}",
                RESULT_CONTINUATION,
                sign,
                change.value().trim_end_matches('\n')
            ));
        }
    }

    let mut out = vec![format!(
        "{}Updated {} with {} {} and {} {}",
        RESULT_PREFIX,
        path,
        added,
        if added == 1 { "addition" } else { "additions" },
        removed,
        if removed == 1 { "removal" } else { "removals" },
    )];
    out.extend(lines);
    Some(out.join("\n"))
}

fn format_write_summary(payload: &Value) -> Option<String> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    let path = payload.get("filePath").and_then(Value::as_str)?;
    let lines = payload
        .get("content")
        .and_then(Value::as_str)
        .map(|c| c.lines().count())
        .unwrap_or(0);
    match kind {
        "create" => Some(format!("{}Wrote {} lines to {}", RESULT_PREFIX, lines, path)),
        "update" => Some(format!("{}Updated {} ({} lines)", RESULT_PREFIX, path, lines)),
        _ => None,
    }
}

/// Represents a single todo item parsed from TodoWrite input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    pub content: String,
    pub active_form: String,
    pub status: TodoStatus,
}

/// Status of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Unknown,
}

impl TodoStatus {
    pub fn marker(self) -> &'static str {
        match self {
            TodoStatus::InProgress => "▶",
            TodoStatus::Pending => "○",
            TodoStatus::Completed => "✓",
            TodoStatus::Unknown => "?",
        }
    }
}

impl TodoItem {
    /// Text shown for the item: the active form while in progress.
    pub fn label(&self) -> &str {
        match self.status {
            TodoStatus::InProgress => &self.active_form,
            _ => &self.content,
        }
    }
}

/// Parses a `todos` / `newTodos` array. Anything else yields no items.
pub fn parse_todos(value: &Value) -> Vec<TodoItem> {
    value
        .as_array()
        .map(|items| items.iter().map(parse_todo_item).collect())
        .unwrap_or_default()
}

fn parse_todo_item(todo: &Value) -> TodoItem {
    let content = todo
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let active_form = todo
        .get("activeForm")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| content.clone());

    let status = match todo.get("status").and_then(|v| v.as_str()) {
        Some("pending") => TodoStatus::Pending,
        Some("in_progress") => TodoStatus::InProgress,
        Some("completed") => TodoStatus::Completed,
        _ => TodoStatus::Unknown,
    };

    // If content is empty but activeForm exists, use activeForm for content
    let content = if content.is_empty() && !active_form.is_empty() {
        active_form.clone()
    } else {
        content
    };

    TodoItem {
        content,
        active_form,
        status,
    }
}

/// Formats a todo list as a task block with status markers.
pub fn format_todo_block(todos: &[TodoItem]) -> String {
    let mut lines = vec!["━━━ Tasks ━━━━━━━━━━━━━━━━━━━━━".to_string()];
    for item in todos {
        lines.push(format!("{} {}", item.status.marker(), item.label()));
    }
    lines.push("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".to_string());
    lines.join("\n")
}

/// Formats the session summary from a Result event.
///
/// Example:
/// ```text
/// ───────────────────────────────────
/// Result: success | Turns: 4
/// Cost: $0.05 | Duration: 2.3s | Tokens: 7,371 in / 892 out
/// ───────────────────────────────────
/// ```
pub fn format_usage_summary(result: &ResultEvent) -> String {
    let separator = "─".repeat(35);

    let outcome = if result.is_error { "error" } else { "success" };
    let mut headline = vec![format!("Result: {}", outcome)];
    if let Some(turns) = result.num_turns {
        headline.push(format!("Turns: {}", turns));
    }

    let mut metrics = Vec::new();
    if let Some(cost) = result.total_cost_usd {
        metrics.push(format!("Cost: ${:.2}", cost));
    }
    if let Some(duration_ms) = result.duration_ms {
        let seconds = duration_ms as f64 / 1000.0;
        metrics.push(format!("Duration: {:.1}s", seconds));
    }
    if let Some(usage) = &result.usage {
        let input = usage
            .input_tokens
            .map(format_with_thousands)
            .unwrap_or_else(|| "?".to_string());
        let output = usage
            .output_tokens
            .map(format_with_thousands)
            .unwrap_or_else(|| "?".to_string());
        metrics.push(format!("Tokens: {} in / {} out", input, output));
    }

    let mut lines = vec![separator.clone(), headline.join(" | ")];
    if !metrics.is_empty() {
        lines.push(metrics.join(" | "));
    }
    if result.is_error
        && let Some(Value::String(message)) = &result.result
    {
        lines.push(truncate_str(message, 100));
    }
    lines.push(separator);
    lines.join("\n")
}
