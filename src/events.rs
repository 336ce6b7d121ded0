//! Agent CLI NDJSON event types and the line classifier.
//!
//! The agent CLI outputs newline-delimited JSON with five top-level event
//! kinds. `classify` turns one line into one typed [`Event`], or into an
//! [`Event::ParseError`] that carries the original line so the caller can
//! log it.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClassifyError;

/// One classified NDJSON line.
#[derive(Debug)]
pub enum Event {
    System(SystemEvent),
    Assistant(AssistantEvent),
    User(UserEvent),
    Stream(StreamEvent),
    Result(ResultEvent),
    ParseError { line: String, error: ClassifyError },
}

impl Event {
    /// Wire name of the event kind, `parse_error` for unclassifiable lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::System(_) => "system",
            Event::Assistant(_) => "assistant",
            Event::User(_) => "user",
            Event::Stream(_) => "stream_event",
            Event::Result(_) => "result",
            Event::ParseError { .. } => "parse_error",
        }
    }
}

/// Classifies a single NDJSON line.
///
/// Blank lines produce no event. Every other line produces exactly one
/// event; lines that cannot be decoded become `Event::ParseError`.
pub fn classify(line: &str) -> Option<Event> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => return Some(parse_error(line, ClassifyError::MalformedJson(e))),
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_owned(),
        None => return Some(parse_error(line, ClassifyError::MissingType)),
    };

    let event = match kind.as_str() {
        "system" => decode(value, "system").map(Event::System),
        "assistant" => decode(value, "assistant").map(Event::Assistant),
        "user" => decode(value, "user").map(Event::User),
        "stream_event" => decode(value, "stream_event").map(Event::Stream),
        "result" => decode(value, "result").map(Event::Result),
        _ => Err(ClassifyError::UnknownType(kind)),
    };

    Some(event.unwrap_or_else(|error| parse_error(line, error)))
}

fn decode<T: DeserializeOwned>(value: Value, kind: &'static str) -> Result<T, ClassifyError> {
    serde_json::from_value(value).map_err(|e| ClassifyError::InvalidPayload {
        kind,
        message: e.to_string(),
    })
}

fn parse_error(line: &str, error: ClassifyError) -> Event {
    Event::ParseError {
        line: line.to_string(),
        error,
    }
}

/// System initialization event.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemEvent {
    pub subtype: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub tools: Vec<String>,
    pub agents: Option<Vec<String>>,
    pub session_id: Option<String>,
}

/// A complete assistant message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantEvent {
    pub message: Message,
    pub parent_tool_use_id: Option<String>,
}

impl AssistantEvent {
    /// Id of the tool invocation whose sub-agent produced this message.
    pub fn parent_id(&self) -> Option<&str> {
        parent_id(&self.parent_tool_use_id, &self.message)
    }
}

/// A user turn; for an agent stream this carries tool results.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserEvent {
    pub message: Message,
    /// Structured result payload (edit patch, write summary, todo list).
    pub tool_use_result: Option<Value>,
    pub parent_tool_use_id: Option<String>,
}

impl UserEvent {
    pub fn parent_id(&self) -> Option<&str> {
        parent_id(&self.parent_tool_use_id, &self.message)
    }

    /// The `tool_result` block answering `tool_use_id`, if this message has one.
    pub fn tool_result(&self, tool_use_id: &str) -> Option<&ToolResultBlock> {
        self.message.content.blocks().iter().find_map(|block| match block {
            ContentBlock::ToolResult(result) if result.tool_use_id == tool_use_id => Some(result),
            _ => None,
        })
    }
}

fn parent_id<'a>(envelope: &'a Option<String>, message: &'a Message) -> Option<&'a str> {
    envelope
        .as_deref()
        .or(message.parent_tool_use_id.as_deref())
        .filter(|id| !id.is_empty())
}

/// Message body shared by assistant and user events.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: Option<String>,
    pub role: Option<String>,
    pub model: Option<String>,
    pub content: MessageContent,
    #[serde(alias = "parentToolUseID")]
    pub parent_tool_use_id: Option<String>,
}

/// Message content: a block list, or a bare string for replayed prompts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
    #[default]
    Empty,
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) | MessageContent::Empty => &[],
        }
    }
}

/// Content block types.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultBlock),
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

/// A tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolUseBlock {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// The result of a previous tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Plain text of the result: a string, or the `text` parts of a block list.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Streaming update wrapper.
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    pub event: StreamSubEvent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

impl StreamEvent {
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_tool_use_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Inner streaming events wrapped by stream_event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamSubEvent {
    #[serde(rename = "message_start")]
    MessageStart(MessageStartEvent),
    #[serde(rename = "content_block_start")]
    ContentBlockStart(ContentBlockStartEvent),
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta(ContentBlockDeltaEvent),
    #[serde(rename = "content_block_stop")]
    ContentBlockStop(ContentBlockStopEvent),
    #[serde(rename = "message_delta")]
    MessageDelta(MessageDeltaEvent),
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageStartEvent {
    pub message: Option<Value>,
}

/// Content block start event. The block stays raw JSON so the block
/// assembler can decide how to treat unknown or empty blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartEvent {
    pub index: usize,
    #[serde(default)]
    pub content_block: Value,
}

/// Content block delta event. The delta shape is tried by the processor.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaEvent {
    pub index: usize,
    #[serde(default)]
    pub delta: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStopEvent {
    pub index: usize,
}

/// Message delta event (typically contains stop reason and usage).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageDeltaEvent {
    pub delta: Option<MessageDeltaInfo>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageDeltaInfo {
    pub stop_reason: Option<String>,
}

/// Result event that ends a session.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultEvent {
    pub subtype: Option<String>,
    pub is_error: bool,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub result: Option<Value>,
    pub usage: Option<UsageInfo>,
    pub session_id: Option<String>,
}

/// Token usage information.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UsageInfo {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
}

/// Text of a `{"type":"text_delta","text":...}` delta.
pub fn text_delta(delta: &Value) -> Option<&str> {
    delta_field(delta, "text_delta", "text")
}

/// Fragment of a `{"type":"input_json_delta","partial_json":...}` delta.
pub fn input_json_delta(delta: &Value) -> Option<&str> {
    delta_field(delta, "input_json_delta", "partial_json")
}

fn delta_field<'a>(delta: &'a Value, kind: &str, field: &str) -> Option<&'a str> {
    if delta.get("type").and_then(Value::as_str) != Some(kind) {
        return None;
    }
    delta.get(field).and_then(Value::as_str)
}
