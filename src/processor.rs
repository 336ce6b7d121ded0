//! Per-event orchestration of the block assembler and the tool tracker.
//!
//! [`EventProcessor::process`] takes one classified event and hands zero or
//! more [`Rendered`] items to the caller's sink. The processor owns all
//! decoding state for a session; nothing downstream mutates it.

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};

use crate::block::{BlockKind, BlockState};
use crate::events::{
    AssistantEvent, ContentBlock, Event, ResultEvent, StreamEvent, StreamSubEvent, SystemEvent,
    ToolUseBlock, UserEvent, input_json_delta, text_delta,
};
use crate::render::{PlainRenderer, Renderer, TodoItem, ToolContext, parse_todos, truncate_str};
use crate::tracker::{EarlyHeader, ToolTracker};

/// Session metadata from the `system` init event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub tools: Vec<String>,
    pub agents: Vec<String>,
}

impl From<SystemEvent> for SessionInfo {
    fn from(sys: SystemEvent) -> Self {
        Self {
            model: sys.model,
            cwd: sys.cwd,
            tools: sys.tools,
            agents: sys.agents.unwrap_or_default(),
        }
    }
}

/// A render-ready item produced by the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    SessionStart(SessionInfo),
    Text { text: String, nested: bool },
    ToolHeader { text: String, nested: bool },
    ToolResult { text: String, nested: bool, is_error: bool },
    Orphan { text: String, nested: bool },
    /// Latest task list from a TodoWrite call.
    Todos(Vec<TodoItem>),
    Summary { text: String, is_error: bool },
    /// Streaming indicator: `true` shows it, `false` clears it.
    Streaming(bool),
    Diagnostic(String),
}

/// Diagnostic for an input line that is not valid UTF-8.
pub const NOT_UTF8_DIAGNOSTIC: &str = "[skipped line: not UTF-8]";

/// Decoding state for one session.
pub struct EventProcessor<R: Renderer = PlainRenderer> {
    block: BlockState,
    tracker: ToolTracker,
    renderer: R,
    /// Context from the last tool header, passed to later rendering calls.
    context: ToolContext,
    /// A content block was streamed in this session, so complete assistant
    /// messages repeat text that was already shown.
    streamed: bool,
    show_thinking: bool,
}

impl<R: Renderer> EventProcessor<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            block: BlockState::new(),
            tracker: ToolTracker::new(),
            renderer,
            context: ToolContext::default(),
            streamed: false,
            show_thinking: false,
        }
    }

    pub fn with_thinking(mut self, show_thinking: bool) -> Self {
        self.show_thinking = show_thinking;
        self
    }

    pub fn tracker(&self) -> &ToolTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn block(&self) -> &BlockState {
        &self.block
    }

    #[cfg(test)]
    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Processes one event. Only an error returned by `emit` is propagated.
    pub fn process<F>(&mut self, event: Event, mut emit: F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        match event {
            Event::System(sys) => {
                debug!(subtype = ?sys.subtype, model = ?sys.model, "system_event");
                emit(Rendered::SessionStart(sys.into()))
            }
            Event::Stream(stream) => self.process_stream(stream, &mut emit),
            Event::Assistant(asst) => self.process_assistant(&asst, &mut emit),
            Event::User(user) => self.process_user(&user, &mut emit),
            Event::Result(result) => self.process_result(&result, &mut emit),
            Event::ParseError { line, error } => {
                warn!(
                    kind = error.label(),
                    error = %error,
                    line = %truncate_str(&line, 200),
                    "line_skipped"
                );
                emit(Rendered::Diagnostic(format!("[skipped line: {}]", error)))
            }
        }
    }

    fn process_stream<F>(&mut self, stream: StreamEvent, emit: &mut F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        let parent = stream.parent_id().map(str::to_owned);
        match stream.event {
            StreamSubEvent::MessageStart(_) => trace!("message_start"),
            StreamSubEvent::MessageDelta(delta) => {
                trace!(stop_reason = ?delta.delta.and_then(|d| d.stop_reason), "message_delta");
            }
            StreamSubEvent::Other => trace!("stream_event_ignored"),
            StreamSubEvent::ContentBlockStart(start) => {
                self.streamed = true;
                if !self.block.start_block(start.index, &start.content_block) {
                    debug!(index = start.index, "content_block_ignored");
                    return Ok(());
                }
                if self.block.kind() == BlockKind::Text {
                    emit(Rendered::Streaming(true))?;
                }
            }
            StreamSubEvent::ContentBlockDelta(delta) => {
                if self.block.index() != Some(delta.index) {
                    debug!(index = delta.index, tracked = ?self.block.index(), "delta_index_mismatch");
                    return Ok(());
                }
                let applied = if let Some(text) = text_delta(&delta.delta) {
                    self.block.accumulate_text(text)
                } else if let Some(partial) = input_json_delta(&delta.delta) {
                    self.block.accumulate_tool_input(partial)
                } else {
                    false
                };
                if !applied {
                    trace!(index = delta.index, "delta_ignored");
                }
            }
            StreamSubEvent::ContentBlockStop(stop) => {
                let nested = self.parent_pending(parent.as_deref());
                match self.block.stop_block(stop.index) {
                    BlockKind::None => debug!(index = stop.index, "stop_without_open_block"),
                    BlockKind::Text => {
                        emit(Rendered::Streaming(false))?;
                        let text = self.block.text();
                        if !text.trim().is_empty() {
                            let text = self.renderer.markdown(text, &self.context);
                            emit(Rendered::Text { text, nested })?;
                        }
                    }
                    BlockKind::ToolUse => self.finish_live_tool(parent, nested, emit)?,
                }
            }
            StreamSubEvent::MessageStop => {
                trace!("message_stop");
                self.block.reset_message();
            }
        }
        Ok(())
    }

    /// Renders the header of a tool that just finished streaming and
    /// registers it so its result can be paired later.
    fn finish_live_tool<F>(&mut self, parent: Option<String>, nested: bool, emit: &mut F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        let name = self.block.tool_name().unwrap_or_default().to_string();
        let input = match self.block.parse_tool_input() {
            Ok(input) => Some(input),
            Err(e) => {
                debug!(tool = %name, error = %e, "tool_input_unparsed");
                None
            }
        };
        self.emit_header(&name, input.as_ref(), nested, emit)?;

        if let Some(id) = self.block.tool_id().map(str::to_owned) {
            let block = ToolUseBlock {
                id: id.clone(),
                name,
                input: input.map(Value::Object).unwrap_or_default(),
            };
            self.tracker.add(id.clone(), block, parent);
            self.tracker.mark_header_rendered(&id);
        }
        Ok(())
    }

    fn process_assistant<F>(&mut self, event: &AssistantEvent, emit: &mut F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        let parent = event.parent_id();
        let nested = self.parent_pending(parent);
        // sub-agent messages are never streamed
        let render_text = !self.streamed || parent.is_some();

        for block in event.message.content.blocks() {
            match block {
                ContentBlock::Text { text } if render_text && !text.trim().is_empty() => {
                    let text = self.renderer.markdown(text, &self.context);
                    emit(Rendered::Text { text, nested })?;
                }
                ContentBlock::Thinking { thinking }
                    if self.show_thinking && !thinking.trim().is_empty() =>
                {
                    let text = self.renderer.thinking(thinking);
                    emit(Rendered::Text { text, nested })?;
                }
                _ => {}
            }
        }

        let added = self
            .tracker
            .buffer_from_assistant_message(event, self.block.is_streaming_tool());
        trace!(added, pending = self.tracker.len(), "assistant_tools_buffered");

        self.block.reset();
        Ok(())
    }

    fn process_user<F>(&mut self, event: &UserEvent, emit: &mut F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        let result_count = event
            .message
            .content
            .blocks()
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolResult(_)))
            .count();
        // the structured payload only identifies a tool when it is alone
        let payload = event.tool_use_result.as_ref().filter(|_| result_count == 1);

        for tool in self.tracker.match_from_user_message(event) {
            if let Some(parent) = tool.parent_id.as_deref()
                && let EarlyHeader::Render { block, nested } =
                    self.tracker.resolve_parent_early(parent)
            {
                self.emit_header(&block.name, block.input.as_object(), nested, emit)?;
            }

            if !tool.header_rendered {
                self.emit_header(&tool.block.name, tool.block.input.as_object(), tool.nested, emit)?;
            }

            let Some(result) = event.tool_result(&tool.id) else {
                continue;
            };
            trace!(tool_id = %tool.id, tool = %tool.block.name, is_error = result.is_error, "tool_result_matched");

            if tool.block.name == "TodoWrite"
                && let Some(todos) = payload.and_then(|p| p.get("newTodos"))
            {
                emit(Rendered::Todos(parse_todos(todos)))?;
            }
            if let Some(text) = self.renderer.tool_result(&tool.block, result, payload) {
                emit(Rendered::ToolResult {
                    text,
                    nested: tool.nested,
                    is_error: result.is_error,
                })?;
            }
        }
        Ok(())
    }

    fn process_result<F>(&mut self, result: &ResultEvent, emit: &mut F) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        if self.block.kind() == BlockKind::Text && self.block.index().is_some() {
            emit(Rendered::Streaming(false))?;
        }

        for orphan in self.tracker.flush_all() {
            warn!(tool_id = %orphan.id, tool = %orphan.block.name, nested = orphan.nested, "tool_orphaned");
            if !orphan.header_rendered {
                self.emit_header(
                    &orphan.block.name,
                    orphan.block.input.as_object(),
                    orphan.nested,
                    emit,
                )?;
            }
            emit(Rendered::Orphan {
                text: self.renderer.orphan(&orphan.block),
                nested: orphan.nested,
            })?;
        }

        info!(
            is_error = result.is_error,
            turns = ?result.num_turns,
            duration_ms = ?result.duration_ms,
            cost_usd = ?result.total_cost_usd,
            "session_result"
        );
        emit(Rendered::Summary {
            text: self.renderer.summary(result),
            is_error: result.is_error,
        })?;

        self.block.reset();
        self.streamed = false;
        self.context = ToolContext::default();
        Ok(())
    }

    fn emit_header<F>(
        &mut self,
        name: &str,
        input: Option<&Map<String, Value>>,
        nested: bool,
        emit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(Rendered) -> Result<()>,
    {
        let (text, context) = self.renderer.tool_header(name, input);
        self.context = context;
        emit(Rendered::ToolHeader { text, nested })?;

        if name == "TodoWrite"
            && let Some(todos) = input.and_then(|i| i.get("todos"))
        {
            emit(Rendered::Todos(parse_todos(todos)))?;
        }
        Ok(())
    }

    fn parent_pending(&self, parent: Option<&str>) -> bool {
        parent.is_some_and(|p| self.tracker.contains(p))
    }
}

impl Default for EventProcessor<PlainRenderer> {
    fn default() -> Self {
        Self::new(PlainRenderer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::classify;
    use serde_json::json;

    fn feed(processor: &mut EventProcessor, lines: &[Value]) -> Vec<Rendered> {
        let mut out = Vec::new();
        for line in lines {
            let event = classify(&line.to_string()).expect("non-blank line");
            processor
                .process(event, |item| {
                    out.push(item);
                    Ok(())
                })
                .unwrap();
        }
        out
    }

    fn stream(event: Value) -> Value {
        json!({"type": "stream_event", "event": event})
    }

    fn headers(out: &[Rendered]) -> Vec<(String, bool)> {
        out.iter()
            .filter_map(|r| match r {
                Rendered::ToolHeader { text, nested } => Some((text.clone(), *nested)),
                _ => None,
            })
            .collect()
    }

    fn streamed_tool(index: usize, id: &str, name: &str, fragments: &[&str]) -> Vec<Value> {
        let mut lines = vec![stream(json!({
            "type": "content_block_start", "index": index,
            "content_block": {"type": "tool_use", "id": id, "name": name}
        }))];
        for fragment in fragments {
            lines.push(stream(json!({
                "type": "content_block_delta", "index": index,
                "delta": {"type": "input_json_delta", "partial_json": fragment}
            })));
        }
        lines.push(stream(json!({"type": "content_block_stop", "index": index})));
        lines
    }

    #[test]
    fn test_plain_text_block() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[
                stream(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}})),
                stream(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello "}})),
                stream(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "World!"}})),
                stream(json!({"type": "content_block_stop", "index": 0})),
            ],
        );
        assert_eq!(
            out,
            vec![
                Rendered::Streaming(true),
                Rendered::Streaming(false),
                Rendered::Text {
                    text: "Hello World!".to_string(),
                    nested: false
                },
            ]
        );
        assert_eq!(processor.block().text(), "Hello World!");
    }

    #[test]
    fn test_tool_invocation_with_late_result() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &streamed_tool(0, "t1", "Bash", &["{\"command\":", "\"ls -la\"}"]),
        );
        assert_eq!(headers(&out), vec![("[Tool: Bash] ls -la".to_string(), false)]);
        assert_eq!(
            Value::Object(processor.block().parse_tool_input().unwrap()),
            json!({"command": "ls -la"})
        );
        assert!(processor.tracker().contains("t1"));

        let out = feed(
            &mut processor,
            &[json!({
                "type": "user",
                "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "total 0"}]}
            })],
        );
        assert!(headers(&out).is_empty());
        assert_eq!(
            out,
            vec![Rendered::ToolResult {
                text: "  ⎿ total 0".to_string(),
                nested: false,
                is_error: false
            }]
        );
        assert!(!processor.tracker().contains("t1"));
    }

    #[test]
    fn test_live_tool_is_not_rendered_twice() {
        let mut processor = EventProcessor::default();
        let mut lines = streamed_tool(1, "t1", "Read", &["{\"file_path\":\"/a.rs\"}"]);
        lines.push(json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "/a.rs"}}
            ]}
        }));
        lines.push(stream(json!({"type": "message_stop"})));
        lines.push(json!({
            "type": "user",
            "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "fn main() {}"}]}
        }));
        let out = feed(&mut processor, &lines);

        assert_eq!(headers(&out).len(), 1);
        assert!(out.iter().any(|r| matches!(r, Rendered::ToolResult { .. })));
        assert!(processor.tracker().is_empty());
        assert_eq!(processor.block().kind(), BlockKind::None);
    }

    #[test]
    fn test_unparsable_tool_input_falls_back_to_name() {
        let mut processor = EventProcessor::default();
        let out = feed(&mut processor, &streamed_tool(0, "t1", "Bash", &["{\"command\": \"ls"]));
        assert_eq!(headers(&out), vec![("[Tool: Bash]".to_string(), false)]);
        assert!(processor.tracker().contains("t1"));
    }

    #[test]
    fn test_orphaned_nested_tool() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[
                json!({"type": "assistant", "message": {"content": [
                    {"type": "tool_use", "id": "task_1", "name": "Task", "input": {"description": "Explore"}}
                ]}}),
                json!({"type": "assistant", "parent_tool_use_id": "task_1", "message": {"content": [
                    {"type": "tool_use", "id": "read_1", "name": "Read", "input": {"file_path": "/x.go"}}
                ]}}),
                json!({"type": "result", "is_error": true, "duration_ms": 1000, "num_turns": 2}),
            ],
        );
        assert_eq!(
            out[..4],
            [
                Rendered::ToolHeader {
                    text: "[Tool: Task] Explore".to_string(),
                    nested: false
                },
                Rendered::Orphan {
                    text: "  ⎿ (no result: session ended)".to_string(),
                    nested: false
                },
                Rendered::ToolHeader {
                    text: "[Tool: Read] /x.go".to_string(),
                    nested: true
                },
                Rendered::Orphan {
                    text: "  ⎿ (no result: session ended)".to_string(),
                    nested: true
                },
            ]
        );
        assert!(matches!(out[4], Rendered::Summary { is_error: true, .. }));
        assert!(processor.tracker().is_empty());
    }

    #[test]
    fn test_parent_header_resolved_early_once() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[
                json!({"type": "assistant", "message": {"content": [
                    {"type": "tool_use", "id": "P", "name": "Task", "input": {"description": "Search"}}
                ]}}),
                json!({"type": "assistant", "parent_tool_use_id": "P", "message": {"content": [
                    {"type": "tool_use", "id": "C1", "name": "Grep", "input": {"pattern": "todo"}},
                    {"type": "tool_use", "id": "C2", "name": "Glob", "input": {"pattern": "*.rs"}}
                ]}}),
                json!({"type": "user", "parent_tool_use_id": "P", "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "C1", "content": "none"}
                ]}}),
                json!({"type": "user", "parent_tool_use_id": "P", "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "C2", "content": "a.rs"}
                ]}}),
                json!({"type": "user", "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "P", "content": "done"}
                ]}}),
            ],
        );
        assert_eq!(
            headers(&out),
            vec![
                ("[Tool: Task] Search".to_string(), false),
                ("[Tool: Grep] todo".to_string(), true),
                ("[Tool: Glob] *.rs".to_string(), true),
            ]
        );
        let results: Vec<bool> = out
            .iter()
            .filter_map(|r| match r {
                Rendered::ToolResult { nested, .. } => Some(*nested),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![true, true, false]);
        assert!(processor.tracker().is_empty());
    }

    #[test]
    fn test_unstreamed_assistant_text_is_rendered() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "All done."}
            ]}})],
        );
        assert_eq!(
            out,
            vec![Rendered::Text {
                text: "All done.".to_string(),
                nested: false
            }]
        );
    }

    #[test]
    fn test_streamed_text_not_repeated_by_assistant_message() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[
                stream(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}})),
                stream(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Once"}})),
                stream(json!({"type": "content_block_stop", "index": 0})),
                json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "Once"}]}}),
            ],
        );
        let texts = out
            .iter()
            .filter(|r| matches!(r, Rendered::Text { .. }))
            .count();
        assert_eq!(texts, 1);
    }

    #[test]
    fn test_delta_for_other_index_is_ignored() {
        let mut processor = EventProcessor::default();
        feed(
            &mut processor,
            &[
                stream(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}})),
                stream(json!({"type": "content_block_delta", "index": 5, "delta": {"type": "text_delta", "text": "stray"}})),
                stream(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "mystery"}})),
                stream(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "kept"}})),
            ],
        );
        assert_eq!(processor.block().text(), "kept");
    }

    #[test]
    fn test_todo_write_emits_task_list() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &streamed_tool(
                0,
                "t1",
                "TodoWrite",
                &["{\"todos\":[{\"content\":\"Fix\",\"activeForm\":\"Fixing\",\"status\":\"in_progress\"}]}"],
            ),
        );
        let todos = out.iter().find_map(|r| match r {
            Rendered::Todos(items) => Some(items.clone()),
            _ => None,
        });
        let todos = todos.expect("todo list emitted");
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].label(), "Fixing");
    }

    #[test]
    fn test_parse_error_becomes_diagnostic() {
        let mut processor = EventProcessor::default();
        let mut out = Vec::new();
        let event = classify(r#"{"type":"heartbeat"}"#).unwrap();
        processor
            .process(event, |item| {
                out.push(item);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            out,
            vec![Rendered::Diagnostic(
                "[skipped line: unknown event type \"heartbeat\"]".to_string()
            )]
        );
    }

    #[test]
    fn test_sink_error_propagates() {
        let mut processor = EventProcessor::default();
        let event = classify(r#"{"type":"system","model":"m"}"#).unwrap();
        let result = processor.process(event, |_| Err(anyhow::anyhow!("broken pipe")));
        assert_eq!(result.unwrap_err().to_string(), "broken pipe");
    }

    #[test]
    fn test_session_start_info() {
        let mut processor = EventProcessor::default();
        let out = feed(
            &mut processor,
            &[json!({"type": "system", "subtype": "init", "model": "opus", "cwd": "/w", "tools": ["Bash"]})],
        );
        assert_eq!(
            out,
            vec![Rendered::SessionStart(SessionInfo {
                model: Some("opus".to_string()),
                cwd: Some("/w".to_string()),
                tools: vec!["Bash".to_string()],
                agents: vec![],
            })]
        );
    }

    #[test]
    fn test_thinking_shown_only_when_enabled() {
        let line = json!({"type": "assistant", "message": {"content": [
            {"type": "thinking", "thinking": "hmm"}
        ]}});

        let mut hidden = EventProcessor::default();
        assert!(feed(&mut hidden, &[line.clone()]).is_empty());

        let mut shown = EventProcessor::default().with_thinking(true);
        let out = feed(&mut shown, &[line]);
        assert_eq!(
            out,
            vec![Rendered::Text {
                text: "✻ Thinking\n  hmm".to_string(),
                nested: false
            }]
        );
    }

    #[test]
    fn test_context_threads_from_header_to_markdown() {
        let mut processor = EventProcessor::default();
        let mut lines = streamed_tool(0, "t1", "Read", &["{\"file_path\":\"/src/app.py\"}"]);
        lines.push(json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "t1", "name": "Read", "input": {}}
        ]}}));
        let out = feed(&mut processor, &lines);
        assert_eq!(headers(&out).len(), 1);
        assert_eq!(processor.context().language(), Some("python"));

        // sub-agent text after a Read picks up the file's language
        let mut fresh = EventProcessor::default();
        feed(&mut fresh, &lines[..3]);
        let out = feed(
            &mut fresh,
            &[json!({"type": "assistant", "parent_tool_use_id": "x", "message": {"content": [
                {"type": "text", "text": "```\nprint(1)\n```"}
            ]}})],
        );
        assert_eq!(
            out,
            vec![Rendered::Text {
                text: "```python\nprint(1)\n```".to_string(),
                nested: false
            }]
        );
    }
}
