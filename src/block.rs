//! Assembly of the content block currently being streamed.
//!
//! Only one block is tracked at a time. Starting a block overwrites
//! whatever was open before, and stopping a block leaves its buffers in
//! place so the caller can read the finished content right away.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ToolInputError;
use crate::events::ContentBlock;

/// Kind of the tracked content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    None,
    Text,
    ToolUse,
}

/// Tracks accumulated state for the content block being streamed.
#[derive(Debug, Default)]
pub struct BlockState {
    kind: BlockKind,
    /// Index of the open block; `None` when no index is tracked.
    index: Option<usize>,
    /// For tool_use blocks: the tool name.
    tool_name: Option<String>,
    /// For tool_use blocks: the tool-use id.
    tool_id: Option<String>,
    /// For text blocks: accumulated text content.
    text: String,
    /// For tool_use blocks: accumulated JSON input string.
    input_json: String,
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a block at `index` from the raw `content_block` JSON.
    ///
    /// Returns false when the block is missing, undecodable, or of a kind
    /// other than `text`/`tool_use`; the state is then `BlockKind::None`.
    pub fn start_block(&mut self, index: usize, content_block: &Value) -> bool {
        self.index = Some(index);
        self.tool_name = None;
        self.tool_id = None;

        if content_block.is_null() {
            self.kind = BlockKind::None;
            return false;
        }

        match serde_json::from_value::<ContentBlock>(content_block.clone()) {
            Ok(ContentBlock::Text { .. }) => {
                self.kind = BlockKind::Text;
                self.text.clear();
                true
            }
            Ok(ContentBlock::ToolUse(tool)) => {
                self.kind = BlockKind::ToolUse;
                self.tool_name = Some(tool.name);
                self.tool_id = Some(tool.id).filter(|id| !id.is_empty());
                self.input_json.clear();
                true
            }
            Ok(other) => {
                debug!(index, block = ?other, "unhandled_block_kind");
                self.kind = BlockKind::None;
                false
            }
            Err(e) => {
                debug!(index, error = %e, "undecodable_content_block");
                self.kind = BlockKind::None;
                false
            }
        }
    }

    /// Appends a text fragment; false when the open block is not text.
    pub fn accumulate_text(&mut self, delta: &str) -> bool {
        if self.kind != BlockKind::Text {
            return false;
        }
        self.text.push_str(delta);
        true
    }

    /// Appends a tool-input JSON fragment; false when the open block is not a tool.
    pub fn accumulate_tool_input(&mut self, delta: &str) -> bool {
        if self.kind != BlockKind::ToolUse {
            return false;
        }
        self.input_json.push_str(delta);
        true
    }

    /// Closes the block at `index`, returning its kind.
    ///
    /// A stop for any other index is ignored and returns `BlockKind::None`.
    /// Kind and buffers are kept until the next start or `reset`.
    pub fn stop_block(&mut self, index: usize) -> BlockKind {
        if self.index != Some(index) {
            return BlockKind::None;
        }
        self.kind
    }

    /// Clears everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forgets the tracked index but keeps the finished block readable.
    pub fn reset_message(&mut self) {
        self.index = None;
    }

    /// Parses the accumulated tool input as a JSON object.
    pub fn parse_tool_input(&self) -> Result<Map<String, Value>, ToolInputError> {
        if self.input_json.trim().is_empty() {
            return Err(ToolInputError::Empty);
        }
        match serde_json::from_str::<Value>(&self.input_json)? {
            Value::Object(map) => Ok(map),
            _ => Err(ToolInputError::NotObject),
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name.as_deref()
    }

    pub fn tool_id(&self) -> Option<&str> {
        self.tool_id.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn tool_input(&self) -> &str {
        &self.input_json
    }

    /// Whether a tool_use block is being (or was just) streamed live.
    pub fn is_streaming_tool(&self) -> bool {
        self.kind == BlockKind::ToolUse
    }
}
