//! Pairing of tool invocations with their results.
//!
//! A tool invocation is pending from the moment it is seen until a
//! `tool_result` naming its id arrives, or until the session ends and it is
//! flushed as an orphan. Nesting is dynamic: a tool is nested only while its
//! parent is itself still pending.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::events::{AssistantEvent, ContentBlock, ToolUseBlock, UserEvent};

/// A tool invocation awaiting its result.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTool {
    pub block: ToolUseBlock,
    pub parent_id: Option<String>,
    seq: u64,
}

/// A pending tool that was just paired with its result.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTool {
    pub id: String,
    pub block: ToolUseBlock,
    pub parent_id: Option<String>,
    /// Parent was still pending at removal time.
    pub nested: bool,
    /// The header was already rendered (live stream or early parent header).
    pub header_rendered: bool,
}

/// A tool whose result never arrived before the session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanedTool {
    pub id: String,
    pub block: ToolUseBlock,
    pub parent_id: Option<String>,
    pub nested: bool,
    pub header_rendered: bool,
}

/// Outcome of asking for a parent header ahead of the parent's own result.
#[derive(Debug, Clone, PartialEq)]
pub enum EarlyHeader {
    Render { block: ToolUseBlock, nested: bool },
    AlreadyRendered,
    NotPending,
}

/// Pending-tool registry for one session.
#[derive(Debug, Default)]
pub struct ToolTracker {
    pending: HashMap<String, PendingTool>,
    header_rendered: HashSet<String>,
    next_seq: u64,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending invocation. A reused id overwrites the entry but
    /// keeps its position and header mark.
    pub fn add(&mut self, id: impl Into<String>, block: ToolUseBlock, parent_id: Option<String>) {
        let id = id.into();
        let seq = match self.pending.get(&id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        trace!(tool_id = %id, tool = %block.name, parent = ?parent_id, "tool_pending");
        self.pending.insert(
            id,
            PendingTool {
                block,
                parent_id,
                seq,
            },
        );
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&PendingTool> {
        self.pending.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending tools in the order they were first seen.
    pub fn pending(&self) -> Vec<&PendingTool> {
        let mut tools: Vec<&PendingTool> = self.pending.values().collect();
        tools.sort_by_key(|tool| tool.seq);
        tools
    }

    /// True iff the tool has a parent and that parent is still pending.
    pub fn is_nested(&self, tool: &PendingTool) -> bool {
        tool.parent_id
            .as_deref()
            .is_some_and(|parent| self.pending.contains_key(parent))
    }

    /// Removes a pending tool without pairing it with a result.
    #[cfg(test)]
    pub fn remove(&mut self, id: &str) -> Option<PendingTool> {
        self.header_rendered.remove(id);
        self.pending.remove(id)
    }

    pub fn mark_header_rendered(&mut self, id: &str) {
        self.header_rendered.insert(id.to_string());
    }

    #[cfg(test)]
    pub fn header_rendered(&self, id: &str) -> bool {
        self.header_rendered.contains(id)
    }

    /// Removes every pending id in `ids`, in order. Unknown and repeated ids
    /// are skipped.
    pub fn match_and_remove(&mut self, ids: &[&str]) -> Vec<MatchedTool> {
        let mut matched = Vec::new();
        for &id in ids {
            let Some(tool) = self.pending.remove(id) else {
                trace!(tool_id = %id, "tool_result_untracked");
                continue;
            };
            let nested = self.is_nested(&tool);
            let header_rendered = self.header_rendered.remove(id);
            matched.push(MatchedTool {
                id: id.to_string(),
                block: tool.block,
                parent_id: tool.parent_id,
                nested,
                header_rendered,
            });
        }
        matched
    }

    /// Drains every pending tool as an orphan, oldest first.
    ///
    /// Nesting is computed for all entries before any is removed.
    pub fn flush_all(&mut self) -> Vec<OrphanedTool> {
        let mut orphans: Vec<(u64, OrphanedTool)> = self
            .pending
            .iter()
            .map(|(id, tool)| {
                (
                    tool.seq,
                    OrphanedTool {
                        id: id.clone(),
                        block: tool.block.clone(),
                        parent_id: tool.parent_id.clone(),
                        nested: self.is_nested(tool),
                        header_rendered: self.header_rendered.contains(id),
                    },
                )
            })
            .collect();
        orphans.sort_by_key(|(seq, _)| *seq);

        self.pending.clear();
        self.header_rendered.clear();

        if !orphans.is_empty() {
            debug!(count = orphans.len(), "orphaned_tools_flushed");
        }
        orphans.into_iter().map(|(_, orphan)| orphan).collect()
    }

    /// Hands out the parent's header once, ahead of the parent's result.
    pub fn resolve_parent_early(&mut self, parent_id: &str) -> EarlyHeader {
        let Some(parent) = self.pending.get(parent_id) else {
            return EarlyHeader::NotPending;
        };
        let nested = self.is_nested(parent);
        let block = parent.block.clone();

        if !self.header_rendered.insert(parent_id.to_string()) {
            return EarlyHeader::AlreadyRendered;
        }
        EarlyHeader::Render { block, nested }
    }

    /// Buffers the tool_use blocks of a complete assistant message.
    ///
    /// Nothing is buffered while a tool_use block is streaming live; the live
    /// path owns that header. Returns the number of tools added.
    pub fn buffer_from_assistant_message(
        &mut self,
        message: &AssistantEvent,
        streaming_tool: bool,
    ) -> usize {
        if streaming_tool {
            trace!("tool_buffering_skipped_while_streaming");
            return 0;
        }

        let parent = message.parent_id().map(str::to_owned);
        let mut added = 0;
        for block in message.message.content.blocks() {
            if let ContentBlock::ToolUse(tool) = block
                && !tool.id.is_empty()
            {
                self.add(tool.id.clone(), tool.clone(), parent.clone());
                added += 1;
            }
        }
        added
    }

    /// Pairs every `tool_result` block of a user message with its pending tool.
    pub fn match_from_user_message(&mut self, message: &UserEvent) -> Vec<MatchedTool> {
        let ids: Vec<&str> = message
            .message
            .content
            .blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => Some(result.tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        self.match_and_remove(&ids)
    }
}
