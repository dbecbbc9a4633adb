//! Reassembly of natively streamed tool calls
//!
//! Backends deliver tool calls either whole (`tool_call`) or as a series of
//! fragments (`tool_call_partial`) keyed by a stream index. The reassembler
//! owns the per-index buffers for one turn and hands back complete
//! [`ToolCall`]s in the order they first appeared in the stream.

use std::collections::{HashMap, HashSet};

use spool_ai::{ToolArguments, ToolCall};

/// A tool call still receiving fragments
#[derive(Debug)]
struct OpenCall {
    /// Position reserved in the output order
    slot: usize,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Turns raw tool call events into complete tool calls.
///
/// One instance belongs to one session; call [`reset`](Self::reset) at the
/// start of every turn.
#[derive(Debug, Default)]
pub struct ToolCallReassembler {
    /// Output order; `None` marks a slot whose call is still open
    slots: Vec<Option<ToolCall>>,
    open: HashMap<u32, OpenCall>,
    used_ids: HashSet<String>,
}

impl ToolCallReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all buffered state
    pub fn reset(&mut self) {
        self.slots.clear();
        self.open.clear();
        self.used_ids.clear();
    }

    /// Whether any fragment buffer is still open
    pub fn has_open_calls(&self) -> bool {
        !self.open.is_empty()
    }

    /// Number of calls seen this turn, open or closed
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Accept a tool call delivered in one piece
    pub fn push_complete(&mut self, id: &str, name: &str, arguments: &str) {
        let call = self.build_call(Some(id.to_string()), name.to_string(), arguments);
        self.slots.push(Some(call));
    }

    /// Accept one fragment of an incrementally streamed tool call
    pub fn push_partial(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments_delta: &str,
    ) {
        let id = id.filter(|s| !s.is_empty());
        let name = name.filter(|s| !s.is_empty());

        // A named fragment with a different id on an occupied index starts a new call
        if let (Some(existing), Some(_)) = (self.open.get(&index), name) {
            let id_changed = matches!((&existing.id, id), (Some(a), Some(b)) if a != b);
            if existing.name.is_some() && id_changed {
                self.close(index);
            }
        }

        if !self.open.contains_key(&index) {
            if name.is_none() {
                tracing::debug!(index, "tool call fragment arrived before its name");
            } else {
                tracing::trace!(index, name = ?name, "tool_call_start");
            }
            let slot = self.slots.len();
            self.slots.push(None);
            self.open.insert(
                index,
                OpenCall {
                    slot,
                    id: None,
                    name: None,
                    arguments: String::new(),
                },
            );
        }

        if let Some(call) = self.open.get_mut(&index) {
            if call.id.is_none() {
                call.id = id.map(str::to_string);
            }
            if call.name.is_none() {
                call.name = name.map(str::to_string);
            }
            call.arguments.push_str(arguments_delta);
        }
    }

    /// Close the buffer at `index` and parse its arguments
    pub fn close(&mut self, index: u32) {
        let Some(open) = self.open.remove(&index) else {
            tracing::debug!(index, "close for a tool call that is not open");
            return;
        };

        match open.name {
            Some(name) => {
                tracing::trace!(index, name = %name, "tool_call_end");
                let call = self.build_call(open.id, name, &open.arguments);
                self.slots[open.slot] = Some(call);
            }
            None if open.arguments.trim().is_empty() => {}
            None => {
                tracing::warn!(
                    index,
                    arguments = %open.arguments,
                    "discarding tool call fragments that never carried a tool name"
                );
            }
        }
    }

    /// Close every open buffer and return all calls of the turn in order.
    ///
    /// Leaves the reassembler empty.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        let mut open: Vec<u32> = self.open.keys().copied().collect();
        open.sort_by_key(|index| self.open[index].slot);
        for index in open {
            self.close(index);
        }

        let calls = self.slots.drain(..).flatten().collect();
        self.reset();
        calls
    }

    fn build_call(&mut self, id: Option<String>, name: String, arguments: &str) -> ToolCall {
        let id = match id {
            Some(id) if !id.is_empty() && !self.used_ids.contains(&id) => id,
            _ => format!("call_{}", uuid::Uuid::new_v4().simple()),
        };
        self.used_ids.insert(id.clone());

        let arguments = ToolArguments::parse(arguments);
        if let ToolArguments::Unparsed { error, .. } = &arguments {
            tracing::warn!(tool = %name, id = %id, "malformed tool call arguments: {}", error);
        }
        ToolCall::new(id, name, arguments)
    }
}
