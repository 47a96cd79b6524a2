//! Bounded ring of recent raw messages, used to seed generation.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::ConversationId;

/// Messages kept per conversation.
pub const CONTEXT_CAPACITY: usize = 20;

/// Per-conversation FIFO of the last [`CONTEXT_CAPACITY`] raw message
/// texts, oldest evicted first. Mutated only by train and load; reset
/// by load and clear.
#[derive(Default)]
pub struct ContextBuffer {
    buffers: RwLock<HashMap<ConversationId, VecDeque<String>>>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, evicting the oldest entry past capacity.
    pub fn push(&self, id: ConversationId, text: impl Into<String>) {
        let mut buffers = self.buffers.write();
        let buf = buffers.entry(id).or_default();
        if buf.len() >= CONTEXT_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(text.into());
    }

    /// Replace the buffer contents wholesale (load path). Anything past
    /// capacity is dropped.
    pub fn replace(&self, id: ConversationId, texts: Vec<String>) {
        let mut buf: VecDeque<String> = texts.into_iter().take(CONTEXT_CAPACITY).collect();
        buf.shrink_to_fit();
        self.buffers.write().insert(id, buf);
    }

    /// Drop the buffer for `id`. Idempotent.
    pub fn reset(&self, id: ConversationId) {
        self.buffers.write().remove(&id);
    }

    /// Last `n` whitespace-separated words across the buffered messages,
    /// in order. Empty when nothing is buffered.
    pub fn tail_words(&self, id: ConversationId, n: usize) -> Vec<String> {
        let buffers = self.buffers.read();
        let Some(buf) = buffers.get(&id) else {
            return Vec::new();
        };
        let words: Vec<String> = buf
            .iter()
            .flat_map(|text| text.split_whitespace())
            .map(str::to_string)
            .collect();
        let skip = words.len().saturating_sub(n);
        words[skip..].to_vec()
    }

    pub fn len(&self, id: ConversationId) -> usize {
        self.buffers.read().get(&id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, id: ConversationId) -> bool {
        self.len(id) == 0
    }
}
