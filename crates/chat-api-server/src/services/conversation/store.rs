use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::models::chat::{ChatMessage, ChatRole, ConversationKey};
use crate::utils::error::InvalidConfig;

/// In-memory conversation windows keyed by (channel, user id).
///
/// A single lock guards the whole map, so each append, snapshot and eviction
/// is atomic with respect to concurrent callers on any key.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    window: usize,
    max_conversations: Option<usize>,
}

struct StoreState {
    windows: HashMap<ConversationKey, Window>,
    next_seq: u64,
}

struct Window {
    messages: VecDeque<ChatMessage>,
    created_seq: u64,
}

impl ConversationStore {
    /// `window` is the number of messages retained per conversation; zero
    /// retains nothing.
    pub fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                windows: HashMap::new(),
                next_seq: 0,
            }),
            window,
            max_conversations: None,
        }
    }

    /// Bounds the number of tracked conversations. When a new key would
    /// exceed the bound, the oldest-created conversation is evicted first.
    pub fn with_max_conversations(mut self, max_conversations: usize) -> Result<Self, InvalidConfig> {
        if max_conversations == 0 {
            return Err(InvalidConfig(
                "max_conversations must be >= 1".to_string(),
            ));
        }
        self.max_conversations = Some(max_conversations);
        Ok(self)
    }

    /// Appends a message and truncates the window to its last `window`
    /// entries.
    pub fn append(&self, key: &ConversationKey, role: ChatRole, content: impl Into<String>) {
        let message = ChatMessage::new(role, content);
        let mut state = self.state.lock();

        if !state.windows.contains_key(key) {
            if let Some(max) = self.max_conversations {
                while state.windows.len() >= max {
                    if !evict_oldest(&mut state.windows) {
                        break;
                    }
                }
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.windows.insert(
                key.clone(),
                Window {
                    messages: VecDeque::new(),
                    created_seq: seq,
                },
            );
        }

        if let Some(window) = state.windows.get_mut(key) {
            window.messages.push_back(message);
            while window.messages.len() > self.window {
                window.messages.pop_front();
            }
        }
    }

    /// Snapshot of the retained window, oldest first. The returned messages
    /// are owned copies; mutating them never touches the store.
    pub fn messages(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        let state = self.state.lock();
        state
            .windows
            .get(key)
            .map(|w| w.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forgets one conversation. Unknown keys are a no-op.
    pub fn reset(&self, key: &ConversationKey) {
        let mut state = self.state.lock();
        if state.windows.remove(key).is_some() {
            debug!("conversation {} reset", key);
        }
    }

    /// Number of tracked conversations.
    pub fn len(&self) -> usize {
        self.state.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest(windows: &mut HashMap<ConversationKey, Window>) -> bool {
    let oldest = windows
        .iter()
        .min_by_key(|(_, w)| w.created_seq)
        .map(|(key, _)| key.clone());
    match oldest {
        Some(key) => {
            debug!("conversation bound reached, evicting {}", key);
            windows.remove(&key);
            true
        }
        None => false,
    }
}
