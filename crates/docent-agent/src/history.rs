use dashmap::DashMap;
use tracing::debug;

use docent_core::types::Turn;

/// In-memory conversation history, keyed by session id.
///
/// The persona prompt is the single system turn at the head of every
/// conversation. Histories are append-only while the session is active and
/// discarded wholesale when it ends; nothing survives a restart.
pub struct ConversationStore {
    turns: DashMap<String, Vec<Turn>>,
    persona: String,
}

impl ConversationStore {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            turns: DashMap::new(),
            persona: persona.into(),
        }
    }

    /// Seed the history with the persona system turn.
    pub fn init(&self, session_id: &str) {
        self.turns
            .entry(session_id.to_string())
            .or_insert_with(|| vec![Turn::system(self.persona.clone())]);
    }

    pub fn record_user(&self, session_id: &str, content: &str) {
        self.push(session_id, Turn::user(content));
    }

    pub fn record_assistant(&self, session_id: &str, content: &str) {
        self.push(session_id, Turn::assistant(content));
    }

    /// Full history including the system head, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.turns
            .get(session_id)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        self.turns.get(session_id).map(|t| t.len()).unwrap_or(0)
    }

    /// Drop the whole conversation. Called when the session ends.
    pub fn discard(&self, session_id: &str) {
        if self.turns.remove(session_id).is_some() {
            debug!(session_id, "conversation history discarded");
        }
    }

    fn push(&self, session_id: &str, turn: Turn) {
        self.turns
            .entry(session_id.to_string())
            .or_insert_with(|| vec![Turn::system(self.persona.clone())])
            .push(turn);
    }
}
