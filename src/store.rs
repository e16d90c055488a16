use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::errors::TurnError;
use crate::models::{Artifact, Conversation, Message};

/// Process-wide state: the conversation list, per-conversation messages,
/// produced artifacts, and UI toggles.
///
/// All mutation goes through the fixed set of entry points below — the turn
/// controller on protocol events, explicit user actions for everything else.
/// Reads return clones and have no side effects. The lock serializes writers,
/// so no two events for the same conversation ever race.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<AppState>>,
}

#[derive(Debug, Default)]
struct AppState {
    conversations: Vec<Conversation>,
    active_conversation_id: Option<String>,
    messages: HashMap<String, Vec<Message>>,
    artifacts: Vec<Artifact>,
    /// Artifact id → owning conversation, for cascade deletion.
    artifact_owners: HashMap<String, String>,
    sidebar_collapsed: bool,
    artifacts_panel_open: bool,
    turns_in_flight: HashSet<String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Conversations ────────────────────────────────────────────────────────

    /// Replaces the conversation list, e.g. after a fresh fetch.
    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.write().conversations = conversations;
    }

    /// Inserts a new conversation at the front (newest first).
    pub fn add_conversation(&self, conversation: Conversation) {
        self.write().conversations.insert(0, conversation);
    }

    /// Deletes a conversation, cascading to its messages and artifacts and
    /// clearing the active selection if it pointed here.
    pub fn delete_conversation(&self, id: &str) {
        let mut state = self.write();
        state.conversations.retain(|c| c.id != id);
        state.messages.remove(id);

        let owned: HashSet<String> = state
            .artifact_owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == id)
            .map(|(artifact_id, _)| artifact_id.clone())
            .collect();
        state.artifacts.retain(|a| !owned.contains(&a.id));
        state.artifact_owners.retain(|_, owner| owner != id);

        if state.active_conversation_id.as_deref() == Some(id) {
            state.active_conversation_id = None;
        }
    }

    pub fn set_active_conversation(&self, id: Option<String>) {
        self.write().active_conversation_id = id;
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.read().conversations.clone()
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.read().active_conversation_id.clone()
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Appends a message and advances its conversation (`updated_at`,
    /// `message_count`).
    pub fn append_message(&self, message: Message) {
        let mut state = self.write();
        if let Some(conv) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conv.updated_at = Utc::now();
            conv.message_count += 1;
        }
        state
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Replaces a conversation's messages, e.g. after loading history.
    pub fn replace_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        self.write()
            .messages
            .insert(conversation_id.to_string(), messages);
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Artifacts ────────────────────────────────────────────────────────────

    /// Registers an artifact exactly once and opens the artifacts panel.
    /// Returns `false` (without mutating) when the id already exists.
    pub fn add_artifact(&self, conversation_id: &str, artifact: Artifact) -> bool {
        let mut state = self.write();
        if state.artifact_owners.contains_key(&artifact.id) {
            return false;
        }
        state
            .artifact_owners
            .insert(artifact.id.clone(), conversation_id.to_string());
        state.artifacts.push(artifact);
        state.artifacts_panel_open = true;
        true
    }

    pub fn artifact(&self, id: &str) -> Option<Artifact> {
        self.read().artifacts.iter().find(|a| a.id == id).cloned()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.read().artifacts.clone()
    }

    // ── UI toggles ───────────────────────────────────────────────────────────

    pub fn toggle_sidebar(&self) {
        let mut state = self.write();
        state.sidebar_collapsed = !state.sidebar_collapsed;
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.read().sidebar_collapsed
    }

    pub fn toggle_artifacts_panel(&self) {
        let mut state = self.write();
        state.artifacts_panel_open = !state.artifacts_panel_open;
    }

    pub fn artifacts_panel_open(&self) -> bool {
        self.read().artifacts_panel_open
    }

    // ── Turn guard ───────────────────────────────────────────────────────────

    /// Claims the single in-flight turn slot for a conversation. A second
    /// submit while one is streaming is rejected, never interleaved.
    pub fn begin_turn(&self, conversation_id: &str) -> Result<(), TurnError> {
        let mut state = self.write();
        if !state.turns_in_flight.insert(conversation_id.to_string()) {
            return Err(TurnError::TurnInFlight {
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn end_turn(&self, conversation_id: &str) {
        self.write().turns_in_flight.remove(conversation_id);
    }

    pub fn turn_in_flight(&self, conversation_id: &str) -> bool {
        self.read().turns_in_flight.contains(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactType;

    fn store_with_conversation(id: &str) -> Store {
        let store = Store::new();
        store.add_conversation(Conversation::new(id.into(), "Test".into()));
        store
    }

    #[test]
    fn conversations_insert_newest_first() {
        let store = Store::new();
        store.add_conversation(Conversation::new("old".into(), "Old".into()));
        store.add_conversation(Conversation::new("new".into(), "New".into()));
        let ids: Vec<_> = store.conversations().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn append_message_bumps_count_and_timestamp() {
        let store = store_with_conversation("c1");
        let before = store.conversations()[0].updated_at;
        store.append_message(Message::user("c1".into(), "hi".into(), vec![]));
        let conv = &store.conversations()[0];
        assert_eq!(conv.message_count, 1);
        assert!(conv.updated_at >= before);
        assert_eq!(store.messages("c1").len(), 1);
    }

    #[test]
    fn delete_cascades_messages_artifacts_and_selection() {
        let store = store_with_conversation("c1");
        store.set_active_conversation(Some("c1".into()));
        store.append_message(Message::user("c1".into(), "hi".into(), vec![]));
        store.add_artifact(
            "c1",
            Artifact::new("a1".into(), ArtifactType::Code, None, "x".into(), None),
        );

        store.delete_conversation("c1");

        assert!(store.conversations().is_empty());
        assert!(store.messages("c1").is_empty());
        assert!(store.artifacts().is_empty());
        assert_eq!(store.active_conversation(), None);
    }

    #[test]
    fn artifact_ids_are_insert_once() {
        let store = store_with_conversation("c1");
        let art = Artifact::new("a1".into(), ArtifactType::Code, None, "x".into(), None);
        assert!(store.add_artifact("c1", art.clone()));
        assert!(!store.add_artifact("c1", art));
        assert_eq!(store.artifacts().len(), 1);
        assert!(store.artifacts_panel_open(), "panel opens on first artifact");
    }

    #[test]
    fn turn_guard_rejects_second_submit() {
        let store = store_with_conversation("c1");
        store.begin_turn("c1").unwrap();
        assert!(store.turn_in_flight("c1"));
        assert!(matches!(
            store.begin_turn("c1"),
            Err(TurnError::TurnInFlight { .. })
        ));
        // A different conversation is unaffected.
        assert!(!store.turn_in_flight("c2"));
        store.begin_turn("c2").unwrap();
        store.end_turn("c1");
        assert!(!store.turn_in_flight("c1"));
        store.begin_turn("c1").unwrap();
    }
}
