//! Thread collection, active-thread pointer and message appends.
//!
//! Every mutation updates memory first and then writes the affected record
//! through the injected [`KeyValueStore`]. Write failures are logged only.

use crate::models::{ChatThread, Message};
use crate::storage::{self, KeyValueStore, ACTIVE_THREAD_KEY, THREADS_KEY};
use std::sync::Arc;

pub struct ThreadStore {
    kv: Arc<dyn KeyValueStore>,
    // Newest first
    threads: Vec<ChatThread>,
    active_thread_id: Option<String>,
}

impl ThreadStore {
    /// Loads the persisted collection and active pointer. Missing or
    /// unreadable records start empty.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let mut threads = storage::load_record::<Vec<ChatThread>>(kv.as_ref(), THREADS_KEY)
            .await
            .unwrap_or_default();
        let active_thread_id = storage::load_record::<Option<String>>(kv.as_ref(), ACTIVE_THREAD_KEY)
            .await
            .flatten();

        for thread in &mut threads {
            if thread.repair() {
                log::warn!("Repaired derived fields of stored thread {}", thread.id());
            }
        }

        log::info!(
            "Loaded {} threads (active: {})",
            threads.len(),
            active_thread_id.as_deref().unwrap_or("none")
        );
        Self {
            kv,
            threads,
            active_thread_id,
        }
    }

    pub fn threads(&self) -> &[ChatThread] {
        &self.threads
    }

    pub fn thread(&self, thread_id: &str) -> Option<&ChatThread> {
        self.threads.iter().find(|t| t.id() == thread_id)
    }

    pub fn active_thread_id(&self) -> Option<&str> {
        self.active_thread_id.as_deref()
    }

    /// The thread the pointer refers to. A stale pointer yields `None`.
    pub fn active_thread(&self) -> Option<&ChatThread> {
        self.active_thread_id
            .as_deref()
            .and_then(|id| self.thread(id))
    }

    pub async fn create_thread(&mut self) -> String {
        let thread = ChatThread::new();
        let thread_id = thread.id().to_string();
        log::info!("Creating new thread {}", thread_id);

        self.threads.insert(0, thread);
        self.active_thread_id = Some(thread_id.clone());
        self.persist_threads().await;
        self.persist_active().await;
        thread_id
    }

    /// Returns the active thread id, creating a thread if none resolves.
    pub async fn ensure_active_thread(&mut self) -> String {
        if let Some(thread_id) = self.active_thread().map(|t| t.id().to_string()) {
            return thread_id;
        }
        self.create_thread().await
    }

    /// Points the active pointer at `thread_id`. Unknown ids are ignored.
    pub async fn select_thread(&mut self, thread_id: &str) -> bool {
        if self.thread(thread_id).is_none() {
            log::warn!("Attempted to select non-existent thread: {}", thread_id);
            return false;
        }
        log::debug!("Selecting thread {}", thread_id);
        self.active_thread_id = Some(thread_id.to_string());
        self.persist_active().await;
        true
    }

    /// Appends `message` to the thread. An unknown id is a logged no-op.
    pub async fn add_message(&mut self, thread_id: &str, message: Message) {
        let Some(thread) = self.threads.iter_mut().find(|t| t.id() == thread_id) else {
            log::warn!("Attempted to add message to non-existent thread: {}", thread_id);
            return;
        };
        log::debug!(
            "Adding {} message {} to thread {}",
            message.sender.as_str(),
            message.id,
            thread_id
        );
        thread.push_message(message);
        self.persist_threads().await;
    }

    pub async fn delete_thread(&mut self, thread_id: &str) {
        let before = self.threads.len();
        self.threads.retain(|t| t.id() != thread_id);
        if self.threads.len() == before {
            log::warn!("Attempted to delete non-existent thread: {}", thread_id);
            return;
        }
        log::info!("Deleted thread {}", thread_id);
        self.persist_threads().await;

        if self.active_thread_id.as_deref() == Some(thread_id) {
            self.active_thread_id = self.threads.first().map(|t| t.id().to_string());
            self.persist_active().await;
        }
    }

    /// Empties the active thread and restores its default title.
    pub async fn clear_current_thread(&mut self) {
        let Some(active_id) = self.active_thread_id.clone() else {
            return;
        };
        let Some(thread) = self.threads.iter_mut().find(|t| t.id() == active_id) else {
            log::warn!("Active thread {} no longer exists, nothing to clear", active_id);
            return;
        };
        log::info!("Clearing thread {}", active_id);
        thread.reset();
        self.persist_threads().await;
    }

    async fn persist_threads(&self) {
        storage::persist_json(self.kv.as_ref(), THREADS_KEY, &self.threads).await;
    }

    async fn persist_active(&self) {
        storage::persist_json(self.kv.as_ref(), ACTIVE_THREAD_KEY, &self.active_thread_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, Sender, DEFAULT_TITLE};
    use crate::storage::MemoryStore;

    async fn empty_store() -> (ThreadStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let store = ThreadStore::load(kv.clone()).await;
        (store, kv)
    }

    #[tokio::test]
    async fn create_prepends_and_activates() {
        let (mut store, _kv) = empty_store().await;
        let first = store.create_thread().await;
        let second = store.create_thread().await;

        assert_ne!(first, second);
        assert_eq!(store.threads()[0].id(), second);
        assert_eq!(store.threads()[1].id(), first);
        assert_eq!(store.active_thread().map(|t| t.id()), Some(second.as_str()));

        let thread = store.active_thread().unwrap();
        assert_eq!(thread.title(), DEFAULT_TITLE);
        assert_eq!(thread.message_count(), 0);
        assert_eq!(thread.last_message(), "");
    }

    #[tokio::test]
    async fn add_message_updates_derived_fields() {
        let (mut store, _kv) = empty_store().await;
        let id = store.create_thread().await;
        let created_at = store.thread(&id).unwrap().timestamp();

        store
            .add_message(&id, Message::user("What does this repo do exactly", Agent::Github, None))
            .await;
        store.add_message(&id, Message::ai("It indexes things", Agent::Github, None)).await;

        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.message_count(), 2);
        assert_eq!(thread.messages().len(), 2);
        assert_eq!(thread.title(), "What does this repo...");
        assert_eq!(thread.last_message(), "It indexes things");
        assert!(thread.timestamp() >= created_at);
        assert_eq!(thread.messages()[0].sender, Sender::User);
        assert_eq!(thread.messages()[1].sender, Sender::Ai);
    }

    #[tokio::test]
    async fn add_message_to_unknown_thread_is_ignored() {
        let (mut store, _kv) = empty_store().await;
        let id = store.create_thread().await;
        store.add_message("thread-missing", Message::user("hi", Agent::React, None)).await;
        assert_eq!(store.thread(&id).unwrap().message_count(), 0);
        assert_eq!(store.threads().len(), 1);
    }

    #[tokio::test]
    async fn deleting_active_thread_selects_first_remaining() {
        let (mut store, _kv) = empty_store().await;
        let older = store.create_thread().await;
        let newer = store.create_thread().await;

        store.delete_thread(&newer).await;
        assert_eq!(store.active_thread_id(), Some(older.as_str()));

        store.delete_thread(&older).await;
        assert_eq!(store.active_thread_id(), None);
        assert!(store.active_thread().is_none());
        assert!(store.threads().is_empty());
    }

    #[tokio::test]
    async fn deleting_inactive_thread_keeps_pointer() {
        let (mut store, _kv) = empty_store().await;
        let older = store.create_thread().await;
        let newer = store.create_thread().await;
        store.delete_thread(&older).await;
        assert_eq!(store.active_thread_id(), Some(newer.as_str()));
    }

    #[tokio::test]
    async fn clear_current_thread_resets_everything_but_identity() {
        let (mut store, _kv) = empty_store().await;
        let id = store.create_thread().await;
        for i in 0..5 {
            store.add_message(&id, Message::user(format!("note {i}"), Agent::Docs, None)).await;
        }
        store.clear_current_thread().await;

        let thread = store.active_thread().unwrap();
        assert_eq!(thread.id(), id);
        assert!(thread.messages().is_empty());
        assert_eq!(thread.message_count(), 0);
        assert_eq!(thread.last_message(), "");
        assert_eq!(thread.title(), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn title_is_derived_again_after_clear() {
        let (mut store, _kv) = empty_store().await;
        let id = store.create_thread().await;
        store.add_message(&id, Message::user("first topic", Agent::React, None)).await;
        store.clear_current_thread().await;
        store.add_message(&id, Message::user("second topic", Agent::React, None)).await;
        assert_eq!(store.thread(&id).unwrap().title(), "second topic");
    }

    #[tokio::test]
    async fn select_ignores_unknown_ids() {
        let (mut store, _kv) = empty_store().await;
        let older = store.create_thread().await;
        let newer = store.create_thread().await;

        assert!(store.select_thread(&older).await);
        assert_eq!(store.active_thread_id(), Some(older.as_str()));
        assert!(!store.select_thread("thread-nope").await);
        assert_eq!(store.active_thread_id(), Some(older.as_str()));
        assert_ne!(older, newer);
    }

    #[tokio::test]
    async fn ensure_active_thread_reuses_existing() {
        let (mut store, _kv) = empty_store().await;
        let created = store.ensure_active_thread().await;
        let again = store.ensure_active_thread().await;
        assert_eq!(created, again);
        assert_eq!(store.threads().len(), 1);
    }

    #[tokio::test]
    async fn state_round_trips_through_the_store() {
        let (mut store, kv) = empty_store().await;
        let id = store.create_thread().await;
        store
            .add_message(&id, Message::user("Hello", Agent::Website, Some("https://example.com".into())))
            .await;

        let reloaded = ThreadStore::load(kv).await;
        assert_eq!(reloaded.threads(), store.threads());
        assert_eq!(reloaded.active_thread_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn stale_active_pointer_resolves_to_none() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(ACTIVE_THREAD_KEY, "\"thread-gone\"").await.unwrap();
        let mut store = ThreadStore::load(kv).await;

        assert!(store.active_thread().is_none());
        store.clear_current_thread().await;
        let id = store.ensure_active_thread().await;
        assert_eq!(store.active_thread_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn unreadable_records_start_an_empty_collection() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(THREADS_KEY, "[{broken").await.unwrap();
        kv.set(ACTIVE_THREAD_KEY, "{not an id").await.unwrap();
        let mut store = ThreadStore::load(kv.clone()).await;

        assert!(store.threads().is_empty());
        assert!(store.active_thread().is_none());
        let id = store.create_thread().await;
        let reloaded = ThreadStore::load(kv).await;
        assert_eq!(reloaded.active_thread_id(), Some(id.as_str()));
    }
}
