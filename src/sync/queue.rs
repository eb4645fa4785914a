use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::conversation::ConversationStore;
use crate::db::Database;
use crate::error::EngineResult;
use crate::models::{ClassifiedMessage, MessagePayload};

use super::backend::{AcceptedChat, BackendClient};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Saved(usize),
    /// Chat is not accepted on the backend; the batch was dropped.
    NotAccepted,
}

/// Results of backend calls, posted back into the engine queue.
#[derive(Debug)]
pub enum SyncEvent {
    Flushed {
        session: u64,
        contact_name: String,
        batch: Vec<ClassifiedMessage>,
        accepted: Option<bool>,
        result: EngineResult<SyncStatus>,
    },
    ChatAccepted {
        session: u64,
        contact_name: String,
        result: EngineResult<AcceptedChat>,
    },
    AcceptedChats {
        session: u64,
        result: EngineResult<Vec<AcceptedChat>>,
    },
    ChatMessages {
        contact_name: String,
        result: EngineResult<Vec<MessagePayload>>,
    },
}

/// What a finished flush means for the host.
#[derive(Debug, PartialEq)]
pub enum FlushReport {
    Synced { contact_name: String, saved: usize },
    Skipped { contact_name: String, dropped: usize },
    Failed { contact_name: String, error: String, pending: usize },
}

/// Moves appended messages to the backend, one flush per contact at a time.
///
/// Failed batches are persisted to the outbox and put back in the store's
/// pending queue, so they go out with the next flush or after a restart.
pub struct SyncQueue {
    backend: Arc<dyn BackendClient>,
    db: Database,
    require_acceptance: bool,
    accepted: HashMap<String, bool>,
    in_flight: HashSet<String>,
    /// Bumped on logout; results from an older session are ignored.
    session: u64,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncQueue {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        db: Database,
        require_acceptance: bool,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = Self {
            backend,
            db,
            require_acceptance,
            accepted: HashMap::new(),
            in_flight: HashSet::new(),
            session: 0,
            events_tx,
        };
        (queue, events_rx)
    }

    pub fn is_in_flight(&self, contact_name: &str) -> bool {
        self.in_flight.contains(contact_name)
    }

    pub fn cached_acceptance(&self, contact_name: &str) -> Option<bool> {
        self.accepted.get(contact_name).copied()
    }

    /// Put messages left in the outbox by an earlier run back into the store.
    pub async fn recover(&self, store: &mut ConversationStore) -> Result<usize> {
        let messages = self.db.load_outbox().await?;
        let total = messages.len();

        let mut grouped: Vec<(String, Vec<ClassifiedMessage>)> = Vec::new();
        for message in messages {
            match grouped.last_mut() {
                Some((contact, batch)) if *contact == message.contact_name => batch.push(message),
                _ => grouped.push((message.contact_name.clone(), vec![message])),
            }
        }
        for (contact, batch) in grouped {
            store.requeue(&contact, batch);
        }

        if total > 0 {
            log_info!("[sync] recovered {} unsynced messages from outbox", total);
        }
        Ok(total)
    }

    /// Start a background flush of `contact_name`'s pending messages.
    ///
    /// Returns false when there is nothing to send or a flush for that
    /// contact is already running.
    pub fn flush(&mut self, contact_name: &str, store: &mut ConversationStore) -> bool {
        if self.in_flight.contains(contact_name) || !store.is_dirty(contact_name) {
            return false;
        }
        let batch = store.take_pending(contact_name);
        self.in_flight.insert(contact_name.to_string());

        log_debug!("[sync] flushing {} messages for {}", batch.len(), contact_name);
        let task = flush_batch(
            Arc::clone(&self.backend),
            self.db.clone(),
            self.session,
            contact_name.to_string(),
            batch,
            self.require_acceptance,
            self.cached_acceptance(contact_name),
        );
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = events_tx.send(task.await);
        });
        true
    }

    pub fn flush_dirty(&mut self, store: &mut ConversationStore) -> usize {
        store
            .dirty_contacts()
            .into_iter()
            .filter(|contact| self.flush(contact, store))
            .count()
    }

    /// Flush every dirty contact and wait for the results; used on shutdown.
    pub async fn drain(&mut self, store: &mut ConversationStore) -> Vec<FlushReport> {
        let mut reports = Vec::new();
        for contact in store.dirty_contacts() {
            if self.in_flight.contains(&contact) {
                continue;
            }
            let batch = store.take_pending(&contact);
            self.in_flight.insert(contact.clone());
            let event = flush_batch(
                Arc::clone(&self.backend),
                self.db.clone(),
                self.session,
                contact.clone(),
                batch,
                self.require_acceptance,
                self.cached_acceptance(&contact),
            )
            .await;
            if let SyncEvent::Flushed {
                session,
                contact_name,
                batch,
                accepted,
                result,
            } = event
            {
                if let Some(report) =
                    self.on_flushed(session, contact_name, batch, accepted, result, store)
                {
                    reports.push(report);
                }
            }
        }
        reports
    }

    pub fn on_flushed(
        &mut self,
        session: u64,
        contact_name: String,
        batch: Vec<ClassifiedMessage>,
        accepted: Option<bool>,
        result: EngineResult<SyncStatus>,
        store: &mut ConversationStore,
    ) -> Option<FlushReport> {
        if session != self.session {
            log_debug!("[sync] ignoring flush result from a previous session");
            return None;
        }
        self.in_flight.remove(&contact_name);
        if let Some(accepted) = accepted {
            self.accepted.insert(contact_name.clone(), accepted);
        }

        match result {
            Ok(SyncStatus::Saved(saved)) => {
                log_info!("[sync] saved {} messages for {}", saved, contact_name);
                Some(FlushReport::Synced { contact_name, saved })
            }
            Ok(SyncStatus::NotAccepted) => {
                log_debug!("[sync] {} is not accepted; dropped {} messages", contact_name, batch.len());
                Some(FlushReport::Skipped {
                    contact_name,
                    dropped: batch.len(),
                })
            }
            Err(err) => {
                log_warn!("[sync] flush for {} failed: {}", contact_name, err);
                store.requeue(&contact_name, batch);
                let pending = store.pending_len(&contact_name);
                Some(FlushReport::Failed {
                    contact_name,
                    error: err.to_string(),
                    pending,
                })
            }
        }
    }

    pub fn accept_chat(&self, contact_name: &str) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        let session = self.session;
        let contact_name = contact_name.to_string();
        tokio::spawn(async move {
            let result = backend.accept_chat(&contact_name).await;
            let _ = events_tx.send(SyncEvent::ChatAccepted {
                session,
                contact_name,
                result,
            });
        });
    }

    pub fn list_accepted(&self) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = backend.list_accepted().await;
            let _ = events_tx.send(SyncEvent::AcceptedChats { session, result });
        });
    }

    pub fn fetch_messages(&self, contact_name: &str, limit: usize) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        let contact_name = contact_name.to_string();
        tokio::spawn(async move {
            let result = backend.fetch_messages(&contact_name, limit).await;
            let _ = events_tx.send(SyncEvent::ChatMessages {
                contact_name,
                result,
            });
        });
    }

    /// Record acceptance results; returns false for a stale session.
    pub fn on_accepted(&mut self, session: u64, chats: &[AcceptedChat]) -> bool {
        if session != self.session {
            return false;
        }
        for chat in chats {
            self.accepted.insert(chat.chat_name.clone(), true);
        }
        true
    }

    /// Forget everything tied to the signed-in user.
    pub async fn logout(&mut self) -> Result<()> {
        self.session += 1;
        self.accepted.clear();
        self.in_flight.clear();
        self.db.clear_outbox().await
    }
}

async fn flush_batch(
    backend: Arc<dyn BackendClient>,
    db: Database,
    session: u64,
    contact_name: String,
    batch: Vec<ClassifiedMessage>,
    require_acceptance: bool,
    cached: Option<bool>,
) -> SyncEvent {
    let accepted = if !require_acceptance {
        None
    } else if cached.is_some() {
        cached
    } else {
        match backend.is_chat_accepted(&contact_name).await {
            Ok(accepted) => Some(accepted),
            Err(err) => {
                persist_failed(&db, &contact_name, &batch).await;
                return SyncEvent::Flushed {
                    session,
                    contact_name,
                    batch,
                    accepted: None,
                    result: Err(err),
                };
            }
        }
    };

    if accepted == Some(false) {
        // may have been persisted by an earlier failed attempt
        if let Err(err) = db.discard_outbox(&contact_name, &batch).await {
            log_error!("[sync] failed to discard outbox rows for {}: {err:?}", contact_name);
        }
        return SyncEvent::Flushed {
            session,
            contact_name,
            batch,
            accepted,
            result: Ok(SyncStatus::NotAccepted),
        };
    }

    let payload: Vec<MessagePayload> = batch.iter().map(MessagePayload::from).collect();
    let result = match backend.save_messages(&contact_name, &payload).await {
        Ok(saved) => {
            if let Err(err) = db.discard_outbox(&contact_name, &batch).await {
                log_error!("[sync] failed to discard outbox rows for {}: {err:?}", contact_name);
            }
            Ok(SyncStatus::Saved(saved))
        }
        Err(err) => {
            persist_failed(&db, &contact_name, &batch).await;
            Err(err)
        }
    };

    SyncEvent::Flushed {
        session,
        contact_name,
        batch,
        accepted,
        result,
    }
}

async fn persist_failed(db: &Database, contact_name: &str, batch: &[ClassifiedMessage]) {
    if let Err(err) = db.save_outbox(contact_name, batch).await {
        log_error!("[sync] failed to persist {} unsynced messages for {}: {err:?}", batch.len(), contact_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeBackend {
        accepted: HashSet<String>,
        fail_saves: Mutex<usize>,
        saved: Mutex<Vec<(String, Vec<String>)>>,
        acceptance_checks: Mutex<usize>,
    }

    #[async_trait]
    impl BackendClient for FakeBackend {
        async fn is_chat_accepted(&self, chat_name: &str) -> EngineResult<bool> {
            *self.acceptance_checks.lock().unwrap() += 1;
            Ok(self.accepted.contains(chat_name))
        }

        async fn accept_chat(&self, chat_name: &str) -> EngineResult<AcceptedChat> {
            Ok(AcceptedChat {
                chat_name: chat_name.into(),
                accepted_at: Some("now".into()),
                last_updated: None,
                message_count: None,
            })
        }

        async fn save_messages(&self, chat_name: &str, messages: &[MessagePayload]) -> EngineResult<usize> {
            let mut failures = self.fail_saves.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(EngineError::backend(503, "unavailable"));
            }
            self.saved.lock().unwrap().push((
                chat_name.into(),
                messages.iter().map(|m| m.text.clone()).collect(),
            ));
            Ok(messages.len())
        }

        async fn fetch_messages(&self, _chat_name: &str, _limit: usize) -> EngineResult<Vec<MessagePayload>> {
            Ok(Vec::new())
        }

        async fn list_accepted(&self) -> EngineResult<Vec<AcceptedChat>> {
            Ok(Vec::new())
        }
    }

    fn message(contact: &str, text: &str, ts: i64) -> ClassifiedMessage {
        ClassifiedMessage {
            text: text.into(),
            is_incoming: true,
            confidence_signals: Default::default(),
            timestamp_millis: ts,
            display_timestamp: "10:00".into(),
            contact_name: contact.into(),
        }
    }

    fn store_with(contact: &str, texts: &[&str]) -> ConversationStore {
        let mut store = ConversationStore::default();
        store.get_or_create(contact, Instant::now());
        for (i, text) in texts.iter().enumerate() {
            store.append(message(contact, text, i as i64));
        }
        store
    }

    fn setup(backend: FakeBackend, require_acceptance: bool) -> (tempfile::TempDir, Arc<FakeBackend>, SyncQueue, mpsc::UnboundedReceiver<SyncEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("sync.sqlite3")).unwrap();
        let backend = Arc::new(backend);
        let (queue, events) = SyncQueue::new(backend.clone(), db, require_acceptance);
        (dir, backend, queue, events)
    }

    async fn next_flush(
        queue: &mut SyncQueue,
        events: &mut mpsc::UnboundedReceiver<SyncEvent>,
        store: &mut ConversationStore,
    ) -> FlushReport {
        match events.recv().await.unwrap() {
            SyncEvent::Flushed {
                session,
                contact_name,
                batch,
                accepted,
                result,
            } => queue
                .on_flushed(session, contact_name, batch, accepted, result, store)
                .unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn flush_sends_pending_messages_once() {
        let (_dir, backend, mut queue, mut events) = setup(FakeBackend::default(), false);
        let mut store = store_with("Alice", &["Hi", "How are you?"]);

        assert!(queue.flush("Alice", &mut store));
        assert!(!queue.flush("Alice", &mut store));
        assert!(queue.is_in_flight("Alice"));

        let report = next_flush(&mut queue, &mut events, &mut store).await;
        assert_eq!(report, FlushReport::Synced { contact_name: "Alice".into(), saved: 2 });
        assert!(!store.is_dirty("Alice"));
        assert_eq!(
            backend.saved.lock().unwrap().clone(),
            vec![("Alice".to_string(), vec!["Hi".to_string(), "How are you?".to_string()])]
        );
    }

    #[tokio::test]
    async fn failed_flush_is_requeued_and_persisted() {
        let backend = FakeBackend {
            fail_saves: Mutex::new(1),
            ..Default::default()
        };
        let (_dir, backend, mut queue, mut events) = setup(backend, false);
        let mut store = store_with("Alice", &["Hi"]);

        queue.flush("Alice", &mut store);
        store.append(message("Alice", "Are you there?", 5));
        let report = next_flush(&mut queue, &mut events, &mut store).await;
        assert!(matches!(report, FlushReport::Failed { pending: 2, .. }));
        assert_eq!(queue.db.load_outbox().await.unwrap().len(), 1);

        // retry sends the failed batch first, then clears the outbox
        queue.flush("Alice", &mut store);
        let report = next_flush(&mut queue, &mut events, &mut store).await;
        assert_eq!(report, FlushReport::Synced { contact_name: "Alice".into(), saved: 2 });
        assert_eq!(backend.saved.lock().unwrap()[0].1, vec!["Hi", "Are you there?"]);
        assert!(queue.db.load_outbox().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unaccepted_chats_are_dropped_and_cached() {
        let backend = FakeBackend {
            accepted: ["Bob".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (_dir, backend, mut queue, mut events) = setup(backend, true);
        let mut store = store_with("Alice", &["Hi"]);

        queue.flush("Alice", &mut store);
        let report = next_flush(&mut queue, &mut events, &mut store).await;
        assert_eq!(report, FlushReport::Skipped { contact_name: "Alice".into(), dropped: 1 });
        assert_eq!(queue.cached_acceptance("Alice"), Some(false));

        store.append(message("Alice", "Hello?", 3));
        queue.flush("Alice", &mut store);
        next_flush(&mut queue, &mut events, &mut store).await;
        assert_eq!(*backend.acceptance_checks.lock().unwrap(), 1);
        assert!(backend.saved.lock().unwrap().is_empty());

        // accepting the chat lets the next batch through
        queue.on_accepted(0, &[backend.accept_chat("Alice").await.unwrap()]);
        store.append(message("Alice", "Ok now", 4));
        queue.flush("Alice", &mut store);
        let report = next_flush(&mut queue, &mut events, &mut store).await;
        assert_eq!(report, FlushReport::Synced { contact_name: "Alice".into(), saved: 1 });
    }

    #[tokio::test]
    async fn results_from_before_logout_are_ignored() {
        let backend = FakeBackend {
            fail_saves: Mutex::new(1),
            ..Default::default()
        };
        let (_dir, _backend, mut queue, mut events) = setup(backend, false);
        let mut store = store_with("Alice", &["Hi"]);

        queue.flush("Alice", &mut store);
        queue.logout().await.unwrap();
        store.reset_all();

        let SyncEvent::Flushed { session, contact_name, batch, accepted, result } = events.recv().await.unwrap() else {
            panic!("expected flush result");
        };
        assert!(queue
            .on_flushed(session, contact_name, batch, accepted, result, &mut store)
            .is_none());
        assert!(store.dirty_contacts().is_empty());
    }

    #[tokio::test]
    async fn drain_flushes_everything_inline() {
        let (_dir, backend, mut queue, _events) = setup(FakeBackend::default(), false);
        let mut store = store_with("Alice", &["Hi"]);
        store.get_or_create("Bob", Instant::now());
        store.append(message("Bob", "Yo", 1));

        let reports = queue.drain(&mut store).await;
        assert_eq!(reports.len(), 2);
        assert!(store.dirty_contacts().is_empty());
        assert_eq!(backend.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recover_requeues_outbox_rows() {
        let (_dir, _backend, queue, _events) = setup(FakeBackend::default(), false);
        queue
            .db
            .save_outbox("Alice", &[message("Alice", "Hi", 1), message("Alice", "Hey", 2)])
            .await
            .unwrap();
        queue.db.save_outbox("Bob", &[message("Bob", "Yo", 1)]).await.unwrap();

        let mut store = ConversationStore::default();
        assert_eq!(queue.recover(&mut store).await.unwrap(), 3);
        assert_eq!(store.pending_len("Alice"), 2);
        assert_eq!(store.pending_len("Bob"), 1);
    }
}
