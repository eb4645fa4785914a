use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::classifier::MessageClassifier;
use crate::conversation::{AppendOutcome, ConversationStore, Focus};
use crate::error::EngineError;
use crate::models::{MessagePayload, ObservationBatch};
use crate::settings::EngineSettings;
use crate::suggestions::{
    pick_fallback, Completion, CoordinatorEvent, RequestKind, SuggestionRequestCoordinator,
};
use crate::sync::{SyncEvent, SyncQueue};
use crate::trigger::{DraftDecision, ReplyDecision, TriggerPolicy};
use crate::utils::logging::preview;

use super::commands::EngineCommand;
use super::events::{EngineEvent, EventSink};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the engine task owns. Only `engine_loop` touches it.
pub(crate) struct EngineState {
    settings: EngineSettings,
    classifier: MessageClassifier,
    store: ConversationStore,
    policy: TriggerPolicy,
    coordinator: SuggestionRequestCoordinator,
    sync: SyncQueue,
    sink: Arc<dyn EventSink>,
    last_timestamp_millis: i64,
}

impl EngineState {
    pub(crate) fn new(
        settings: EngineSettings,
        coordinator: SuggestionRequestCoordinator,
        sync: SyncQueue,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            classifier: MessageClassifier::new(settings.classifier_config()),
            store: ConversationStore::new(settings.history_limit),
            policy: TriggerPolicy::new(settings.min_draft_chars, settings.min_draft_growth),
            coordinator,
            sync,
            sink,
            last_timestamp_millis: 0,
            settings,
        }
    }

    fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Observe(batch) => self.observe(batch),
            EngineCommand::ImproveDraft(draft) => self.improve_draft(draft),
            EngineCommand::ResetChat => self.reset_chat(),
            EngineCommand::Logout => self.logout().await,
            EngineCommand::AcceptChat(contact_name) => self.sync.accept_chat(&contact_name),
            EngineCommand::ListAcceptedChats => self.sync.list_accepted(),
            EngineCommand::FetchMessages { contact_name, limit } => {
                self.sync.fetch_messages(&contact_name, limit)
            }
            EngineCommand::FlushSync => {
                self.sync.flush_dirty(&mut self.store);
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.store.active().map(|c| c.snapshot()));
            }
        }
    }

    /// Load persisted state that must be in place before the first command.
    pub(crate) async fn prepare(&mut self) {
        if let Err(err) = self.sync.recover(&mut self.store).await {
            log_error!("[engine] failed to recover sync outbox: {err:?}");
        }
    }

    fn observe(&mut self, batch: ObservationBatch) {
        let contact_name = batch.contact_name.trim().to_string();
        if contact_name.is_empty() {
            log_debug!("[engine] ignoring batch without a contact name");
            return;
        }
        let now = Instant::now();

        let (focus, _) = self.store.get_or_create(&contact_name, now);
        if let Focus::Switched { previous } = focus {
            self.coordinator.cancel_all();
            if let Some(previous) = &previous {
                self.sync.flush(previous, &mut self.store);
            }
            log_info!("[engine] conversation switched to {}", contact_name);
            self.emit(EngineEvent::ConversationSwitched {
                contact_name: contact_name.clone(),
                previous,
            });
        }

        let observed_at = Utc::now();
        for observation in batch.in_screen_order() {
            let mut message = match self.classifier.classify(&observation, &contact_name, observed_at) {
                Ok(message) => message,
                Err(rejection) => {
                    log_debug!("[engine] rejected {:?}: {:?}", preview(&observation.text, 40), rejection);
                    continue;
                }
            };
            message.timestamp_millis = self.next_timestamp(message.timestamp_millis);
            let payload = MessagePayload::from(&message);

            match self.store.append(message) {
                AppendOutcome::Appended { evicted } => {
                    if evicted > 0 {
                        log_debug!("[engine] evicted {} old messages for {}", evicted, contact_name);
                    }
                    let history_len = self.store.active().map(|c| c.len()).unwrap_or(0);
                    self.emit(EngineEvent::MessageAppended {
                        contact_name: contact_name.clone(),
                        message: payload,
                        history_len,
                    });
                    self.evaluate_reply(&contact_name, now);
                }
                AppendOutcome::Duplicate | AppendOutcome::NotActive => {}
            }
        }
    }

    /// Timestamps are strictly increasing across everything this engine appends.
    fn next_timestamp(&mut self, observed_millis: i64) -> i64 {
        let timestamp = observed_millis.max(self.last_timestamp_millis + 1);
        self.last_timestamp_millis = timestamp;
        timestamp
    }

    fn evaluate_reply(&mut self, contact_name: &str, now: Instant) {
        let Some(conversation) = self.store.active_mut() else {
            return;
        };
        match self.policy.evaluate(conversation) {
            ReplyDecision::Request => {
                let plan = self.coordinator.request_replies(conversation, now);
                log_debug!("[engine] reply request for {}: {:?}", contact_name, plan);
            }
            ReplyDecision::Discard => {
                self.coordinator.cancel(RequestKind::Replies);
                self.emit(EngineEvent::SuggestionsCleared {
                    contact_name: contact_name.to_string(),
                });
            }
            ReplyDecision::Idle | ReplyDecision::AlreadyRequested => {}
        }
    }

    fn improve_draft(&mut self, draft: String) {
        let Some(conversation) = self.store.active_mut() else {
            log_warn!("[engine] draft improvement requested without an active conversation");
            return;
        };
        match self.policy.evaluate_draft(conversation, &draft) {
            DraftDecision::Request(draft) => {
                let plan = self.coordinator.request_improvement(conversation, draft);
                log_debug!("[engine] improvement request: {:?}", plan);
            }
            decision => log_debug!("[engine] draft not sent: {:?}", decision),
        }
    }

    fn reset_chat(&mut self) {
        self.coordinator.cancel_all();
        self.store.reset(Instant::now());
        let contact_name = self.store.active_contact().map(str::to_string);
        log_info!("[engine] conversation reset ({:?})", contact_name);
        self.emit(EngineEvent::ConversationReset { contact_name });
    }

    async fn logout(&mut self) {
        self.coordinator.cancel_all();
        self.store.reset_all();
        if let Err(err) = self.sync.logout().await {
            log_error!("[engine] failed to clear sync outbox on logout: {err:?}");
        }
        log_info!("[engine] logged out; all conversation state dropped");
        self.emit(EngineEvent::LoggedOut);
    }

    fn handle_coordinator_event(&mut self, event: CoordinatorEvent) {
        let now = Instant::now();
        match event {
            CoordinatorEvent::TimerFired {
                kind,
                epoch,
                generation,
            } => {
                let conversation = self.store.active_in_epoch(epoch);
                if !self.coordinator.on_timer_fired(kind, epoch, generation, conversation, now) {
                    log_debug!("[engine] ignored stale timer ({:?}, epoch {}, generation {})", kind, epoch, generation);
                }
            }
            CoordinatorEvent::Completed {
                kind,
                epoch,
                request_id,
                result,
            } => {
                let conversation = self.store.active_in_epoch(epoch).map(|c| &*c);
                match self.coordinator.on_completed(kind, epoch, request_id, result, conversation) {
                    Some(completion) => self.deliver(epoch, completion),
                    None => log_debug!("[engine] dropped stale {:?} completion", kind),
                }
            }
        }
    }

    fn deliver(&mut self, epoch: u64, completion: Completion) {
        let Some(conversation) = self.store.active_in_epoch(epoch) else {
            return;
        };
        let contact_name = conversation.contact_name().to_string();

        match (completion.kind, completion.result) {
            (RequestKind::Replies, Ok(replies)) => {
                if !self.policy.revalidate_reply(conversation) {
                    log_debug!("[engine] user replied before suggestions arrived; dropping them");
                    return;
                }
                log_info!("[engine] {} reply suggestions for {}", replies.len(), contact_name);
                self.emit(EngineEvent::SuggestionsReady {
                    contact_name,
                    replies,
                    fallback: false,
                });
            }
            (RequestKind::Replies, Err(err)) => {
                log_warn!("[engine] reply suggestions failed for {}: {}", contact_name, err);
                self.policy.reply_failed(conversation);
                let event = match pick_fallback(&self.settings.fallback_replies) {
                    Some(reply) => EngineEvent::SuggestionsReady {
                        contact_name,
                        replies: vec![reply],
                        fallback: true,
                    },
                    None => EngineEvent::SuggestionsCleared { contact_name },
                };
                self.emit(event);
            }
            (RequestKind::Improvement, result) => {
                let draft = completion.draft.unwrap_or_default();
                match result {
                    Ok(suggestions) => {
                        self.policy.improvement_delivered(conversation);
                        self.emit(EngineEvent::ImprovementReady {
                            contact_name,
                            draft,
                            suggestions,
                        });
                    }
                    Err(err) => {
                        log_warn!("[engine] draft improvement failed for {}: {}", contact_name, err);
                        self.policy.improvement_failed(conversation);
                        self.emit(EngineEvent::ImprovementFailed {
                            contact_name,
                            draft,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Flushed {
                session,
                contact_name,
                batch,
                accepted,
                result,
            } => {
                if let Some(report) =
                    self.sync
                        .on_flushed(session, contact_name, batch, accepted, result, &mut self.store)
                {
                    self.emit(report.into());
                }
            }
            SyncEvent::ChatAccepted {
                session,
                contact_name,
                result,
            } => match result {
                Ok(chat) => {
                    if self.sync.on_accepted(session, std::slice::from_ref(&chat)) {
                        log_info!("[engine] chat {} accepted", chat.chat_name);
                        self.emit(EngineEvent::ChatAccepted { chat });
                    }
                }
                Err(err) => self.operation_failed(&format!("acceptChat {contact_name}"), err),
            },
            SyncEvent::AcceptedChats { session, result } => match result {
                Ok(chats) => {
                    if self.sync.on_accepted(session, &chats) {
                        self.emit(EngineEvent::AcceptedChats { chats });
                    }
                }
                Err(err) => self.operation_failed("acceptedChats", err),
            },
            SyncEvent::ChatMessages {
                contact_name,
                result,
            } => match result {
                Ok(messages) => self.emit(EngineEvent::ChatMessages {
                    contact_name,
                    messages,
                }),
                Err(err) => self.operation_failed(&format!("chatMessages {contact_name}"), err),
            },
        }
    }

    fn operation_failed(&self, operation: &str, err: EngineError) {
        log_warn!("[engine] {} failed: {}", operation, err);
        self.emit(EngineEvent::OperationFailed {
            operation: operation.to_string(),
            error: err.to_string(),
        });
    }

    async fn shutdown(&mut self) {
        self.coordinator.cancel_all();
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.sync.drain(&mut self.store)).await;
        match drained {
            Ok(reports) => {
                for report in reports {
                    self.emit(report.into());
                }
            }
            Err(_) => log_warn!(
                "[engine] final sync did not finish within {}s; unsynced messages stay in the outbox",
                SHUTDOWN_DRAIN_TIMEOUT.as_secs()
            ),
        }
    }
}

pub(crate) async fn engine_loop(
    mut state: EngineState,
    mut commands_rx: mpsc::UnboundedReceiver<EngineCommand>,
    mut coordinator_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    mut sync_rx: mpsc::UnboundedReceiver<SyncEvent>,
    cancel_token: CancellationToken,
) {
    state.prepare().await;

    let mut sync_ticker = tokio::time::interval(state.settings.sync_interval());
    sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("engine loop shutting down");
                break;
            }
            Some(event) = coordinator_rx.recv() => state.handle_coordinator_event(event),
            Some(event) = sync_rx.recv() => state.handle_sync_event(event),
            command = commands_rx.recv() => match command {
                Some(command) => state.handle_command(command).await,
                None => {
                    log_info!("engine command channel closed");
                    break;
                }
            },
            _ = sync_ticker.tick() => {
                let started = state.sync.flush_dirty(&mut state.store);
                if started > 0 {
                    log_debug!("[engine] periodic sync started for {} contacts", started);
                }
            }
        }
    }

    state.shutdown().await;
}
