use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::models::{ConversationSnapshot, ObservationBatch};
use crate::settings::EngineSettings;
use crate::suggestions::{SuggestionRequestCoordinator, SuggestionService};
use crate::sync::{BackendClient, SyncQueue};

use super::commands::EngineCommand;
use super::events::EventSink;
use super::loop_worker::{engine_loop, EngineState};

/// External collaborators the engine talks to.
pub struct EngineServices {
    pub suggestions: Arc<dyn SuggestionService>,
    pub backend: Arc<dyn BackendClient>,
    pub db: Database,
    pub sink: Arc<dyn EventSink>,
}

/// Cheap, cloneable way to feed the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.commands_tx
            .send(command)
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn observe(&self, batch: ObservationBatch) -> EngineResult<()> {
        self.send(EngineCommand::Observe(batch))
    }

    pub fn improve_draft(&self, draft: impl Into<String>) -> EngineResult<()> {
        self.send(EngineCommand::ImproveDraft(draft.into()))
    }

    pub fn reset_chat(&self) -> EngineResult<()> {
        self.send(EngineCommand::ResetChat)
    }

    pub fn logout(&self) -> EngineResult<()> {
        self.send(EngineCommand::Logout)
    }

    pub fn accept_chat(&self, chat_name: impl Into<String>) -> EngineResult<()> {
        self.send(EngineCommand::AcceptChat(chat_name.into()))
    }

    pub fn accepted_chats(&self) -> EngineResult<()> {
        self.send(EngineCommand::ListAcceptedChats)
    }

    pub fn chat_messages(&self, chat_name: impl Into<String>, limit: usize) -> EngineResult<()> {
        self.send(EngineCommand::FetchMessages {
            contact_name: chat_name.into(),
            limit,
        })
    }

    pub fn flush_sync(&self) -> EngineResult<()> {
        self.send(EngineCommand::FlushSync)
    }

    /// State of the active conversation after every earlier command ran.
    pub async fn snapshot(&self) -> EngineResult<Option<ConversationSnapshot>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

pub struct EngineController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for EngineController {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, settings: EngineSettings, services: EngineServices) -> Result<EngineHandle> {
        if self.handle.is_some() {
            bail!("engine already running");
        }

        let (coordinator, coordinator_rx) =
            SuggestionRequestCoordinator::new(services.suggestions, settings.request_spacing());
        let coordinator = coordinator.with_context_messages(settings.context_messages);
        let (sync, sync_rx) = SyncQueue::new(
            services.backend,
            services.db,
            settings.backend.require_acceptance,
        );
        let state = EngineState::new(settings, coordinator, sync, services.sink);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(engine_loop(
            state,
            commands_rx,
            coordinator_rx,
            sync_rx,
            token_clone,
        ));
        info!("Engine started");

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(EngineHandle { commands_tx })
    }

    /// Cancel pending work, flush unsynced messages and wait for the task.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("engine task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
