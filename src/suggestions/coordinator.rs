use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::conversation_context;
use crate::error::EngineResult;
use crate::models::Conversation;

use super::service::{SuggestionRequest, SuggestionService};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(3000);
pub const DEFAULT_CONTEXT_MESSAGES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Replies,
    Improvement,
}

/// Posted back into the engine queue by timers and request tasks.
#[derive(Debug)]
pub enum CoordinatorEvent {
    TimerFired {
        kind: RequestKind,
        epoch: u64,
        generation: u64,
    },
    Completed {
        kind: RequestKind,
        epoch: u64,
        request_id: Uuid,
        result: EngineResult<Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPlan {
    Dispatched,
    /// Spacing window still open; a single-shot timer will dispatch later.
    Scheduled(Duration),
    /// Folded into an armed timer or an in-flight request.
    Coalesced,
}

/// A result that survived staleness checks and should reach the policy.
#[derive(Debug)]
pub struct Completion {
    pub kind: RequestKind,
    pub draft: Option<String>,
    pub result: EngineResult<Vec<String>>,
}

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

struct InFlight {
    request_id: Uuid,
    draft: Option<String>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Slot {
    armed: Option<ArmedTimer>,
    in_flight: Option<InFlight>,
}

impl Slot {
    fn cancel(&mut self) {
        if let Some(timer) = self.armed.take() {
            timer.cancel.cancel();
        }
        if let Some(request) = self.in_flight.take() {
            request.cancel.cancel();
        }
    }

    fn is_busy(&self) -> bool {
        self.armed.is_some() || self.in_flight.is_some()
    }
}

/// Issues at most one request per trigger type for the active conversation.
///
/// Every timer and request is tagged with the conversation epoch and a
/// generation; events whose tags no longer match are dropped, so a late
/// callback can never act on a reset or switched-away conversation.
pub struct SuggestionRequestCoordinator {
    service: Arc<dyn SuggestionService>,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    spacing: Duration,
    context_messages: usize,
    epoch: u64,
    generation: u64,
    replies: Slot,
    improvement: Slot,
    queued_draft: Option<String>,
}

impl SuggestionRequestCoordinator {
    pub fn new(
        service: Arc<dyn SuggestionService>,
        spacing: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            service,
            events_tx,
            spacing,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
            epoch: 0,
            generation: 0,
            replies: Slot::default(),
            improvement: Slot::default(),
            queued_draft: None,
        };
        (coordinator, events_rx)
    }

    pub fn with_context_messages(mut self, context_messages: usize) -> Self {
        self.context_messages = context_messages.max(1);
        self
    }

    pub fn is_busy(&self, kind: RequestKind) -> bool {
        self.slot(kind).is_busy()
    }

    pub fn has_in_flight(&self, kind: RequestKind) -> bool {
        self.slot(kind).in_flight.is_some()
    }

    /// Ask for reply suggestions, honoring the minimum spacing since the
    /// conversation's last request.
    ///
    /// A conversation is stamped as if it had just made a request when it is
    /// created or reset, so the first request in a fresh chat also waits out
    /// the spacing window.
    pub fn request_replies(&mut self, conversation: &mut Conversation, now: Instant) -> RequestPlan {
        self.follow_epoch(conversation.epoch());

        if self.replies.is_busy() {
            log_debug!("[coordinator] reply request pending; coalescing trigger");
            return RequestPlan::Coalesced;
        }

        let elapsed = now.saturating_duration_since(conversation.last_request_at());
        if elapsed >= self.spacing {
            self.dispatch_replies(conversation, now);
            return RequestPlan::Dispatched;
        }

        let remaining = self.spacing - elapsed;
        self.arm_timer(RequestKind::Replies, now + remaining);
        log_debug!(
            "[coordinator] reply request for {} scheduled in {}ms",
            conversation.contact_name(),
            remaining.as_millis()
        );
        RequestPlan::Scheduled(remaining)
    }

    /// Ask for improvements of `draft`; a newer draft submitted while one is
    /// in flight replaces any earlier queued one.
    pub fn request_improvement(&mut self, conversation: &Conversation, draft: String) -> RequestPlan {
        self.follow_epoch(conversation.epoch());

        if self.improvement.in_flight.is_some() {
            self.queued_draft = Some(draft);
            return RequestPlan::Coalesced;
        }

        self.dispatch_improvement(conversation, draft);
        RequestPlan::Dispatched
    }

    /// Armed timer fired. Dispatches when the tags still match and the
    /// conversation still wants replies.
    pub fn on_timer_fired(
        &mut self,
        kind: RequestKind,
        epoch: u64,
        generation: u64,
        conversation: Option<&mut Conversation>,
        now: Instant,
    ) -> bool {
        if epoch != self.epoch {
            return false;
        }
        let matches = self
            .slot(kind)
            .armed
            .as_ref()
            .map(|t| t.generation == generation)
            .unwrap_or(false);
        if !matches {
            return false;
        }
        self.slot_mut(kind).armed = None;

        let Some(conversation) = conversation.filter(|c| c.epoch() == epoch) else {
            return false;
        };
        if kind != RequestKind::Replies || !conversation.triggers.reply_requested() {
            return false;
        }

        self.dispatch_replies(conversation, now);
        true
    }

    /// Request finished. Returns the completion when it is still current.
    ///
    /// Reply completions are always handed back; the caller revalidates the
    /// trigger before showing them. An improvement completion superseded by a
    /// queued draft is dropped and the queued draft dispatched.
    pub fn on_completed(
        &mut self,
        kind: RequestKind,
        epoch: u64,
        request_id: Uuid,
        result: EngineResult<Vec<String>>,
        conversation: Option<&Conversation>,
    ) -> Option<Completion> {
        if epoch != self.epoch {
            return None;
        }
        let current = self
            .slot(kind)
            .in_flight
            .as_ref()
            .map(|r| r.request_id == request_id)
            .unwrap_or(false);
        if !current {
            return None;
        }
        let finished = self.slot_mut(kind).in_flight.take()?;
        let conversation = conversation.filter(|c| c.epoch() == epoch);

        if kind == RequestKind::Improvement {
            if let (Some(draft), Some(conversation)) = (self.queued_draft.take(), conversation) {
                log_info!("[coordinator] improvement result superseded by newer draft");
                self.dispatch_improvement(conversation, draft);
                return None;
            }
        }

        Some(Completion {
            kind,
            draft: finished.draft,
            result,
        })
    }

    pub fn cancel(&mut self, kind: RequestKind) {
        self.slot_mut(kind).cancel();
        if kind == RequestKind::Improvement {
            self.queued_draft = None;
        }
    }

    /// Drop every timer and request; used on switch, reset and shutdown.
    pub fn cancel_all(&mut self) {
        self.replies.cancel();
        self.improvement.cancel();
        self.queued_draft = None;
        self.generation += 1;
    }

    fn follow_epoch(&mut self, epoch: u64) {
        if self.epoch != epoch {
            self.cancel_all();
            self.epoch = epoch;
        }
    }

    fn slot(&self, kind: RequestKind) -> &Slot {
        match kind {
            RequestKind::Replies => &self.replies,
            RequestKind::Improvement => &self.improvement,
        }
    }

    fn slot_mut(&mut self, kind: RequestKind) -> &mut Slot {
        match kind {
            RequestKind::Replies => &mut self.replies,
            RequestKind::Improvement => &mut self.improvement,
        }
    }

    fn arm_timer(&mut self, kind: RequestKind, deadline: Instant) {
        self.generation += 1;
        let generation = self.generation;
        let epoch = self.epoch;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = events_tx.send(CoordinatorEvent::TimerFired { kind, epoch, generation });
                }
                _ = token.cancelled() => {}
            }
        });

        if let Some(previous) = self.slot_mut(kind).armed.replace(ArmedTimer { generation, cancel }) {
            previous.cancel.cancel();
        }
    }

    fn dispatch_replies(&mut self, conversation: &mut Conversation, now: Instant) {
        conversation.last_request_at = now;
        let request = SuggestionRequest {
            conversation_context: conversation_context(conversation, self.context_messages),
            draft_text: None,
        };
        log_info!(
            "[coordinator] requesting reply suggestions for {} ({} messages of context)",
            conversation.contact_name(),
            conversation.len().min(self.context_messages)
        );
        self.spawn_request(RequestKind::Replies, request, None);
    }

    fn dispatch_improvement(&mut self, conversation: &Conversation, draft: String) {
        let request = SuggestionRequest {
            conversation_context: conversation_context(conversation, self.context_messages),
            draft_text: Some(draft.clone()),
        };
        log_info!(
            "[coordinator] requesting draft improvement for {}",
            conversation.contact_name()
        );
        self.spawn_request(RequestKind::Improvement, request, Some(draft));
    }

    fn spawn_request(&mut self, kind: RequestKind, request: SuggestionRequest, draft: Option<String>) {
        let request_id = Uuid::new_v4();
        let epoch = self.epoch;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let service = Arc::clone(&self.service);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = service.complete(request) => {
                    let _ = events_tx.send(CoordinatorEvent::Completed { kind, epoch, request_id, result });
                }
                _ = token.cancelled() => {}
            }
        });

        self.slot_mut(kind).in_flight = Some(InFlight {
            request_id,
            draft,
            cancel,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::ClassifiedMessage;
    use crate::trigger::{ReplyDecision, TriggerPolicy};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingService {
        requests: Mutex<Vec<(Instant, SuggestionRequest)>>,
        fail: bool,
        latency: Duration,
    }

    #[async_trait]
    impl SuggestionService for RecordingService {
        async fn complete(&self, request: SuggestionRequest) -> EngineResult<Vec<String>> {
            self.requests.lock().unwrap().push((Instant::now(), request));
            tokio::time::sleep(self.latency).await;
            if self.fail {
                return Err(EngineError::suggestion("boom"));
            }
            Ok(vec!["Sure".into()])
        }
    }

    impl RecordingService {
        fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn incoming(text: &str) -> ClassifiedMessage {
        ClassifiedMessage {
            text: text.into(),
            is_incoming: true,
            confidence_signals: Default::default(),
            timestamp_millis: 0,
            display_timestamp: String::new(),
            contact_name: "Alice".into(),
        }
    }

    fn requested_conversation(epoch: u64, started: Instant) -> Conversation {
        let mut conversation = Conversation::new("Alice", epoch, started);
        conversation.history.push_back(incoming("Hi"));
        TriggerPolicy::default().evaluate(&mut conversation);
        conversation
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_inside_the_window_collapse_into_one_request() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let started = Instant::now();
        let mut conversation = requested_conversation(1, started);

        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Scheduled(Duration::from_millis(3000))
        );
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Coalesced
        );

        let event = events.recv().await.unwrap();
        let CoordinatorEvent::TimerFired { kind, epoch, generation } = event else {
            panic!("expected timer event, got {event:?}");
        };
        let fired_at = Instant::now();
        assert_eq!(fired_at.duration_since(started), Duration::from_millis(3000));
        assert!(coordinator.on_timer_fired(kind, epoch, generation, Some(&mut conversation), fired_at));

        let completed = events.recv().await.unwrap();
        assert!(matches!(completed, CoordinatorEvent::Completed { kind: RequestKind::Replies, .. }));
        assert_eq!(service.count(), 1);
        assert_eq!(conversation.last_request_at(), fired_at);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_immediately_once_spacing_has_elapsed() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let mut conversation = requested_conversation(1, Instant::now());

        tokio::time::advance(Duration::from_millis(5000)).await;
        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Dispatched
        );
        assert!(coordinator.has_in_flight(RequestKind::Replies));

        let CoordinatorEvent::Completed { kind, epoch, request_id, result } = events.recv().await.unwrap() else {
            panic!("expected completion");
        };
        let completion = coordinator
            .on_completed(kind, epoch, request_id, result, Some(&conversation))
            .expect("current completion");
        assert_eq!(completion.result.unwrap(), vec!["Sure".to_string()]);
        assert!(!coordinator.is_busy(RequestKind::Replies));

        // next trigger respects spacing from that dispatch
        tokio::time::advance(Duration::from_millis(1200)).await;
        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Scheduled(Duration::from_millis(1800))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn incoming_message_mid_flight_does_not_hold_back_the_result() {
        let service = Arc::new(RecordingService {
            latency: Duration::from_millis(2000),
            ..Default::default()
        });
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let policy = TriggerPolicy::default();
        let mut conversation = requested_conversation(1, Instant::now());

        tokio::time::advance(Duration::from_millis(5000)).await;
        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Dispatched
        );

        // the contact keeps typing while the service is working
        tokio::time::advance(Duration::from_millis(500)).await;
        conversation.history.push_back(incoming("are you there?"));
        assert_eq!(policy.evaluate(&mut conversation), ReplyDecision::AlreadyRequested);
        assert_eq!(
            coordinator.request_replies(&mut conversation, Instant::now()),
            RequestPlan::Coalesced
        );

        let CoordinatorEvent::Completed { kind, epoch, request_id, result } = events.recv().await.unwrap() else {
            panic!("expected completion");
        };
        let completion = coordinator
            .on_completed(kind, epoch, request_id, result, Some(&conversation))
            .expect("in-flight result is still current");
        assert_eq!(completion.result.unwrap(), vec!["Sure".to_string()]);
        assert!(policy.revalidate_reply(&mut conversation));
        assert!(!coordinator.is_busy(RequestKind::Replies));

        settle().await;
        assert!(events.try_recv().is_err());
        assert_eq!(service.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_epoch_silences_armed_timers() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let mut first = requested_conversation(1, Instant::now());
        coordinator.request_replies(&mut first, Instant::now());

        // a different conversation takes over before the timer fires
        let second = Conversation::new("Bob", 2, Instant::now());
        coordinator.request_improvement(&second, "can we talk later".into());

        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, CoordinatorEvent::TimerFired { epoch: 1, .. }),
                "cancelled timer must not fire"
            );
        }
        // only the improvement reached the service
        assert_eq!(service.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_ignored() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, _events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let mut conversation = requested_conversation(1, Instant::now());
        coordinator.request_replies(&mut conversation, Instant::now());

        assert!(!coordinator.on_timer_fired(RequestKind::Replies, 1, 999, Some(&mut conversation), Instant::now()));
        assert!(!coordinator.on_timer_fired(RequestKind::Replies, 7, 1, Some(&mut conversation), Instant::now()));
        assert!(coordinator.is_busy(RequestKind::Replies));
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_after_cancel_is_a_no_op() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, _events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let mut conversation = requested_conversation(1, Instant::now());
        tokio::time::advance(Duration::from_millis(5000)).await;
        coordinator.request_replies(&mut conversation, Instant::now());
        coordinator.cancel(RequestKind::Replies);

        let completion = coordinator.on_completed(
            RequestKind::Replies,
            1,
            Uuid::new_v4(),
            Ok(vec!["late".into()]),
            Some(&conversation),
        );
        assert!(completion.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_draft_supersedes_the_in_flight_one() {
        let service = Arc::new(RecordingService::default());
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let conversation = Conversation::new("Alice", 1, Instant::now());

        assert_eq!(
            coordinator.request_improvement(&conversation, "hey I wa".into()),
            RequestPlan::Dispatched
        );
        assert_eq!(
            coordinator.request_improvement(&conversation, "hey I wanted to".into()),
            RequestPlan::Coalesced
        );

        let CoordinatorEvent::Completed { kind, epoch, request_id, result } = events.recv().await.unwrap() else {
            panic!("expected completion");
        };
        assert!(coordinator
            .on_completed(kind, epoch, request_id, result, Some(&conversation))
            .is_none());

        let CoordinatorEvent::Completed { kind, epoch, request_id, result } = events.recv().await.unwrap() else {
            panic!("expected completion");
        };
        let completion = coordinator
            .on_completed(kind, epoch, request_id, result, Some(&conversation))
            .unwrap();
        assert_eq!(completion.draft.as_deref(), Some("hey I wanted to"));

        let drafts: Vec<Option<String>> = service
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.draft_text.clone())
            .collect();
        assert_eq!(drafts, vec![Some("hey I wa".into()), Some("hey I wanted to".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_handed_back_as_completions() {
        let service = Arc::new(RecordingService {
            fail: true,
            ..Default::default()
        });
        let (mut coordinator, mut events) =
            SuggestionRequestCoordinator::new(service.clone(), DEFAULT_REQUEST_SPACING);
        let mut conversation = requested_conversation(1, Instant::now());
        tokio::time::advance(Duration::from_millis(3000)).await;
        coordinator.request_replies(&mut conversation, Instant::now());

        let CoordinatorEvent::Completed { kind, epoch, request_id, result } = events.recv().await.unwrap() else {
            panic!("expected completion");
        };
        let completion = coordinator
            .on_completed(kind, epoch, request_id, result, Some(&conversation))
            .unwrap();
        assert!(completion.result.is_err());
    }
}
