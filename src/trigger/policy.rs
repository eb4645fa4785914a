use crate::models::Conversation;
use crate::trigger::draft::is_significant_edit;

/// Outcome of evaluating the reply axis after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDecision {
    /// Nothing to do.
    Idle,
    /// The other party spoke last; ask for reply suggestions.
    Request,
    /// The local user replied; pending or shown suggestions are stale.
    Discard,
    /// Suggestions for the current incoming run are already requested.
    AlreadyRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftDecision {
    Request(String),
    TooShort,
    InsignificantEdit,
}

/// Decides when conversation changes warrant new suggestion requests.
///
/// This is the only place that moves a conversation's trigger axes.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    min_draft_chars: usize,
    min_draft_growth: usize,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            min_draft_chars: 5,
            min_draft_growth: 5,
        }
    }
}

impl TriggerPolicy {
    pub fn new(min_draft_chars: usize, min_draft_growth: usize) -> Self {
        Self {
            min_draft_chars,
            min_draft_growth,
        }
    }

    /// Run after every successful append.
    pub fn evaluate(&self, conversation: &mut Conversation) -> ReplyDecision {
        let Some(last) = conversation.last() else {
            return ReplyDecision::Idle;
        };

        if !last.is_incoming {
            if conversation.triggers.reply_requested {
                conversation.triggers.reply_requested = false;
                return ReplyDecision::Discard;
            }
            return ReplyDecision::Idle;
        }

        if conversation.triggers.reply_requested {
            return ReplyDecision::AlreadyRequested;
        }

        conversation.triggers.reply_requested = true;
        ReplyDecision::Request
    }

    /// Explicit "improve my draft" invocation.
    pub fn evaluate_draft(&self, conversation: &mut Conversation, draft: &str) -> DraftDecision {
        if draft.trim().chars().count() < self.min_draft_chars {
            return DraftDecision::TooShort;
        }

        let previous = conversation.triggers.improved_draft.as_deref();
        if !is_significant_edit(previous, draft, self.min_draft_growth) {
            return DraftDecision::InsignificantEdit;
        }

        conversation.triggers.improvement_requested = true;
        conversation.triggers.improved_draft = Some(draft.to_string());
        DraftDecision::Request(draft.to_string())
    }

    /// Re-check the reply trigger before showing a result.
    ///
    /// Returns false (and clears the axis) when the local user has replied
    /// since the request went out.
    pub fn revalidate_reply(&self, conversation: &mut Conversation) -> bool {
        if conversation.triggers.reply_requested && conversation.last_is_incoming() {
            return true;
        }
        conversation.triggers.reply_requested = false;
        false
    }

    pub fn reply_failed(&self, conversation: &mut Conversation) {
        conversation.triggers.reply_requested = false;
    }

    pub fn improvement_delivered(&self, conversation: &mut Conversation) {
        conversation.triggers.improvement_requested = false;
    }

    /// Forget the baseline too, so retrying the same draft fires again.
    pub fn improvement_failed(&self, conversation: &mut Conversation) {
        conversation.triggers.improvement_requested = false;
        conversation.triggers.improved_draft = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassifiedMessage;
    use crate::trigger::TriggerState;
    use tokio::time::Instant;

    fn message(text: &str, is_incoming: bool) -> ClassifiedMessage {
        ClassifiedMessage {
            text: text.into(),
            is_incoming,
            confidence_signals: Default::default(),
            timestamp_millis: 0,
            display_timestamp: "12:00".into(),
            contact_name: "Alice".into(),
        }
    }

    fn conversation(messages: &[(&str, bool)]) -> Conversation {
        let mut conversation = Conversation::new("Alice", 1, Instant::now());
        for (text, incoming) in messages {
            conversation.history.push_back(message(text, *incoming));
        }
        conversation
    }

    #[test]
    fn empty_history_is_idle() {
        let mut conv = conversation(&[]);
        assert_eq!(TriggerPolicy::default().evaluate(&mut conv), ReplyDecision::Idle);
        assert_eq!(conv.trigger_state(), TriggerState::None);
    }

    #[test]
    fn incoming_requests_once() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[("Hi", true)]);

        assert_eq!(policy.evaluate(&mut conv), ReplyDecision::Request);
        assert_eq!(conv.trigger_state(), TriggerState::SuggestionsRequested);

        conv.history.push_back(message("You there?", true));
        assert_eq!(policy.evaluate(&mut conv), ReplyDecision::AlreadyRequested);
        assert_eq!(conv.trigger_state(), TriggerState::SuggestionsRequested);
    }

    #[test]
    fn outgoing_discards_pending_suggestions() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[("Hi", true)]);
        policy.evaluate(&mut conv);

        conv.history.push_back(message("Hey!", false));
        assert_eq!(policy.evaluate(&mut conv), ReplyDecision::Discard);
        assert_eq!(conv.trigger_state(), TriggerState::None);

        conv.history.push_back(message("Still there?", false));
        assert_eq!(policy.evaluate(&mut conv), ReplyDecision::Idle);
    }

    #[test]
    fn revalidation_clears_when_user_replied() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[("Hi", true)]);
        policy.evaluate(&mut conv);
        assert!(policy.revalidate_reply(&mut conv));

        conv.history.push_back(message("Hello", false));
        assert!(!policy.revalidate_reply(&mut conv));
        assert_eq!(conv.trigger_state(), TriggerState::None);
    }

    #[test]
    fn failure_resets_to_none_so_the_next_incoming_fires() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[("Hi", true)]);
        policy.evaluate(&mut conv);
        policy.reply_failed(&mut conv);
        assert_eq!(conv.trigger_state(), TriggerState::None);

        conv.history.push_back(message("Hello??", true));
        assert_eq!(policy.evaluate(&mut conv), ReplyDecision::Request);
    }

    #[test]
    fn draft_improvement_suppresses_small_edits() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[]);

        assert_eq!(
            policy.evaluate_draft(&mut conv, "hey I wa"),
            DraftDecision::Request("hey I wa".into())
        );
        assert_eq!(conv.trigger_state(), TriggerState::ImprovementRequested);
        assert_eq!(
            policy.evaluate_draft(&mut conv, "hey I wanted to"),
            DraftDecision::Request("hey I wanted to".into())
        );
        assert_eq!(
            policy.evaluate_draft(&mut conv, "hey I wanted to "),
            DraftDecision::InsignificantEdit
        );
    }

    #[test]
    fn short_drafts_are_ignored() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[]);
        assert_eq!(policy.evaluate_draft(&mut conv, "  hey  "), DraftDecision::TooShort);
        assert_eq!(conv.trigger_state(), TriggerState::None);
    }

    #[test]
    fn failed_improvement_can_be_retried_with_the_same_draft() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[]);
        policy.evaluate_draft(&mut conv, "could you send it");
        policy.improvement_failed(&mut conv);
        assert_eq!(conv.trigger_state(), TriggerState::None);
        assert_eq!(
            policy.evaluate_draft(&mut conv, "could you send it"),
            DraftDecision::Request("could you send it".into())
        );
    }

    #[test]
    fn delivered_improvement_keeps_the_baseline() {
        let policy = TriggerPolicy::default();
        let mut conv = conversation(&[]);
        policy.evaluate_draft(&mut conv, "could you send it");
        policy.improvement_delivered(&mut conv);
        assert_eq!(conv.trigger_state(), TriggerState::None);
        assert_eq!(
            policy.evaluate_draft(&mut conv, "could you send it"),
            DraftDecision::InsignificantEdit
        );
    }
}
