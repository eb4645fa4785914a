pub mod context;
pub mod dedup;
pub mod store;

pub use context::conversation_context;
pub use dedup::Deduplicator;
pub use store::{AppendOutcome, ConversationStore, Focus, DEFAULT_HISTORY_LIMIT};
