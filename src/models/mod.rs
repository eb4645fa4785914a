pub mod conversation;
pub mod message;
pub mod observation;

pub use conversation::{Conversation, ConversationSnapshot};
pub use message::{ClassifiedMessage, ConfidenceSignal, MessagePayload};
pub use observation::{Observation, ObservationBatch};
