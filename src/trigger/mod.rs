pub mod draft;
pub mod policy;
pub mod state;

pub use policy::{DraftDecision, ReplyDecision, TriggerPolicy};
pub use state::{TriggerAxes, TriggerState};
