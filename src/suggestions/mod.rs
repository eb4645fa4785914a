pub mod coordinator;
pub mod fallback;
pub mod service;

pub use coordinator::{
    Completion, CoordinatorEvent, RequestKind, RequestPlan, SuggestionRequestCoordinator,
    DEFAULT_REQUEST_SPACING,
};
pub use fallback::{default_fallback_replies, pick_fallback};
pub use service::{HttpSuggestionService, SuggestionRequest, SuggestionService};
