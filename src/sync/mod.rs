pub mod backend;
pub mod queue;

pub use backend::{AcceptedChat, BackendClient, HttpBackendClient};
pub use queue::{FlushReport, SyncEvent, SyncQueue, SyncStatus};
