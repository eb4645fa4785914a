pub mod commands;
pub mod controller;
pub mod events;
mod loop_worker;

pub use commands::{EngineCommand, HostEvent};
pub use controller::{EngineController, EngineHandle, EngineServices};
pub use events::{ChannelSink, EngineEvent, EventSink, StdoutSink};
