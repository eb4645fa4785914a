pub mod algorithm;
pub mod config;
pub mod signals;

pub use algorithm::{MessageClassifier, Rejection};
pub use config::ClassifierConfig;
