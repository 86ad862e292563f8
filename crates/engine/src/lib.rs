//! Turns raw backup watch events into notification messages.

pub mod classifier;
pub mod processor;

pub use classifier::{classify, classify_backup};
pub use processor::{EventProcessor, ProcessError};
