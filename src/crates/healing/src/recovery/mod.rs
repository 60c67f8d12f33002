//! Failure recovery
//!
//! Classification of worker failures, the healing action table, and the
//! fallback answer used when recovery runs out.

pub mod classifier;
pub mod fallback;
pub mod strategy;

pub use classifier::{ClassifiedError, ErrorClassifier, ErrorKind};
pub use fallback::FallbackGenerator;
pub use strategy::{select_action, HealingAction};
