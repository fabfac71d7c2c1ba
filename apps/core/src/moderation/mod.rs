//! Submission gates: content moderation and subject relevance.

pub mod classifier;
pub mod gate;
pub mod relevance;
pub mod rules;

pub use classifier::{Classifier, Emotion, ModerationLabel, TopicCluster};
pub use gate::{ModerationGate, ModerationOutcome, ModerationSource};
pub use relevance::{RelevanceOutcome, SubjectRelevanceGate};
