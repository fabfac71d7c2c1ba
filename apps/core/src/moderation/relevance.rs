use super::classifier::Classifier;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceOutcome {
    pub is_relevant: bool,
    pub confidence: f32,
    pub reason: String,
}

/// Asks the classifier whether a question belongs to a course's subject.
///
/// Fails open: a disabled gate or a failed classifier call counts as relevant.
#[derive(Clone)]
pub struct SubjectRelevanceGate {
    classifier: Classifier,
    enabled: bool,
    threshold: f32,
}

impl SubjectRelevanceGate {
    pub fn new(classifier: Classifier, enabled: bool, threshold: f32) -> Self {
        Self {
            classifier,
            enabled,
            threshold,
        }
    }

    pub async fn check(&self, question: &str, subject: &str) -> RelevanceOutcome {
        if !self.enabled {
            return RelevanceOutcome {
                is_relevant: true,
                confidence: 0.0,
                reason: "Subject validation disabled".to_string(),
            };
        }

        match self.classifier.relevance(question, subject).await {
            Some(verdict) => {
                info!(
                    is_relevant = verdict.is_relevant,
                    confidence = verdict.confidence,
                    "Subject relevance checked"
                );
                RelevanceOutcome {
                    is_relevant: verdict.is_relevant,
                    confidence: verdict.confidence,
                    reason: verdict.reason,
                }
            }
            None => {
                warn!("Subject relevance classifier unavailable, allowing question");
                RelevanceOutcome {
                    is_relevant: true,
                    confidence: 0.0,
                    reason: "Subject validation unavailable".to_string(),
                }
            }
        }
    }

    /// An irrelevant verdict only rejects at or above the configured confidence.
    pub fn rejects(&self, outcome: &RelevanceOutcome) -> bool {
        !outcome.is_relevant && outcome.confidence >= self.threshold
    }
}
