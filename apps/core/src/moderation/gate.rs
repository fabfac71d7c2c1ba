use super::classifier::{Classifier, ModerationLabel};
use super::rules::{contains_profanity, rule_based_spam_score};
use serde::Serialize;
use tracing::{info, warn};

/// Spam scores above this block without consulting the classifier.
const SPAM_BLOCK_SCORE: f32 = 0.6;
const PROFANITY_CONFIDENCE: f32 = 0.95;
/// Classifier verdicts other than SAFE block above this confidence.
const CLASSIFIER_BLOCK_CONFIDENCE: f32 = 0.6;
/// A blocked outcome only rejects the submission above this confidence.
const REJECT_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationSource {
    RuleBased,
    CustomList,
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModerationOutcome {
    pub label: ModerationLabel,
    pub confidence: f32,
    pub blocked: bool,
    pub source: ModerationSource,
}

impl ModerationOutcome {
    /// Whether the submission must be refused. Stricter than `blocked`.
    pub fn rejects(&self) -> bool {
        self.blocked && self.confidence > REJECT_CONFIDENCE
    }
}

/// Spam rules, then the local word list, then the LLM classifier; first hit wins.
#[derive(Clone)]
pub struct ModerationGate {
    bad_words: Vec<String>,
    classifier: Classifier,
}

impl ModerationGate {
    pub fn new(bad_words: Vec<String>, classifier: Classifier) -> Self {
        Self {
            bad_words,
            classifier,
        }
    }

    pub async fn check(&self, text: &str) -> ModerationOutcome {
        let spam_score = rule_based_spam_score(text);
        if spam_score > SPAM_BLOCK_SCORE {
            info!(spam_score, "Question blocked by spam rules");
            return ModerationOutcome {
                label: ModerationLabel::Spam,
                confidence: spam_score,
                blocked: true,
                source: ModerationSource::RuleBased,
            };
        }

        if contains_profanity(text, &self.bad_words) {
            info!("Question blocked by the profanity list");
            return ModerationOutcome {
                label: ModerationLabel::Harassment,
                confidence: PROFANITY_CONFIDENCE,
                blocked: true,
                source: ModerationSource::CustomList,
            };
        }

        match self.classifier.moderate(text).await {
            Some(verdict) => ModerationOutcome {
                label: verdict.label,
                confidence: verdict.confidence,
                blocked: verdict.label != ModerationLabel::Safe
                    && verdict.confidence > CLASSIFIER_BLOCK_CONFIDENCE,
                source: ModerationSource::Llm,
            },
            None => {
                warn!("Moderation classifier unavailable, allowing question");
                ModerationOutcome {
                    label: ModerationLabel::Error,
                    confidence: 0.0,
                    blocked: false,
                    source: ModerationSource::Llm,
                }
            }
        }
    }
}
