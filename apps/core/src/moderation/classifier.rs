//! LLM-backed classifiers with a strict parse-or-default contract.
//!
//! Every call builds a prompt asking for bare JSON, strips Markdown code fences from the
//! reply and parses it. A reply that fails to parse is treated the same as a failed call.

use crate::actors::traits::LlmActor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are a classification service. Reply with valid JSON only.";

/// Moderation categories. `Error` is never produced by the model; it marks a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationLabel {
    Safe,
    HateSpeech,
    Harassment,
    Spam,
    Sexual,
    Violence,
    Error,
}

impl FromStr for ModerationLabel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Self::Safe),
            "HATE_SPEECH" => Ok(Self::HateSpeech),
            "HARASSMENT" => Ok(Self::Harassment),
            "SPAM" => Ok(Self::Spam),
            "SEXUAL" => Ok(Self::Sexual),
            "VIOLENCE" => Ok(Self::Violence),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ModerationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Safe => "SAFE",
            Self::HateSpeech => "HATE_SPEECH",
            Self::Harassment => "HARASSMENT",
            Self::Spam => "SPAM",
            Self::Sexual => "SEXUAL",
            Self::Violence => "VIOLENCE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Emotion {
    Confused,
    Frustrated,
    Curious,
    Anxious,
    Neutral,
}

impl FromStr for Emotion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONFUSED" => Ok(Self::Confused),
            "FRUSTRATED" => Ok(Self::Frustrated),
            "CURIOUS" => Ok(Self::Curious),
            "ANXIOUS" => Ok(Self::Anxious),
            "NEUTRAL" => Ok(Self::Neutral),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModerationVerdict {
    pub label: ModerationLabel,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionVerdict {
    pub emotion: Emotion,
    pub confidence: f32,
}

impl Default for EmotionVerdict {
    fn default() -> Self {
        Self {
            emotion: Emotion::Neutral,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
    pub confidence: f32,
    pub reason: String,
}

/// A group of pending questions sharing a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    pub topic: String,
    pub questions: Vec<String>,
}

/// Removes Markdown code fences (```` ``` ```` and ```` ```json ````) around a model reply.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        trimmed
            .replace("```json", "")
            .replace("```", "")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn clamp_confidence(value: f64) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

#[derive(Deserialize)]
struct RawModeration {
    label: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct RawEmotion {
    emotion: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct RawRelevance {
    is_relevant: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Parses `{"label": .., "confidence": ..}`. Unknown labels are rejected.
pub fn parse_moderation(raw: &str) -> Option<ModerationVerdict> {
    let parsed: RawModeration = serde_json::from_str(&strip_code_fences(raw)).ok()?;
    let label = parsed.label.parse::<ModerationLabel>().ok()?;
    Some(ModerationVerdict {
        label,
        confidence: clamp_confidence(parsed.confidence),
    })
}

/// Parses `{"emotion": .., "confidence": ..}`, falling back to NEUTRAL with confidence 0.
pub fn parse_emotion(raw: &str) -> EmotionVerdict {
    serde_json::from_str::<RawEmotion>(&strip_code_fences(raw))
        .ok()
        .and_then(|parsed| {
            parsed.emotion.parse::<Emotion>().ok().map(|emotion| EmotionVerdict {
                emotion,
                confidence: clamp_confidence(parsed.confidence),
            })
        })
        .unwrap_or_default()
}

pub fn parse_relevance(raw: &str) -> Option<RelevanceVerdict> {
    let parsed: RawRelevance = serde_json::from_str(&strip_code_fences(raw)).ok()?;
    Some(RelevanceVerdict {
        is_relevant: parsed.is_relevant,
        confidence: clamp_confidence(parsed.confidence),
        reason: parsed.reason,
    })
}

/// Parses `[{"topic": .., "questions": [..]}]`; anything else yields no clusters.
pub fn parse_clusters(raw: &str) -> Vec<TopicCluster> {
    serde_json::from_str(&strip_code_fences(raw)).unwrap_or_default()
}

fn moderation_prompt(text: &str) -> String {
    format!(
        "You are a strict academic content moderation AI.\n\
         Classify the message into ONE of these categories:\n\
         SAFE, HATE_SPEECH, HARASSMENT, SPAM, SEXUAL, VIOLENCE\n\
         Message: {:?}\n\
         Return ONLY valid JSON like:\n\
         {{\"label\": \"SAFE\", \"confidence\": 0.95}}",
        text
    )
}

fn emotion_prompt(text: &str) -> String {
    format!(
        "You are an AI emotion detection system for classroom analytics.\n\
         Classify the emotional tone into ONE of: CONFUSED, FRUSTRATED, CURIOUS, ANXIOUS, NEUTRAL\n\
         Message: {:?}\n\
         Return ONLY valid JSON: {{\"emotion\": \"CONFUSED\", \"confidence\": 0.85}}",
        text
    )
}

fn relevance_prompt(question: &str, subject: &str) -> String {
    format!(
        "You check whether a student's question belongs to a course.\n\
         Course subject: {:?}\n\
         Question: {:?}\n\
         Decide if the question is about this subject or a closely related topic.\n\
         Return ONLY valid JSON like:\n\
         {{\"is_relevant\": true, \"confidence\": 0.9, \"reason\": \"short explanation\"}}",
        subject, question
    )
}

fn cluster_prompt(questions: &[String]) -> String {
    let listed = questions
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an AI classroom assistant.\n\
         Group the following student questions into logical topic clusters.\n\
         Return ONLY valid JSON like:\n\
         [{{\"topic\": \"Topic Name\", \"questions\": [\"q1\", \"q2\"]}}]\n\
         Questions:\n{}",
        listed
    )
}

/// Sends classification prompts through the shared LLM actor.
#[derive(Clone)]
pub struct Classifier {
    llm: Arc<dyn LlmActor>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmActor>) -> Self {
        Self { llm }
    }

    async fn ask(&self, prompt: String) -> Option<String> {
        match self
            .llm
            .complete(prompt, Some(SYSTEM_PROMPT.to_string()))
            .await
        {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!("Classifier call failed: {}", e);
                None
            }
        }
    }

    /// `None` when the call failed or the reply was not a valid verdict.
    pub async fn moderate(&self, text: &str) -> Option<ModerationVerdict> {
        let reply = self.ask(moderation_prompt(text)).await?;
        let verdict = parse_moderation(&reply);
        if verdict.is_none() {
            warn!("Unparseable moderation verdict: {}", reply);
        }
        verdict
    }

    pub async fn relevance(&self, question: &str, subject: &str) -> Option<RelevanceVerdict> {
        let reply = self.ask(relevance_prompt(question, subject)).await?;
        let verdict = parse_relevance(&reply);
        if verdict.is_none() {
            warn!("Unparseable relevance verdict: {}", reply);
        }
        verdict
    }

    pub async fn emotion(&self, text: &str) -> EmotionVerdict {
        match self.ask(emotion_prompt(text)).await {
            Some(reply) => parse_emotion(&reply),
            None => EmotionVerdict::default(),
        }
    }

    pub async fn clusters(&self, questions: &[String]) -> Vec<TopicCluster> {
        if questions.is_empty() {
            return Vec::new();
        }
        match self.ask(cluster_prompt(questions)).await {
            Some(reply) => parse_clusters(&reply),
            None => Vec::new(),
        }
    }
}
