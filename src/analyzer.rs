//! Text-analysis seam
//!
//! The classifier talks to the outside world only through [`TextAnalyzer`].
//! Responses are treated as untrusted text; validation lives in the classifier.
//!
//! [`HeuristicAnalyzer`] is an offline responder built on static keyword
//! lists. It answers in the same shapes the prompts ask the LLM for, so the
//! whole pipeline runs without network access.

use crate::error::ClassifierError;
use crate::models::ContentKind;
use async_trait::async_trait;
use serde_json::json;

/// Which dimension of the classification a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Risk,
    Keywords,
    Sentiment,
    /// Themes, recommendations and reflective questions. Journals only.
    Insights,
    /// Short free-text summary. Journals only.
    Summary,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Risk => "risk",
            Dimension::Keywords => "keywords",
            Dimension::Sentiment => "sentiment",
            Dimension::Insights => "insights",
            Dimension::Summary => "summary",
        }
    }
}

/// One outbound analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub dimension: Dimension,
    pub kind: ContentKind,
    /// The raw content being analysed
    pub text: String,
    /// Fully rendered instruction for prompt-driven providers
    pub prompt: String,
}

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ClassifierError>;
}

/// Static keyword lists, zero allocation
const CRITICAL_PHRASES: &[&str] = &[
    "end it all", "kill myself", "suicide", "suicidal", "want to die",
    "no reason to live", "better off dead", "take my own life", "end my life",
];

const HIGH_PHRASES: &[&str] = &[
    "hurt myself", "self-harm", "self harm", "cutting", "overdose",
    "hopeless", "worthless", "can't go on", "cant go on", "give up on everything",
];

const MEDIUM_PHRASES: &[&str] = &[
    "depressed", "anxious", "anxiety", "panic", "lonely", "alone",
    "overwhelmed", "can't sleep", "stressed", "crying", "exhausted",
];

const POSITIVE_WORDS: &[&str] = &[
    "happy", "grateful", "calm", "excited", "proud", "relaxed", "good",
    "better", "hopeful", "fun", "love", "peaceful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "sad", "angry", "tired", "afraid", "scared", "hate", "bad", "worse",
    "hopeless", "worthless", "lonely", "anxious", "stressed", "depressed", "die",
];

const TOPIC_WORDS: &[&str] = &[
    "exam", "exams", "study", "grades", "assignment", "family", "friends",
    "sleep", "work", "money", "relationship", "roommate", "class", "deadline",
];

/// Keyword-driven analyzer for offline operation and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn assess_risk(text: &str) -> &'static str {
        let lowered = text.to_lowercase();
        let has_any = |phrases: &[&str]| phrases.iter().any(|p| lowered.contains(p));

        if has_any(CRITICAL_PHRASES) {
            "critical"
        } else if has_any(HIGH_PHRASES) {
            "high"
        } else if has_any(MEDIUM_PHRASES) {
            "medium"
        } else {
            "low"
        }
    }

    fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut found: Vec<String> = Vec::new();

        for term in TOPIC_WORDS
            .iter()
            .chain(MEDIUM_PHRASES)
            .chain(HIGH_PHRASES)
            .chain(NEGATIVE_WORDS)
            .chain(POSITIVE_WORDS)
        {
            if found.len() >= limit {
                break;
            }
            if contains_word(&lowered, term) && !found.iter().any(|f| f == term) {
                found.push(term.to_string());
            }
        }

        found
    }

    fn score_sentiment(text: &str) -> serde_json::Value {
        let lowered = text.to_lowercase();
        let positive: Vec<&str> = POSITIVE_WORDS
            .iter()
            .copied()
            .filter(|w| contains_word(&lowered, w))
            .collect();
        let negative: Vec<&str> = NEGATIVE_WORDS
            .iter()
            .copied()
            .filter(|w| contains_word(&lowered, w))
            .collect();

        let total = positive.len() + negative.len();
        let score = if total == 0 {
            0.0
        } else {
            (positive.len() as f64 - negative.len() as f64) / total as f64
        };

        let primary = negative.first().or_else(|| positive.first()).copied();
        let emotions: Vec<&str> = negative.iter().chain(positive.iter()).copied().collect();

        json!({
            "sentiment_score": score,
            "primary_emotion": primary,
            "emotions": emotions,
            "intensity": (total as u64).clamp(1, 5),
        })
    }

    fn suggest_insights(text: &str) -> serde_json::Value {
        let lowered = text.to_lowercase();
        let themes: Vec<&str> = TOPIC_WORDS
            .iter()
            .copied()
            .filter(|w| contains_word(&lowered, w))
            .take(5)
            .collect();

        let (recommendations, resources) = match Self::assess_risk(text) {
            "critical" | "high" => (
                vec![
                    "Reach out to a counsellor or someone you trust today",
                    "If you are in immediate danger, contact emergency services",
                ],
                vec!["Campus counselling centre", "Crisis helpline"],
            ),
            "medium" => (
                vec![
                    "Break large tasks into smaller steps",
                    "Protect a regular sleep schedule",
                ],
                vec!["Box breathing", "Guided relaxation"],
            ),
            _ => (
                vec!["Continue journaling to track your emotional patterns"],
                vec!["Gratitude journaling"],
            ),
        };

        let follow_up_questions = match themes.first() {
            Some(theme) => vec![format!("How has {} been affecting how you feel?", theme)],
            None => vec!["What made today different from yesterday?".to_string()],
        };

        json!({
            "themes": themes,
            "recommendations": recommendations,
            "resources": resources,
            "followup_questions": follow_up_questions,
        })
    }

    fn summarize(text: &str) -> String {
        let lowered = text.to_lowercase();
        let topic = TOPIC_WORDS.iter().find(|w| contains_word(&lowered, w));
        let tone = match Self::assess_risk(text) {
            "critical" | "high" => "signs of serious distress",
            "medium" => "noticeable stress",
            _ => "a steady emotional state",
        };
        match topic {
            Some(topic) => format!("The writer reflects on {} and shows {}.", topic, tone),
            None => format!("The writer reflects on their day and shows {}.", tone),
        }
    }
}

#[async_trait]
impl TextAnalyzer for HeuristicAnalyzer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ClassifierError> {
        let response = match request.dimension {
            Dimension::Risk => Self::assess_risk(&request.text).to_string(),
            Dimension::Keywords => {
                let keywords = Self::extract_keywords(&request.text, request.kind.keyword_limit());
                serde_json::to_string(&keywords)
                    .map_err(|e| ClassifierError::Malformed(e.to_string()))?
            }
            Dimension::Sentiment => Self::score_sentiment(&request.text).to_string(),
            Dimension::Insights => Self::suggest_insights(&request.text).to_string(),
            Dimension::Summary => Self::summarize(&request.text),
        };
        Ok(response)
    }
}

/// Word-boundary match for single words, substring match for phrases.
fn contains_word(haystack: &str, term: &str) -> bool {
    if term.contains(' ') || term.contains('-') || term.contains('\'') {
        return haystack.contains(term);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == term)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dimension: Dimension, text: &str) -> AnalysisRequest {
        AnalysisRequest {
            dimension,
            kind: ContentKind::ChatMessage,
            text: text.to_string(),
            prompt: String::new(),
        }
    }

    #[test]
    fn test_risk_tiers() {
        assert_eq!(HeuristicAnalyzer::assess_risk("I want to end it all"), "critical");
        assert_eq!(HeuristicAnalyzer::assess_risk("I feel hopeless lately"), "high");
        assert_eq!(HeuristicAnalyzer::assess_risk("so stressed about exams"), "medium");
        assert_eq!(HeuristicAnalyzer::assess_risk("had a nice walk"), "low");
    }

    #[tokio::test]
    async fn test_keywords_are_json_array() {
        let raw = HeuristicAnalyzer
            .analyze(&request(Dimension::Keywords, "Exams and family, I'm stressed and sad"))
            .await
            .unwrap();
        let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert!(parsed.contains(&"exams".to_string()));
        assert!(parsed.contains(&"family".to_string()));
        assert!(parsed.len() <= ContentKind::ChatMessage.keyword_limit());
    }

    #[tokio::test]
    async fn test_sentiment_shape() {
        let raw = HeuristicAnalyzer
            .analyze(&request(Dimension::Sentiment, "sad and tired but grateful"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let score = value["sentiment_score"].as_f64().unwrap();
        assert!(score < 0.0 && score >= -1.0);
        assert_eq!(value["primary_emotion"], "sad");
    }

    #[tokio::test]
    async fn test_insights_shape() {
        let raw = HeuristicAnalyzer
            .analyze(&request(Dimension::Insights, "so stressed about exams and sleep"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["themes"][0], "exams");
        assert!(!value["recommendations"].as_array().unwrap().is_empty());
        assert!(value["followup_questions"][0].as_str().unwrap().contains("exams"));
    }

    #[test]
    fn test_summary_mentions_topic() {
        let summary = HeuristicAnalyzer::summarize("I feel hopeless about my grades");
        assert_eq!(summary, "The writer reflects on grades and shows signs of serious distress.");
    }

    #[test]
    fn test_word_boundaries() {
        assert!(!contains_word("badminton practice", "bad"));
        assert!(contains_word("a bad day", "bad"));
        assert!(contains_word("i can't sleep", "can't sleep"));
    }
}
