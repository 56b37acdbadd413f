//! Content Classifier
//!
//! Derives a [`Classification`] from free text by asking the text-analysis
//! service independent questions: risk level, keywords and sentiment for all
//! content, plus insights and a summary for journal entries.
//!
//! Provider output is untrusted. The risk answer must be one of the four
//! known tokens or the dimension counts as unassessed; the other answers
//! degrade to defaults when they fail to parse. One failed dimension never
//! affects the others.

use crate::analyzer::{AnalysisRequest, Dimension, TextAnalyzer};
use crate::config::RetryConfig;
use crate::error::ClassifierError;
use crate::models::{Classification, ContentInsights, ContentItem, ContentKind, RiskLevel, Sentiment};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest summary kept on an item.
pub const SUMMARY_CHARS: usize = 500;

/// Context passed along with the text to improve prompts.
#[derive(Debug, Clone)]
pub struct ClassificationHints {
    pub kind: ContentKind,
    pub mood_level: Option<i16>,
    pub emotions: Vec<String>,
}

impl ClassificationHints {
    pub fn for_kind(kind: ContentKind) -> Self {
        Self {
            kind,
            mood_level: None,
            emotions: Vec::new(),
        }
    }

    pub fn from_item(item: &ContentItem) -> Self {
        Self {
            kind: item.kind,
            mood_level: item.mood_level,
            emotions: item.emotions.clone(),
        }
    }
}

/// Classifier over an injected analyzer handle.
#[derive(Clone)]
pub struct ContentClassifier {
    analyzer: Arc<dyn TextAnalyzer>,
    retry: RetryConfig,
}

impl ContentClassifier {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self {
            analyzer,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn analyzer_name(&self) -> &'static str {
        self.analyzer.name()
    }

    /// Classify a block of text. Does not touch persistence.
    ///
    /// Only empty input is an error. A failed risk call leaves the risk
    /// dimension unassessed and records why in `risk_error`.
    pub async fn classify(
        &self,
        text: &str,
        hints: &ClassificationHints,
    ) -> Result<Classification, ClassifierError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassifierError::EmptyInput);
        }

        let journal = hints.kind == ContentKind::Journal;
        let risk_req = self.request(Dimension::Risk, text, hints);
        let keywords_req = self.request(Dimension::Keywords, text, hints);
        let sentiment_req = self.request(Dimension::Sentiment, text, hints);

        let (risk_raw, keywords_raw, sentiment_raw, insights_raw, summary_raw) = tokio::join!(
            self.analyzer.analyze(&risk_req),
            self.analyzer.analyze(&keywords_req),
            self.analyzer.analyze(&sentiment_req),
            self.analyze_if(journal, Dimension::Insights, text, hints),
            self.analyze_if(journal, Dimension::Summary, text, hints),
        );

        let (risk_level, risk_error) = match risk_raw {
            Ok(raw) => match parse_risk(&raw) {
                Some(level) => (Some(level), None),
                None => {
                    warn!(kind = hints.kind.as_str(), "Risk output outside accepted tokens, keeping prior level");
                    (None, None)
                }
            },
            Err(e) => {
                warn!(kind = hints.kind.as_str(), "Risk assessment failed, keeping prior level: {}", e);
                (None, Some(e))
            }
        };

        let keywords = match keywords_raw {
            Ok(raw) => parse_keywords(&raw, hints.kind.keyword_limit()).unwrap_or_else(|| {
                warn!("Could not parse keywords output: {}", truncate_for_log(&raw));
                Vec::new()
            }),
            Err(e) => {
                warn!("Keyword extraction failed: {}", e);
                Vec::new()
            }
        };

        let sentiment = match sentiment_raw {
            Ok(raw) => parse_sentiment(&raw).unwrap_or_else(|| {
                warn!("Could not parse sentiment output: {}", truncate_for_log(&raw));
                Sentiment::neutral()
            }),
            Err(e) => {
                warn!("Sentiment analysis failed: {}", e);
                Sentiment::neutral()
            }
        };

        let insights = insights_raw.map(|result| match result {
            Ok(raw) => parse_insights(&raw).unwrap_or_else(|| {
                warn!("Could not parse insights output: {}", truncate_for_log(&raw));
                ContentInsights::fallback()
            }),
            Err(e) => {
                warn!("Insight generation failed: {}", e);
                ContentInsights::fallback()
            }
        });

        let summary = summary_raw.and_then(|result| match result {
            Ok(raw) => parse_summary(&raw),
            Err(e) => {
                warn!("Summary generation failed: {}", e);
                None
            }
        });

        debug!(
            ?risk_level,
            keyword_count = keywords.len(),
            sentiment = sentiment.score,
            has_insights = insights.is_some(),
            "Classification complete"
        );

        Ok(Classification {
            risk_level,
            sentiment,
            keywords,
            insights,
            summary,
            risk_error,
        })
    }

    /// `classify` with bounded retries and exponential backoff while the call
    /// or its risk dimension fails transiently. Once retries run out the last
    /// classification is returned as is, risk unassessed.
    pub async fn classify_with_retry(
        &self,
        text: &str,
        hints: &ClassificationHints,
    ) -> Result<Classification, ClassifierError> {
        let mut attempt = 0u32;
        loop {
            let result = self.classify(text, hints).await;
            let transient = match &result {
                Ok(classification) => classification.risk_error.as_ref(),
                Err(e) => Some(e),
            }
            .filter(|e| e.is_transient());

            match transient {
                Some(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff_for(attempt);
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient classifier error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => return result,
            }
        }
    }

    async fn analyze_if(
        &self,
        wanted: bool,
        dimension: Dimension,
        text: &str,
        hints: &ClassificationHints,
    ) -> Option<Result<String, ClassifierError>> {
        if !wanted {
            return None;
        }
        Some(self.analyzer.analyze(&self.request(dimension, text, hints)).await)
    }

    fn request(&self, dimension: Dimension, text: &str, hints: &ClassificationHints) -> AnalysisRequest {
        AnalysisRequest {
            dimension,
            kind: hints.kind,
            text: text.to_string(),
            prompt: build_prompt(dimension, text, hints),
        }
    }
}

/// Render the instruction for one dimension.
pub fn build_prompt(dimension: Dimension, text: &str, hints: &ClassificationHints) -> String {
    let label = match hints.kind {
        ContentKind::Journal => "Entry",
        ContentKind::ChatMessage => "Message",
    };

    let mut context = String::new();
    if let Some(mood) = hints.mood_level {
        context.push_str(&format!("Mood Level: {}/5\n", mood));
    }
    if !hints.emotions.is_empty() {
        context.push_str(&format!("Emotions: {}\n", hints.emotions.join(", ")));
    }

    match dimension {
        Dimension::Risk => format!(
            r#"Assess the mental health risk level of this {kind}. Look for:
- Suicidal ideation or self-harm mentions
- Severe depression or hopelessness
- Crisis situations or immediate danger
- Substance abuse
- Social isolation

{label}: {text}
{context}
Respond with only one word: low, medium, high, or critical"#,
            kind = hints.kind,
        ),
        Dimension::Keywords => format!(
            r#"Extract up to {limit} key words from this {kind} that represent the main topics or concerns.
Focus on emotions, activities, topics and themes.

{label}: {text}

Respond with a JSON array: ["keyword1", "keyword2", ...]"#,
            limit = hints.kind.keyword_limit(),
            kind = hints.kind,
        ),
        Dimension::Sentiment => format!(
            r#"Analyze the sentiment and emotions in this {kind}. Respond with JSON:
{{
    "sentiment_score": -1 to 1,
    "primary_emotion": "emotion name",
    "emotions": ["list", "of", "emotions"],
    "intensity": 1 to 5
}}

{label}: {text}
{context}"#,
            kind = hints.kind,
        ),
        Dimension::Insights => format!(
            r#"Provide helpful insights and recommendations for this {kind}. Respond with JSON:
{{
    "themes": ["main themes identified"],
    "recommendations": ["specific, actionable recommendations"],
    "resources": ["helpful resources or techniques"],
    "followup_questions": ["reflective questions for the writer"]
}}

{label}: {text}
{context}
Respond with valid JSON only."#,
            kind = hints.kind,
        ),
        Dimension::Summary => format!(
            r#"Create a brief 1-2 sentence summary of this {kind} focusing on the main theme and emotional state.

{label}: {text}

Respond with only the summary text."#,
            kind = hints.kind,
        ),
    }
}

/// Strip markdown fences the model sometimes wraps JSON in
fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn parse_risk(raw: &str) -> Option<RiskLevel> {
    RiskLevel::parse_token(raw.trim().trim_matches(|c: char| c == '.' || c == '"' || c == '`'))
}

/// JSON array of strings, normalised and capped. `None` on malformed output.
pub fn parse_keywords(raw: &str, limit: usize) -> Option<Vec<String>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(strip_fences(raw)).ok()?;

    let mut keywords: Vec<String> = Vec::with_capacity(limit);
    for value in values {
        let Some(word) = value.as_str() else { continue };
        let word = word.trim().to_lowercase();
        if word.is_empty() || keywords.contains(&word) {
            continue;
        }
        keywords.push(word);
        if keywords.len() == limit {
            break;
        }
    }
    Some(keywords)
}

#[derive(Debug, Deserialize)]
struct RawSentiment {
    sentiment_score: f64,
    #[serde(default)]
    primary_emotion: Option<String>,
    #[serde(default)]
    emotions: Vec<String>,
    #[serde(default)]
    intensity: Option<f64>,
}

/// JSON sentiment object or a bare number. `None` on malformed output.
pub fn parse_sentiment(raw: &str) -> Option<Sentiment> {
    let cleaned = strip_fences(raw);

    if let Ok(score) = cleaned.parse::<f64>() {
        return clamp_score(score).map(|score| Sentiment {
            score,
            ..Sentiment::neutral()
        });
    }

    let parsed: RawSentiment = serde_json::from_str(cleaned).ok()?;
    Some(Sentiment {
        score: clamp_score(parsed.sentiment_score)?,
        primary_emotion: parsed
            .primary_emotion
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty()),
        emotions: parsed
            .emotions
            .into_iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        intensity: parsed
            .intensity
            .filter(|i| i.is_finite())
            .map(|i| i.round().clamp(1.0, 5.0) as u8),
    })
}

#[derive(Debug, Deserialize)]
struct RawInsights {
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default, alias = "follow_up_questions")]
    followup_questions: Vec<String>,
}

/// JSON insights object. `None` on malformed output; missing
/// recommendations fall back to the default advice.
pub fn parse_insights(raw: &str) -> Option<ContentInsights> {
    let parsed: RawInsights = serde_json::from_str(strip_fences(raw)).ok()?;
    let tidy = |values: Vec<String>| -> Vec<String> {
        values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    };

    let mut insights = ContentInsights {
        themes: tidy(parsed.themes),
        recommendations: tidy(parsed.recommendations),
        resources: tidy(parsed.resources),
        follow_up_questions: tidy(parsed.followup_questions),
    };
    if insights.recommendations.is_empty() {
        insights.recommendations = ContentInsights::fallback().recommendations;
    }
    Some(insights)
}

/// Trimmed summary text capped at [`SUMMARY_CHARS`]. `None` when blank.
pub fn parse_summary(raw: &str) -> Option<String> {
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.chars().take(SUMMARY_CHARS).collect())
}

fn clamp_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(-1.0, 1.0))
}

fn truncate_for_log(raw: &str) -> String {
    raw.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HeuristicAnalyzer;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Analyzer answering from a fixed table, one entry per dimension.
    struct ScriptedAnalyzer {
        responses: HashMap<Dimension, Result<String, ClassifierError>>,
    }

    #[async_trait]
    impl TextAnalyzer for ScriptedAnalyzer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ClassifierError> {
            self.responses
                .get(&request.dimension)
                .cloned()
                .unwrap_or(Err(ClassifierError::EmptyResponse))
        }
    }

    fn scripted(risk: Result<&str, ClassifierError>, keywords: &str, sentiment: &str) -> ContentClassifier {
        let mut responses = HashMap::new();
        responses.insert(Dimension::Risk, risk.map(str::to_string));
        responses.insert(Dimension::Keywords, Ok(keywords.to_string()));
        responses.insert(Dimension::Sentiment, Ok(sentiment.to_string()));
        ContentClassifier::new(Arc::new(ScriptedAnalyzer { responses }))
    }

    fn chat_hints() -> ClassificationHints {
        ClassificationHints::for_kind(ContentKind::ChatMessage)
    }

    #[tokio::test]
    async fn test_malformed_keywords_keep_valid_risk() {
        let classifier = scripted(Ok("High"), "topics: stress, exams", r#"{"sentiment_score": -0.6}"#);
        let result = classifier.classify("I can't cope", &chat_hints()).await.unwrap();

        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert!(result.keywords.is_empty());
        assert!((result.sentiment.score + 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_risk_token_is_unassessed() {
        let classifier = scripted(Ok("severe"), r#"["sleep"]"#, "0.1");
        let result = classifier.classify("can't sleep", &chat_hints()).await.unwrap();

        assert_eq!(result.risk_level, None);
        assert_eq!(result.keywords, vec!["sleep".to_string()]);
    }

    #[tokio::test]
    async fn test_risk_transport_failure_keeps_other_dimensions() {
        let classifier = scripted(
            Err(ClassifierError::Transport("reset".into())),
            r#"["exams", "sleep"]"#,
            "-0.5",
        );
        let result = classifier.classify("exams and no sleep", &chat_hints()).await.unwrap();

        assert_eq!(result.risk_level, None);
        assert_eq!(result.risk_error, Some(ClassifierError::Transport("reset".into())));
        assert_eq!(result.keywords, vec!["exams".to_string(), "sleep".to_string()]);
        assert_eq!(result.sentiment.score, -0.5);
        assert!(result.insights.is_none());
    }

    #[tokio::test]
    async fn test_journal_insights_degrade_to_default() {
        let mut responses = HashMap::new();
        responses.insert(Dimension::Risk, Ok("medium".to_string()));
        responses.insert(Dimension::Keywords, Ok("[]".to_string()));
        responses.insert(Dimension::Sentiment, Ok("0".to_string()));
        responses.insert(Dimension::Insights, Ok("Here are some thoughts...".to_string()));
        responses.insert(Dimension::Summary, Ok("  Stressed about finals.  ".to_string()));
        let classifier = ContentClassifier::new(Arc::new(ScriptedAnalyzer { responses }));

        let hints = ClassificationHints::for_kind(ContentKind::Journal);
        let result = classifier.classify("finals week", &hints).await.unwrap();

        assert_eq!(result.risk_level, Some(RiskLevel::Medium));
        assert_eq!(result.insights, Some(ContentInsights::fallback()));
        assert_eq!(result.summary.as_deref(), Some("Stressed about finals."));
    }

    #[test]
    fn test_insights_parsing() {
        let parsed = parse_insights(
            r#"```json
{"themes": ["exams", " "], "recommendations": ["Take breaks"], "follow_up_questions": ["What helps?"]}
```"#,
        )
        .unwrap();
        assert_eq!(parsed.themes, vec!["exams".to_string()]);
        assert_eq!(parsed.recommendations, vec!["Take breaks".to_string()]);
        assert_eq!(parsed.follow_up_questions, vec!["What helps?".to_string()]);

        let bare = parse_insights(r#"{"themes": ["sleep"]}"#).unwrap();
        assert_eq!(bare.recommendations, ContentInsights::fallback().recommendations);

        assert!(parse_insights("[1, 2]").is_none());
        assert_eq!(parse_summary("   "), None);
        assert_eq!(parse_summary(&"x".repeat(600)).unwrap().chars().count(), SUMMARY_CHARS);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let classifier = ContentClassifier::new(Arc::new(HeuristicAnalyzer));
        let result = classifier.classify("   \n", &chat_hints()).await;
        assert_eq!(result, Err(ClassifierError::EmptyInput));
    }

    #[tokio::test]
    async fn test_heuristic_end_to_end() {
        let classifier = ContentClassifier::new(Arc::new(HeuristicAnalyzer));
        let result = classifier
            .classify("I want to end it all", &chat_hints())
            .await
            .unwrap();
        assert_eq!(result.risk_level, Some(RiskLevel::Critical));
    }

    #[test]
    fn test_keyword_parsing() {
        let parsed = parse_keywords("```json\n[\"Exams\", \"exams\", \" \", 3, \"Family\"]\n```", 5).unwrap();
        assert_eq!(parsed, vec!["exams".to_string(), "family".to_string()]);

        let capped = parse_keywords(r#"["a","b","c","d","e","f","g"]"#, 5).unwrap();
        assert_eq!(capped.len(), 5);

        assert!(parse_keywords("not json", 5).is_none());
        assert!(parse_keywords(r#"{"keywords": []}"#, 5).is_none());
    }

    #[test]
    fn test_sentiment_parsing_clamps() {
        let s = parse_sentiment(r#"{"sentiment_score": -3.5, "primary_emotion": "Fear", "intensity": 9}"#).unwrap();
        assert_eq!(s.score, -1.0);
        assert_eq!(s.primary_emotion.as_deref(), Some("fear"));
        assert_eq!(s.intensity, Some(5));

        assert_eq!(parse_sentiment("0.75").unwrap().score, 0.75);
        assert_eq!(parse_sentiment("2").unwrap().score, 1.0);
        assert!(parse_sentiment("NaN").is_none());
        assert!(parse_sentiment("quite negative").is_none());
    }

    #[test]
    fn test_risk_prompt_includes_mood() {
        let hints = ClassificationHints {
            kind: ContentKind::Journal,
            mood_level: Some(1),
            emotions: vec!["sad".into()],
        };
        let prompt = build_prompt(Dimension::Risk, "rough day", &hints);
        assert!(prompt.contains("Mood Level: 1/5"));
        assert!(prompt.contains("Entry: rough day"));
        assert!(prompt.contains("low, medium, high, or critical"));
    }

    /// Fails with a timeout a fixed number of times before answering.
    struct FlakyAnalyzer {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl TextAnalyzer for FlakyAnalyzer {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ClassifierError> {
            if request.dimension == Dimension::Risk
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(ClassifierError::Timeout(10));
            }
            HeuristicAnalyzer.analyze(request).await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let classifier = ContentClassifier::new(Arc::new(FlakyAnalyzer {
            failures_left: AtomicU32::new(2),
        }))
        .with_retry(RetryConfig {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
        });

        let result = classifier
            .classify_with_retry("feeling hopeless", &chat_hints())
            .await
            .unwrap();
        assert_eq!(result.risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let classifier = ContentClassifier::new(Arc::new(FlakyAnalyzer {
            failures_left: AtomicU32::new(10),
        }))
        .with_retry(RetryConfig {
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
        });

        let result = classifier
            .classify_with_retry("feeling hopeless about exams", &chat_hints())
            .await
            .unwrap();
        assert_eq!(result.risk_level, None);
        assert_eq!(result.risk_error, Some(ClassifierError::Timeout(10)));
        assert!(result.keywords.contains(&"exams".to_string()));
    }
}
