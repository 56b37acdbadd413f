//! Core data models for the escalation pipeline

use crate::error::ClassifierError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Risk classification, totally ordered: Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Coerce an untrusted token. Only the four known words are accepted.
    pub fn parse_token(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn is_high_or_above(&self) -> bool {
        *self >= RiskLevel::High
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Journal,
    ChatMessage,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Journal => "journal",
            ContentKind::ChatMessage => "chat_message",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "journal" => Some(ContentKind::Journal),
            "chat_message" => Some(ContentKind::ChatMessage),
            _ => None,
        }
    }

    /// Upper bound on extracted keywords for this kind of content.
    pub fn keyword_limit(&self) -> usize {
        match self {
            ContentKind::Journal => 10,
            ContentKind::ChatMessage => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Escalated,
    Completed,
    Closed,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Escalated => "escalated",
            SessionStatus::Completed => "completed",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SessionStatus::Active),
            "escalated" => Some(SessionStatus::Escalated),
            "completed" => Some(SessionStatus::Completed),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Counsellor,
    PeerModerator,
    InstituteAdmin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Counsellor => "counsellor",
            Role::PeerModerator => "peer_moderator",
            Role::InstituteAdmin => "institute_admin",
            Role::Superadmin => "superadmin",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "student" => Some(Role::Student),
            "counsellor" => Some(Role::Counsellor),
            "peer_moderator" => Some(Role::PeerModerator),
            "institute_admin" => Some(Role::InstituteAdmin),
            "superadmin" => Some(Role::Superadmin),
            _ => None,
        }
    }
}

//
// ================= Users =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub institute: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(email: &str, full_name: &str, role: Role, institute: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            role,
            institute: institute.to_string(),
            is_active: true,
            is_verified: false,
            created_at: Utc::now(),
        }
    }

    pub fn verified(mut self) -> Self {
        self.is_verified = true;
        self
    }

    /// Active, verified counsellor. Institute matching is the resolver's job.
    pub fn can_take_escalations(&self) -> bool {
        self.role == Role::Counsellor && self.is_active && self.is_verified
    }
}

//
// ================= Content =================
//

/// Sentiment annotation attached to a content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Sentiment {
    /// Clamped to [-1, 1]
    pub score: f64,
    #[serde(default)]
    pub primary_emotion: Option<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    /// 1..=5 when present
    #[serde(default)]
    pub intensity: Option<u8>,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// Reflective feedback generated for a journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContentInsights {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

impl ContentInsights {
    /// Used whenever the provider's insights cannot be read.
    pub fn fallback() -> Self {
        Self {
            recommendations: vec!["Continue journaling to track your emotional patterns".to_string()],
            ..Self::default()
        }
    }
}

/// A journal entry or chat message subject to risk classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: ContentKind,
    pub text: String,
    /// Voice transcription for journal entries
    #[serde(default)]
    pub transcription: Option<String>,
    /// Mood on a 1-5 scale
    #[serde(default)]
    pub mood_level: Option<i16>,
    /// Emotions picked by the user when writing
    #[serde(default)]
    pub emotions: Vec<String>,
    pub created_at: DateTime<Utc>,

    // Mutated by the pipeline only
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub escalation_flag: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub insights: Option<ContentInsights>,
    /// One or two sentence summary, journals only
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub classified_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(owner_id: Uuid, kind: ContentKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            text: text.into(),
            transcription: None,
            mood_level: None,
            emotions: Vec::new(),
            created_at: Utc::now(),
            risk_level: RiskLevel::Low,
            escalation_flag: false,
            keywords: Vec::new(),
            sentiment: None,
            insights: None,
            summary: None,
            classified_at: None,
        }
    }

    pub fn with_mood(mut self, mood_level: i16) -> Self {
        self.mood_level = Some(mood_level);
        self
    }

    pub fn with_transcription(mut self, transcription: impl Into<String>) -> Self {
        self.transcription = Some(transcription.into());
        self
    }

    pub fn with_emotions(mut self, emotions: Vec<String>) -> Self {
        self.emotions = emotions;
        self
    }

    /// Body plus transcription, the text actually sent for analysis.
    pub fn analysis_text(&self) -> String {
        match self.transcription.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => format!("{}\n{}", self.text, t),
            _ => self.text.clone(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.analysis_text().split_whitespace().count()
    }

    /// Fold a classification onto the item. Risk is never lowered and an
    /// unassessed risk dimension leaves the current level alone.
    pub fn apply_classification(&mut self, classification: &Classification, at: DateTime<Utc>) {
        if let Some(level) = classification.risk_level {
            self.risk_level = self.risk_level.max(level);
        }
        self.keywords = classification.keywords.clone();
        self.sentiment = Some(classification.sentiment.clone());
        if let Some(insights) = &classification.insights {
            self.insights = Some(insights.clone());
        }
        if let Some(summary) = &classification.summary {
            self.summary = Some(summary.clone());
        }
        self.classified_at = Some(at);
    }
}

/// Output of a single classification call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Classification {
    /// `None` when the risk dimension could not be assessed
    pub risk_level: Option<RiskLevel>,
    pub sentiment: Sentiment,
    pub keywords: Vec<String>,
    /// Journals only
    #[serde(default)]
    pub insights: Option<ContentInsights>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Why the risk dimension is unassessed, when the provider call failed
    #[serde(skip)]
    pub risk_error: Option<ClassifierError>,
}

//
// ================= Escalation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationSession {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub counsellor_id: Option<Uuid>,
    pub status: SessionStatus,
    pub priority: Priority,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Subject's 1-5 rating, recorded when the session is resolved
    #[serde(default)]
    pub rating: Option<i16>,
}

/// System-authored alert appended to an escalation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub body: String,
    pub trigger_key: String,
    pub created_at: DateTime<Utc>,
}

/// Output of the risk policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub priority: Priority,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoCounsellor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    NoEscalation {
        risk_level: RiskLevel,
    },
    Skipped {
        reason: SkipReason,
    },
    Triggered {
        session: EscalationSession,
        counsellor: UserAccount,
        alert: AlertMessage,
        session_created: bool,
    },
}

impl EscalationOutcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, EscalationOutcome::Triggered { .. })
    }
}

//
// ================= Analytics =================
//

/// Global rollup for one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyAnalytics {
    pub date: NaiveDate,
    pub total_items: u32,
    pub journal_entries: u32,
    pub chat_messages: u32,
    pub escalated_items: u32,
    pub high_risk_items: u32,
    pub sessions_created: u32,
    pub escalation_alerts: u32,
    pub average_rating: Option<f64>,
    pub average_mood: Option<f64>,
    pub average_sentiment: Option<f64>,
    pub top_keywords: Vec<String>,
    pub top_emotions: Vec<String>,
}

/// Per-user journal rollup for one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDailyAnalytics {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub week_start: NaiveDate,
    pub month_start: NaiveDate,
    pub entry_count: u32,
    pub total_words: u32,
    pub average_mood: Option<f64>,
    pub mood_variance: Option<f64>,
    pub voice_entries: u32,
    pub high_risk_days: u32,
    pub tags_used: Vec<String>,
    pub most_common_emotions: Vec<String>,
    pub trending_keywords: Vec<String>,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentKind::Journal => "journal entry",
            ContentKind::ChatMessage => "chat message",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_token_coercion() {
        assert_eq!(RiskLevel::parse_token("  CRITICAL\n"), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::parse_token("High"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse_token("severe"), None);
        assert_eq!(RiskLevel::parse_token("high risk"), None);
        assert_eq!(RiskLevel::parse_token(""), None);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::default(), RiskLevel::Low);
    }

    #[test]
    fn test_apply_classification_never_downgrades() {
        let mut item = ContentItem::new(Uuid::new_v4(), ContentKind::Journal, "rough week");
        item.risk_level = RiskLevel::High;

        let lower = Classification {
            risk_level: Some(RiskLevel::Low),
            keywords: vec!["exams".into()],
            insights: Some(ContentInsights::fallback()),
            ..Classification::default()
        };
        item.apply_classification(&lower, Utc::now());
        assert_eq!(item.risk_level, RiskLevel::High);
        assert_eq!(item.keywords, vec!["exams".to_string()]);
        assert_eq!(item.insights, Some(ContentInsights::fallback()));

        let unassessed = Classification::default();
        item.apply_classification(&unassessed, Utc::now());
        assert_eq!(item.risk_level, RiskLevel::High);
        assert!(item.insights.is_some());
        assert!(item.classified_at.is_some());
    }

    #[test]
    fn test_analysis_text_appends_transcription() {
        let item = ContentItem::new(Uuid::new_v4(), ContentKind::Journal, "typed part")
            .with_transcription("spoken part");
        assert_eq!(item.analysis_text(), "typed part\nspoken part");
        assert_eq!(item.word_count(), 4);

        let blank = ContentItem::new(Uuid::new_v4(), ContentKind::Journal, "only typed")
            .with_transcription("   ");
        assert_eq!(blank.analysis_text(), "only typed");
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&ContentKind::ChatMessage).unwrap(), "\"chat_message\"");
        assert_eq!(serde_json::to_string(&Role::PeerModerator).unwrap(), "\"peer_moderator\"");
        assert!(SessionStatus::Escalated.is_open());
        assert!(!SessionStatus::Closed.is_open());
    }
}
