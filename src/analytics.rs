//! Daily analytics rollups
//!
//! Summaries are pure functions of the stored rows for one UTC day. Inputs are
//! put into a fixed order before any arithmetic, so re-running a rollup over
//! unchanged data yields an identical row.

use crate::models::{
    ContentItem, ContentKind, DailyAnalytics, EscalationSession, UserDailyAnalytics,
};
use crate::store::CareStore;
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Entries kept in every top-N list.
pub const TOP_N: usize = 5;

pub struct AnalyticsAggregator {
    store: Arc<dyn CareStore>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    /// Compute and upsert the global summary for `day`.
    pub async fn rollup(&self, day: NaiveDate) -> Result<DailyAnalytics> {
        let items = self.store.items_created_on(day).await?;
        let sessions = self.store.sessions_created_on(day).await?;
        let alerts = self.store.alerts_created_on(day).await?;

        let summary = summarize_day(day, &items, &sessions, alerts.len());
        self.store.upsert_daily_analytics(&summary).await?;

        info!(
            date = %day,
            total_items = summary.total_items,
            escalated_items = summary.escalated_items,
            sessions_created = summary.sessions_created,
            "Daily analytics rolled up"
        );
        Ok(summary)
    }

    /// Compute and upsert one user's journal summary. `None` when the user
    /// wrote no journal entries that day.
    pub async fn rollup_user(&self, user_id: Uuid, day: NaiveDate) -> Result<Option<UserDailyAnalytics>> {
        let items = self.store.items_created_on(day).await?;
        let Some(summary) = summarize_user_day(user_id, day, &items) else {
            return Ok(None);
        };
        self.store.upsert_user_analytics(&summary).await?;
        Ok(Some(summary))
    }

    /// Roll up every user who journaled on `day`. A failing user is logged
    /// and skipped.
    pub async fn rollup_all_users(&self, day: NaiveDate) -> Result<Vec<UserDailyAnalytics>> {
        let items = self.store.items_created_on(day).await?;
        let owners: BTreeSet<Uuid> = items
            .iter()
            .filter(|i| i.kind == ContentKind::Journal)
            .map(|i| i.owner_id)
            .collect();

        let mut summaries = Vec::with_capacity(owners.len());
        for user_id in owners {
            let Some(summary) = summarize_user_day(user_id, day, &items) else {
                continue;
            };
            match self.store.upsert_user_analytics(&summary).await {
                Ok(()) => summaries.push(summary),
                Err(e) => warn!(user_id = %user_id, date = %day, "User analytics rollup failed: {}", e),
            }
        }

        info!(date = %day, users = summaries.len(), "User analytics rolled up");
        Ok(summaries)
    }
}

pub fn summarize_day(
    day: NaiveDate,
    items: &[ContentItem],
    sessions: &[EscalationSession],
    alert_count: usize,
) -> DailyAnalytics {
    let ratings: Vec<f64> = sessions.iter().filter_map(|s| s.rating).map(f64::from).collect();
    let moods: Vec<f64> = items.iter().filter_map(|i| i.mood_level).map(f64::from).collect();
    let sentiments: Vec<f64> = items
        .iter()
        .filter_map(|i| i.sentiment.as_ref())
        .map(|s| s.score)
        .collect();

    DailyAnalytics {
        date: day,
        total_items: items.len() as u32,
        journal_entries: count_where(items, |i| i.kind == ContentKind::Journal),
        chat_messages: count_where(items, |i| i.kind == ContentKind::ChatMessage),
        escalated_items: count_where(items, |i| i.escalation_flag),
        high_risk_items: count_where(items, |i| i.risk_level.is_high_or_above()),
        sessions_created: sessions.len() as u32,
        escalation_alerts: alert_count as u32,
        average_rating: mean(ratings),
        average_mood: mean(moods),
        average_sentiment: mean(sentiments),
        top_keywords: top_n(items.iter().flat_map(|i| i.keywords.iter()), TOP_N),
        top_emotions: top_n(items.iter().flat_map(item_emotions), TOP_N),
    }
}

pub fn summarize_user_day(user_id: Uuid, day: NaiveDate, items: &[ContentItem]) -> Option<UserDailyAnalytics> {
    let journals: Vec<&ContentItem> = items
        .iter()
        .filter(|i| i.owner_id == user_id && i.kind == ContentKind::Journal)
        .collect();
    if journals.is_empty() {
        return None;
    }

    let moods: Vec<f64> = journals.iter().filter_map(|j| j.mood_level).map(f64::from).collect();
    let tags: BTreeSet<String> = journals.iter().flat_map(|j| j.emotions.iter().cloned()).collect();

    Some(UserDailyAnalytics {
        user_id,
        date: day,
        week_start: day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
        month_start: day.with_day(1).unwrap_or(day),
        entry_count: journals.len() as u32,
        total_words: journals.iter().map(|j| j.word_count() as u32).sum(),
        average_mood: mean(moods.clone()),
        mood_variance: variance(moods),
        voice_entries: journals
            .iter()
            .filter(|j| j.transcription.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .count() as u32,
        high_risk_days: u32::from(journals.iter().any(|j| j.risk_level.is_high_or_above())),
        tags_used: tags.into_iter().collect(),
        most_common_emotions: top_n(journals.iter().flat_map(|j| j.emotions.iter()), TOP_N),
        trending_keywords: top_n(journals.iter().flat_map(|j| j.keywords.iter()), TOP_N),
    })
}

fn count_where(items: &[ContentItem], pred: impl Fn(&ContentItem) -> bool) -> u32 {
    items.iter().filter(|i| pred(i)).count() as u32
}

/// Emotions the user picked plus the one the classifier detected.
fn item_emotions(item: &ContentItem) -> impl Iterator<Item = &String> {
    item.emotions
        .iter()
        .chain(item.sentiment.iter().flat_map(|s| s.primary_emotion.iter()))
}

/// Most frequent values, ties broken by name ascending.
pub fn top_n<'a>(values: impl Iterator<Item = &'a String>, n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(v, _)| v.to_string()).collect()
}

fn mean(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(round2(values.iter().sum::<f64>() / values.len() as f64))
}

/// Population variance.
fn variance(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(round2(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::EscalationCoordinator;
    use crate::models::{Classification, RiskLevel, Role, Sentiment, SessionStatus, UserAccount};
    use crate::notify::LoggingNotifier;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_top_n_breaks_ties_by_name() {
        let values = strings(&["sad", "tired", "anxious", "tired", "sad", "calm", "angry", "bored"]);
        let top = top_n(values.iter(), 5);
        assert_eq!(top, strings(&["sad", "tired", "angry", "anxious", "bored"]));
    }

    #[test]
    fn test_week_and_month_start() {
        // 2024-03-14 is a Thursday
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        let user = Uuid::new_v4();
        let item = ContentItem::new(user, ContentKind::Journal, "one two three").with_mood(2);
        let summary = summarize_user_day(user, day, &[item]).unwrap();

        assert_eq!(summary.week_start, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(summary.month_start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(summary.total_words, 3);
        assert_eq!(summary.mood_variance, Some(0.0));
    }

    #[test]
    fn test_user_summary_ignores_chat_and_other_users() {
        let day = Utc::now().date_naive();
        let user = Uuid::new_v4();
        let items = vec![
            ContentItem::new(user, ContentKind::ChatMessage, "hi"),
            ContentItem::new(Uuid::new_v4(), ContentKind::Journal, "not mine"),
        ];
        assert!(summarize_user_day(user, day, &items).is_none());
    }

    #[tokio::test]
    async fn test_rollup_is_repeatable() {
        let store = Arc::new(InMemoryStore::new());
        let student = UserAccount::new("sam@uni.edu", "Sam", Role::Student, "North");
        let counsellor = UserAccount::new("c@uni.edu", "C", Role::Counsellor, "North").verified();
        store.upsert_user(&student).await.unwrap();
        store.upsert_user(&counsellor).await.unwrap();

        let coordinator = EscalationCoordinator::new(store.clone(), Arc::new(LoggingNotifier));
        let texts = [
            (ContentKind::Journal, "exams again", 2, RiskLevel::Medium, -0.4, "stress"),
            (ContentKind::Journal, "slept badly", 3, RiskLevel::Low, -0.1, "sleep"),
            (ContentKind::ChatMessage, "cannot cope", 1, RiskLevel::High, -0.8, "stress"),
        ];
        for (kind, text, mood, risk, score, keyword) in texts {
            let item = ContentItem::new(student.id, kind, text)
                .with_mood(mood)
                .with_transcription(if kind == ContentKind::Journal { "spoken" } else { "" })
                .with_emotions(strings(&["tired", "anxious"]));
            store.insert_item(&item).await.unwrap();
            let classification = Classification {
                risk_level: Some(risk),
                sentiment: Sentiment {
                    score,
                    primary_emotion: Some("sadness".into()),
                    emotions: vec![],
                    intensity: Some(3),
                },
                keywords: strings(&[keyword]),
                ..Classification::default()
            };
            coordinator.handle_classified_item(&item, &classification).await.unwrap();
        }

        let sessions = coordinator.open_sessions(student.id).await.unwrap();
        coordinator
            .resolve_session(sessions[0].id, SessionStatus::Completed, Some(4))
            .await
            .unwrap();

        let day = Utc::now().date_naive();
        let aggregator = AnalyticsAggregator::new(store.clone());
        let first = aggregator.rollup(day).await.unwrap();
        let second = aggregator.rollup(day).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        assert_eq!(first.total_items, 3);
        assert_eq!(first.journal_entries, 2);
        assert_eq!(first.chat_messages, 1);
        assert_eq!(first.escalated_items, 1);
        assert_eq!(first.high_risk_items, 1);
        assert_eq!(first.sessions_created, 1);
        assert_eq!(first.escalation_alerts, 1);
        assert_eq!(first.average_rating, Some(4.0));
        assert_eq!(first.average_mood, Some(2.0));
        assert_eq!(first.average_sentiment, Some(-0.43));
        assert_eq!(first.top_keywords, strings(&["stress", "sleep"]));
        assert_eq!(first.top_emotions, strings(&["anxious", "sadness", "tired"]));
        assert_eq!(store.get_daily_analytics(day).await.unwrap(), Some(first));

        let users = aggregator.rollup_all_users(day).await.unwrap();
        assert_eq!(users.len(), 1);
        let mine = &users[0];
        assert_eq!(mine.entry_count, 2);
        assert_eq!(mine.voice_entries, 2);
        assert_eq!(mine.average_mood, Some(2.5));
        assert_eq!(mine.mood_variance, Some(0.25));
        assert_eq!(mine.high_risk_days, 0);
        assert_eq!(mine.tags_used, strings(&["anxious", "tired"]));
        assert_eq!(
            store.get_user_analytics(student.id, day).await.unwrap().as_ref(),
            Some(mine)
        );

        let again = aggregator.rollup_user(student.id, day).await.unwrap();
        assert_eq!(again.as_ref(), Some(mine));
    }
}
