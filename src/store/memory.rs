//! In-memory store for development and tests
//!
//! All tables sit behind one lock so multi-table writes are atomic, matching
//! the transactional guarantees of the Postgres store.

use super::{CareStore, EscalationRecord, EscalationWrite};
use crate::error::CareError;
use crate::models::{
    AlertMessage, Classification, ContentItem, DailyAnalytics, EscalationSession, Role,
    SessionStatus, UserAccount, UserDailyAnalytics,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserAccount>,
    items: HashMap<Uuid, ContentItem>,
    sessions: HashMap<Uuid, EscalationSession>,
    alerts: Vec<AlertMessage>,
    daily: HashMap<NaiveDate, DailyAnalytics>,
    per_user: HashMap<(Uuid, NaiveDate), UserDailyAnalytics>,
}

impl Tables {
    fn open_session(&self, subject_id: Uuid, counsellor_id: Uuid) -> Option<&EscalationSession> {
        self.sessions.values().find(|s| {
            s.subject_id == subject_id && s.counsellor_id == Some(counsellor_id) && s.status.is_open()
        })
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Total number of sessions, open or not.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    /// Total number of alerts across all sessions.
    pub async fn alert_count(&self) -> usize {
        self.tables.read().await.alerts.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CareStore for InMemoryStore {
    async fn upsert_user(&self, user: &UserAccount) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn counsellors_for_institute(&self, institute: &str) -> Result<Vec<UserAccount>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.role == Role::Counsellor && u.institute == institute)
            .cloned()
            .collect())
    }

    async fn insert_item(&self, item: &ContentItem) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&item.owner_id) {
            return Err(CareError::NotFound(format!("user {}", item.owner_id)));
        }
        tables.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>> {
        Ok(self.tables.read().await.items.get(&item_id).cloned())
    }

    async fn save_classification(
        &self,
        item_id: Uuid,
        classification: &Classification,
        at: DateTime<Utc>,
    ) -> Result<ContentItem> {
        let mut tables = self.tables.write().await;
        let item = tables
            .items
            .get_mut(&item_id)
            .ok_or_else(|| CareError::NotFound(format!("content item {}", item_id)))?;
        item.apply_classification(classification, at);
        Ok(item.clone())
    }

    async fn items_created_on(&self, day: NaiveDate) -> Result<Vec<ContentItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<ContentItem> = tables
            .items
            .values()
            .filter(|i| i.created_at.date_naive() == day)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn record_escalation(&self, write: &EscalationWrite) -> Result<Option<EscalationRecord>> {
        let mut tables = self.tables.write().await;

        if let Some(item_id) = write.item_id {
            let item = tables
                .items
                .get(&item_id)
                .ok_or_else(|| CareError::NotFound(format!("content item {}", item_id)))?;
            if item.escalation_flag {
                return Ok(None);
            }
        }

        let existing = tables
            .open_session(write.subject_id, write.counsellor_id)
            .cloned();

        let (session, session_created) = match existing {
            Some(existing) => (existing, false),
            None => {
                let session = EscalationSession {
                    id: Uuid::new_v4(),
                    subject_id: write.subject_id,
                    counsellor_id: Some(write.counsellor_id),
                    status: SessionStatus::Escalated,
                    priority: write.priority,
                    reason: write.reason.clone(),
                    created_at: write.at,
                    updated_at: write.at,
                    ended_at: None,
                    rating: None,
                };
                tables.sessions.insert(session.id, session.clone());
                (session, true)
            }
        };

        // Keys are unique per session, a reopened pair starts fresh
        let existing_alert = tables
            .alerts
            .iter()
            .find(|a| a.session_id == session.id && a.trigger_key == write.trigger_key)
            .cloned();

        let (alert, alert_created) = match existing_alert {
            Some(alert) => (alert, false),
            None => {
                let alert = AlertMessage {
                    id: Uuid::new_v4(),
                    session_id: session.id,
                    body: write.alert_body.clone(),
                    trigger_key: write.trigger_key.clone(),
                    created_at: write.at,
                };
                tables.alerts.push(alert.clone());
                (alert, true)
            }
        };

        if let Some(item_id) = write.item_id {
            if let Some(item) = tables.items.get_mut(&item_id) {
                item.escalation_flag = true;
            }
        }

        Ok(Some(EscalationRecord {
            session,
            alert,
            session_created,
            alert_created,
        }))
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<EscalationSession>> {
        Ok(self.tables.read().await.sessions.get(&session_id).cloned())
    }

    async fn open_sessions_for(&self, subject_id: Uuid) -> Result<Vec<EscalationSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<EscalationSession> = tables
            .sessions
            .values()
            .filter(|s| s.subject_id == subject_id && s.status.is_open())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        Ok(sessions)
    }

    async fn alerts_for_session(&self, session_id: Uuid) -> Result<Vec<AlertMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn escalated_sessions(&self, institute: Option<&str>) -> Result<Vec<EscalationSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Escalated)
            .filter(|s| match institute {
                Some(institute) => tables
                    .users
                    .get(&s.subject_id)
                    .map(|u| u.institute == institute)
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn finish_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        rating: Option<i16>,
        at: DateTime<Utc>,
    ) -> Result<EscalationSession> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CareError::NotFound(format!("session {}", session_id)))?;

        if !session.status.is_open() {
            return Err(CareError::InvalidTransition(format!(
                "session {} is already {}",
                session_id,
                session.status.as_str()
            )));
        }

        session.status = status;
        session.rating = rating;
        session.ended_at = Some(at);
        session.updated_at = at;
        Ok(session.clone())
    }

    async fn sessions_created_on(&self, day: NaiveDate) -> Result<Vec<EscalationSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.created_at.date_naive() == day)
            .cloned()
            .collect())
    }

    async fn alerts_created_on(&self, day: NaiveDate) -> Result<Vec<AlertMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.created_at.date_naive() == day)
            .cloned()
            .collect())
    }

    async fn upsert_daily_analytics(&self, summary: &DailyAnalytics) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.daily.insert(summary.date, summary.clone());
        Ok(())
    }

    async fn get_daily_analytics(&self, day: NaiveDate) -> Result<Option<DailyAnalytics>> {
        Ok(self.tables.read().await.daily.get(&day).cloned())
    }

    async fn upsert_user_analytics(&self, summary: &UserDailyAnalytics) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .per_user
            .insert((summary.user_id, summary.date), summary.clone());
        Ok(())
    }

    async fn get_user_analytics(&self, user_id: Uuid, day: NaiveDate) -> Result<Option<UserDailyAnalytics>> {
        Ok(self.tables.read().await.per_user.get(&(user_id, day)).cloned())
    }
}
