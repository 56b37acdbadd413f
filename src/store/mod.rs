//! Persistence layer
//!
//! Responsible for storing and loading all pipeline state.
//! `InMemoryStore` backs development and tests; `PgStore` backs production.

use crate::models::{
    AlertMessage, Classification, ContentItem, DailyAnalytics, EscalationSession, Priority,
    SessionStatus, UserAccount, UserDailyAnalytics,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Everything needed to upsert an escalation in one atomic step.
#[derive(Debug, Clone)]
pub struct EscalationWrite {
    /// Source item, flagged as escalated in the same step. `None` for manual escalations.
    pub item_id: Option<Uuid>,
    pub subject_id: Uuid,
    pub counsellor_id: Uuid,
    pub priority: Priority,
    pub reason: String,
    pub alert_body: String,
    pub trigger_key: String,
    pub at: DateTime<Utc>,
}

/// Result of a committed escalation write.
#[derive(Debug, Clone)]
pub struct EscalationRecord {
    pub session: EscalationSession,
    pub alert: AlertMessage,
    pub session_created: bool,
    pub alert_created: bool,
}

/// Trait for pipeline persistence
#[async_trait::async_trait]
pub trait CareStore: Send + Sync {
    // ---- users ----
    async fn upsert_user(&self, user: &UserAccount) -> Result<()>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>>;
    /// All counsellor accounts for an institute, in no particular order.
    async fn counsellors_for_institute(&self, institute: &str) -> Result<Vec<UserAccount>>;

    // ---- content ----
    async fn insert_item(&self, item: &ContentItem) -> Result<()>;
    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>>;
    /// Fold a classification onto the stored item and return the stored state.
    async fn save_classification(
        &self,
        item_id: Uuid,
        classification: &Classification,
        at: DateTime<Utc>,
    ) -> Result<ContentItem>;
    async fn items_created_on(&self, day: NaiveDate) -> Result<Vec<ContentItem>>;

    // ---- escalation ----
    /// Atomically: check/flag the item, upsert the open (subject, counsellor)
    /// session and append the alert. Returns `None` when the item was already
    /// flagged, in which case nothing is written.
    async fn record_escalation(&self, write: &EscalationWrite) -> Result<Option<EscalationRecord>>;
    async fn get_session(&self, session_id: Uuid) -> Result<Option<EscalationSession>>;
    async fn open_sessions_for(&self, subject_id: Uuid) -> Result<Vec<EscalationSession>>;
    async fn alerts_for_session(&self, session_id: Uuid) -> Result<Vec<AlertMessage>>;
    /// Sessions in `escalated` status, optionally limited to subjects of one institute.
    async fn escalated_sessions(&self, institute: Option<&str>) -> Result<Vec<EscalationSession>>;
    /// Move an open session to a terminal status.
    async fn finish_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        rating: Option<i16>,
        at: DateTime<Utc>,
    ) -> Result<EscalationSession>;
    async fn sessions_created_on(&self, day: NaiveDate) -> Result<Vec<EscalationSession>>;
    async fn alerts_created_on(&self, day: NaiveDate) -> Result<Vec<AlertMessage>>;

    // ---- analytics ----
    async fn upsert_daily_analytics(&self, summary: &DailyAnalytics) -> Result<()>;
    async fn get_daily_analytics(&self, day: NaiveDate) -> Result<Option<DailyAnalytics>>;
    async fn upsert_user_analytics(&self, summary: &UserDailyAnalytics) -> Result<()>;
    async fn get_user_analytics(&self, user_id: Uuid, day: NaiveDate) -> Result<Option<UserDailyAnalytics>>;
}

/// Half-open UTC range covering `day`.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::default()));
    (start, start + chrono::Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let (start, end) = day_bounds(day);
        assert_eq!(start.to_rfc3339(), "2024-03-09T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-03-10T00:00:00+00:00");
    }
}
