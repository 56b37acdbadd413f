//! Postgres-backed store
//!
//! The schema is created lazily on first use. The open-session uniqueness
//! rule is enforced by a partial unique index so concurrent escalations for
//! the same (subject, counsellor) pair resolve to a single session.

use super::{day_bounds, CareStore, EscalationRecord, EscalationWrite};
use crate::error::CareError;
use crate::models::{
    AlertMessage, Classification, ContentItem, ContentKind, DailyAnalytics, EscalationSession,
    Priority, RiskLevel, Role, SessionStatus, UserAccount, UserDailyAnalytics,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS care_users (
      id UUID PRIMARY KEY,
      email TEXT NOT NULL UNIQUE,
      full_name TEXT NOT NULL,
      role TEXT NOT NULL,
      institute TEXT NOT NULL DEFAULT '',
      is_active BOOLEAN NOT NULL DEFAULT TRUE,
      is_verified BOOLEAN NOT NULL DEFAULT FALSE,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_care_users_counsellors
    ON care_users (institute, role);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
      id UUID PRIMARY KEY,
      owner_id UUID NOT NULL REFERENCES care_users(id),
      kind TEXT NOT NULL,
      text TEXT NOT NULL,
      transcription TEXT,
      mood_level SMALLINT,
      emotions JSONB NOT NULL DEFAULT '[]',
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
      risk_level TEXT NOT NULL DEFAULT 'low',
      escalation_flag BOOLEAN NOT NULL DEFAULT FALSE,
      keywords JSONB NOT NULL DEFAULT '[]',
      sentiment JSONB,
      insights JSONB,
      summary TEXT,
      classified_at TIMESTAMPTZ
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_content_items_created
    ON content_items (created_at);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS escalation_sessions (
      id UUID PRIMARY KEY,
      subject_id UUID NOT NULL REFERENCES care_users(id),
      counsellor_id UUID REFERENCES care_users(id),
      status TEXT NOT NULL,
      priority TEXT NOT NULL,
      reason TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      ended_at TIMESTAMPTZ,
      rating SMALLINT
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_escalation_sessions_open_pair
    ON escalation_sessions (subject_id, counsellor_id)
    WHERE status IN ('active', 'escalated');
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_messages (
      id UUID PRIMARY KEY,
      session_id UUID NOT NULL REFERENCES escalation_sessions(id),
      body TEXT NOT NULL,
      trigger_key TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL,
      UNIQUE (session_id, trigger_key)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS daily_analytics (
      date DATE PRIMARY KEY,
      summary JSONB NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_daily_analytics (
      user_id UUID NOT NULL REFERENCES care_users(id),
      date DATE NOT NULL,
      summary JSONB NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
      PRIMARY KEY (user_id, date)
    );
    "#,
];

const SESSION_COLUMNS: &str =
    "id, subject_id, counsellor_id, status, priority, reason, created_at, updated_at, ended_at, rating";

const ITEM_COLUMNS: &str = "id, owner_id, kind, text, transcription, mood_level, emotions, created_at, \
     risk_level, escalation_flag, keywords, sentiment, insights, summary, classified_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Build a lazily-connecting pool for `database_url`.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| CareError::Database(format!("Failed to configure postgres pool: {}", e)))?;
        info!("Care store backend: postgres");
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| CareError::Database(format!("Failed to initialize care schema: {}", e)))?;

        Ok(())
    }
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> CareError + '_ {
    move |e| CareError::Database(format!("{}: {}", context, e))
}

fn corrupt(column: &str, raw: &str) -> CareError {
    CareError::Database(format!("unexpected value {:?} in column {}", raw, column))
}

fn row_to_user(row: &PgRow) -> Result<UserAccount> {
    let role: String = row.try_get("role")?;
    Ok(UserAccount {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        role: Role::from_db(&role).ok_or_else(|| corrupt("role", &role))?,
        institute: row.try_get("institute")?,
        is_active: row.try_get("is_active")?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<ContentItem> {
    let kind: String = row.try_get("kind")?;
    let risk: String = row.try_get("risk_level")?;
    let emotions: serde_json::Value = row.try_get("emotions")?;
    let keywords: serde_json::Value = row.try_get("keywords")?;
    let sentiment: Option<serde_json::Value> = row.try_get("sentiment")?;
    let insights: Option<serde_json::Value> = row.try_get("insights")?;

    Ok(ContentItem {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        kind: ContentKind::from_db(&kind).ok_or_else(|| corrupt("kind", &kind))?,
        text: row.try_get("text")?,
        transcription: row.try_get("transcription")?,
        mood_level: row.try_get("mood_level")?,
        emotions: serde_json::from_value(emotions)?,
        created_at: row.try_get("created_at")?,
        risk_level: RiskLevel::parse_token(&risk).ok_or_else(|| corrupt("risk_level", &risk))?,
        escalation_flag: row.try_get("escalation_flag")?,
        keywords: serde_json::from_value(keywords)?,
        sentiment: sentiment.map(serde_json::from_value).transpose()?,
        insights: insights.map(serde_json::from_value).transpose()?,
        summary: row.try_get("summary")?,
        classified_at: row.try_get("classified_at")?,
    })
}

fn row_to_session(row: &PgRow) -> Result<EscalationSession> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    Ok(EscalationSession {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        counsellor_id: row.try_get("counsellor_id")?,
        status: SessionStatus::from_db(&status).ok_or_else(|| corrupt("status", &status))?,
        priority: Priority::from_db(&priority).ok_or_else(|| corrupt("priority", &priority))?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        ended_at: row.try_get("ended_at")?,
        rating: row.try_get("rating")?,
    })
}

fn row_to_alert(row: &PgRow) -> Result<AlertMessage> {
    Ok(AlertMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        body: row.try_get("body")?,
        trigger_key: row.try_get("trigger_key")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl CareStore for PgStore {
    async fn upsert_user(&self, user: &UserAccount) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO care_users
              (id, email, full_name, role, institute, is_active, is_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
              email = EXCLUDED.email,
              full_name = EXCLUDED.full_name,
              role = EXCLUDED.role,
              institute = EXCLUDED.institute,
              is_active = EXCLUDED.is_active,
              is_verified = EXCLUDED.is_verified
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .bind(&user.institute)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert user"))?;

        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM care_users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load user"))?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn counsellors_for_institute(&self, institute: &str) -> Result<Vec<UserAccount>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT * FROM care_users WHERE role = $1 AND institute = $2")
            .bind(Role::Counsellor.as_str())
            .bind(institute)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to load counsellors"))?;

        rows.iter().map(row_to_user).collect()
    }

    async fn insert_item(&self, item: &ContentItem) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(&format!(
            "INSERT INTO content_items ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            ITEM_COLUMNS
        ))
        .bind(item.id)
        .bind(item.owner_id)
        .bind(item.kind.as_str())
        .bind(&item.text)
        .bind(&item.transcription)
        .bind(item.mood_level)
        .bind(serde_json::to_value(&item.emotions)?)
        .bind(item.created_at)
        .bind(item.risk_level.as_str())
        .bind(item.escalation_flag)
        .bind(serde_json::to_value(&item.keywords)?)
        .bind(item.sentiment.as_ref().map(serde_json::to_value).transpose()?)
        .bind(item.insights.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&item.summary)
        .bind(item.classified_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                CareError::NotFound(format!("user {}", item.owner_id))
            }
            _ => CareError::Database(format!("Failed to insert content item: {}", e)),
        })?;

        Ok(())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<ContentItem>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!("SELECT {} FROM content_items WHERE id = $1", ITEM_COLUMNS))
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load content item"))?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn save_classification(
        &self,
        item_id: Uuid,
        classification: &Classification,
        at: DateTime<Utc>,
    ) -> Result<ContentItem> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin classification transaction"))?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE id = $1 FOR UPDATE",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to lock content item"))?
        .ok_or_else(|| CareError::NotFound(format!("content item {}", item_id)))?;

        let mut item = row_to_item(&row)?;
        item.apply_classification(classification, at);

        sqlx::query(
            r#"
            UPDATE content_items
            SET risk_level = $2, keywords = $3, sentiment = $4, insights = $5, summary = $6,
                classified_at = $7
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item.risk_level.as_str())
        .bind(serde_json::to_value(&item.keywords)?)
        .bind(item.sentiment.as_ref().map(serde_json::to_value).transpose()?)
        .bind(item.insights.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&item.summary)
        .bind(item.classified_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to save classification"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit classification"))?;

        Ok(item)
    }

    async fn items_created_on(&self, day: NaiveDate) -> Result<Vec<ContentItem>> {
        self.ensure_schema().await?;
        let (start, end) = day_bounds(day);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load content items for day"))?;

        rows.iter().map(row_to_item).collect()
    }

    async fn record_escalation(&self, write: &EscalationWrite) -> Result<Option<EscalationRecord>> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin escalation transaction"))?;

        if let Some(item_id) = write.item_id {
            let flagged: Option<bool> =
                sqlx::query_scalar("SELECT escalation_flag FROM content_items WHERE id = $1 FOR UPDATE")
                    .bind(item_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err("Failed to lock content item"))?;

            match flagged {
                None => return Err(CareError::NotFound(format!("content item {}", item_id))),
                Some(true) => {
                    tx.rollback()
                        .await
                        .map_err(db_err("Failed to roll back escalation"))?;
                    return Ok(None);
                }
                Some(false) => {}
            }
        }

        let candidate_id = Uuid::new_v4();
        sqlx::query(&format!(
            r#"
            INSERT INTO escalation_sessions ({})
            VALUES ($1, $2, $3, 'escalated', $4, $5, $6, $6, NULL, NULL)
            ON CONFLICT (subject_id, counsellor_id) WHERE status IN ('active', 'escalated')
            DO NOTHING
            "#,
            SESSION_COLUMNS
        ))
        .bind(candidate_id)
        .bind(write.subject_id)
        .bind(write.counsellor_id)
        .bind(write.priority.as_str())
        .bind(&write.reason)
        .bind(write.at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to upsert escalation session"))?;

        let session_row = sqlx::query(&format!(
            r#"
            SELECT {} FROM escalation_sessions
            WHERE subject_id = $1 AND counsellor_id = $2 AND status IN ('active', 'escalated')
            "#,
            SESSION_COLUMNS
        ))
        .bind(write.subject_id)
        .bind(write.counsellor_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to load open escalation session"))?;
        let session = row_to_session(&session_row)?;
        let session_created = session.id == candidate_id;

        let alert_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO alert_messages (id, session_id, body, trigger_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, trigger_key) DO NOTHING
            "#,
        )
        .bind(alert_id)
        .bind(session.id)
        .bind(&write.alert_body)
        .bind(&write.trigger_key)
        .bind(write.at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to append alert"))?;

        let alert_row = sqlx::query("SELECT * FROM alert_messages WHERE session_id = $1 AND trigger_key = $2")
            .bind(session.id)
            .bind(&write.trigger_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to load alert"))?;
        let alert = row_to_alert(&alert_row)?;
        let alert_created = alert.id == alert_id;

        if let Some(item_id) = write.item_id {
            sqlx::query("UPDATE content_items SET escalation_flag = TRUE WHERE id = $1")
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("Failed to flag content item"))?;
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit escalation"))?;

        Ok(Some(EscalationRecord {
            session,
            alert,
            session_created,
            alert_created,
        }))
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<EscalationSession>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM escalation_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load session"))?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn open_sessions_for(&self, subject_id: Uuid) -> Result<Vec<EscalationSession>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM escalation_sessions
            WHERE subject_id = $1 AND status IN ('active', 'escalated')
            ORDER BY created_at, id
            "#,
            SESSION_COLUMNS
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load open sessions"))?;

        rows.iter().map(row_to_session).collect()
    }

    async fn alerts_for_session(&self, session_id: Uuid) -> Result<Vec<AlertMessage>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT * FROM alert_messages WHERE session_id = $1 ORDER BY created_at, id")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to load alerts"))?;

        rows.iter().map(row_to_alert).collect()
    }

    async fn escalated_sessions(&self, institute: Option<&str>) -> Result<Vec<EscalationSession>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT s.id, s.subject_id, s.counsellor_id, s.status, s.priority, s.reason,
                   s.created_at, s.updated_at, s.ended_at, s.rating
            FROM escalation_sessions s
            JOIN care_users u ON u.id = s.subject_id
            WHERE s.status = 'escalated' AND ($1::TEXT IS NULL OR u.institute = $1)
            "#,
        )
        .bind(institute)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load escalation queue"))?;

        rows.iter().map(row_to_session).collect()
    }

    async fn finish_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        rating: Option<i16>,
        at: DateTime<Utc>,
    ) -> Result<EscalationSession> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE escalation_sessions
            SET status = $2, rating = $3, ended_at = $4, updated_at = $4
            WHERE id = $1 AND status IN ('active', 'escalated')
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(status.as_str())
        .bind(rating)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to finish session"))?;

        match row {
            Some(row) => row_to_session(&row),
            None => match self.get_session(session_id).await? {
                Some(existing) => Err(CareError::InvalidTransition(format!(
                    "session {} is already {}",
                    session_id,
                    existing.status.as_str()
                ))),
                None => Err(CareError::NotFound(format!("session {}", session_id))),
            },
        }
    }

    async fn sessions_created_on(&self, day: NaiveDate) -> Result<Vec<EscalationSession>> {
        self.ensure_schema().await?;
        let (start, end) = day_bounds(day);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM escalation_sessions WHERE created_at >= $1 AND created_at < $2",
            SESSION_COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load sessions for day"))?;

        rows.iter().map(row_to_session).collect()
    }

    async fn alerts_created_on(&self, day: NaiveDate) -> Result<Vec<AlertMessage>> {
        self.ensure_schema().await?;
        let (start, end) = day_bounds(day);

        let rows = sqlx::query("SELECT * FROM alert_messages WHERE created_at >= $1 AND created_at < $2")
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to load alerts for day"))?;

        rows.iter().map(row_to_alert).collect()
    }

    async fn upsert_daily_analytics(&self, summary: &DailyAnalytics) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO daily_analytics (date, summary, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (date) DO UPDATE SET summary = EXCLUDED.summary, updated_at = NOW()
            "#,
        )
        .bind(summary.date)
        .bind(serde_json::to_value(summary)?)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert daily analytics"))?;

        Ok(())
    }

    async fn get_daily_analytics(&self, day: NaiveDate) -> Result<Option<DailyAnalytics>> {
        self.ensure_schema().await?;

        let summary: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT summary FROM daily_analytics WHERE date = $1")
                .bind(day)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("Failed to load daily analytics"))?;

        Ok(summary.map(serde_json::from_value).transpose()?)
    }

    async fn upsert_user_analytics(&self, summary: &UserDailyAnalytics) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO user_daily_analytics (user_id, date, summary, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, date) DO UPDATE SET summary = EXCLUDED.summary, updated_at = NOW()
            "#,
        )
        .bind(summary.user_id)
        .bind(summary.date)
        .bind(serde_json::to_value(summary)?)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert user analytics"))?;

        Ok(())
    }

    async fn get_user_analytics(&self, user_id: Uuid, day: NaiveDate) -> Result<Option<UserDailyAnalytics>> {
        self.ensure_schema().await?;

        let summary: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT summary FROM user_daily_analytics WHERE user_id = $1 AND date = $2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load user analytics"))?;

        Ok(summary.map(serde_json::from_value).transpose()?)
    }
}
