//! Escalation coordinator
//!
//! CLASSIFIED ITEM → PERSIST → DECIDE → RESOLVE COUNSELLOR → RECORD → NOTIFY
//!
//! The record step is a single atomic store call, so concurrent or repeated
//! runs for the same item produce at most one session and one alert.

use crate::error::CareError;
use crate::models::{
    Classification, ContentItem, EscalationDecision, EscalationOutcome, EscalationSession,
    SessionStatus, SkipReason, UserAccount,
};
use crate::notify::{trigger_key, EscalationEvent, EscalationNotifier};
use crate::policy;
use crate::resolver::{CounsellorResolver, ResolveOutcome};
use crate::store::{CareStore, EscalationRecord, EscalationWrite};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Characters of the source text quoted in an alert.
const EXCERPT_CHARS: usize = 200;

pub struct EscalationCoordinator {
    store: Arc<dyn CareStore>,
    resolver: CounsellorResolver,
    notifier: Arc<dyn EscalationNotifier>,
}

impl EscalationCoordinator {
    pub fn new(store: Arc<dyn CareStore>, notifier: Arc<dyn EscalationNotifier>) -> Self {
        Self {
            resolver: CounsellorResolver::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Persist a classification and escalate the item if policy requires it.
    pub async fn handle_classified_item(
        &self,
        item: &ContentItem,
        classification: &Classification,
    ) -> Result<EscalationOutcome> {
        let now = Utc::now();

        // === PERSIST ===
        let stored = self
            .store
            .save_classification(item.id, classification, now)
            .await?;

        // === DECIDE ===
        let decision = policy::decide(stored.risk_level, stored.kind, stored.escalation_flag);
        debug!(
            item_id = %stored.id,
            risk = stored.risk_level.as_str(),
            already_escalated = stored.escalation_flag,
            escalate = decision.should_escalate,
            "Policy decision"
        );

        if !decision.should_escalate {
            return Ok(EscalationOutcome::NoEscalation {
                risk_level: stored.risk_level,
            });
        }

        // === RESOLVE ===
        let owner = self.require_user(stored.owner_id).await?;
        let counsellor = match self.resolver.resolve(&owner.institute).await? {
            ResolveOutcome::Assigned(counsellor) => counsellor,
            ResolveOutcome::NoCounsellorAvailable => {
                warn!(
                    item_id = %stored.id,
                    institute = %owner.institute,
                    risk = stored.risk_level.as_str(),
                    "No counsellor available, escalation dropped"
                );
                return Ok(EscalationOutcome::Skipped {
                    reason: SkipReason::NoCounsellor,
                });
            }
        };

        // === RECORD ===
        let write = EscalationWrite {
            item_id: Some(stored.id),
            subject_id: owner.id,
            counsellor_id: counsellor.id,
            priority: decision.priority,
            reason: decision.reason.clone(),
            alert_body: item_alert_body(&owner, &stored, &decision),
            trigger_key: trigger_key(&[&stored.id.to_string(), &counsellor.id.to_string()]),
            at: now,
        };

        match self.store.record_escalation(&write).await? {
            Some(record) => {
                info!(
                    item_id = %stored.id,
                    session_id = %record.session.id,
                    counsellor_id = %counsellor.id,
                    priority = decision.priority.as_str(),
                    session_created = record.session_created,
                    "Escalation triggered"
                );
                Ok(self.finish(record, counsellor).await)
            }
            None => {
                debug!(item_id = %stored.id, "Item escalated concurrently, nothing to do");
                Ok(EscalationOutcome::NoEscalation {
                    risk_level: stored.risk_level,
                })
            }
        }
    }

    /// Escalate a subject on request, without a triggering content item.
    pub async fn escalate_manually(&self, subject_id: Uuid, reason: &str) -> Result<EscalationOutcome> {
        let now = Utc::now();
        let decision = EscalationDecision::manual(reason);
        let subject = self.require_user(subject_id).await?;

        let counsellor = match self.resolver.resolve(&subject.institute).await? {
            ResolveOutcome::Assigned(counsellor) => counsellor,
            ResolveOutcome::NoCounsellorAvailable => {
                warn!(
                    subject_id = %subject_id,
                    institute = %subject.institute,
                    "No counsellor available for manual escalation"
                );
                return Ok(EscalationOutcome::Skipped {
                    reason: SkipReason::NoCounsellor,
                });
            }
        };

        let minute = now.format("%Y-%m-%d %H:%M").to_string();
        let write = EscalationWrite {
            item_id: None,
            subject_id,
            counsellor_id: counsellor.id,
            priority: decision.priority,
            reason: decision.reason.clone(),
            alert_body: manual_alert_body(&subject, &decision, now),
            trigger_key: trigger_key(&[&subject_id.to_string(), &decision.reason, &minute]),
            at: now,
        };

        let record = self
            .store
            .record_escalation(&write)
            .await?
            .ok_or_else(|| CareError::Database("manual escalation was not recorded".into()))?;

        info!(
            subject_id = %subject_id,
            session_id = %record.session.id,
            counsellor_id = %counsellor.id,
            "Manual escalation recorded"
        );
        Ok(self.finish(record, counsellor).await)
    }

    /// Escalated sessions, most urgent first, newest first within a priority.
    pub async fn escalation_queue(&self, institute: Option<&str>) -> Result<Vec<EscalationSession>> {
        let mut sessions = self.store.escalated_sessions(institute).await?;
        sessions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions)
    }

    /// Open sessions for one subject, oldest first.
    pub async fn open_sessions(&self, subject_id: Uuid) -> Result<Vec<EscalationSession>> {
        self.require_user(subject_id).await?;
        self.store.open_sessions_for(subject_id).await
    }

    /// Close an open session. Only `Completed` and `Closed` are valid targets.
    pub async fn resolve_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        rating: Option<i16>,
    ) -> Result<EscalationSession> {
        if status.is_open() {
            return Err(CareError::InvalidTransition(format!(
                "cannot resolve session {} to {}",
                session_id,
                status.as_str()
            )));
        }
        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(CareError::InvalidInput(format!(
                    "rating must be between 1 and 5, got {}",
                    rating
                )));
            }
        }

        let session = self
            .store
            .finish_session(session_id, status, rating, Utc::now())
            .await?;
        info!(session_id = %session_id, status = status.as_str(), "Session resolved");
        Ok(session)
    }

    async fn require_user(&self, user_id: Uuid) -> Result<UserAccount> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| CareError::NotFound(format!("user {}", user_id)))
    }

    async fn finish(&self, record: EscalationRecord, counsellor: UserAccount) -> EscalationOutcome {
        // === NOTIFY ===
        if record.alert_created {
            let event = EscalationEvent {
                session: record.session.clone(),
                counsellor: counsellor.clone(),
                subject_id: record.session.subject_id,
                priority: record.session.priority,
                session_created: record.session_created,
            };
            if let Err(e) = self.notifier.counsellor_notified(&event).await {
                warn!(session_id = %record.session.id, "Counsellor notification failed: {}", e);
            }
        } else {
            debug!(session_id = %record.session.id, "Alert already present, counsellor not notified again");
        }

        EscalationOutcome::Triggered {
            session: record.session,
            counsellor,
            alert: record.alert,
            session_created: record.session_created,
        }
    }
}

fn item_alert_body(owner: &UserAccount, item: &ContentItem, decision: &EscalationDecision) -> String {
    let mut body = String::new();
    body.push_str(&format!("ESCALATION ALERT: {} risk {} detected\n\n", item.risk_level, item.kind));
    body.push_str(&format!("Student: {} ({})\n", owner.full_name, owner.email));
    body.push_str(&format!("Content: {}\n", item.kind));
    body.push_str(&format!("Risk Level: {}\n", item.risk_level.as_str().to_uppercase()));
    if let Some(mood) = item.mood_level {
        body.push_str(&format!("Mood Level: {}/5\n", mood));
    }
    body.push_str(&format!("Date: {}\n", item.created_at.format("%Y-%m-%d %H:%M")));
    body.push_str(&format!("Reason: {}\n", decision.reason));
    body.push_str(&format!("Priority: {}\n\n", decision.priority));
    body.push_str(&format!("Preview: {}\n\n", excerpt(&item.text)));
    if let Some(insights) = &item.insights {
        body.push_str(&format!("AI Assessment: {}\n\n", insights.recommendations.join("; ")));
    }
    body.push_str("Please reach out to the student as soon as possible.");
    body
}

fn manual_alert_body(subject: &UserAccount, decision: &EscalationDecision, at: DateTime<Utc>) -> String {
    format!(
        "ESCALATION ALERT: Escalation requested\n\n\
         Student: {} ({})\n\
         Date: {}\n\
         Reason: {}\n\
         Priority: {}\n\n\
         Please review the conversation history and reach out to the student.",
        subject.full_name,
        subject.email,
        at.format("%Y-%m-%d %H:%M"),
        decision.reason,
        decision.priority,
    )
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
