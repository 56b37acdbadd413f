//! Escalation notifications
//!
//! The coordinator reports every triggered escalation here. Delivery is best
//! effort: failures are logged by the caller and never undo an escalation.

use crate::models::{EscalationSession, Priority, UserAccount};
use crate::Result;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// A triggered escalation as seen by a notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationEvent {
    pub session: EscalationSession,
    pub counsellor: UserAccount,
    pub subject_id: Uuid,
    pub priority: Priority,
    pub session_created: bool,
}

#[async_trait::async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn counsellor_notified(&self, event: &EscalationEvent) -> Result<()>;
}

/// Writes escalations to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl EscalationNotifier for LoggingNotifier {
    async fn counsellor_notified(&self, event: &EscalationEvent) -> Result<()> {
        info!(
            session_id = %event.session.id,
            counsellor_id = %event.counsellor.id,
            subject_id = %event.subject_id,
            priority = event.priority.as_str(),
            new_session = event.session_created,
            "Counsellor notified of escalation"
        );
        Ok(())
    }
}

/// Keeps every event in memory for inspection.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<RwLock<Vec<EscalationEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EscalationEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl EscalationNotifier for RecordingNotifier {
    async fn counsellor_notified(&self, event: &EscalationEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

/// Stable SHA256 key identifying one alert.
///
/// The same parts always hash to the same key, so replays of the same trigger
/// collapse onto one stored alert.
pub fn trigger_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    let mut writer = HashWriter(&mut hasher);
    for part in parts {
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart.
        let _ = write!(writer, "{}:{};", part.len(), part);
    }
    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, SessionStatus};
    use chrono::Utc;

    fn sample_event() -> EscalationEvent {
        let counsellor = UserAccount::new("c@uni.edu", "C", Role::Counsellor, "uni").verified();
        let subject_id = Uuid::new_v4();
        EscalationEvent {
            session: EscalationSession {
                id: Uuid::new_v4(),
                subject_id,
                counsellor_id: Some(counsellor.id),
                status: SessionStatus::Escalated,
                priority: Priority::Urgent,
                reason: "Critical risk detected in chat message".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                ended_at: None,
                rating: None,
            },
            counsellor,
            subject_id,
            priority: Priority::Urgent,
            session_created: true,
        }
    }

    #[test]
    fn test_trigger_key_is_stable() {
        let a = trigger_key(&["item-1", "counsellor-1"]);
        let b = trigger_key(&["item-1", "counsellor-1"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, trigger_key(&["item-2", "counsellor-1"]));
        assert_ne!(trigger_key(&["ab", "c"]), trigger_key(&["a", "bc"]));
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_events() {
        let notifier = RecordingNotifier::new();
        let event = sample_event();
        notifier.counsellor_notified(&event).await.unwrap();
        LoggingNotifier.counsellor_notified(&event).await.unwrap();

        let events = notifier.events().await;
        assert_eq!(events, vec![event]);
    }
}
