//! Risk policy
//!
//! Pure mapping from a classified item to an escalation decision.
//! No I/O, fully deterministic.

use crate::models::{ContentKind, EscalationDecision, Priority, RiskLevel};

/// Decide whether an item should be escalated to a counsellor.
///
/// | risk     | escalate | priority |
/// |----------|----------|----------|
/// | low      | no       | low      |
/// | medium   | no       | medium   |
/// | high     | yes      | high     |
/// | critical | yes      | urgent   |
///
/// An item that is already escalated never escalates again.
pub fn decide(risk: RiskLevel, kind: ContentKind, already_escalated: bool) -> EscalationDecision {
    let priority = priority_for(risk);
    let reason = format!("{} risk detected in {}", risk, kind);

    EscalationDecision {
        should_escalate: !already_escalated && risk.is_high_or_above(),
        priority,
        reason,
    }
}

pub fn priority_for(risk: RiskLevel) -> Priority {
    match risk {
        RiskLevel::Low => Priority::Low,
        RiskLevel::Medium => Priority::Medium,
        RiskLevel::High => Priority::High,
        RiskLevel::Critical => Priority::Urgent,
    }
}

impl EscalationDecision {
    /// Escalation requested by a person rather than the classifier.
    pub fn manual(reason: &str) -> Self {
        let reason = reason.trim();
        Self {
            should_escalate: true,
            priority: Priority::High,
            reason: if reason.is_empty() {
                "User requested escalation".to_string()
            } else {
                reason.to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table() {
        let priorities = [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent];

        // Every (risk, kind, already_escalated) combination
        for (risk, expect_priority) in RiskLevel::ALL.into_iter().zip(priorities) {
            for kind in [ContentKind::Journal, ContentKind::ChatMessage] {
                for already in [false, true] {
                    let first = decide(risk, kind, already);
                    let second = decide(risk, kind, already);
                    let expect_escalate = risk >= RiskLevel::High && !already;

                    assert_eq!(first, second, "non-deterministic for {:?}/{:?}/{}", risk, kind, already);
                    assert_eq!(first.should_escalate, expect_escalate, "{:?}/{:?}/{}", risk, kind, already);
                    assert_eq!(first.priority, expect_priority, "{:?}/{:?}/{}", risk, kind, already);
                }
            }
        }
    }

    #[test]
    fn test_reason_template() {
        let decision = decide(RiskLevel::Critical, ContentKind::ChatMessage, false);
        assert_eq!(decision.reason, "Critical risk detected in chat message");

        let decision = decide(RiskLevel::High, ContentKind::Journal, false);
        assert_eq!(decision.reason, "High risk detected in journal entry");
    }

    #[test]
    fn test_manual_decision() {
        let decision = EscalationDecision::manual("  ");
        assert!(decision.should_escalate);
        assert_eq!(decision.priority, Priority::High);
        assert_eq!(decision.reason, "User requested escalation");
    }
}
