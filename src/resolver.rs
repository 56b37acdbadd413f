//! Counsellor resolution
//!
//! Picks the counsellor who receives an escalation for a given institute.

use crate::models::UserAccount;
use crate::store::CareStore;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Assigned(UserAccount),
    NoCounsellorAvailable,
}

pub struct CounsellorResolver {
    store: Arc<dyn CareStore>,
}

impl CounsellorResolver {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    /// Earliest-registered eligible counsellor of `institute`, ties broken by id.
    pub async fn resolve(&self, institute: &str) -> Result<ResolveOutcome> {
        if institute.trim().is_empty() {
            return Ok(ResolveOutcome::NoCounsellorAvailable);
        }

        let candidates = self.store.counsellors_for_institute(institute).await?;
        let chosen = pick(institute, candidates);

        debug!(
            institute,
            counsellor_id = ?chosen.as_ref().map(|c| c.id),
            "Counsellor resolution"
        );

        Ok(match chosen {
            Some(counsellor) => ResolveOutcome::Assigned(counsellor),
            None => ResolveOutcome::NoCounsellorAvailable,
        })
    }
}

fn pick(institute: &str, candidates: Vec<UserAccount>) -> Option<UserAccount> {
    candidates
        .into_iter()
        .filter(|c| c.can_take_escalations() && c.institute == institute)
        .min_by_key(|c| (c.created_at, c.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::InMemoryStore;
    use chrono::{Duration, Utc};

    fn counsellor(email: &str, institute: &str, age_minutes: i64) -> UserAccount {
        let mut user = UserAccount::new(email, email, Role::Counsellor, institute).verified();
        user.created_at = Utc::now() - Duration::minutes(age_minutes);
        user
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let store = Arc::new(InMemoryStore::new());
        let oldest = counsellor("a@uni.edu", "uni", 30);
        let middle = counsellor("b@uni.edu", "uni", 20);
        let newest = counsellor("c@uni.edu", "uni", 10);
        for user in [&newest, &oldest, &middle] {
            store.upsert_user(user).await.unwrap();
        }

        let resolver = CounsellorResolver::new(store);
        for _ in 0..5 {
            assert_eq!(
                resolver.resolve("uni").await.unwrap(),
                ResolveOutcome::Assigned(oldest.clone())
            );
        }
    }

    #[test]
    fn test_tie_broken_by_id() {
        let mut first = counsellor("a@uni.edu", "uni", 5);
        let mut second = counsellor("b@uni.edu", "uni", 5);
        second.created_at = first.created_at;
        if second.id < first.id {
            std::mem::swap(&mut first, &mut second);
        }

        let chosen = pick("uni", vec![second.clone(), first.clone()]).unwrap();
        assert_eq!(chosen.id, first.id);
    }

    #[test]
    fn test_ineligible_counsellors_are_skipped() {
        let mut inactive = counsellor("old@uni.edu", "uni", 60);
        inactive.is_active = false;
        let unverified = UserAccount::new("new@uni.edu", "New", Role::Counsellor, "uni");
        let other_institute = counsellor("x@other.edu", "other", 90);

        assert!(pick("uni", vec![inactive.clone(), unverified.clone(), other_institute.clone()]).is_none());

        let eligible = counsellor("ok@uni.edu", "uni", 1);
        let chosen = pick("uni", vec![inactive, unverified, other_institute, eligible.clone()]);
        assert_eq!(chosen, Some(eligible));
    }

    #[test]
    fn test_empty_institute_never_matches() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = CounsellorResolver::new(store);
        let outcome = tokio_test::block_on(resolver.resolve("  ")).unwrap();
        assert_eq!(outcome, ResolveOutcome::NoCounsellorAvailable);
    }
}
