use care_escalation::{
    analytics::AnalyticsAggregator,
    analyzer::HeuristicAnalyzer,
    classifier::{ClassificationHints, ContentClassifier},
    coordinator::EscalationCoordinator,
    models::{ContentItem, ContentKind, EscalationOutcome, Role, UserAccount},
    notify::LoggingNotifier,
    store::{CareStore, InMemoryStore},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Student care escalation demo starting");

    // Create components
    let store = Arc::new(InMemoryStore::new());
    let classifier = ContentClassifier::new(Arc::new(HeuristicAnalyzer::new()));
    let coordinator = EscalationCoordinator::new(store.clone(), Arc::new(LoggingNotifier));
    let aggregator = AnalyticsAggregator::new(store.clone());

    let student = UserAccount::new("sam@uni.edu", "Sam Student", Role::Student, "North Campus");
    let counsellor =
        UserAccount::new("cora@uni.edu", "Cora Counsellor", Role::Counsellor, "North Campus").verified();
    store.upsert_user(&student).await?;
    store.upsert_user(&counsellor).await?;

    let messages = [
        (ContentKind::Journal, "Exams are stressing me out but I had fun with friends."),
        (ContentKind::ChatMessage, "I want to end it all, there is no reason to live."),
        (ContentKind::ChatMessage, "I feel hopeless and I can't go on like this."),
    ];

    println!("\n=== ESCALATION DEMO ===");
    for (kind, text) in messages {
        let item = ContentItem::new(student.id, kind, text);
        store.insert_item(&item).await?;

        let classification = classifier
            .classify_with_retry(&item.analysis_text(), &ClassificationHints::from_item(&item))
            .await?;
        let outcome = coordinator.handle_classified_item(&item, &classification).await?;

        println!("\n[{}] {}", kind, text);
        println!("  keywords: {:?}", classification.keywords);
        if let Some(summary) = &classification.summary {
            println!("  summary: {}", summary);
        }
        if let Some(insights) = &classification.insights {
            println!("  recommendations: {:?}", insights.recommendations);
        }
        match outcome {
            EscalationOutcome::NoEscalation { risk_level } => {
                println!("  risk {}: no escalation", risk_level);
            }
            EscalationOutcome::Skipped { reason } => {
                println!("  escalation skipped: {:?}", reason);
            }
            EscalationOutcome::Triggered { session, counsellor, alert, session_created } => {
                println!(
                    "  escalated to {} (session {}, {})",
                    counsellor.full_name,
                    session.id,
                    if session_created { "new" } else { "reused" }
                );
                println!("  alert:\n{}", alert.body);
            }
        }
    }

    println!("\nSessions: {}, alerts: {}", store.session_count().await, store.alert_count().await);

    let summary = aggregator.rollup(Utc::now().date_naive()).await?;
    println!("\n=== DAILY ANALYTICS ===");
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
