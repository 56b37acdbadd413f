//! Student care escalation service
//!
//! Watches student journal entries and chat messages for signs of risk and
//! routes high-risk content to a counsellor at the student's institute:
//! - Classifies content through a pluggable text-analysis service
//! - Applies a deterministic risk policy
//! - Opens or reuses an escalation session and appends an alert, atomically
//! - Rolls up daily analytics
//!
//! PIPELINE:
//! SUBMIT → QUEUE → CLASSIFY → PERSIST → DECIDE → RESOLVE → RECORD → NOTIFY

pub mod analytics;
pub mod analyzer;
pub mod api;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gemini;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod policy;
pub mod resolver;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::{ClassificationHints, ContentClassifier};
pub use coordinator::EscalationCoordinator;
