//! REST API for the escalation service
//!
//! Thin wrappers over the store, coordinator, aggregator and job queue.
//! Classification never runs on the request path.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::analytics::AnalyticsAggregator;
use crate::coordinator::EscalationCoordinator;
use crate::error::CareError;
use crate::jobs::{Job, JobQueue};
use crate::models::{ContentItem, ContentKind, Role, SessionStatus, UserAccount};
use crate::store::CareStore;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub institute: String,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitContentRequest {
    pub owner_id: Uuid,
    pub kind: ContentKind,
    pub text: String,
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub mood_level: Option<i16>,
    #[serde(default)]
    pub emotions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualEscalationRequest {
    pub subject_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveSessionRequest {
    pub status: SessionStatus,
    #[serde(default)]
    pub rating: Option<i16>,
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    pub institute: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(status: StatusCode, data: T) -> Reply {
    (status, Json(ApiResponse::success(data)))
}

fn failed(err: CareError) -> Reply {
    let status = match &err {
        CareError::NotFound(_) => StatusCode::NOT_FOUND,
        CareError::InvalidInput(_) | CareError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn CareStore>,
    pub coordinator: Arc<EscalationCoordinator>,
    pub aggregator: Arc<AnalyticsAggregator>,
    pub queue: JobQueue,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "pending_jobs": state.queue.pending(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Users
/// =============================

async fn register_user(State(state): State<ApiState>, Json(req): Json<RegisterUserRequest>) -> Reply {
    if req.email.trim().is_empty() {
        return failed(CareError::InvalidInput("email is required".into()));
    }

    let mut user = UserAccount::new(req.email.trim(), req.full_name.trim(), req.role, req.institute.trim());
    user.is_verified = req.is_verified;

    match state.store.upsert_user(&user).await {
        Ok(()) => {
            info!(user_id = %user.id, role = user.role.as_str(), "User registered");
            ok(StatusCode::CREATED, user)
        }
        Err(e) => failed(e),
    }
}

/// =============================
/// Content Submission
/// =============================

async fn submit_content(State(state): State<ApiState>, Json(req): Json<SubmitContentRequest>) -> Reply {
    if req.text.trim().is_empty() {
        return failed(CareError::InvalidInput("text must not be empty".into()));
    }
    if let Some(mood) = req.mood_level {
        if !(1..=5).contains(&mood) {
            return failed(CareError::InvalidInput(format!("mood_level must be 1-5, got {}", mood)));
        }
    }

    let mut item = ContentItem::new(req.owner_id, req.kind, req.text).with_emotions(req.emotions);
    item.transcription = req.transcription;
    item.mood_level = req.mood_level;

    if let Err(e) = state.store.insert_item(&item).await {
        return failed(e);
    }

    // Stored content is accepted even if classification cannot be queued.
    if let Err(e) = state.queue.enqueue(Job::ClassifyItem { item_id: item.id }).await {
        error!(item_id = %item.id, "Failed to enqueue classification: {}", e);
    }

    info!(item_id = %item.id, kind = item.kind.as_str(), "Content accepted");
    ok(StatusCode::ACCEPTED, item)
}

/// =============================
/// Escalations
/// =============================

async fn manual_escalation(
    State(state): State<ApiState>,
    Json(req): Json<ManualEscalationRequest>,
) -> Reply {
    match state.coordinator.escalate_manually(req.subject_id, &req.reason).await {
        Ok(outcome) => ok(StatusCode::OK, outcome),
        Err(e) => failed(e),
    }
}

async fn escalation_queue(State(state): State<ApiState>, Query(params): Query<QueueParams>) -> Reply {
    let institute = params.institute.as_deref().filter(|i| !i.trim().is_empty());
    match state.coordinator.escalation_queue(institute).await {
        Ok(sessions) => ok(StatusCode::OK, sessions),
        Err(e) => failed(e),
    }
}

async fn open_sessions(State(state): State<ApiState>, Path(user_id): Path<Uuid>) -> Reply {
    match state.coordinator.open_sessions(user_id).await {
        Ok(sessions) => ok(StatusCode::OK, sessions),
        Err(e) => failed(e),
    }
}

async fn resolve_session(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ResolveSessionRequest>,
) -> Reply {
    match state
        .coordinator
        .resolve_session(session_id, req.status, req.rating)
        .await
    {
        Ok(session) => ok(StatusCode::OK, session),
        Err(e) => failed(e),
    }
}

/// =============================
/// Analytics
/// =============================

async fn run_rollup(State(state): State<ApiState>, Path(day): Path<NaiveDate>) -> Reply {
    match state.aggregator.rollup(day).await {
        Ok(summary) => {
            if let Err(e) = state.aggregator.rollup_all_users(day).await {
                error!(date = %day, "User rollups failed: {}", e);
            }
            ok(StatusCode::OK, summary)
        }
        Err(e) => failed(e),
    }
}

async fn get_analytics(State(state): State<ApiState>, Path(day): Path<NaiveDate>) -> Reply {
    match state.store.get_daily_analytics(day).await {
        Ok(Some(summary)) => ok(StatusCode::OK, summary),
        Ok(None) => failed(CareError::NotFound(format!("analytics for {}", day))),
        Err(e) => failed(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(register_user))
        .route("/api/content", post(submit_content))
        .route("/api/escalations/manual", post(manual_escalation))
        .route("/api/escalations/queue", get(escalation_queue))
        .route("/api/users/:id/sessions", get(open_sessions))
        .route("/api/sessions/:id/resolve", post(resolve_session))
        .route("/api/analytics/:date/rollup", post(run_rollup))
        .route("/api/analytics/:date", get(get_analytics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobReceiver;
    use crate::notify::LoggingNotifier;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryStore>, JobQueue, JobReceiver) {
        let store = Arc::new(InMemoryStore::new());
        let (queue, receiver) = JobQueue::bounded(16);
        let state = ApiState {
            store: store.clone(),
            coordinator: Arc::new(EscalationCoordinator::new(store.clone(), Arc::new(LoggingNotifier))),
            aggregator: Arc::new(AnalyticsAggregator::new(store.clone())),
            queue: queue.clone(),
        };
        (create_router(state), store, queue, receiver)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn register(router: &Router, email: &str, role: &str) -> Uuid {
        let (status, body) = call(
            router,
            "POST",
            "/api/users",
            serde_json::json!({
                "email": email,
                "full_name": email,
                "role": role,
                "institute": "North",
                "is_verified": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body.data.unwrap()["id"].as_str().unwrap().to_string();
        Uuid::parse_str(&id).unwrap()
    }

    #[tokio::test]
    async fn test_submit_content_is_accepted_and_queued() {
        let (router, store, queue, _receiver) = app();
        let owner = register(&router, "sam@uni.edu", "student").await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/content",
            serde_json::json!({"owner_id": owner, "kind": "journal", "text": "long day", "mood_level": 2}),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.success);
        let item_id = Uuid::parse_str(body.data.unwrap()["id"].as_str().unwrap()).unwrap();
        assert!(store.get_item(item_id).await.unwrap().is_some());
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_submit_content_validation() {
        let (router, _store, _queue, _receiver) = app();

        let (status, _) = call(
            &router,
            "POST",
            "/api/content",
            serde_json::json!({"owner_id": Uuid::new_v4(), "kind": "chat_message", "text": "  "}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            "POST",
            "/api/content",
            serde_json::json!({"owner_id": Uuid::new_v4(), "kind": "chat_message", "text": "hi"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_manual_escalation_queue_and_resolve() {
        let (router, _store, _queue, _receiver) = app();
        let student = register(&router, "sam@uni.edu", "student").await;
        register(&router, "cora@uni.edu", "counsellor").await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/escalations/manual",
            serde_json::json!({"subject_id": student, "reason": "Asked for help"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["outcome"], "triggered");
        let session_id = data["session"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&router, "GET", "/api/escalations/queue?institute=North", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().as_array().unwrap().len(), 1);

        let sessions_uri = format!("/api/users/{}/sessions", student);
        let (status, body) = call(&router, "GET", &sessions_uri, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()[0]["id"], session_id.as_str());

        let uri = format!("/api/sessions/{}/resolve", session_id);
        let (status, _) = call(&router, "POST", &uri, serde_json::json!({"status": "escalated"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&router, "POST", &uri, serde_json::json!({"status": "closed", "rating": 5})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["status"], "closed");

        let (_, body) = call(&router, "GET", "/api/escalations/queue", serde_json::json!({})).await;
        assert!(body.data.unwrap().as_array().unwrap().is_empty());

        let (_, body) = call(&router, "GET", &sessions_uri, serde_json::json!({})).await;
        assert!(body.data.unwrap().as_array().unwrap().is_empty());

        let unknown = format!("/api/users/{}/sessions", Uuid::new_v4());
        let (status, _) = call(&router, "GET", &unknown, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analytics_rollup_and_fetch() {
        let (router, _store, _queue, _receiver) = app();

        let (status, _) = call(&router, "GET", "/api/analytics/2024-05-01", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, "POST", "/api/analytics/2024-05-01/rollup", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["total_items"], 0);

        let (status, body) = call(&router, "GET", "/api/analytics/2024-05-01", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["date"], "2024-05-01");
    }
}
