// LPxGP Resolver - Review API Server
// JSON endpoints over the review queue, golden records and run history

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use lpxgp_resolver::db::{
    get_golden, golden_history, list_runs, pending_review_items, record_decision, RunRecord,
};
use lpxgp_resolver::{GoldenRecord, ReviewItem, Verdict};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resolver-server", about = "Review API for the LP/GP resolver")]
struct Args {
    #[arg(long, default_value = "resolver.db")]
    db: PathBuf,

    #[arg(long, default_value = "0.0.0.0:3000")]
    addr: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }

    fn fail(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(message.into()),
            }),
        )
            .into_response()
    }
}

fn internal_error<T: Serialize>(context: &str, err: anyhow::Error) -> Response {
    error!(error = %err, "{}", context);
    ApiResponse::<T>::fail(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, err))
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct DecisionRequest {
    /// "match" or "non_match"
    verdict: String,
    reviewer: String,
    notes: Option<String>,
}

#[derive(Serialize)]
struct GoldenResponse {
    golden_id: String,
    version: i64,
    name: Option<String>,
    members: Vec<String>,
    record: GoldenRecord,
}

impl From<GoldenRecord> for GoldenResponse {
    fn from(record: GoldenRecord) -> Self {
        Self {
            golden_id: record.golden_id.clone(),
            version: record.version,
            name: record.name().map(str::to_string),
            members: record.members.clone(),
            record,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/review?limit=N - Pending items, highest priority first
async fn list_review(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let conn = state.conn();
    match pending_review_items(&conn, params.limit.unwrap_or(50)) {
        Ok(items) => ApiResponse::ok(items),
        Err(e) => internal_error::<Vec<ReviewItem>>("Error listing review queue", e),
    }
}

/// POST /api/review/:id/decision - Record a human verdict
async fn decide_review(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response {
    let Some(verdict) = Verdict::parse(&request.verdict.replace('-', "_")) else {
        return ApiResponse::<()>::fail(
            StatusCode::BAD_REQUEST,
            format!("verdict must be 'match' or 'non_match', got '{}'", request.verdict),
        );
    };
    if request.reviewer.trim().is_empty() {
        return ApiResponse::<()>::fail(StatusCode::BAD_REQUEST, "reviewer is required");
    }

    let conn = state.conn();
    match lpxgp_resolver::db::get_review_item(&conn, &item_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ApiResponse::<()>::fail(StatusCode::NOT_FOUND, format!("review item {} not found", item_id))
        }
        Err(e) => return internal_error::<()>("Error loading review item", e),
    }

    match record_decision(&conn, &item_id, verdict, request.reviewer.trim(), request.notes.as_deref()) {
        Ok(decision) => {
            info!(item = %item_id, verdict = verdict.as_str(), reviewer = %decision.reviewer, "review decision recorded");
            ApiResponse::ok(decision)
        }
        Err(e) => internal_error::<()>("Error recording decision", e),
    }
}

/// GET /api/golden/:id - Current version
async fn show_golden(State(state): State<AppState>, Path(golden_id): Path<String>) -> Response {
    let conn = state.conn();
    match get_golden(&conn, &golden_id) {
        Ok(Some(record)) => ApiResponse::ok(GoldenResponse::from(record)),
        Ok(None) => ApiResponse::<()>::fail(StatusCode::NOT_FOUND, format!("golden record {} not found", golden_id)),
        Err(e) => internal_error::<()>("Error loading golden record", e),
    }
}

/// GET /api/golden/:id/history - Every version, oldest first
async fn show_golden_history(State(state): State<AppState>, Path(golden_id): Path<String>) -> Response {
    let conn = state.conn();
    match golden_history(&conn, &golden_id) {
        Ok(history) if history.is_empty() => {
            ApiResponse::<()>::fail(StatusCode::NOT_FOUND, format!("golden record {} not found", golden_id))
        }
        Ok(history) => ApiResponse::ok(history),
        Err(e) => internal_error::<()>("Error loading golden history", e),
    }
}

/// GET /api/runs?limit=N - Most recent first
async fn list_recent_runs(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let conn = state.conn();
    match list_runs(&conn, params.limit.unwrap_or(20)) {
        Ok(runs) => ApiResponse::ok(runs),
        Err(e) => internal_error::<Vec<RunRecord>>("Error listing runs", e),
    }
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/review", get(list_review))
        .route("/review/:id/decision", post(decide_review))
        .route("/golden/:id", get(show_golden))
        .route("/golden/:id/history", get(show_golden_history))
        .route("/runs", get(list_recent_runs))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    println!("🌐 LPxGP Resolver - Review API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = lpxgp_resolver::open(&args.db)?;
    println!("✓ Database opened: {:?}", args.db);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   Review queue: http://{}/api/review", args.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app(state))
        .await
        .context("Server failed")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
