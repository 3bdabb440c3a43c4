use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::client::GENERATE_PATH;
use crate::data::{
    ClassGroupId, Engine, ObligationFulfillment, PeriodId, ScheduleEntry, ScheduledLesson,
    SolverRequest, SolverResponse, TeachingObligation, TimeSlot,
};
use crate::engine::TimetableGenerator;
use crate::error::{GenerationError, RepositoryError};
use crate::repository::{TimetableRepository, load_inputs};
use crate::solver;
use std::collections::HashMap;

/// Shared state of the administrative routes.
#[derive(Clone)]
pub struct AppState {
    pub generator: TimetableGenerator,
}

/// Error body returned by every failing route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Generation(GenerationError),
    Repository(RepositoryError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    message,
                    details: None,
                },
            ),
            AppError::Generation(err) => {
                let status = match &err {
                    GenerationError::PeriodNotFound(_) => StatusCode::NOT_FOUND,
                    GenerationError::IncompleteInput { .. }
                    | GenerationError::NoFeasibleSchedule(_) => StatusCode::BAD_REQUEST,
                    GenerationError::InvalidSchedule { .. }
                    | GenerationError::Read(_)
                    | GenerationError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        message: err.reason().to_string(),
                        details: Some(err.to_string()),
                    },
                )
            }
            AppError::Repository(err) => {
                let status = match err {
                    RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        message: err.to_string(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        AppError::Generation(err)
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub period_id: Option<PeriodId>,
    #[serde(default)]
    pub constraints: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub message: String,
    pub total: usize,
    pub engine: Engine,
    pub fully_scheduled: bool,
    pub fulfillment: Vec<ObligationFulfillment>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub period_id: PeriodId,
    #[serde(default)]
    pub class_group_id: Option<ClassGroupId>,
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn solve_handler(
    Json(input): Json<SolverRequest>,
) -> Result<Json<SolverResponse>, (StatusCode, String)> {
    // The ILP solve is CPU-bound; keep it off the async workers.
    match tokio::task::spawn_blocking(move || solver::solve(&input)).await {
        Ok(Ok(output)) => Ok(Json(output)),
        Ok(Err(e)) => Err((StatusCode::BAD_REQUEST, e)),
        Err(e) => {
            error!("Solver task failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let period_id = request
        .period_id
        .ok_or_else(|| AppError::BadRequest("period_id is required".to_string()))?;

    let outcome = state
        .generator
        .generate(period_id, &request.constraints)
        .await?;

    Ok(Json(GenerateResponse {
        message: format!("schedule generated for period {}", outcome.period_id),
        total: outcome.total,
        engine: outcome.engine,
        fully_scheduled: outcome.is_fully_scheduled(),
        fulfillment: outcome.fulfillment,
    }))
}

async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Vec<ScheduledLesson>>, AppError> {
    let repository = state.generator.repository();
    let inputs = load_inputs(repository.as_ref(), query.period_id).await?;
    let entries = repository
        .list_schedule(query.period_id, query.class_group_id)
        .await?;
    Ok(Json(join_lessons(
        entries,
        &inputs.time_slots,
        &inputs.obligations,
    )))
}

/// Attaches each entry's slot and obligation; references that no longer
/// resolve are left empty.
fn join_lessons(
    entries: Vec<ScheduleEntry>,
    slots: &[TimeSlot],
    obligations: &[TeachingObligation],
) -> Vec<ScheduledLesson> {
    let slots: HashMap<_, _> = slots.iter().map(|s| (s.id, s)).collect();
    let obligations: HashMap<_, _> = obligations.iter().map(|o| (o.id, o)).collect();
    entries
        .into_iter()
        .map(|entry| ScheduledLesson {
            time_slot: slots.get(&entry.time_slot_id).map(|s| (*s).clone()),
            teaching_assignment: obligations.get(&entry.obligation_id).map(|o| (*o).clone()),
            entry,
        })
        .collect()
}

/// The optimizing solver service.
pub fn solver_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(GENERATE_PATH, post(solve_handler))
}

/// Administrative routes that trigger and read generated schedules.
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/api/schedules", get(list_handler))
        .route("/api/schedules/generate", post(generate_handler))
        .with_state(state)
}

pub fn router(state: AppState) -> Router {
    solver_router().merge(admin_router(state))
}

pub async fn run_server(bind: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DisabledSolver;
    use crate::data::{Period, TeachingObligation, TimeSlot, Weekday};
    use crate::repository::LocalRepository;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::NaiveTime;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> (LocalRepository, AppState) {
        let repo = LocalRepository::new();
        repo.insert_period(Period {
            id: 1,
            name: "Ganjil".into(),
        });
        repo.insert_period(Period {
            id: 2,
            name: "Genap".into(),
        });
        repo.insert_obligation(TeachingObligation {
            id: 1,
            teacher_id: 3,
            subject_id: 4,
            class_group_id: 5,
            period_id: 1,
            weekly_hours: 2,
        });
        for id in 1..=3 {
            repo.insert_time_slot(TimeSlot {
                id,
                period_id: 1,
                day_of_week: Weekday::try_from(id as u8).unwrap(),
                start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(7, 45, 0).unwrap(),
                label: None,
            });
        }
        let generator = TimetableGenerator::new(Arc::new(repo.clone()), Arc::new(DisabledSolver));
        (repo, AppState { generator })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(
            solver_router(),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_generate_then_list() {
        let (repo, state) = state();
        let (status, body) = call(
            router(state.clone()),
            post_json("/api/schedules/generate", serde_json::json!({"period_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["engine"], "fallback");
        assert_eq!(body["fully_scheduled"], true);
        assert_eq!(repo.list_schedule(1, None).await.unwrap().len(), 2);

        let (status, body) = call(
            router(state),
            Request::get("/api/schedules?period_id=1&class_group_id=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(2));
        assert_eq!(body[0]["class_group_id"], 5);
        assert_eq!(body[0]["time_slot"]["day_of_week"], 1);
        assert_eq!(body[0]["time_slot"]["start_time"], "07:00:00");
        assert_eq!(body[0]["time_slot"]["end_time"], "07:45:00");
        assert_eq!(body[0]["teaching_assignment"]["teacher_id"], 3);
        assert_eq!(body[0]["teaching_assignment"]["subject_id"], 4);
        assert_eq!(body[1]["time_slot"]["day_of_week"], 2);
    }

    #[tokio::test]
    async fn test_generate_error_statuses() {
        let (_, state) = state();

        let (status, body) = call(
            router(state.clone()),
            post_json("/api/schedules/generate", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "period_id is required");

        let (status, body) = call(
            router(state.clone()),
            post_json("/api/schedules/generate", serde_json::json!({"period_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "incomplete input data");

        let (status, _) = call(
            router(state),
            post_json("/api/schedules/generate", serde_json::json!({"period_id": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_unknown_period() {
        let (_, state) = state();
        let (status, _) = call(
            router(state),
            Request::get("/api/schedules?period_id=9")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_solver_endpoint_returns_schedule() {
        let request = serde_json::json!({
            "period_id": 1,
            "teaching_assignments": [
                {"id": 1, "teacher_id": 3, "subject_id": 4, "class_group_id": 5, "period_id": 1, "weekly_hours": 2}
            ],
            "time_slots": [
                {"id": 1, "period_id": 1, "day_of_week": 1, "start_time": "07:00:00", "end_time": "07:45:00", "label": null},
                {"id": 2, "period_id": 1, "day_of_week": 2, "start_time": "07:00:00", "end_time": "07:45:00", "label": null}
            ],
            "constraints": {}
        });
        let (status, body) = call(solver_router(), post_json(GENERATE_PATH, request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["period_id"], 1);
        assert_eq!(body["schedule"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["summary"]["time_slots"], 2);
    }
}
