//! HTTP API: status, program CRUD, manual runs, and the pause/rain/enable
//! switches.  Every mutation goes through the scheduler behind the shared
//! lock; program changes are written back to the database before the
//! response returns.

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use sprinkler_engine::{EngineError, ProgramDefinition, ProgramRecord};

use crate::db::Db;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
}

type ApiError = (StatusCode, String);

fn engine_error(err: EngineError) -> ApiError {
    let code = match err {
        EngineError::QueueFull | EngineError::ProgramStoreFull => StatusCode::CONFLICT,
        EngineError::ProgramOutOfBounds(_) => StatusCode::NOT_FOUND,
        EngineError::StationOutOfRange(_)
        | EngineError::InvalidDateRange(_)
        | EngineError::InvalidEncodedStart(_) => StatusCode::BAD_REQUEST,
    };
    (code, err.to_string())
}

fn db_error(err: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/history", get(api_history))
        .route(
            "/api/programs",
            get(list_programs).post(add_program).delete(delete_all_programs),
        )
        .route("/api/programs/{id}", put(modify_program).delete(delete_program))
        .route("/api/programs/{id}/start", post(start_program))
        .route("/api/programs/{id}/enable", post(enable_program))
        .route("/api/programs/{id}/move-up", post(move_program_up))
        .route("/api/runonce", post(run_once))
        .route("/api/stations/{id}/run", post(run_station))
        .route("/api/stations/{id}/stop", post(stop_station))
        .route("/api/stop", post(stop_all))
        .route("/api/pause", post(toggle_pause))
        .route("/api/rain", post(set_rain))
        .route("/api/enable", post(set_enabled))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    concat!("sprinkler-controller ", env!("CARGO_PKG_VERSION"))
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn api_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .db
        .recent_run_events(q.limit.clamp(1, 500))
        .await
        .map_err(db_error)?;
    Ok(Json(events))
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// Write the store back to the database.  Called after every CRUD change.
async fn persist_programs(state: &AppState) -> Result<(), ApiError> {
    let records: Vec<ProgramRecord> = {
        let st = state.shared.read().await;
        st.scheduler
            .programs()
            .iter()
            .map(|(_, p)| ProgramRecord::from(p))
            .collect()
    };
    state.db.save_programs(&records).await.map_err(db_error)
}

async fn list_programs(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    let programs: Vec<ProgramDefinition> = st
        .scheduler
        .programs()
        .iter()
        .map(|(_, p)| p.clone())
        .collect();
    Json(programs)
}

async fn add_program(
    State(state): State<AppState>,
    Json(program): Json<ProgramDefinition>,
) -> Result<impl IntoResponse, ApiError> {
    let index = {
        let mut st = state.shared.write().await;
        let index = st
            .scheduler
            .programs_mut()
            .add(program)
            .map_err(engine_error)?;
        st.record_system(format!("program {index} added"));
        index
    };
    persist_programs(&state).await?;
    Ok((StatusCode::CREATED, Json(index)))
}

async fn modify_program(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(program): Json<ProgramDefinition>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut st = state.shared.write().await;
        st.scheduler
            .programs_mut()
            .modify(id, program)
            .map_err(engine_error)?;
        st.record_system(format!("program {id} modified"));
    }
    persist_programs(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_program(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut st = state.shared.write().await;
        let removed = st.scheduler.programs_mut().delete(id).map_err(engine_error)?;
        st.record_system(format!("program '{}' deleted", removed.name));
    }
    persist_programs(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_all_programs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut st = state.shared.write().await;
        st.scheduler.programs_mut().erase_all();
        st.record_system("all programs deleted".to_string());
    }
    persist_programs(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct StartProgramBody {
    #[serde(default)]
    use_weather: bool,
}

async fn start_program(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(body): Json<StartProgramBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler
        .start_program(now, id, body.use_weather)
        .map_err(engine_error)?;
    st.record_run(format!("program {id} started manually"));
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn enable_program(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(body): Json<EnabledBody>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut st = state.shared.write().await;
        st.scheduler
            .programs_mut()
            .set_enabled(id, body.enabled)
            .map_err(engine_error)?;
    }
    persist_programs(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_program_up(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut st = state.shared.write().await;
        st.scheduler.programs_mut().move_up(id).map_err(engine_error)?;
    }
    persist_programs(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RunOnceBody {
    /// Encoded per-station water times, positional from station 0.
    durations: Vec<u16>,
}

async fn run_once(
    State(state): State<AppState>,
    Json(body): Json<RunOnceBody>,
) -> impl IntoResponse {
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler.run_once(now, &body.durations);
    st.record_run("run-once started".to_string());
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
struct RunStationBody {
    seconds: i64,
}

async fn run_station(
    State(state): State<AppState>,
    Path(id): Path<u8>,
    Json(body): Json<RunStationBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.seconds <= 0 {
        return Err((StatusCode::BAD_REQUEST, "seconds must be positive".into()));
    }
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler
        .submit_manual_run(now, id, body.seconds)
        .map_err(engine_error)?;
    st.record_run(format!("station {id} manual run for {}s", body.seconds));
    Ok(StatusCode::ACCEPTED)
}

async fn stop_station(
    State(state): State<AppState>,
    Path(id): Path<u8>,
) -> impl IntoResponse {
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler.cancel_run(now, id);
    st.record_run(format!("station {id} stopped"));
    StatusCode::ACCEPTED
}

async fn stop_all(State(state): State<AppState>) -> impl IntoResponse {
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler.reset_all(now);
    st.record_run("all stations stopped".to_string());
    StatusCode::ACCEPTED
}

// ---------------------------------------------------------------------------
// Switches
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PauseBody {
    seconds: i64,
}

async fn toggle_pause(
    State(state): State<AppState>,
    Json(body): Json<PauseBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.seconds <= 0 {
        return Err((StatusCode::BAD_REQUEST, "seconds must be positive".into()));
    }
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler.toggle_pause(now, body.seconds);
    let detail = if st.scheduler.is_paused() {
        format!("paused for {}s", st.scheduler.pause_remaining())
    } else {
        "resumed".to_string()
    };
    st.record_pause(detail);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct RainBody {
    active: bool,
}

async fn set_rain(State(state): State<AppState>, Json(body): Json<RainBody>) -> impl IntoResponse {
    let mut st = state.shared.write().await;
    st.scheduler.set_rain(body.active);
    st.record_rain(format!(
        "rain signal {}",
        if body.active { "on" } else { "off" }
    ));
    StatusCode::ACCEPTED
}

async fn set_enabled(
    State(state): State<AppState>,
    Json(body): Json<EnabledBody>,
) -> impl IntoResponse {
    let mut st = state.shared.write().await;
    let now = st.now();
    st.scheduler.set_enabled(body.enabled, now);
    st.record_system(format!(
        "controller {}",
        if body.enabled { "enabled" } else { "disabled" }
    ));
    StatusCode::ACCEPTED
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControllerState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sprinkler_engine::{ControllerOptions, Scheduler};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn app() -> Router {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let scheduler = Scheduler::new(ControllerOptions::default());
        let shared = Arc::new(RwLock::new(ControllerState::new(
            scheduler,
            0,
            vec![String::new(); 8],
        )));
        router(AppState { shared, db })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_endpoint_reports_defaults() {
        let app = app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["enabled"], json!(true));
        assert_eq!(status["paused"], json!(false));
        assert_eq!(status["num_stations"], json!(8));
    }

    #[tokio::test]
    async fn manual_run_shows_up_in_the_queue() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/api/stations/2/run", json!({ "seconds": 90 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        let queue = status["queue"].as_array().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0]["station"], json!(2));
        assert_eq!(queue[0]["duration"], json!(90));
    }

    #[tokio::test]
    async fn manual_run_rejects_bad_input() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/api/stations/2/run", json!({ "seconds": 0 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json("/api/stations/50/run", json!({ "seconds": 60 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn program_crud_round_trip() {
        let app = app().await;
        let program = json!({
            "enabled": true,
            "use_weather": false,
            "odd_even": "None",
            "schedule": { "Weekly": { "days": 127 } },
            "start": { "Repeating": { "start": { "Clock": 480 }, "count": 0, "every_minutes": 0 } },
            "date_range": null,
            "durations": vec![600u16; 48],
            "name": "morning"
        });

        let response = app
            .clone()
            .oneshot(post_json("/api/programs", program))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/programs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let programs = body_json(response).await;
        assert_eq!(programs.as_array().unwrap().len(), 1);
        assert_eq!(programs[0]["name"], json!("morning"));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/programs/0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/programs/0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pause_toggle_round_trip() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/api/pause", json!({ "seconds": 120 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["paused"], json!(true));

        let response = app
            .clone()
            .oneshot(post_json("/api/pause", json!({ "seconds": 120 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["paused"], json!(false));
    }
}
