//! REST API for the packing simulation.
//!
//! Replaces the browser worker protocol: the viewer reads status, plan and
//! geometry over HTTP, follows frames over SSE and sends control commands as
//! POST requests. Uses Axum as the web framework and supports CORS.

use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use rust_embed::RustEmbed;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::config::ApiConfig;
use crate::controller::{InstancePose, PackingState, PackingStatus};
use crate::geometry::{GeometryPayload, ShapeId};
use crate::model::{AggregateClass, Container};
use crate::planner::{Grid, GridCursor, PackingPlan};
use crate::simulation::{FrameSnapshot, SimulationCommand, SimulationError, SimulationHandle, Viewport};
use crate::types::Dimensions;

#[derive(Clone)]
pub struct ApiState {
    simulation: SimulationHandle,
    plan: Arc<PackingPlan>,
}

impl ApiState {
    pub fn new(simulation: SimulationHandle, plan: Arc<PackingPlan>) -> Self {
        Self { simulation, plan }
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>aggregate-packer API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Embedded viewer (HTML, CSS, JS)
#[derive(RustEmbed)]
#[folder = "web/"]
struct WebAssets;

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

/// Acknowledges a control command queued for the simulation thread.
#[derive(Serialize, ToSchema)]
struct CommandAccepted {
    command: &'static str,
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn simulation_error(err: SimulationError) -> Response {
    match err {
        SimulationError::Stopped => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Simulation unavailable",
            err.to_string(),
        ),
        other => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Simulation error",
            other.to_string(),
        ),
    }
}

fn send_command(state: &ApiState, name: &'static str, command: SimulationCommand) -> Response {
    match state.simulation.send(command) {
        Ok(()) => {
            log::info!("📨 {}", name);
            (StatusCode::ACCEPTED, Json(CommandAccepted { command: name })).into_response()
        }
        Err(err) => simulation_error(err),
    }
}

fn validate_viewport(viewport: &Viewport) -> Result<(), String> {
    if viewport.width == 0 || viewport.height == 0 {
        return Err(format!(
            "Viewport must be at least 1x1, got {}x{}",
            viewport.width, viewport.height
        ));
    }
    Ok(())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_status,
        handle_plan,
        handle_geometry,
        handle_stream,
        handle_pause,
        handle_resume,
        handle_stop_spawning,
        handle_resume_spawning,
        handle_viewport,
        handle_export
    ),
    components(
        schemas(
            PackingStatus,
            PackingState,
            PackingPlan,
            AggregateClass,
            Container,
            Grid,
            GridCursor,
            Dimensions,
            GeometryPayload,
            ShapeId,
            FrameSnapshot,
            InstancePose,
            Viewport,
            CommandAccepted,
            ErrorResponse
        )
    ),
    tags(
        (name = "simulation", description = "Packing simulation state and control"),
        (name = "export", description = "Mesh export of the packed bed")
    )
)]
struct ApiDoc;

/// Builds the router with all API, documentation and viewer routes.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        // API endpoints
        .route("/api/status", get(handle_status))
        .route("/api/plan", get(handle_plan))
        .route("/api/geometry/{shape_id}", get(handle_geometry))
        .route("/api/stream", get(handle_stream))
        .route("/api/simulation/pause", post(handle_pause))
        .route("/api/simulation/resume", post(handle_resume))
        .route("/api/spawning/stop", post(handle_stop_spawning))
        .route("/api/spawning/resume", post(handle_resume_spawning))
        .route("/api/viewport", post(handle_viewport))
        .route("/api/export.obj", get(handle_export))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        // Web-UI (embedded)
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_static))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and serves until it terminates.
///
/// # Returns
/// An error if the listener cannot be bound or the server fails
pub async fn start_api_server(config: ApiConfig, state: ApiState) -> std::io::Result<()> {
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let display_host = config.display_host().to_string();
    log::info!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() {
        log::info!("💡 Local access: http://localhost:{}", config.port());
    }
    log::info!("📦 API Endpoints:");
    log::info!("   - GET  /api/status, /api/plan, /api/geometry/{{shape_id}}");
    log::info!("   - GET  /api/stream (SSE), /api/export.obj");
    log::info!("   - POST /api/simulation/{{pause,resume}}, /api/spawning/{{stop,resume}}, /api/viewport");
    log::info!("📑 Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, router(state)).await
}

/// Handler for GET /api/status.
#[utoipa::path(
    get,
    path = "/api/status",
    responses((status = 200, description = "Current packing status", body = PackingStatus)),
    tag = "simulation"
)]
async fn handle_status(State(state): State<ApiState>) -> Json<PackingStatus> {
    Json(state.simulation.status())
}

/// Handler for GET /api/plan.
///
/// Classes carry their derived volume and count; classes whose volume could
/// not be derived are listed under `excluded`.
#[utoipa::path(
    get,
    path = "/api/plan",
    responses((status = 200, description = "The packing plan of this run", body = PackingPlan)),
    tag = "simulation"
)]
async fn handle_plan(State(state): State<ApiState>) -> Json<PackingPlan> {
    Json(state.plan.as_ref().clone())
}

/// Handler for GET /api/geometry/{shape_id}.
///
/// Returns the local mesh of a spawned instance; the viewer applies the
/// poses from the frame stream on top.
#[utoipa::path(
    get,
    path = "/api/geometry/{shape_id}",
    params(("shape_id" = u64, Path, description = "Id of a spawned shape")),
    responses(
        (status = 200, description = "Local mesh of the shape", body = GeometryPayload),
        (status = NOT_FOUND, description = "No such shape", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_geometry(State(state): State<ApiState>, Path(shape_id): Path<u64>) -> Response {
    match state.simulation.geometry(ShapeId(shape_id)).await {
        Ok(Some(payload)) => (StatusCode::OK, Json(payload)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "Unknown shape",
            format!("No spawned shape with id {}", shape_id),
        ),
        Err(err) => simulation_error(err),
    }
}

/// Handler for GET /api/stream (SSE).
///
/// Streams frame snapshots as Server-Sent Events. Slow clients skip frames
/// instead of slowing down the simulation.
#[utoipa::path(
    get,
    path = "/api/stream",
    responses((
        status = 200,
        description = "Frame snapshots in real time",
        content_type = "text/event-stream",
        body = String
    )),
    tag = "simulation"
)]
async fn handle_stream(State(state): State<ApiState>) -> impl IntoResponse {
    let stream = BroadcastStream::new(state.simulation.subscribe()).filter_map(|frame| {
        let frame = frame.ok()?;
        let json = serde_json::to_string(frame.as_ref()).ok()?;
        Some(Ok::<_, std::convert::Infallible>(
            Event::default().event("frame").data(json),
        ))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(10))
            .text("keep-alive"),
    )
}

/// Handler for POST /api/simulation/pause. Halts physics stepping.
#[utoipa::path(
    post,
    path = "/api/simulation/pause",
    responses(
        (status = ACCEPTED, description = "Command queued", body = CommandAccepted),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_pause(State(state): State<ApiState>) -> Response {
    send_command(&state, "pause_simulation", SimulationCommand::PauseSimulation)
}

/// Handler for POST /api/simulation/resume.
#[utoipa::path(
    post,
    path = "/api/simulation/resume",
    responses(
        (status = ACCEPTED, description = "Command queued", body = CommandAccepted),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_resume(State(state): State<ApiState>) -> Response {
    send_command(&state, "resume_simulation", SimulationCommand::ResumeSimulation)
}

/// Handler for POST /api/spawning/stop. Physics keeps running.
#[utoipa::path(
    post,
    path = "/api/spawning/stop",
    responses(
        (status = ACCEPTED, description = "Command queued", body = CommandAccepted),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_stop_spawning(State(state): State<ApiState>) -> Response {
    send_command(
        &state,
        "stop_adding_aggregates",
        SimulationCommand::StopAddingAggregates,
    )
}

/// Handler for POST /api/spawning/resume.
#[utoipa::path(
    post,
    path = "/api/spawning/resume",
    responses(
        (status = ACCEPTED, description = "Command queued", body = CommandAccepted),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_resume_spawning(State(state): State<ApiState>) -> Response {
    send_command(
        &state,
        "presume_adding_aggregates",
        SimulationCommand::PresumeAddingAggregates,
    )
}

/// Handler for POST /api/viewport. Only the viewport changes.
#[utoipa::path(
    post,
    path = "/api/viewport",
    request_body = Viewport,
    responses(
        (status = ACCEPTED, description = "Command queued", body = CommandAccepted),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid viewport", body = ErrorResponse)
    ),
    tag = "simulation"
)]
async fn handle_viewport(
    State(state): State<ApiState>,
    payload: Result<Json<Viewport>, JsonRejection>,
) -> Response {
    let Json(viewport) = match payload {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid JSON data",
                err.to_string(),
            );
        }
    };
    if let Err(details) = validate_viewport(&viewport) {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Invalid viewport", details);
    }
    send_command(&state, "resize", SimulationCommand::Resize(viewport))
}

/// Handler for GET /api/export.obj.
///
/// Every spawned instance at its current pose, one OBJ object each.
#[utoipa::path(
    get,
    path = "/api/export.obj",
    responses(
        (status = 200, description = "Wavefront OBJ document", content_type = "model/obj", body = String),
        (status = SERVICE_UNAVAILABLE, description = "Simulation stopped", body = ErrorResponse)
    ),
    tag = "export"
)]
async fn handle_export(State(state): State<ApiState>) -> Response {
    match state.simulation.export_obj().await {
        Ok(obj) => (
            [
                (header::CONTENT_TYPE, "model/obj"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"aggregates.obj\"",
                ),
            ],
            obj,
        )
            .into_response(),
        Err(err) => simulation_error(err),
    }
}

/// Serves the index.html main page
async fn serve_index() -> Response {
    match WebAssets::get("index.html") {
        Some(content) => Html(content.data).into_response(),
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

/// Serves static assets (JS, CSS, etc.)
async fn serve_static(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    match WebAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref())], content.data).into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use crate::simulation::{SimulationSettings, spawn_simulation};

    fn paused_state() -> (ApiState, std::thread::JoinHandle<()>) {
        let classes = vec![AggregateClass::new("A", (1.0, 1.0, 1.0), 0.05, 32)];
        let plan = plan(
            classes,
            Container::new(Dimensions::new(2.0, 2.0, 2.0)).unwrap(),
        );
        let settings = SimulationSettings {
            autostart: false,
            seed: Some(1),
            ..SimulationSettings::default()
        };
        let (handle, thread) = spawn_simulation(plan.clone(), settings).unwrap();
        (ApiState::new(handle, Arc::new(plan)), thread)
    }

    #[test]
    fn openapi_doc_lists_expected_paths() {
        let doc = openapi_doc();
        let paths = &doc.paths.paths;
        for path in [
            "/api/status",
            "/api/plan",
            "/api/geometry/{shape_id}",
            "/api/stream",
            "/api/simulation/pause",
            "/api/simulation/resume",
            "/api/spawning/stop",
            "/api/spawning/resume",
            "/api/viewport",
            "/api/export.obj",
        ] {
            assert!(
                paths.contains_key(path),
                "OpenAPI documentation is missing the {} path",
                path
            );
        }
    }

    #[test]
    fn openapi_doc_contains_key_schemas() {
        let doc = openapi_doc();
        let components = doc
            .components
            .as_ref()
            .expect("OpenAPI documentation contains no components");
        let schemas = &components.schemas;
        for name in ["PackingStatus", "PackingPlan", "FrameSnapshot", "ErrorResponse"] {
            assert!(
                schemas.contains_key(name),
                "Expected schema '{}' is missing from the OpenAPI document",
                name
            );
        }
    }

    #[test]
    fn viewport_must_not_be_empty() {
        assert!(validate_viewport(&Viewport { width: 800, height: 600 }).is_ok());
        assert!(validate_viewport(&Viewport { width: 0, height: 600 }).is_err());
        assert!(validate_viewport(&Viewport { width: 800, height: 0 }).is_err());
    }

    #[test]
    fn error_response_carries_status() {
        let response = error_response(StatusCode::NOT_FOUND, "Unknown shape", "none");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = simulation_error(SimulationError::Stopped);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_and_plan_reflect_the_run() {
        let (state, _thread) = paused_state();

        let Json(status) = handle_status(State(state.clone())).await;
        assert!(!status.running, "autostart is off");
        assert_eq!(status.layer_size, 4);

        let Json(plan) = handle_plan(State(state.clone())).await;
        assert_eq!(plan.grid(), Grid::new(2, 2, 2));
        assert_eq!(plan.classes()[0].count(), Some(1));
    }

    #[tokio::test]
    async fn commands_are_accepted_and_unknown_shapes_are_404() {
        let (state, _thread) = paused_state();

        let response = handle_stop_spawning(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = handle_geometry(State(state.clone()), Path(12345)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle_export(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn commands_fail_once_the_simulation_stopped() {
        let (state, thread) = paused_state();
        state.simulation.send(SimulationCommand::Shutdown).unwrap();
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();

        let response = handle_pause(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
