//! HTTP control API: axum router and request handlers.
//!
//! The server runs on the tokio runtime while the driver runs on a plain
//! `std::thread`. Handlers read the shared [`DriverStatus`] and steer the
//! driver with [`DriverCommand`]s over its `mpsc` channel, taking the place of
//! the OS session notifications (lock, unlock, display change) a desktop
//! integration would forward.

use crate::Color;
use crate::driver::{DriverCommand, DriverState, DriverStatus, SharedStatus, lock_status};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use std::sync::mpsc::Sender;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Channel to the driver thread
    pub command_tx: Sender<DriverCommand>,
    /// Driver status (driver writes, handlers read)
    pub status: SharedStatus,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_leds,
        post_session_attach,
        post_session_detach,
        post_session_display_change,
    ),
    components(schemas(DriverStatus, DriverState, LedPreview, Color)),
    tags(
        (name = "session", description = "Session control endpoints"),
        (name = "system", description = "Driver status endpoints"),
    ),
    info(
        title = "Adalight API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for the Adalight ambient lighting driver"
    )
)]
pub struct ApiDoc;

// ── Response types ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct LedPreview {
    /// Gamma-corrected color of every LED, in strand order
    leds: Vec<Color>,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/leds", get(get_leds))
        .route("/api/v1/session/attach", post(post_session_attach))
        .route("/api/v1/session/detach", post(post_session_detach))
        .route("/api/v1/session/display-change", post(post_session_display_change))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn send_command(state: &AppState, command: DriverCommand) -> Result<StatusCode, (StatusCode, String)> {
    state.command_tx.send(command).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Driver thread gone".to_string(),
        )
    })?;

    Ok(StatusCode::ACCEPTED)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: driver state, outputs and frame rate
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current driver status", body = DriverStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<DriverStatus> {
    let status = lock_status(&state.status).clone();
    Json(status)
}

/// GET /api/v1/leds: colors currently sent to the LEDs
#[utoipa::path(
    get,
    path = "/api/v1/leds",
    tag = "system",
    responses(
        (status = 200, description = "LED colors in strand order", body = LedPreview)
    )
)]
async fn get_leds(State(state): State<AppState>) -> Json<LedPreview> {
    let leds = lock_status(&state.status).leds.clone();
    Json(LedPreview { leds })
}

/// POST /api/v1/session/attach: start sampling
#[utoipa::path(
    post,
    path = "/api/v1/session/attach",
    tag = "session",
    responses(
        (status = 202, description = "Attach requested"),
        (status = 500, description = "Driver thread gone")
    )
)]
async fn post_session_attach(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    send_command(&state, DriverCommand::Attach)
}

/// POST /api/v1/session/detach: blank the LEDs and release capture
#[utoipa::path(
    post,
    path = "/api/v1/session/detach",
    tag = "session",
    responses(
        (status = 202, description = "Detach requested"),
        (status = 500, description = "Driver thread gone")
    )
)]
async fn post_session_detach(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    send_command(&state, DriverCommand::Detach)
}

/// POST /api/v1/session/display-change: reacquire capture after a display change
#[utoipa::path(
    post,
    path = "/api/v1/session/display-change",
    tag = "session",
    responses(
        (status = 202, description = "Reacquisition requested"),
        (status = 500, description = "Driver thread gone")
    )
)]
async fn post_session_display_change(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    send_command(&state, DriverCommand::DisplayChange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Arc, Mutex};

    fn app_state() -> (AppState, Receiver<DriverCommand>) {
        let (tx, rx) = mpsc::channel();
        let mut status = DriverStatus::new(2);
        status.leds = vec![Color::new(255, 0, 0), Color::new(0, 0, 220)];
        let state = AppState {
            command_tx: tx,
            status: Arc::new(Mutex::new(status)),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn status_reports_shared_state() {
        let (state, _rx) = app_state();
        lock_status(&state.status).state = DriverState::Throttled;

        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.state, DriverState::Throttled);
        assert_eq!(status.led_count, 2);
    }

    #[tokio::test]
    async fn leds_are_previewed_in_strand_order() {
        let (state, _rx) = app_state();

        let Json(preview) = get_leds(State(state)).await;
        assert_eq!(preview.leds, vec![Color::new(255, 0, 0), Color::new(0, 0, 220)]);
    }

    #[tokio::test]
    async fn session_endpoints_forward_commands() {
        let (state, rx) = app_state();

        assert_eq!(post_session_attach(State(state.clone())).await, Ok(StatusCode::ACCEPTED));
        post_session_detach(State(state.clone())).await.unwrap();
        post_session_display_change(State(state)).await.unwrap();

        let received: Vec<DriverCommand> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                DriverCommand::Attach,
                DriverCommand::Detach,
                DriverCommand::DisplayChange,
            ]
        );
    }

    #[tokio::test]
    async fn gone_driver_is_a_server_error() {
        let (state, rx) = app_state();
        drop(rx);

        let (code, _) = post_session_attach(State(state)).await.unwrap_err();
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                "/api/v1/leds",
                "/api/v1/session/attach",
                "/api/v1/session/detach",
                "/api/v1/session/display-change",
                "/api/v1/status",
            ]
        );
    }
}
