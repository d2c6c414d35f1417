//! Router assembly (C11, §4.11): wires the endpoints of §6 behind the C3/C4
//! middleware layers, mirroring the teacher's own example binaries
//! (`TraceLayer` + `CorsLayer` + `SetResponseHeaderLayer` stack in
//! `examples/issuer/src/main.rs`).

use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::filters::{session, signature};
use crate::http::handlers::{health, issue, verify};
use crate::http::state::AppState;

/// Build the full application router over `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    let issuance_start = Router::new()
        .route("/api/issue/placement", post(issue::start_issuance))
        .route("/api/issue/programme-membership", post(issue::start_issuance))
        .layer(middleware::from_fn_with_state(state.clone(), session::require_verified_session));

    let signed_writes = Router::new()
        .route("/api/verify/identity", post(verify::start_verification))
        .merge(issuance_start)
        .layer(middleware::from_fn_with_state(state.clone(), signature::verify_signature));

    let callbacks = Router::new()
        .route("/api/verify/callback", get(verify::verify_callback))
        .route("/api/issue/callback", get(issue::issue_callback));

    let health = Router::new().route("/actuator/health", get(health::health));

    let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

    Router::new()
        .merge(signed_writes)
        .merge(callbacks)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store"),
        ))
        .with_state(state)
}
