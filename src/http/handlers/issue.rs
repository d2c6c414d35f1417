//! Credential issuance endpoints (§6): `POST /api/issue/placement`,
//! `POST /api/issue/programme-membership` and `GET /api/issue/callback`.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde::Deserialize;

use crate::http::handlers::ClientStateQuery;
use crate::http::response::AxResult;
use crate::http::state::AppState;
use crate::model::CredentialPayload;

#[derive(Deserialize)]
pub struct IssueCallbackQuery {
    code: String,
    state: String,
}

/// `POST /api/issue/placement` and `POST /api/issue/programme-membership`:
/// start an issuance flow. Which credential is minted is determined by the
/// body's `credentialType` tag, not the route path.
pub async fn start_issuance(
    State(state): State<AppState>, TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ClientStateQuery>, Json(credential): Json<CredentialPayload>,
) -> Response {
    match state.issuance.start(auth.token(), credential, query.state).await {
        Ok(uri) => (StatusCode::CREATED, [(header::LOCATION, uri)]).into_response(),
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}

/// `GET /api/issue/callback`: complete the flow and redirect to the
/// configured client redirect URI.
pub async fn issue_callback(State(state): State<AppState>, Query(query): Query<IssueCallbackQuery>) -> Response {
    match state.issuance.complete(&query.code, &query.state).await {
        Ok(redirect) => Redirect::to(&redirect).into_response(),
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}
