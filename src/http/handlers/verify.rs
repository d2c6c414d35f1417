//! Identity verification endpoints (§6): `POST /api/verify/identity` and
//! `GET /api/verify/callback`.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::http::handlers::ClientStateQuery;
use crate::http::response::AxResult;
use crate::http::state::AppState;
use crate::model::IdentityData;
use crate::signing::Signature;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyIdentityRequest {
    forenames: String,
    surname: String,
    date_of_birth: NaiveDate,
    #[allow(dead_code)]
    signature: Signature,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: String,
    error: Option<String>,
    error_description: Option<String>,
}

/// `POST /api/verify/identity`: start an identity verification flow.
pub async fn start_verification(
    State(state): State<AppState>, TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ClientStateQuery>, Json(body): Json<VerifyIdentityRequest>,
) -> Response {
    let identity =
        IdentityData { forenames: body.forenames, surname: body.surname, date_of_birth: body.date_of_birth };
    match state.verification.start(auth.token(), identity, query.state).await {
        Ok(uri) => (StatusCode::CREATED, [(header::LOCATION, uri)]).into_response(),
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}

/// `GET /api/verify/callback`: complete the flow and redirect to the
/// wallet-facing outcome page.
pub async fn verify_callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Response {
    match state
        .verification
        .complete(query.code.as_deref(), &query.state, query.error.as_deref(), query.error_description.as_deref())
        .await
    {
        Ok(path) => Redirect::to(&path).into_response(),
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}
