//! Typed axum handlers behind the C3/C4 middleware layers.

pub mod health;
pub mod issue;
pub mod verify;

use serde::Deserialize;

/// Shared `?state=` query parameter carried by both flow-start endpoints.
#[derive(Deserialize)]
pub struct ClientStateQuery {
    pub state: Option<String>,
}
