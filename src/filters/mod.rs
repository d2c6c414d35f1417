//! Inbound axum middleware: the signed-data filter (C3) and the
//! verified-session filter (C4), both wired ahead of the typed handlers in
//! [`crate::http::routes`].

pub mod session;
pub mod signature;
