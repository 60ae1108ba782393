use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Defines the routes that require a validated session. Every handler here
/// relies on the `AuthUser` extractor middleware being layered above this
/// module, so each handler receives a resolved identity with its current
/// role set for permission checks.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/POST /update/{id}
        // Show the prefilled update form / replace the post's fields.
        // Additionally requires the ChangePost permission, checked inside the
        // handlers against the caller's typed role set.
        .route(
            "/update/{id}",
            get(handlers::show_update_form).post(handlers::update_post),
        )
        // GET /upgrade
        // Grants the author role to the session's user if not already held
        // (idempotent), then redirects to the listing.
        .route("/upgrade", get(handlers::upgrade_role))
        // GET /logout
        // Destroys the session row, revoking the bearer token immediately.
        .route("/logout", get(handlers::logout))
}
