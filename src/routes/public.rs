use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Defines endpoints that are **unauthenticated** and accessible to any client.
/// The listing computes its `is_not_author` flag from an *optional* identity,
/// so a logged-in caller hitting these routes is still recognized.
///
/// Note: `/create` and `/delete/{id}` carry no authorization on purpose — the
/// system this one reimplements applied none, and the asymmetry with
/// `/update/{id}` is preserved rather than silently corrected (DESIGN.md).
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET/POST / and /posts
        // The listing endpoint: filtered, rating-ordered, 10 per page. A POST
        // with a valid payload persists the post first, then returns the
        // recomputed listing.
        .route("/", get(handlers::list_posts).post(handlers::submit_and_list))
        .route(
            "/posts",
            get(handlers::list_posts).post(handlers::submit_and_list),
        )
        // GET /post/{id}
        // Single post detail.
        .route("/post/{id}", get(handlers::post_detail))
        // GET/POST /create
        // Show the create form / submit a new post.
        .route(
            "/create",
            get(handlers::show_create_form).post(handlers::create_post),
        )
        // GET/POST /delete/{id}
        // Show the confirmation view / perform the deletion (303 to /posts).
        .route(
            "/delete/{id}",
            get(handlers::show_delete_form).post(handlers::delete_post),
        )
        // POST /register
        // New user creation; grants the basic role, establishes no session.
        .route("/register", post(handlers::register))
        // POST /login
        // Credential verification and session establishment.
        .route("/login", post(handlers::login))
}
