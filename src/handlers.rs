use crate::{
    AppState,
    auth::{self, AuthUser},
    error::ApiError,
    models::{
        AuthResponse, Category, CreateForm, LoginRequest, Permission, Post, PostFilter,
        PostListing, PostPayload, RegisterRequest, Role, UserProfile,
    },
    repository::PAGE_SIZE,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
};
use uuid::Uuid;

/// Assembles the listing response for the current filter and caller.
/// Anonymous callers count as "not an author".
async fn build_listing(state: &AppState, filter: &PostFilter, auth: Option<&AuthUser>) -> PostListing {
    let (posts, total) = state.repo.list_posts(filter).await;
    PostListing {
        posts,
        page: filter.page(),
        total,
        total_pages: (total + PAGE_SIZE - 1) / PAGE_SIZE,
        choices: Category::choices(),
        form: PostPayload::default(),
        is_not_author: auth.map(|a| a.is_not_author()).unwrap_or(true),
    }
}

/// list_posts
///
/// [Public Route] Lists posts in descending rating order, 10 per page, with
/// optional filter criteria. The response additionally carries the category
/// choices, an empty create-form payload, and the caller's `is_not_author`
/// flag so the presentation layer can decide whether to show creation
/// controls.
#[utoipa::path(
    get,
    path = "/posts",
    params(PostFilter),
    responses((status = 200, description = "One page of the listing", body = PostListing))
)]
pub async fn list_posts(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Query(filter): Query<PostFilter>,
) -> Json<PostListing> {
    Json(build_listing(&state, &filter, auth.as_ref()).await)
}

/// submit_and_list
///
/// [Public Route] Inbound post submission on the listing endpoint: a valid
/// payload is persisted before the listing is recomputed and returned; an
/// invalid one is skipped and the listing is returned unchanged. There is no
/// duplicate-submission guard, so resubmitting creates a duplicate post.
#[utoipa::path(
    post,
    path = "/posts",
    params(PostFilter),
    request_body = PostPayload,
    responses((status = 200, description = "Listing after the submission", body = PostListing))
)]
pub async fn submit_and_list(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Query(filter): Query<PostFilter>,
    Json(payload): Json<PostPayload>,
) -> Json<PostListing> {
    if payload.validate().is_ok() {
        if state.repo.create_post(payload).await.is_none() {
            tracing::error!("inline submission could not be persisted");
        }
    }
    Json(build_listing(&state, &filter, auth.as_ref()).await)
}

/// post_detail
///
/// [Public Route] Retrieves a single post by id.
#[utoipa::path(
    get,
    path = "/post/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = Post),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, ApiError> {
    match state.repo.get_post(id).await {
        Some(post) => Ok(Json(post)),
        None => Err(ApiError::NotFound),
    }
}

/// show_create_form
///
/// [Public Route] Serves the create form: the category choices plus an empty
/// payload for the client to fill in.
#[utoipa::path(
    get,
    path = "/create",
    responses((status = 200, description = "Create form", body = CreateForm))
)]
pub async fn show_create_form() -> Json<CreateForm> {
    Json(CreateForm {
        choices: Category::choices(),
        form: PostPayload::default(),
    })
}

/// create_post
///
/// [Public Route] Persists a new post from a structurally valid payload.
/// Deliberately applies no authorization check, preserving the source
/// system's behavior (see DESIGN.md).
#[utoipa::path(
    post,
    path = "/create",
    request_body = PostPayload,
    responses(
        (status = 200, description = "Created", body = Post),
        (status = 400, description = "Validation Failure")
    )
)]
pub async fn create_post(
    State(state): State<AppState>,
    Json(payload): Json<PostPayload>,
) -> Result<Json<Post>, ApiError> {
    payload.validate().map_err(ApiError::Validation)?;
    state
        .repo
        .create_post(payload)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Configuration("post could not be persisted".to_string()))
}

/// show_update_form
///
/// [Authenticated Route] Serves the update form for an existing post,
/// prefilled with its current fields. Requires the ChangePost permission.
#[utoipa::path(
    get,
    path = "/update/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Update form", body = CreateForm),
        (status = 403, description = "Missing ChangePost permission"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn show_update_form(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CreateForm>, ApiError> {
    if !auth.can(Permission::ChangePost) {
        return Err(ApiError::Forbidden);
    }
    let post = state.repo.get_post(id).await.ok_or(ApiError::NotFound)?;
    Ok(Json(CreateForm {
        choices: Category::choices(),
        form: PostPayload {
            title: post.title,
            body: post.body,
            category: post.category,
            rating: post.rating,
            author_id: post.author_id,
        },
    }))
}

/// update_post
///
/// [Authenticated Route] Replaces every field of the post with the supplied
/// payload. Requires the ChangePost permission; the permission check runs
/// before any lookup so a forbidden caller cannot touch or probe the post.
#[utoipa::path(
    post,
    path = "/update/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    request_body = PostPayload,
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 400, description = "Validation Failure"),
        (status = 403, description = "Missing ChangePost permission"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostPayload>,
) -> Result<Json<Post>, ApiError> {
    if !auth.can(Permission::ChangePost) {
        return Err(ApiError::Forbidden);
    }
    payload.validate().map_err(ApiError::Validation)?;
    match state.repo.update_post(id, payload).await {
        Some(post) => Ok(Json(post)),
        None => Err(ApiError::NotFound),
    }
}

/// show_delete_form
///
/// [Public Route] Serves the post for the deletion confirmation view.
#[utoipa::path(
    get,
    path = "/delete/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post pending confirmation", body = Post),
        (status = 404, description = "Not Found")
    )
)]
pub async fn show_delete_form(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, ApiError> {
    match state.repo.get_post(id).await {
        Some(post) => Ok(Json(post)),
        None => Err(ApiError::NotFound),
    }
}

/// delete_post
///
/// [Public Route] Deletes the post and redirects back to the listing.
/// Like create, this applies no permission check, preserving the source
/// system's behavior (see DESIGN.md).
#[utoipa::path(
    post,
    path = "/delete/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 303, description = "Deleted; redirect to the listing"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, ApiError> {
    if state.repo.delete_post(id).await {
        Ok(Redirect::to("/posts"))
    } else {
        Err(ApiError::NotFound)
    }
}

/// upgrade_role
///
/// [Authenticated Route] Grants the author role to the session's user unless
/// already held, then redirects to the listing regardless of prior state.
/// A failed grant that leaves the user without the role means the role store
/// was never provisioned, which is a configuration error.
#[utoipa::path(
    get,
    path = "/upgrade",
    responses(
        (status = 303, description = "Redirect to the listing"),
        (status = 401, description = "No session")
    )
)]
pub async fn upgrade_role(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Redirect, ApiError> {
    if !auth.roles.contains(&Role::Author) {
        let granted = state.repo.grant_role(auth.id, Role::Author).await;
        if !granted {
            // A concurrent request may have granted the role between this
            // request's role load and its own insert, in which case the
            // conflict-free grant affects no rows. Only an actually absent
            // membership means the role store is misconfigured.
            let roles = state.repo.get_user_roles(auth.id).await;
            if !roles.contains(&Role::Author) {
                return Err(ApiError::Configuration(
                    "author role is not provisioned".to_string(),
                ));
            }
        }
    }
    Ok(Redirect::to("/posts"))
}

/// register
///
/// [Public Route] Creates a new user and grants exactly the basic role.
/// No session is established; the caller must log in explicitly afterwards.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered", body = UserProfile),
        (status = 400, description = "Validation Failure")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    payload.validate().map_err(ApiError::Validation)?;

    let password_hash = auth::hash_password(&payload.password)
        .map_err(|e| ApiError::Configuration(format!("password hashing failed: {e}")))?;

    let user = state
        .repo
        .create_user(payload.username.trim(), &password_hash)
        .await
        .ok_or_else(|| ApiError::Validation("username is already taken".to_string()))?;

    // A brand-new user never holds roles, so a false grant here means the
    // basic role row is missing from the store.
    if !state.repo.grant_role(user.id, Role::Basic).await {
        return Err(ApiError::Configuration(
            "basic role is not provisioned".to_string(),
        ));
    }

    Ok(Json(UserProfile {
        id: user.id,
        username: user.username,
        roles: vec![Role::Basic],
    }))
}

/// login
///
/// [Public Route] Verifies the credential and establishes a session. Failure
/// is silent: a plain 401 with no session established and no detail on which
/// part of the credential was wrong.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let record = state
        .repo
        .get_user_by_username(&payload.username)
        .await
        .ok_or(ApiError::Unauthenticated)?;

    if !auth::verify_password(&payload.password, &record.password_hash) {
        return Err(ApiError::Unauthenticated);
    }

    let session = state
        .repo
        .create_session(record.id)
        .await
        .ok_or_else(|| ApiError::Configuration("session could not be created".to_string()))?;

    let token = auth::issue_session_token(record.id, session.id, &state.config.jwt_secret)
        .map_err(|e| ApiError::Configuration(format!("token signing failed: {e}")))?;

    let roles = state.repo.get_user_roles(record.id).await;

    Ok(Json(AuthResponse {
        token,
        user: UserProfile {
            id: record.id,
            username: record.username,
            roles,
        },
    }))
}

/// logout
///
/// [Authenticated Route] Destroys the session row referenced by the bearer
/// token, revoking it immediately. Identities resolved through the local dev
/// bypass carry no session, so there is nothing to destroy for them.
#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 204, description = "Session destroyed"),
        (status = 401, description = "No session")
    )
)]
pub async fn logout(auth: AuthUser, State(state): State<AppState>) -> StatusCode {
    if let Some(session_id) = auth.session_id {
        if !state.repo.delete_session(session_id).await {
            tracing::warn!("logout: session {} was already gone", session_id);
        }
    }
    StatusCode::NO_CONTENT
}
