use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Roles & Permissions ---

/// Role
///
/// The closed, externally provisioned role set. Membership is many-to-many with
/// User via the `user_roles` table. Modeled as an enum rather than free-text so
/// an unknown role name is unrepresentable in the application layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    /// Granted to every user at registration.
    Basic,
    /// Elevated role obtained through the upgrade flow. Carries ChangePost.
    Author,
}

impl Role {
    /// The database representation of the role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Basic => "basic",
            Role::Author => "author",
        }
    }

    /// Parses a stored role name. Returns None for names outside the
    /// provisioned set (which would indicate a corrupted `roles` table).
    pub fn parse(name: &str) -> Option<Role> {
        match name {
            "basic" => Some(Role::Basic),
            "author" => Some(Role::Author),
            _ => None,
        }
    }
}

/// Permission
///
/// A typed capability gating a mutating operation. Permissions are derived from
/// the holder's roles rather than looked up by string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Required to replace an existing post's fields via the update endpoint.
    ChangePost,
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The user's canonical identity record from the `users` table, minus the
/// credential. This is the shape exposed through the API.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// UserRecord
///
/// Raw database row (internal use). Carries the Argon2 password hash needed by
/// the login flow; never serialized into a response.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

/// UserProfile
///
/// Output schema combining the identity record with its resolved role set.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<Role>,
}

/// Category
///
/// The fixed set of post categories. Stored as the Postgres enum type
/// `category`; serialized in lowercase on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "category", rename_all = "lowercase")]
#[ts(export)]
pub enum Category {
    #[default]
    Tech,
    Sport,
    Politics,
    Education,
}

impl Category {
    /// Every available category choice, in declaration order. Reported by the
    /// listing endpoint so a client can render the create form.
    pub fn choices() -> Vec<Category> {
        vec![
            Category::Tech,
            Category::Sport,
            Category::Politics,
            Category::Education,
        ]
    }
}

/// Post
///
/// A news item from the `posts` table. `rating` is the sole sort key for the
/// listing (descending); no invariant bounds it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub category: Category,
    pub rating: i32,
    // Optional reference to the authoring user. Many posts may reference one
    // user; the user does not own its posts.
    pub author_id: Option<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Session
///
/// Server-side session row (internal use). Created at login, destroyed at
/// logout. The bearer token references this row by id, so destroying it
/// invalidates the token before its signature expires.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// --- Request Payloads (Input Schemas) ---

/// PostPayload
///
/// Input payload for submitting a post. Used both by the create endpoints and
/// by the update endpoint, where it replaces all of the target post's fields.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostPayload {
    pub title: String,
    pub body: String,
    pub category: Category,
    pub rating: i32,
    pub author_id: Option<Uuid>,
}

impl PostPayload {
    /// Structural validation: title and body must be non-empty. The rating is
    /// deliberately unconstrained.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.body.trim().is_empty() {
            return Err("body must not be empty".to_string());
        }
        Ok(())
    }
}

/// PostFilter
///
/// Accepted query parameters for the listing endpoint. Bound by Axum's Query
/// extractor; every criterion is optional and criteria combine with AND.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct PostFilter {
    /// Restrict to a single category.
    pub category: Option<Category>,
    /// Inclusive lower bound on rating.
    pub min_rating: Option<i32>,
    /// Inclusive upper bound on rating.
    pub max_rating: Option<i32>,
    /// Case-insensitive substring match over title and body.
    pub search: Option<String>,
    /// 1-based page number. Defaults to the first page.
    pub page: Option<u32>,
}

impl PostFilter {
    /// The effective page number, clamped to at least 1.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }
}

/// RegisterRequest
///
/// Input payload for the public registration endpoint (POST /register).
/// The password is hashed before it reaches the repository and never logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("username must not be empty".to_string());
        }
        if self.password.len() < 8 {
            return Err("password must be at least 8 characters".to_string());
        }
        Ok(())
    }
}

/// LoginRequest
///
/// Input payload for POST /login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// --- Output Schemas ---

/// PostListing
///
/// The full listing response: one page of posts in descending rating order
/// plus everything the presentation layer needs to render the page — the
/// category choices, a prefilled (empty) create form, pagination data, and
/// whether the caller lacks the Author role (controls creation UI).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostListing {
    pub posts: Vec<Post>,
    /// 1-based page number that was served.
    pub page: u32,
    /// Total posts matching the filter, across all pages.
    pub total: i64,
    pub total_pages: i64,
    pub choices: Vec<Category>,
    pub form: PostPayload,
    pub is_not_author: bool,
}

/// CreateForm
///
/// Output of the create/update form endpoints: the choices plus a form
/// payload (empty for create, prefilled from the post for update).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateForm {
    pub choices: Vec<Category>,
    pub form: PostPayload,
}

/// AuthResponse
///
/// Output of a successful login: the signed session bearer token and the
/// authenticated user's profile.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}
