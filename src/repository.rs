use crate::models::{Post, PostFilter, PostPayload, Role, Session, User, UserRecord};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Posts per listing page. The listing contract is "page N of size 10".
pub const PAGE_SIZE: i64 = 10;

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations. Handlers
/// interact with the data layer through this trait without knowing the
/// concrete implementation (Postgres in production, the in-memory store in
/// tests).
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's async task
/// boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Posts ---
    /// Filtered listing, sorted by rating descending, sliced to PAGE_SIZE.
    /// Returns the page of posts plus the total match count across all pages.
    async fn list_posts(&self, filter: &PostFilter) -> (Vec<Post>, i64);
    async fn get_post(&self, id: Uuid) -> Option<Post>;
    async fn create_post(&self, payload: PostPayload) -> Option<Post>;
    /// Replaces every field of the post. None if the id does not resolve.
    async fn update_post(&self, id: Uuid, payload: PostPayload) -> Option<Post>;
    /// Returns true if a row was actually removed.
    async fn delete_post(&self, id: Uuid) -> bool;

    // --- Users & Roles ---
    /// None on a duplicate username (or storage failure).
    async fn create_user(&self, username: &str, password_hash: &str) -> Option<User>;
    async fn get_user(&self, id: Uuid) -> Option<User>;
    /// Credential lookup for the login flow. The returned record carries the
    /// password hash and must never be serialized.
    async fn get_user_by_username(&self, username: &str) -> Option<UserRecord>;
    async fn get_user_roles(&self, user_id: Uuid) -> Vec<Role>;
    /// Idempotent grant: returns true only if the membership was newly
    /// inserted (same shape as an ON CONFLICT DO NOTHING insert).
    async fn grant_role(&self, user_id: Uuid, role: Role) -> bool;
    /// Startup check: true when every role in the fixed set exists in the
    /// store. The service refuses to boot when this is false.
    async fn roles_provisioned(&self) -> bool;

    // --- Sessions ---
    async fn create_session(&self, user_id: Uuid) -> Option<Session>;
    async fn get_session(&self, id: Uuid) -> Option<Session>;
    async fn delete_session(&self, id: Uuid) -> bool;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The production implementation of `Repository`, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Appends the optional filter criteria as parameterized AND clauses.
/// Shared by the row query and the count query so both see the same matches.
fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &PostFilter) {
    if let Some(category) = filter.category {
        builder.push(" AND category = ");
        builder.push_bind(category);
    }
    if let Some(min) = filter.min_rating {
        builder.push(" AND rating >= ");
        builder.push_bind(min);
    }
    if let Some(max) = filter.max_rating {
        builder.push(" AND rating <= ");
        builder.push_bind(max);
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (title ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR body ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_posts
    ///
    /// Implements the filtered listing with QueryBuilder for safe
    /// parameterization. Ordering is rating descending with creation time as
    /// a deterministic tie-break.
    async fn list_posts(&self, filter: &PostFilter) -> (Vec<Post>, i64) {
        let mut count_builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts WHERE 1=1");
        push_filters(&mut count_builder, filter);

        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("list_posts count error: {:?}", e);
                0
            });

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            SELECT id, title, body, category, rating, author_id, created_at, updated_at
            FROM posts
            WHERE 1=1
            "#,
        );
        push_filters(&mut builder, filter);

        let offset = (i64::from(filter.page()) - 1) * PAGE_SIZE;
        builder.push(" ORDER BY rating DESC, created_at DESC LIMIT ");
        builder.push_bind(PAGE_SIZE);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let posts = match builder.build_query_as::<Post>().fetch_all(&self.pool).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("list_posts error: {:?}", e);
                vec![]
            }
        };

        (posts, total)
    }

    async fn get_post(&self, id: Uuid) -> Option<Post> {
        sqlx::query_as::<_, Post>(
            r#"SELECT id, title, body, category, rating, author_id, created_at, updated_at
               FROM posts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_post error: {:?}", e);
            None
        })
    }

    async fn create_post(&self, payload: PostPayload) -> Option<Post> {
        let new_id = Uuid::new_v4();
        match sqlx::query_as::<_, Post>(
            r#"INSERT INTO posts (id, title, body, category, rating, author_id)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, title, body, category, rating, author_id, created_at, updated_at"#,
        )
        .bind(new_id)
        .bind(&payload.title)
        .bind(&payload.body)
        .bind(payload.category)
        .bind(payload.rating)
        .bind(payload.author_id)
        .fetch_one(&self.pool)
        .await
        {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::error!("create_post error: {:?}", e);
                None
            }
        }
    }

    /// update_post
    ///
    /// Full replacement of the post's fields, per the update contract. Not a
    /// COALESCE-style partial update.
    async fn update_post(&self, id: Uuid, payload: PostPayload) -> Option<Post> {
        sqlx::query_as::<_, Post>(
            r#"UPDATE posts
               SET title = $2, body = $3, category = $4, rating = $5, author_id = $6,
                   updated_at = NOW()
               WHERE id = $1
               RETURNING id, title, body, category, rating, author_id, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&payload.title)
        .bind(&payload.body)
        .bind(payload.category)
        .bind(payload.rating)
        .bind(payload.author_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("update_post error: {:?}", e);
            None
        })
    }

    async fn delete_post(&self, id: Uuid) -> bool {
        match sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("delete_post error: {:?}", e);
                false
            }
        }
    }

    /// create_user
    ///
    /// Inserts the identity record. A unique-violation on the username (or
    /// any other failure) collapses to None; the handler reports it as a
    /// validation failure.
    async fn create_user(&self, username: &str, password_hash: &str) -> Option<User> {
        let new_id = Uuid::new_v4();
        match sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, username, password_hash)
               VALUES ($1, $2, $3)
               RETURNING id, username, created_at"#,
        )
        .bind(new_id)
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::error!("create_user error: {:?}", e);
                None
            }
        }
    }

    async fn get_user(&self, id: Uuid) -> Option<User> {
        sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or(None)
    }

    async fn get_user_by_username(&self, username: &str) -> Option<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_user_by_username error: {:?}", e);
            None
        })
    }

    async fn get_user_roles(&self, user_id: Uuid) -> Vec<Role> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT role_name FROM user_roles WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("get_user_roles error: {:?}", e);
                    vec![]
                });

        // Names outside the provisioned set would mean a corrupted roles
        // table; they are dropped rather than surfaced. The result is sorted
        // by the enum's own ordering so every backend reports the same shape.
        let mut roles: Vec<Role> = names.iter().filter_map(|n| Role::parse(n)).collect();
        roles.sort();
        roles
    }

    /// grant_role
    ///
    /// Inserts the membership row. Uses `ON CONFLICT DO NOTHING` so re-granting
    /// an already-held role is a no-op; the function returns true only if a new
    /// row was inserted.
    async fn grant_role(&self, user_id: Uuid, role: Role) -> bool {
        let result =
            sqlx::query("INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user_id)
                .bind(role.as_str())
                .execute(&self.pool)
                .await;
        match result {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                // An FK violation here means the role row itself is missing,
                // i.e. the store was never provisioned.
                tracing::error!("grant_role error: {:?}", e);
                false
            }
        }
    }

    async fn roles_provisioned(&self) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE name IN ('basic', 'author')")
                .fetch_one(&self.pool)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("roles_provisioned error: {:?}", e);
                    0
                });
        count == 2
    }

    async fn create_session(&self, user_id: Uuid) -> Option<Session> {
        let new_id = Uuid::new_v4();
        match sqlx::query_as::<_, Session>(
            r#"INSERT INTO sessions (id, user_id)
               VALUES ($1, $2)
               RETURNING id, user_id, created_at"#,
        )
        .bind(new_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::error!("create_session error: {:?}", e);
                None
            }
        }
    }

    async fn get_session(&self, id: Uuid) -> Option<Session> {
        sqlx::query_as::<_, Session>("SELECT id, user_id, created_at FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or(None)
    }

    async fn delete_session(&self, id: Uuid) -> bool {
        match sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("delete_session error: {:?}", e);
                false
            }
        }
    }
}

// --- In-Memory Implementation (For Tests) ---

#[derive(Default)]
struct MemoryStore {
    users: HashMap<Uuid, (User, String)>,
    user_roles: HashMap<Uuid, BTreeSet<Role>>,
    posts: HashMap<Uuid, Post>,
    sessions: HashMap<Uuid, Session>,
    provisioned_roles: BTreeSet<Role>,
}

/// MemoryRepository
///
/// An in-process implementation of `Repository` used by the test suite. It
/// mirrors the Postgres semantics (rating-descending listing, page slicing,
/// conflict-free grants, unique usernames) without requiring a database,
/// isolating the HTTP test boundary the same way the trait swap would for any
/// other backing store.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<MemoryStore>,
}

impl MemoryRepository {
    /// A store with the fixed role set already provisioned, matching what the
    /// migration seeds in Postgres.
    pub fn new() -> Self {
        let repo = Self::default();
        {
            let mut store = repo.lock();
            store.provisioned_roles.insert(Role::Basic);
            store.provisioned_roles.insert(Role::Author);
        }
        repo
    }

    /// A store missing the pre-provisioned roles, for exercising the
    /// fail-fast configuration path.
    pub fn new_unprovisioned() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_posts(&self, filter: &PostFilter) -> (Vec<Post>, i64) {
        let store = self.lock();
        let mut matches: Vec<Post> = store
            .posts
            .values()
            .filter(|p| filter.category.is_none_or(|c| p.category == c))
            .filter(|p| filter.min_rating.is_none_or(|min| p.rating >= min))
            .filter(|p| filter.max_rating.is_none_or(|max| p.rating <= max))
            .filter(|p| {
                filter.search.as_ref().is_none_or(|s| {
                    let needle = s.to_lowercase();
                    p.title.to_lowercase().contains(&needle)
                        || p.body.to_lowercase().contains(&needle)
                })
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then(b.created_at.cmp(&a.created_at))
        });

        let total = matches.len() as i64;
        let offset = ((filter.page() - 1) as usize) * PAGE_SIZE as usize;
        let page = matches
            .into_iter()
            .skip(offset)
            .take(PAGE_SIZE as usize)
            .collect();
        (page, total)
    }

    async fn get_post(&self, id: Uuid) -> Option<Post> {
        self.lock().posts.get(&id).cloned()
    }

    async fn create_post(&self, payload: PostPayload) -> Option<Post> {
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            title: payload.title,
            body: payload.body,
            category: payload.category,
            rating: payload.rating,
            author_id: payload.author_id,
            created_at: now,
            updated_at: now,
        };
        self.lock().posts.insert(post.id, post.clone());
        Some(post)
    }

    async fn update_post(&self, id: Uuid, payload: PostPayload) -> Option<Post> {
        let mut store = self.lock();
        let post = store.posts.get_mut(&id)?;
        post.title = payload.title;
        post.body = payload.body;
        post.category = payload.category;
        post.rating = payload.rating;
        post.author_id = payload.author_id;
        post.updated_at = Utc::now();
        Some(post.clone())
    }

    async fn delete_post(&self, id: Uuid) -> bool {
        self.lock().posts.remove(&id).is_some()
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Option<User> {
        let mut store = self.lock();
        if store.users.values().any(|(u, _)| u.username == username) {
            return None;
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        store
            .users
            .insert(user.id, (user.clone(), password_hash.to_string()));
        Some(user)
    }

    async fn get_user(&self, id: Uuid) -> Option<User> {
        self.lock().users.get(&id).map(|(u, _)| u.clone())
    }

    async fn get_user_by_username(&self, username: &str) -> Option<UserRecord> {
        self.lock()
            .users
            .values()
            .find(|(u, _)| u.username == username)
            .map(|(u, hash)| UserRecord {
                id: u.id,
                username: u.username.clone(),
                password_hash: hash.clone(),
            })
    }

    async fn get_user_roles(&self, user_id: Uuid) -> Vec<Role> {
        self.lock()
            .user_roles
            .get(&user_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn grant_role(&self, user_id: Uuid, role: Role) -> bool {
        let mut store = self.lock();
        if !store.provisioned_roles.contains(&role) {
            tracing::error!("grant_role: role {:?} is not provisioned", role);
            return false;
        }
        store.user_roles.entry(user_id).or_default().insert(role)
    }

    async fn roles_provisioned(&self) -> bool {
        let store = self.lock();
        store.provisioned_roles.contains(&Role::Basic)
            && store.provisioned_roles.contains(&Role::Author)
    }

    async fn create_session(&self, user_id: Uuid) -> Option<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
        };
        self.lock().sessions.insert(session.id, session.clone());
        Some(session)
    }

    async fn get_session(&self, id: Uuid) -> Option<Session> {
        self.lock().sessions.get(&id).cloned()
    }

    async fn delete_session(&self, id: Uuid) -> bool {
        self.lock().sessions.remove(&id).is_some()
    }
}
