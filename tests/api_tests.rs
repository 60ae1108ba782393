use axum::extract::State;
use news_portal::{
    AppConfig, AppState, MemoryRepository, create_router,
    auth::AuthUser,
    error::ApiError,
    handlers,
    models::{AuthResponse, Post, PostListing, PostPayload, Role, UserProfile},
    repository::RepositoryState,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub repo: RepositoryState,
}

async fn spawn_app_with(repo: RepositoryState) -> TestApp {
    let state = AppState {
        repo: repo.clone(),
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address, repo }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(Arc::new(MemoryRepository::new())).await
}

/// Client that reports redirects instead of following them, for asserting
/// the 303-to-listing behavior.
fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn post_body(title: &str, rating: i32, category: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "body": format!("{} body", title),
        "category": category,
        "rating": rating,
        "author_id": null,
    })
}

async fn register_and_login(app: &TestApp, client: &reqwest::Client, username: &str) -> (Uuid, String) {
    let resp = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({ "username": username, "password": "hunter2hunter2" }))
        .send()
        .await
        .expect("register failed");
    assert_eq!(resp.status(), 200);
    let profile: UserProfile = resp.json().await.unwrap();

    let resp = client
        .post(format!("{}/login", app.address))
        .json(&serde_json::json!({ "username": username, "password": "hunter2hunter2" }))
        .send()
        .await
        .expect("login failed");
    assert_eq!(resp.status(), 200);
    let auth: AuthResponse = resp.json().await.unwrap();
    (profile.id, auth.token)
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_listing_orders_by_rating_desc() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    for (title, rating) in [("A", 5), ("B", 9)] {
        let resp = client
            .post(format!("{}/create", app.address))
            .json(&post_body(title, rating, "tech"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let listing: PostListing = client
        .get(format!("{}/posts", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(listing.posts.len(), 2);
    assert_eq!(listing.posts[0].title, "B");
    assert_eq!(listing.posts[1].title, "A");
    for pair in listing.posts.windows(2) {
        assert!(pair[0].rating >= pair[1].rating);
    }
}

#[tokio::test]
async fn test_listing_page_contains_at_most_ten_posts() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    for i in 0..12 {
        app.repo
            .create_post(PostPayload {
                title: format!("post {}", i),
                body: "body".to_string(),
                rating: i,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let page1: PostListing = client
        .get(format!("{}/posts", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page1.posts.len(), 10);
    assert_eq!(page1.total, 12);
    assert_eq!(page1.total_pages, 2);

    let page2: PostListing = client
        .get(format!("{}/posts?page=2", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page2.posts.len(), 2);

    // Ordering holds across the page boundary.
    assert!(page1.posts.last().unwrap().rating >= page2.posts[0].rating);
}

#[tokio::test]
async fn test_listing_filters() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    for (title, rating, category) in [("tech post", 5, "tech"), ("sport post", 9, "sport")] {
        client
            .post(format!("{}/create", app.address))
            .json(&post_body(title, rating, category))
            .send()
            .await
            .unwrap();
    }

    let by_category: PostListing = client
        .get(format!("{}/posts?category=tech", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_category.posts.len(), 1);
    assert_eq!(by_category.posts[0].title, "tech post");

    let by_rating: PostListing = client
        .get(format!("{}/posts?min_rating=6", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_rating.posts.len(), 1);
    assert_eq!(by_rating.posts[0].title, "sport post");
}

#[tokio::test]
async fn test_inline_submission_creates_duplicates() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // Same payload twice: no duplicate guard, so both persist.
    for _ in 0..2 {
        let resp = client
            .post(format!("{}/posts", app.address))
            .json(&post_body("resubmitted", 3, "tech"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let listing: PostListing = client
        .get(format!("{}/posts", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let copies = listing
        .posts
        .iter()
        .filter(|p| p.title == "resubmitted")
        .count();
    assert_eq!(copies, 2);
}

#[tokio::test]
async fn test_inline_submission_skips_invalid_payload() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let listing: PostListing = client
        .post(format!("{}/posts", app.address))
        .json(&post_body("", 3, "tech"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // The invalid payload is dropped; the listing is still served.
    assert_eq!(listing.total, 0);
    assert_eq!(listing.total_pages, 0);
    assert!(listing.is_not_author);
}

#[tokio::test]
async fn test_post_detail() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let created: Post = client
        .post(format!("{}/create", app.address))
        .json(&post_body("detail", 1, "politics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let fetched: Post = client
        .get(format!("{}/post/{}", app.address, created.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.title, "detail");
}

#[tokio::test]
async fn test_post_detail_not_found() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/post/{}", app.address, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_create_post_validation_failure() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/create", app.address))
        .json(&post_body("", 1, "tech"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_register_grants_exactly_basic() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({ "username": "fresh", "password": "longenough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let profile: UserProfile = resp.json().await.unwrap();
    assert_eq!(profile.roles, vec![Role::Basic]);

    let roles = app.repo.get_user_roles(profile.id).await;
    assert_eq!(roles, vec![Role::Basic]);
}

#[tokio::test]
async fn test_register_rejects_duplicate_username() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "username": "taken", "password": "longenough" });

    let first = client
        .post(format!("{}/register", app.address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .post(format!("{}/register", app.address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({ "username": "short", "password": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_and_login(&app, &client, "victim").await;

    let wrong_password = client
        .post(format!("{}/login", app.address))
        .json(&serde_json::json!({ "username": "victim", "password": "not-the-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), 401);

    let unknown_user = client
        .post(format!("{}/login", app.address))
        .json(&serde_json::json!({ "username": "nobody", "password": "whatever123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_user.status(), 401);
}

#[tokio::test]
async fn test_upgrade_flow_is_idempotent() {
    let app = spawn_app().await;
    let client = no_redirect_client();
    let (user_id, token) = register_and_login(&app, &client, "climber").await;

    // Before the upgrade the listing reports the caller as not-an-author.
    let listing: PostListing = client
        .get(format!("{}/posts", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listing.is_not_author);

    let resp = client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers().get("location").unwrap(), "/posts");
    assert_eq!(
        app.repo.get_user_roles(user_id).await,
        vec![Role::Basic, Role::Author]
    );

    // Second call is a no-op: same redirect, role set unchanged.
    let resp = client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(
        app.repo.get_user_roles(user_id).await,
        vec![Role::Basic, Role::Author]
    );

    let listing: PostListing = client
        .get(format!("{}/posts", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!listing.is_not_author);
}

#[tokio::test]
async fn test_upgrade_tolerates_concurrent_grant() {
    let repo: RepositoryState = Arc::new(MemoryRepository::new());
    let user = repo.create_user("racer", "hash").await.unwrap();
    repo.grant_role(user.id, Role::Basic).await;

    // A second upgrade request lands its grant between this request's role
    // load and its own insert: the store already holds Author, but the
    // identity resolved for this request does not.
    repo.grant_role(user.id, Role::Author).await;
    let stale_auth = AuthUser {
        id: user.id,
        username: user.username.clone(),
        roles: vec![Role::Basic],
        session_id: None,
    };

    let state = AppState {
        repo: repo.clone(),
        config: AppConfig::default(),
    };
    let result = handlers::upgrade_role(stale_auth, State(state)).await;
    assert!(result.is_ok());
    assert_eq!(
        repo.get_user_roles(user.id).await,
        vec![Role::Basic, Role::Author]
    );
}

#[tokio::test]
async fn test_upgrade_errors_when_author_role_missing() {
    let repo: RepositoryState = Arc::new(MemoryRepository::new_unprovisioned());
    let user = repo.create_user("stranded", "hash").await.unwrap();
    let auth = AuthUser {
        id: user.id,
        username: user.username.clone(),
        roles: vec![],
        session_id: None,
    };

    let state = AppState {
        repo: repo.clone(),
        config: AppConfig::default(),
    };
    let result = handlers::upgrade_role(auth, State(state)).await;
    assert!(matches!(result, Err(ApiError::Configuration(_))));
    assert!(repo.get_user_roles(user.id).await.is_empty());
}

#[tokio::test]
async fn test_upgrade_requires_session() {
    let app = spawn_app().await;
    let client = no_redirect_client();
    let resp = client
        .get(format!("{}/upgrade", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_update_forbidden_without_change_post_permission() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "basic-only").await;

    let created: Post = client
        .post(format!("{}/create", app.address))
        .json(&post_body("original", 4, "tech"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/update/{}", app.address, created.id))
        .bearer_auth(&token)
        .json(&post_body("tampered", 99, "sport"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // The post is untouched.
    let fetched: Post = client
        .get(format!("{}/post/{}", app.address, created.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.title, "original");
    assert_eq!(fetched.rating, 4);
}

#[tokio::test]
async fn test_update_requires_authentication() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/update/{}", app.address, Uuid::new_v4()))
        .json(&post_body("anything", 1, "tech"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_update_with_author_permission() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "editor").await;

    client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    let created: Post = client
        .post(format!("{}/create", app.address))
        .json(&post_body("draft", 2, "tech"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // The prefilled update form reflects the current fields.
    let form: news_portal::models::CreateForm = client
        .get(format!("{}/update/{}", app.address, created.id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(form.form.title, "draft");

    let resp = client
        .post(format!("{}/update/{}", app.address, created.id))
        .bearer_auth(&token)
        .json(&post_body("published", 7, "politics"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Post = resp.json().await.unwrap();
    assert_eq!(updated.title, "published");
    assert_eq!(updated.rating, 7);
}

#[tokio::test]
async fn test_update_not_found() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, token) = register_and_login(&app, &client, "editor2").await;
    client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/update/{}", app.address, Uuid::new_v4()))
        .bearer_auth(&token)
        .json(&post_body("ghost", 1, "tech"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_delete_redirects_to_listing() {
    let app = spawn_app().await;
    let client = no_redirect_client();

    let created: Post = client
        .post(format!("{}/create", app.address))
        .json(&post_body("doomed", 1, "tech"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // The confirmation view serves the post first.
    let confirm = client
        .get(format!("{}/delete/{}", app.address, created.id))
        .send()
        .await
        .unwrap();
    assert_eq!(confirm.status(), 200);

    let resp = client
        .post(format!("{}/delete/{}", app.address, created.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers().get("location").unwrap(), "/posts");

    let gone = client
        .get(format!("{}/post/{}", app.address, created.id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn test_delete_not_found() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/delete/{}", app.address, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let app = spawn_app().await;
    let client = no_redirect_client();
    let (_, token) = register_and_login(&app, &client, "leaver").await;

    let resp = client
        .get(format!("{}/logout", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // The token still carries a valid signature but its session is gone.
    let resp = client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = spawn_app().await;
    let client = no_redirect_client();
    let resp = client
        .get(format!("{}/upgrade", app.address))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_unprovisioned_role_store_fails_registration() {
    let app = spawn_app_with(Arc::new(MemoryRepository::new_unprovisioned())).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({ "username": "nobody", "password": "longenough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}
