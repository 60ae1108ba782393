use news_portal::models::{Category, PostFilter, PostPayload, RegisterRequest, Role};

fn valid_post() -> PostPayload {
    PostPayload {
        title: "a title".to_string(),
        body: "a body".to_string(),
        category: Category::Tech,
        rating: 5,
        author_id: None,
    }
}

#[test]
fn post_payload_accepts_valid_input() {
    assert!(valid_post().validate().is_ok());
}

#[test]
fn post_payload_rejects_blank_title() {
    let mut payload = valid_post();
    payload.title = "   ".to_string();
    assert!(payload.validate().is_err());
}

#[test]
fn post_payload_rejects_blank_body() {
    let mut payload = valid_post();
    payload.body = String::new();
    assert!(payload.validate().is_err());
}

#[test]
fn post_payload_rating_is_unbounded() {
    let mut payload = valid_post();
    payload.rating = -1000;
    assert!(payload.validate().is_ok());
    payload.rating = i32::MAX;
    assert!(payload.validate().is_ok());
}

#[test]
fn register_request_validation() {
    let ok = RegisterRequest {
        username: "alice".to_string(),
        password: "longenough".to_string(),
    };
    assert!(ok.validate().is_ok());

    let blank_name = RegisterRequest {
        username: "  ".to_string(),
        password: "longenough".to_string(),
    };
    assert!(blank_name.validate().is_err());

    let short_password = RegisterRequest {
        username: "alice".to_string(),
        password: "short".to_string(),
    };
    assert!(short_password.validate().is_err());
}

#[test]
fn category_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Category::Politics).unwrap(), "\"politics\"");
    assert_eq!(
        serde_json::from_str::<Category>("\"tech\"").unwrap(),
        Category::Tech
    );
    assert!(serde_json::from_str::<Category>("\"gardening\"").is_err());
}

#[test]
fn category_choices_cover_every_variant() {
    let choices = Category::choices();
    assert_eq!(choices.len(), 4);
    assert!(choices.contains(&Category::Tech));
    assert!(choices.contains(&Category::Education));
}

#[test]
fn role_names_round_trip() {
    for role in [Role::Basic, Role::Author] {
        assert_eq!(Role::parse(role.as_str()), Some(role));
    }
    assert_eq!(Role::parse("admin"), None);
}

#[test]
fn filter_page_defaults_and_clamps() {
    assert_eq!(PostFilter::default().page(), 1);
    let zero = PostFilter {
        page: Some(0),
        ..Default::default()
    };
    assert_eq!(zero.page(), 1);
    let seven = PostFilter {
        page: Some(7),
        ..Default::default()
    };
    assert_eq!(seven.page(), 7);
}
