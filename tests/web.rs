// End-to-end handler tests driven through the router with oneshot requests
// against a tempfile-backed SQLite database.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use uuid::Uuid;

use quill::{
    app_state::AppState,
    auth,
    config::{CacheConfig, Config, DatabaseConfig, MediaConfig, ServerConfig},
    models::User,
    views,
};

const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
    0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08, 0xD7, 0x63, 0xF8,
    0xCF, 0xC0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x9A, 0x60, 0xE1, 0xD5, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

struct TestApp {
    state: AppState,
    router: Router,
    _tmp: tempfile::TempDir,
}

async fn setup() -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        database: DatabaseConfig {
            url: format!(
                "sqlite://{}?mode=rwc",
                tmp.path().join("test.db").display()
            ),
        },
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        cache: CacheConfig {
            capacity: 100,
            ttl_secs: 3600,
        },
        media: MediaConfig {
            root: tmp.path().join("media").display().to_string(),
        },
    };
    let state = AppState::new(config).await.unwrap();
    let router = views::router(state.clone());
    TestApp {
        state,
        router,
        _tmp: tmp,
    }
}

async fn create_user(app: &TestApp, username: &str) -> User {
    let hash = auth::hash_password("12345678").unwrap();
    app.state
        .db
        .create_user(username, &format!("{}@example.com", username), &hash)
        .await
        .unwrap()
}

/// Equivalent of a test-client force login: a session row plus its cookie.
async fn force_login(app: &TestApp, user: &User) -> String {
    let token = Uuid::new_v4().to_string();
    app.state.db.create_session(&token, user.id).await.unwrap();
    format!("sessionid={}", token)
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

async fn get(app: &TestApp, path: &str, cookie: Option<&str>) -> (StatusCode, axum::http::HeaderMap, String) {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

const BOUNDARY: &str = "qUiLLtEsTbOuNdArY";

/// Builds a multipart/form-data body for the post form.
fn multipart_body(text: &str, group: &str, file: Option<(&str, &str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in [("text", text), ("group", group)] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

async fn post_multipart(
    app: &TestApp,
    path: &str,
    cookie: Option<&str>,
    text: &str,
    file: Option<(&str, &str, &[u8])>,
) -> (StatusCode, axum::http::HeaderMap, String) {
    let (content_type, body) = multipart_body(text, "", file);
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(app, builder.body(Body::from(body)).unwrap()).await
}

async fn post_form(
    app: &TestApp,
    path: &str,
    cookie: Option<&str>,
    body: &str,
) -> (StatusCode, axum::http::HeaderMap, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

fn location(headers: &axum::http::HeaderMap) -> &str {
    headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn unauth_user_cannot_publish_post() {
    let app = setup().await;
    let (status, headers, _) = post_multipart(&app, "/new/", None, "a new post", None).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/auth/login/?next=/new/");
    assert_eq!(app.state.db.post_count().await.unwrap(), 0);
}

#[tokio::test]
async fn post_appears_on_feed_profile_and_detail() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    let (status, headers, _) =
        post_multipart(&app, "/new/", Some(&cookie), "a brand new post", None).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/");
    assert_eq!(app.state.db.post_count().await.unwrap(), 1);

    let page = app.state.db.posts_page(1).await.unwrap();
    let detail = format!("/sarah/{}/", page.items[0].id);
    for url in ["/", "/sarah/", detail.as_str()] {
        let (status, _, body) = get(&app, url, None).await;
        assert_eq!(status, StatusCode::OK, "{}", url);
        assert!(body.contains("a brand new post"), "{}", url);
    }
}

#[tokio::test]
async fn owner_can_edit_post() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;
    let post_id = app
        .state
        .db
        .create_post(sarah.id, "original text", None, None)
        .await
        .unwrap();

    let url = format!("/sarah/{}/edit/", post_id);
    let (status, headers, _) =
        post_multipart(&app, &url, Some(&cookie), "edited text", None).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), format!("/sarah/{}/", post_id));

    let post = app.state.db.get_post("sarah", post_id).await.unwrap().unwrap();
    assert_eq!(post.text, "edited text");

    let detail = format!("/sarah/{}/", post_id);
    for url in ["/", "/sarah/", detail.as_str()] {
        let (_, _, body) = get(&app, url, None).await;
        assert!(body.contains("edited text"), "{}", url);
        assert!(!body.contains("original text"), "{}", url);
    }
}

#[tokio::test]
async fn non_owner_cannot_edit_post() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let eve = create_user(&app, "eve").await;
    let post_id = app
        .state
        .db
        .create_post(sarah.id, "original text", None, None)
        .await
        .unwrap();

    let cookie = force_login(&app, &eve).await;
    let url = format!("/sarah/{}/edit/", post_id);
    let (status, headers, _) =
        post_multipart(&app, &url, Some(&cookie), "hijacked", None).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), format!("/sarah/{}/", post_id));

    let post = app.state.db.get_post("sarah", post_id).await.unwrap().unwrap();
    assert_eq!(post.text, "original text");
}

#[tokio::test]
async fn non_image_upload_is_rejected_with_field_error() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    let file = Some(("filename.txt", "text/plain", b"hello world".as_slice()));
    let (status, _, body) = post_multipart(&app, "/new/", Some(&cookie), "with file", file).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Upload a valid image"));
    assert_eq!(app.state.db.post_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unparsable_group_choice_redisplays_with_field_error() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    let (content_type, body) = multipart_body("with bad group", "garbage", None);
    let request = Request::builder()
        .method("POST")
        .uri("/new/")
        .header(header::CONTENT_TYPE, content_type)
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Select a valid choice"));
    assert_eq!(app.state.db.post_count().await.unwrap(), 0);
}

#[tokio::test]
async fn nonexistent_group_choice_redisplays_with_field_error() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    let (content_type, body) = multipart_body("with missing group", "9999", None);
    let request = Request::builder()
        .method("POST")
        .uri("/new/")
        .header(header::CONTENT_TYPE, content_type)
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Select a valid choice"));
    assert_eq!(app.state.db.post_count().await.unwrap(), 0);
}

#[tokio::test]
async fn image_upload_renders_img_tag() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    // The filename lies; the content is what counts.
    let file = Some(("payload.txt", "text/plain", PNG_1X1));
    let (status, _, _) = post_multipart(&app, "/new/", Some(&cookie), "post with image", file).await;
    assert!(status.is_redirection());

    let page = app.state.db.posts_page(1).await.unwrap();
    let post = &page.items[0];
    assert!(post.image.is_some());
    let detail = format!("/sarah/{}/", post.id);
    for url in ["/", "/sarah/", detail.as_str()] {
        let (_, _, body) = get(&app, url, None).await;
        assert!(body.contains("<img"), "{}", url);
    }
}

#[tokio::test]
async fn feed_stays_cached_until_cleared() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cookie = force_login(&app, &sarah).await;

    // Prime the fragment cache with the empty feed.
    let (status, _, body) = get(&app, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("fresh post"));

    post_multipart(&app, "/new/", Some(&cookie), "fresh post", None).await;

    let (_, _, stale) = get(&app, "/", None).await;
    assert!(!stale.contains("fresh post"));

    app.state.feed_cache.lock().await.clear();
    let (_, _, fresh) = get(&app, "/", None).await;
    assert!(fresh.contains("fresh post"));
}

#[tokio::test]
async fn follow_feed_shows_only_followed_authors() {
    let app = setup().await;
    let author = create_user(&app, "leo").await;
    let fan = create_user(&app, "fan").await;
    let other = create_user(&app, "other").await;
    app.state
        .db
        .create_post(author.id, "war and peace", None, None)
        .await
        .unwrap();

    let fan_cookie = force_login(&app, &fan).await;
    let (status, headers, _) = get(&app, "/leo/follow/", Some(&fan_cookie)).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/leo/");
    assert!(app.state.db.follow_exists(fan.id, author.id).await.unwrap());

    let (_, _, body) = get(&app, "/follow/", Some(&fan_cookie)).await;
    assert!(body.contains("war and peace"));

    let other_cookie = force_login(&app, &other).await;
    let (_, _, body) = get(&app, "/follow/", Some(&other_cookie)).await;
    assert!(!body.contains("war and peace"));
}

#[tokio::test]
async fn follow_is_idempotent_and_blocks_self_follow() {
    let app = setup().await;
    let author = create_user(&app, "leo").await;
    let fan = create_user(&app, "fan").await;
    let fan_cookie = force_login(&app, &fan).await;

    get(&app, "/leo/follow/", Some(&fan_cookie)).await;
    get(&app, "/leo/follow/", Some(&fan_cookie)).await;
    assert_eq!(app.state.db.followers_count(author.id).await.unwrap(), 1);

    let leo_cookie = force_login(&app, &author).await;
    let (status, _, _) = get(&app, "/leo/follow/", Some(&leo_cookie)).await;
    assert!(status.is_redirection());
    assert_eq!(app.state.db.followers_count(author.id).await.unwrap(), 1);
    assert_eq!(app.state.db.following_count(author.id).await.unwrap(), 0);

    // Unfollow removes the edge; repeating it is a no-op.
    get(&app, "/leo/unfollow/", Some(&fan_cookie)).await;
    assert!(!app.state.db.follow_exists(fan.id, author.id).await.unwrap());
    let (status, headers, _) = get(&app, "/leo/unfollow/", Some(&fan_cookie)).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/leo/");
}

#[tokio::test]
async fn comments_are_created_or_silently_dropped() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let reader = create_user(&app, "reader").await;
    let post_id = app
        .state
        .db
        .create_post(sarah.id, "discuss", None, None)
        .await
        .unwrap();
    let cookie = force_login(&app, &reader).await;
    let url = format!("/sarah/{}/comment", post_id);

    // Invalid input redirects without any error output.
    let (status, headers, _) = post_form(&app, &url, Some(&cookie), "text=").await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), format!("/sarah/{}/", post_id));
    assert_eq!(app.state.db.comment_count(post_id).await.unwrap(), 0);

    let (status, _, _) = post_form(&app, &url, Some(&cookie), "text=well+said").await;
    assert!(status.is_redirection());
    assert_eq!(app.state.db.comment_count(post_id).await.unwrap(), 1);

    let (_, _, body) = get(&app, &format!("/sarah/{}/", post_id), None).await;
    assert!(body.contains("well said"));
    assert!(body.contains("reader"));
}

#[tokio::test]
async fn group_pages_filter_by_group() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    let cats = app
        .state
        .db
        .create_group("Cats", "cats", "feline content")
        .await
        .unwrap();
    app.state
        .db
        .create_group("Dogs", "dogs", "canine content")
        .await
        .unwrap();
    app.state
        .db
        .create_post(sarah.id, "meow post", Some(cats.id), None)
        .await
        .unwrap();

    let (status, _, body) = get(&app, "/group/cats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("meow post"));

    let (_, _, body) = get(&app, "/group/dogs", None).await;
    assert!(!body.contains("meow post"));
}

#[tokio::test]
async fn missing_resources_are_404() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    create_user(&app, "other").await;
    let post_id = app
        .state
        .db
        .create_post(sarah.id, "mine", None, None)
        .await
        .unwrap();

    let mismatched = format!("/other/{}/", post_id); // author/post mismatch
    for url in [
        "/no/such/path/here",
        "/group/unknown",
        "/ghost/",
        "/sarah/9999/",
        mismatched.as_str(),
        "/sarah/not-a-number/",
    ] {
        let (status, _, _) = get(&app, url, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", url);
    }
}

#[tokio::test]
async fn feed_paginates_at_ten() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    for i in 0..15 {
        app.state
            .db
            .create_post(sarah.id, &format!("numbered post {}", i), None, None)
            .await
            .unwrap();
    }

    let (_, _, body) = get(&app, "/", None).await;
    assert!(body.contains("page 1 of 2"));
    assert!(body.contains("numbered post 14"));
    assert!(!body.contains("numbered post 0<"));

    let (_, _, body) = get(&app, "/?page=2", None).await;
    assert!(body.contains("page 2 of 2"));
    assert!(body.contains("numbered post 0"));
}

#[tokio::test]
async fn signup_and_login_flow() {
    let app = setup().await;

    let (status, headers, _) = post_form(
        &app,
        "/auth/signup/",
        None,
        "username=connor&email=c%40skynet.com&password=hastalavista",
    )
    .await;
    assert!(status.is_redirection());
    let cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let (status, _, _) = get(&app, "/new/", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);

    // Wrong password re-renders the login form.
    let (status, _, body) = post_form(
        &app,
        "/auth/login/",
        None,
        "username=connor&password=wrong&next=%2Fnew%2F",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("correct username and password"));

    // Right password lands on next.
    let (status, headers, _) = post_form(
        &app,
        "/auth/login/",
        None,
        "username=connor&password=hastalavista&next=%2Fnew%2F",
    )
    .await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/new/");
}

#[tokio::test]
async fn health_check_reports_status() {
    let app = setup().await;
    let (status, _, body) = get(&app, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["status"], "healthy");
    assert_eq!(payload["service"], "quill");
}

#[tokio::test]
async fn group_slugs_must_be_url_safe() {
    let app = setup().await;
    let err = app
        .state
        .db
        .create_group("Bad", "not a slug", "spaces are not url safe")
        .await;
    assert!(err.is_err());

    app.state
        .db
        .create_group("Good", "good-slug", "fine")
        .await
        .unwrap();
    let (status, _, _) = get(&app, "/group/good-slug", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_lists_require_login_and_search() {
    let app = setup().await;
    let sarah = create_user(&app, "sarah").await;
    app.state
        .db
        .create_post(sarah.id, "findable needle", None, None)
        .await
        .unwrap();
    app.state
        .db
        .create_post(sarah.id, "something else", None, None)
        .await
        .unwrap();

    let (status, headers, _) = get(&app, "/admin/posts", None).await;
    assert!(status.is_redirection());
    assert_eq!(location(&headers), "/auth/login/?next=/admin/posts");

    let cookie = force_login(&app, &sarah).await;
    let (status, _, body) = get(&app, "/admin/posts?q=needle", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("findable needle"));
    assert!(!body.contains("something else"));
}
