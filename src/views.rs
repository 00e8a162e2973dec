// View handlers, one per route, plus the application router. Each handler
// authorizes, fetches or validates, persists, then renders or redirects.

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{
    admin,
    app_state::AppState,
    auth::{self, MaybeViewer, Viewer},
    error::{AppError, AppResult},
    forms::{CommentForm, FieldErrors, ImageUpload, PostForm},
    pages,
};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    /// Bad or missing `page` values fall back to the first page.
    fn number(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1)
    }
}

fn parse_post_id(raw: &str) -> AppResult<i64> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("post id {}", raw)))
}

fn post_detail_path(username: &str, post_id: i64) -> String {
    format!("/{}/{}/", username, post_id)
}

/// Writes an already-validated upload under the media root and returns the
/// relative path stored on the post.
async fn save_image(media_root: &str, upload: &ImageUpload) -> AppResult<String> {
    let format = upload.sniff();
    let ext = format.extension();
    let relative = format!("posts/{}.{}", Uuid::new_v4(), ext);
    let root = std::path::Path::new(media_root);
    tokio::fs::create_dir_all(root.join("posts"))
        .await
        .context("creating media directory")?;
    tokio::fs::write(root.join(&relative), &upload.bytes)
        .await
        .context("writing uploaded image")?;
    Ok(relative)
}

/// Validates a parsed post form against the database; group choices must
/// reference an existing group.
async fn validate_post_form(state: &AppState, form: &PostForm) -> AppResult<FieldErrors> {
    let mut errors = form.validate();
    if let Some(group_id) = form.group {
        if state.db.get_group(group_id).await?.is_none() {
            errors.add("group", "Select a valid choice.");
        }
    }
    Ok(errors)
}

// --- feed / listing handlers ---

pub async fn index(
    State(state): State<AppState>,
    MaybeViewer(viewer): MaybeViewer,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let number = query.number();

    let cached = state.feed_cache.lock().await.get("index", number);
    let fragment = match cached {
        Some(fragment) => fragment,
        None => {
            let page = state.db.posts_page(number).await?;
            let fragment = pages::feed_fragment(&page);
            state
                .feed_cache
                .lock()
                .await
                .insert("index", number, fragment.clone());
            fragment
        }
    };

    Ok(Html(pages::index(viewer.as_ref(), &fragment)))
}

pub async fn group_posts(
    State(state): State<AppState>,
    MaybeViewer(viewer): MaybeViewer,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let group = state
        .db
        .get_group_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::not_found(format!("group {}", slug)))?;
    let page = state.db.group_posts_page(group.id, query.number()).await?;
    Ok(Html(pages::group(viewer.as_ref(), &group, &page)))
}

pub async fn profile(
    State(state): State<AppState>,
    MaybeViewer(viewer): MaybeViewer,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let author = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;

    let page = state.db.author_posts_page(author.id, query.number()).await?;
    let followers = state.db.followers_count(author.id).await?;
    let following = state.db.following_count(author.id).await?;
    let viewer_follows = match &viewer {
        Some(user) => state.db.follow_exists(user.id, author.id).await?,
        None => false,
    };

    Ok(Html(pages::profile(
        viewer.as_ref(),
        &author,
        &page,
        followers,
        following,
        viewer_follows,
    )))
}

pub async fn follow_index(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let page = state.db.feed_page(user.id, query.number()).await?;
    Ok(Html(pages::follow_index(&user, &page)))
}

// --- post creation / editing ---

pub async fn new_post_form(
    State(state): State<AppState>,
    Viewer(user): Viewer,
) -> AppResult<Html<String>> {
    let groups = state.db.all_groups().await?;
    Ok(Html(pages::post_form(
        &user,
        "/new/",
        &PostForm::default(),
        &FieldErrors::default(),
        &groups,
        false,
    )))
}

pub async fn new_post(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let form = PostForm::from_multipart(&mut multipart).await?;
    let errors = validate_post_form(&state, &form).await?;
    if !errors.is_empty() {
        let groups = state.db.all_groups().await?;
        return Ok(Html(pages::post_form(&user, "/new/", &form, &errors, &groups, false)).into_response());
    }

    let image = match &form.image {
        Some(upload) => Some(save_image(&state.config.media.root, upload).await?),
        None => None,
    };
    let post_id = state
        .db
        .create_post(user.id, form.text.trim(), form.group, image.as_deref())
        .await?;
    info!("user {} created post {}", user.username, post_id);

    Ok(Redirect::to("/").into_response())
}

pub async fn post_edit_form(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((username, post_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let post_id = parse_post_id(&post_id)?;
    let post = state
        .db
        .get_post(&username, post_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("post {}/{}", username, post_id)))?;

    // Only the author may edit; everyone else lands back on the detail view.
    if user.id != post.author_id {
        return Ok(Redirect::to(&post_detail_path(&username, post_id)).into_response());
    }

    let form = PostForm {
        text: post.text.clone(),
        group: post.group_id,
        ..Default::default()
    };
    let groups = state.db.all_groups().await?;
    let action = format!("/{}/{}/edit/", username, post_id);
    Ok(Html(pages::post_form(&user, &action, &form, &FieldErrors::default(), &groups, true)).into_response())
}

pub async fn post_edit(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((username, post_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let post_id = parse_post_id(&post_id)?;
    let post = state
        .db
        .get_post(&username, post_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("post {}/{}", username, post_id)))?;

    if user.id != post.author_id {
        return Ok(Redirect::to(&post_detail_path(&username, post_id)).into_response());
    }

    let form = PostForm::from_multipart(&mut multipart).await?;
    let errors = validate_post_form(&state, &form).await?;
    if !errors.is_empty() {
        let groups = state.db.all_groups().await?;
        let action = format!("/{}/{}/edit/", username, post_id);
        return Ok(Html(pages::post_form(&user, &action, &form, &errors, &groups, true)).into_response());
    }

    let image = match &form.image {
        Some(upload) => Some(save_image(&state.config.media.root, upload).await?),
        None => None,
    };
    state
        .db
        .update_post(post_id, form.text.trim(), form.group, image.as_deref())
        .await?;
    info!("user {} edited post {}", user.username, post_id);

    Ok(Redirect::to(&post_detail_path(&username, post_id)).into_response())
}

// --- post detail and comments ---

pub async fn post_view(
    State(state): State<AppState>,
    MaybeViewer(viewer): MaybeViewer,
    Path((username, post_id)): Path<(String, String)>,
) -> AppResult<Html<String>> {
    let post_id = parse_post_id(&post_id)?;
    let post = state
        .db
        .get_post(&username, post_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("post {}/{}", username, post_id)))?;

    let author_post_count = state.db.author_post_count(post.author_id).await?;
    let followers = state.db.followers_count(post.author_id).await?;
    let following = state.db.following_count(post.author_id).await?;
    let comments = state.db.comments_for_post(post.id).await?;

    Ok(Html(pages::post_detail(
        viewer.as_ref(),
        &post,
        author_post_count,
        followers,
        following,
        &comments,
    )))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path((username, post_id)): Path<(String, String)>,
    Form(form): Form<CommentForm>,
) -> AppResult<Redirect> {
    let post_id = parse_post_id(&post_id)?;
    let post = state
        .db
        .get_post(&username, post_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("post {}/{}", username, post_id)))?;

    if form.validate().is_empty() {
        state
            .db
            .create_comment(post.id, user.id, form.text.trim())
            .await?;
        info!("user {} commented on post {}", user.username, post.id);
    }
    // Invalid input redirects without surfacing the error; the detail page
    // never shows comment validation messages.
    Ok(Redirect::to(&post_detail_path(&username, post_id)))
}

// --- follow / unfollow ---

pub async fn profile_follow(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(username): Path<String>,
) -> AppResult<Redirect> {
    let author = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;

    // Self-follow and duplicate edges are silent no-ops.
    if author.id != user.id && !state.db.follow_exists(user.id, author.id).await? {
        state.db.create_follow(user.id, author.id).await?;
        info!("user {} followed {}", user.username, author.username);
    }
    Ok(Redirect::to(&format!("/{}/", username)))
}

pub async fn profile_unfollow(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(username): Path<String>,
) -> AppResult<Redirect> {
    let author = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;

    if state.db.follow_exists(user.id, author.id).await? {
        state.db.delete_follow(user.id, author.id).await?;
        info!("user {} unfollowed {}", user.username, author.username);
    }
    Ok(Redirect::to(&format!("/{}/", username)))
}

// --- operational ---

pub async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "quill",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// --- error pages ---

pub async fn page_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(pages::not_found()))
}

// --- router ---

pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(&state.config.media.root);
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health_check))
        .route("/group/{slug}", get(group_posts))
        .route("/new/", get(new_post_form).post(new_post))
        .route("/follow/", get(follow_index))
        .route("/auth/login/", get(auth::login_form).post(auth::login))
        .route("/auth/logout/", get(auth::logout))
        .route("/auth/signup/", get(auth::signup_form).post(auth::signup))
        .nest("/admin", admin::router())
        .route("/{username}/", get(profile))
        .route("/{username}/follow/", get(profile_follow))
        .route("/{username}/unfollow/", get(profile_unfollow))
        .route("/{username}/{post_id}/", get(post_view))
        .route("/{username}/{post_id}/edit/", get(post_edit_form).post(post_edit))
        .route("/{username}/{post_id}/comment", post(add_comment))
        .nest_service("/media", media)
        .fallback(page_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
