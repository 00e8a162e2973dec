// Read-only admin listings, generated from per-model registrations of
// list/search/filter columns.

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::{app_state::AppState, auth::Viewer, error::AppResult, pages};

const ADMIN_PAGE_LIMIT: i64 = 100;

pub struct ModelAdmin {
    pub title: &'static str,
    pub list_display: &'static [&'static str],
    pub search_fields: &'static [&'static str],
    pub list_filter: &'static [&'static str],
    pub empty_value: &'static str,
}

pub const POST_ADMIN: ModelAdmin = ModelAdmin {
    title: "Posts",
    list_display: &["pk", "text", "pub_date", "author", "group"],
    search_fields: &["text"],
    list_filter: &["pub_date", "author"],
    empty_value: "-empty-",
};

pub const GROUP_ADMIN: ModelAdmin = ModelAdmin {
    title: "Groups",
    list_display: &["title", "slug", "description"],
    search_fields: &[],
    list_filter: &[],
    empty_value: "-empty-",
};

pub const COMMENT_ADMIN: ModelAdmin = ModelAdmin {
    title: "Comments",
    list_display: &["author", "post", "created", "active"],
    search_fields: &["author", "text"],
    list_filter: &["active", "created"],
    empty_value: "-empty-",
};

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub q: Option<String>,
}

fn format_ts(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => String::new(),
    }
}

async fn admin_posts(
    State(state): State<AppState>,
    Viewer(_user): Viewer,
    Query(query): Query<AdminQuery>,
) -> AppResult<Html<String>> {
    let needle = query.q.as_deref().filter(|q| !q.is_empty());
    let posts = state.db.search_posts(needle, ADMIN_PAGE_LIMIT).await?;
    let rows: Vec<Vec<String>> = posts
        .iter()
        .map(|p| {
            POST_ADMIN
                .list_display
                .iter()
                .map(|column| match *column {
                    "pk" => p.id.to_string(),
                    "text" => p.text.clone(),
                    "pub_date" => format_ts(p.pub_date),
                    "author" => p.author_username.clone(),
                    "group" => p
                        .group_title
                        .clone()
                        .unwrap_or_else(|| POST_ADMIN.empty_value.to_string()),
                    _ => POST_ADMIN.empty_value.to_string(),
                })
                .collect()
        })
        .collect();
    Ok(Html(pages::admin_table(
        POST_ADMIN.title,
        POST_ADMIN.list_display,
        &rows,
        needle,
    )))
}

async fn admin_groups(
    State(state): State<AppState>,
    Viewer(_user): Viewer,
) -> AppResult<Html<String>> {
    let groups = state.db.all_groups().await?;
    let rows: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            GROUP_ADMIN
                .list_display
                .iter()
                .map(|column| match *column {
                    "title" => g.title.clone(),
                    "slug" => g.slug.clone(),
                    "description" => g.description.clone(),
                    _ => GROUP_ADMIN.empty_value.to_string(),
                })
                .collect()
        })
        .collect();
    Ok(Html(pages::admin_table(
        GROUP_ADMIN.title,
        GROUP_ADMIN.list_display,
        &rows,
        None,
    )))
}

async fn admin_comments(
    State(state): State<AppState>,
    Viewer(_user): Viewer,
    Query(query): Query<AdminQuery>,
) -> AppResult<Html<String>> {
    let needle = query.q.as_deref().filter(|q| !q.is_empty());
    let comments = state.db.search_comments(needle, ADMIN_PAGE_LIMIT).await?;
    let rows: Vec<Vec<String>> = comments
        .iter()
        .map(|c| {
            COMMENT_ADMIN
                .list_display
                .iter()
                .map(|column| match *column {
                    "author" => c.author_username.clone(),
                    "post" => c.post_id.to_string(),
                    "created" => format_ts(c.created),
                    "active" => c.active.to_string(),
                    _ => COMMENT_ADMIN.empty_value.to_string(),
                })
                .collect()
        })
        .collect();
    Ok(Html(pages::admin_table(
        COMMENT_ADMIN.title,
        COMMENT_ADMIN.list_display,
        &rows,
        needle,
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(admin_posts))
        .route("/groups", get(admin_groups))
        .route("/comments", get(admin_comments))
}
