// Session layer: cookie-backed sessions, login/signup handlers, and the
// Viewer extractors the view handlers authorize with.

use anyhow::{anyhow, Context};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRef, FromRequestParts, OriginalUri, Query, State},
    http::{header, request::Parts, HeaderMap},
    response::{AppendHeaders, Html, IntoResponse, Redirect},
    Form,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    models::User,
    pages,
};

pub const SESSION_COOKIE: &str = "sessionid";

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]{1,150}$").unwrap());

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, token)
}

fn expired_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE)
}

async fn lookup_viewer<S>(parts: &mut Parts, state: &S) -> AppResult<Option<User>>
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    let state = AppState::from_ref(state);
    let Some(token) = session_token(&parts.headers) else {
        return Ok(None);
    };
    let user = state.db.get_session_user(&token).await?;
    Ok(user)
}

/// The authenticated caller. Routes that extract `Viewer` redirect
/// unauthenticated requests to the login page with a `next` parameter
/// pointing back at the original path.
#[derive(Debug, Clone)]
pub struct Viewer(pub User);

impl<S> FromRequestParts<S> for Viewer
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Nested routers strip their prefix from parts.uri; the login
        // redirect needs the path as the client sent it.
        let next = parts
            .extensions
            .get::<OriginalUri>()
            .map(|uri| uri.path().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        match lookup_viewer(parts, state).await? {
            Some(user) => Ok(Viewer(user)),
            None => Err(AppError::LoginRequired { next }),
        }
    }
}

/// The caller if logged in; anonymous requests extract `MaybeViewer(None)`.
#[derive(Debug, Clone)]
pub struct MaybeViewer(pub Option<User>);

impl<S> FromRequestParts<S> for MaybeViewer
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeViewer(lookup_viewer(parts, state).await?))
    }
}

// --- handlers ---

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_form(Query(query): Query<NextQuery>) -> Html<String> {
    Html(pages::login(query.next.as_deref(), None))
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<axum::response::Response> {
    let user = state.db.get_user_by_username(&form.username).await?;
    let user = match user {
        Some(user) if verify_password(&form.password, &user.password_hash) => user,
        _ => {
            return Ok(Html(pages::login(
                form.next.as_deref(),
                Some("Please enter a correct username and password."),
            ))
            .into_response());
        }
    };

    let token = Uuid::new_v4().to_string();
    state.db.create_session(&token, user.id).await?;
    info!("user {} logged in", user.username);

    let next = form.next.as_deref().filter(|n| n.starts_with('/')).unwrap_or("/");
    Ok((
        AppendHeaders([(header::SET_COOKIE, session_cookie(&token))]),
        Redirect::to(next),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    if let Some(token) = session_token(&headers) {
        state.db.delete_session(&token).await?;
    }
    Ok((
        AppendHeaders([(header::SET_COOKIE, expired_cookie())]),
        Redirect::to("/"),
    ))
}

pub async fn signup_form() -> Html<String> {
    Html(pages::signup(None))
}

pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<SignupForm>,
) -> AppResult<axum::response::Response> {
    if !USERNAME_RE.is_match(&form.username) {
        return Ok(Html(pages::signup(Some(
            "Enter a valid username: letters, digits and @/./+/-/_ only.",
        )))
        .into_response());
    }
    if form.password.len() < 8 {
        return Ok(Html(pages::signup(Some(
            "This password is too short. It must contain at least 8 characters.",
        )))
        .into_response());
    }
    if state.db.get_user_by_username(&form.username).await?.is_some() {
        return Ok(Html(pages::signup(Some("A user with that username already exists."))).into_response());
    }

    let password_hash = hash_password(&form.password).context("hashing signup password")?;
    let user = state
        .db
        .create_user(&form.username, &form.email, &password_hash)
        .await?;
    info!("user {} signed up", user.username);

    let token = Uuid::new_v4().to_string();
    state.db.create_session(&token, user.id).await?;
    Ok((
        AppendHeaders([(header::SET_COOKIE, session_cookie(&token))]),
        Redirect::to("/"),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; sessionid=abc-123; theme=dark".parse().unwrap(),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, "other=1".parse().unwrap());
        assert_eq!(session_token(&empty), None);
    }

    #[test]
    fn username_shape() {
        assert!(USERNAME_RE.is_match("sarah.connor+1@sky_net"));
        assert!(!USERNAME_RE.is_match("no spaces"));
        assert!(!USERNAME_RE.is_match(""));
    }
}
