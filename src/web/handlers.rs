//! Browser-facing handlers: render the page, accept form posts, redirect
//! back to the page.

use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::{
    errors::{public_message, status_for},
    page::{render_page, PageView},
    AppState,
};
use crate::app::{find_starter, starters, ChatError};

pub const SESSION_COOKIE: &str = "chatbot_session";

#[derive(Debug, Deserialize)]
pub struct SendForm {
    pub message: String,
    #[serde(default)]
    pub max_length: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StarterForm {
    pub topic: String,
}

/// Session id carried by the request's cookies, if any
pub fn session_from_cookies(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

fn session_cookie(id: Uuid) -> HeaderValue {
    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn with_cookie(mut response: Response, id: Uuid) -> Response {
    response
        .headers_mut()
        .insert(header::SET_COOKIE, session_cookie(id));
    response
}

async fn render(state: &AppState, id: Uuid, status: StatusCode, error: Option<String>) -> Response {
    let app = &state.app;
    let turns = app.history(id).await.unwrap_or_default();
    let stats = match app.stats(id).await {
        Ok(stats) => stats,
        Err(_) => crate::session::Conversation::new().stats(),
    };
    let model_status = app.model_status().await;

    let html = render_page(&PageView {
        turns: &turns,
        stats: &stats,
        starters: starters(),
        status: &model_status,
        max_length: app.config().generation.max_length,
        error: error.as_deref(),
    });

    with_cookie((status, Html(html)).into_response(), id)
}

async fn render_error(state: &AppState, id: Uuid, error: ChatError) -> Response {
    debug!("Rendering page with error: {}", error);
    render(state, id, status_for(&error), Some(public_message(&error))).await
}

fn back_to_page(id: Uuid) -> Response {
    with_cookie(Redirect::to("/").into_response(), id)
}

pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let id = state.app.resolve_session(session_from_cookies(&headers)).await;
    render(&state, id, StatusCode::OK, None).await
}

pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SendForm>,
) -> Response {
    let id = state.app.resolve_session(session_from_cookies(&headers)).await;
    let max_length = form
        .max_length
        .as_deref()
        .and_then(|v| v.trim().parse::<usize>().ok());

    match state.app.send_message(id, &form.message, max_length).await {
        Ok(_) => back_to_page(id),
        Err(e) => render_error(&state, id, e).await,
    }
}

pub async fn starter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<StarterForm>,
) -> Response {
    let id = state.app.resolve_session(session_from_cookies(&headers)).await;
    let Some(starter) = find_starter(&form.topic) else {
        return render(
            &state,
            id,
            StatusCode::BAD_REQUEST,
            Some(format!("Unknown conversation starter: {}", form.topic)),
        )
        .await;
    };

    match state.app.send_message(id, starter.prompt, None).await {
        Ok(_) => back_to_page(id),
        Err(e) => render_error(&state, id, e).await,
    }
}

pub async fn clear(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let id = state.app.resolve_session(session_from_cookies(&headers)).await;
    match state.app.clear(id).await {
        Ok(()) => back_to_page(id),
        Err(e) => render_error(&state, id, e).await,
    }
}
