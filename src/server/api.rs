use crate::agent::{ ChatAgent, ReplyStyle };
use crate::cli::Args;
use crate::error::{ ChatError, DocumentError };
use crate::models::api::{ ChatResponse, DocumentPage, ErrorResponse, HealthResponse, MessageResponse };
use crate::postprocess::split_sentences;
use super::form::FormData;
use super::guard::guard;

use axum::{
    extract::{ DefaultBodyLimit, Query, State },
    http::{ header::ACCEPT, HeaderMap, StatusCode },
    middleware,
    response::{ sse::{ Event, Sse }, Html, IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::stream;
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use log::{ info, warn, error };
use serde::Deserialize;
use std::any::Any;
use std::convert::Infallible;
use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{ Any as AnyOrigin, CorsLayer };

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ChatAgent>,
    pub limiter: Arc<DefaultDirectRateLimiter>,
    pub api_key: Option<String>,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(agent: Arc<ChatAgent>, args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let per_second = NonZeroU32::new(args.rate_limit_per_second).ok_or(
            "rate_limit_per_second must be greater than zero"
        )?;
        let api_key = args.server_api_key.clone().filter(|k| !k.trim().is_empty());

        if api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Endpoints are open.");
        }

        Ok(Self {
            agent,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            api_key,
            body_limit: args.max_upload_bytes,
        })
    }
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(AnyOrigin).allow_methods(AnyOrigin).allow_headers(AnyOrigin);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/stream", post(stream_handler))
        .route("/clear", post(clear_handler))
        .route("/clear_text", post(clear_text_handler))
        .route("/clear_audio_video", post(clear_audio_video_handler))
        .route("/clear_image", post(clear_image_handler))
        .route("/clear_media", post(clear_media_handler))
        .route("/clear_document", post(clear_document_handler))
        .route("/upload_document", post(upload_document_handler))
        .route("/get_document_page", get(document_page_handler))
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .layer(DefaultBodyLimit::max(state.body_limit))
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

/// Chat turn. JSON by default; server-sent events when the form carries
/// `stream=true` or the client accepts `text/event-stream`.
async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: FormData
) -> Response {
    let wants_events =
        form.flag("stream") ||
        headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
    let request = form.into_chat_request();

    if wants_events {
        match state.agent.handle(request, ReplyStyle::Plain).await {
            Ok(reply) => sentence_events(reply),
            Err(e) => e.into_response(),
        }
    } else {
        match state.agent.handle(request, ReplyStyle::Markdown).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// One `data:` event per sentence, then `search_results` and `done`.
fn sentence_events(reply: ChatResponse) -> Response {
    let mut events: Vec<Result<Event, Infallible>> = split_sentences(&reply.response)
        .into_iter()
        .map(|sentence| Ok(Event::default().data(sentence)))
        .collect();
    let results = serde_json::to_string(&reply.search_results).unwrap_or_else(|_| "[]".to_string());
    events.push(Ok(Event::default().event("search_results").data(results)));
    events.push(Ok(Event::default().event("done").data("[DONE]")));
    Sse::new(stream::iter(events)).into_response()
}

async fn clear_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_conversation().await))
}

async fn clear_text_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_text()))
}

async fn clear_audio_video_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_audio_video().await))
}

async fn clear_image_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_image().await))
}

async fn clear_media_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_media().await))
}

async fn clear_document_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse::new(state.agent.clear_document().await))
}

async fn upload_document_handler(
    State(state): State<AppState>,
    mut form: FormData
) -> Result<Json<DocumentPage>, ChatError> {
    let upload = form.take_file("document");
    Ok(Json(state.agent.upload_document(upload).await?))
}

async fn document_page_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>
) -> Result<Json<DocumentPage>, ChatError> {
    let page = match query.page.as_deref().map(str::trim) {
        None | Some("") => 1,
        Some(raw) => raw.parse::<usize>().map_err(|_| DocumentError::InvalidPage)?,
    };
    Ok(Json(state.agent.document_page(page).await?))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", details);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: "Internal Server Error".to_string(), details: Some(details) }),
    ).into_response()
}
