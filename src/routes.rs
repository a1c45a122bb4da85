use std::{path::Path as FsPath, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::PathRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream, TryStreamExt};
use serde_json::{json, Value};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::error;

use crate::{services::Command, AppState};

const NOT_A_NUMBER: &str = "Input not a number!";
const NOT_A_ROUTE: &str = "Not a valid route!";
const FILE_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) struct GatewayError {
    status: StatusCode,
    message: String,
}

impl GatewayError {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: NOT_A_ROUTE.to_string(),
        }
    }

    fn server(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/file", get(file_handler))
        .route("/text", get(text_handler))
        .route("/html", get(html_handler))
        .route("/source", get(source_handler))
        .route("/links", get(links_handler))
        .route("/mouseover-links", get(mouseover_links_handler))
        .route("/passage", get(passage_handler))
        .route("/error", get(error_handler))
        .route("/undo", get(undo_handler))
        .route("/redo", get(redo_handler))
        .route("/reset", get(reset_handler))
        .route("/click/{id}", get(click_handler))
        .route("/mouseover/{id}", get(mouseover_handler))
        .fallback(not_found_handler)
        .method_not_allowed_fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> GatewayError {
    GatewayError::not_found()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.store.read(|story| story.status.clone()).await;
    Json(json!(status))
}

async fn text_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let text = state.store.read(|story| story.text.clone()).await;
    Json(json!({ "text": text }))
}

async fn html_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let html = state.store.read(|story| story.html.clone()).await;
    Json(json!({ "html": html }))
}

async fn source_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let source = state.store.read(|story| story.source_html.clone()).await;
    Json(json!({ "source": source }))
}

async fn links_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let links = state.store.read(|story| story.links.clone()).await;
    Json(json!({ "links": links }))
}

async fn mouseover_links_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let links = state.store.read(|story| story.mouseover_links.clone()).await;
    Json(json!({ "mouseover-links": links }))
}

async fn passage_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let passage = state.store.read(|story| story.passage.clone()).await;
    Json(json!({ "passage": passage }))
}

async fn error_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let error = state.store.read(|story| story.error.clone()).await;
    Json(json!({ "error": error }))
}

// Undo/redo report the availability seen before the command goes out; the
// presenter may still change it afterwards.
async fn undo_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let undo = state.store.read(|story| story.undo_available).await;
    state.bridge.send(Command::Undo).await;
    Json(json!({ "undo": undo }))
}

async fn redo_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let redo = state.store.read(|story| story.redo_available).await;
    state.bridge.send(Command::Redo).await;
    Json(json!({ "redo": redo }))
}

async fn reset_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.store.reset().await;
    state.bridge.send(Command::Reset).await;
    Json(json!({ "reset": true }))
}

async fn click_handler(
    State(state): State<Arc<AppState>>,
    id: Result<Path<String>, PathRejection>,
) -> Json<Value> {
    let Some(id) = id.ok().and_then(|Path(raw)| parse_radix10(&raw)) else {
        return Json(json!({ "error": NOT_A_NUMBER }));
    };
    state.bridge.send(Command::Click(id)).await;
    Json(json!({ "click": id }))
}

async fn mouseover_handler(
    State(state): State<Arc<AppState>>,
    id: Result<Path<String>, PathRejection>,
) -> Json<Value> {
    let Some(id) = id.ok().and_then(|Path(raw)| parse_radix10(&raw)) else {
        return Json(json!({ "error": NOT_A_NUMBER }));
    };
    state.bridge.send(Command::Mouseover(id)).await;
    Json(json!({ "mouseover": id }))
}

async fn file_handler(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    let Some(path) = state.settings.file.clone() else {
        return Err(GatewayError::not_found());
    };

    let content_type = content_type_for(&path);
    let file = open_regular_file(&path).await.map_err(|message| {
        error!("{message}");
        GatewayError::server(&message)
    })?;

    let chunks = stream::try_unfold(file, |mut file| async move {
        let mut buffer = vec![0u8; FILE_CHUNK_SIZE];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buffer.truncate(read);
        Ok(Some((Bytes::from(buffer), file)))
    })
    .inspect_err(move |error| error!("streaming {} failed: {error}", path.display()));

    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(chunks),
    )
        .into_response())
}

async fn open_regular_file(path: &FsPath) -> Result<File, String> {
    let file = File::open(path)
        .await
        .map_err(|error| format!("failed to open {}: {error}", path.display()))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|error| format!("failed to stat {}: {error}", path.display()))?;
    if !metadata.is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }
    Ok(file)
}

fn content_type_for(path: &FsPath) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Lenient base-10 parse: leading whitespace and an optional sign are
/// skipped, then the longest digit prefix is taken ("0x10" -> 0, "12abc" -> 12).
/// Returns `None` when there are no leading digits or the value overflows.
pub(crate) fn parse_radix10(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let mut value: i64 = 0;
    for digit in rest.as_bytes()[..digits].iter() {
        let digit = i64::from(digit - b'0');
        value = value.checked_mul(10)?;
        value = if negative {
            value.checked_sub(digit)?
        } else {
            value.checked_add(digit)?
        };
    }
    Some(value)
}
