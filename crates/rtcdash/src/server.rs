use std::{path::Path as FsPath, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::{error::RecorderResult, session::Recorder};

/// File server for the recording directory.
///
/// Players on other origins fetch the manifest and segments directly, so every
/// response carries `Access-Control-Allow-Origin: *`.
pub fn router(recorder: Arc<Recorder>) -> Router {
    Router::new()
        .route("/*file", get(serve_file))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(recorder)
}

pub async fn serve_http(
    listener: TcpListener,
    recorder: Arc<Recorder>,
    shutdown: CancellationToken,
) -> RecorderResult<()> {
    log::info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(recorder))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn serve_file(State(recorder): State<Arc<Recorder>>, Path(file): Path<String>) -> Response {
    let Some(path) = recorder.dir().resolve(&file) else {
        log::debug!("Rejected request path {file:?}");
        return StatusCode::NOT_FOUND.into_response();
    };

    // The manifest is rebuilt on every request, so a player polling it always
    // sees the current timeline.
    if path == recorder.dir().manifest_path() {
        if let Some(manifest) = recorder.manifest().await {
            match manifest.persist().await {
                Ok(Some(document)) => return with_content_type(&path, document.into_bytes()),
                // superseded meanwhile, the file belongs to the new session
                Ok(None) => {}
                Err(e) => log::warn!("Failed to persist manifest: {e}"),
            }
        }
    }

    match tokio::fs::read(&path).await {
        Ok(data) => with_content_type(&path, data),
        Err(e) => {
            log::debug!("Failed to read {}: {e}", path.display());
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn with_content_type(path: &FsPath, data: Vec<u8>) -> Response {
    let mut response = data.into_response();
    let headers = response.headers_mut();
    match content_type(path) {
        Some(content_type) => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        None => {
            headers.remove(header::CONTENT_TYPE);
        }
    }
    response
}

/// MIME type announced for a served file, by extension.
pub fn content_type(path: &FsPath) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "mpd" => Some("application/dash+xml"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type(FsPath::new("dash/dash.mpd")),
            Some("application/dash+xml")
        );
        assert_eq!(
            content_type(FsPath::new("dash/media2000.webm")),
            Some("video/webm")
        );
        assert_eq!(content_type(FsPath::new("dash/cluster.webm")), Some("video/webm"));
        assert_eq!(content_type(FsPath::new("dash/notes.txt")), None);
        assert_eq!(content_type(FsPath::new("dash/README")), None);
    }
}
