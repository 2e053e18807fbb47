//! Store sidecar - ローカルストアを HTTP で公開する（マシンアフィニティのリモート側）
//!
//! - `GET /<path>`: Blob をストリームで返す。なければ 404
//! - `DELETE /<path>`: 204。なければ 404、それ以外のストアエラーは 500
//!
//! 認証はこの層では行いません。

use axum::{
    Extension, Router,
    body::Body,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::WeftError;
use crate::ports::ContentStore;

pub fn store_router(store: Arc<dyn ContentStore>) -> Router {
    Router::new()
        .route("/*path", get(handle_read).delete(handle_delete))
        .layer(Extension(store))
}

async fn handle_read(
    Extension(store): Extension<Arc<dyn ContentStore>>,
    Path(path): Path<String>,
) -> Response {
    match store.read(&path).await {
        Ok(reader) => Body::from_stream(ReaderStream::new(reader)).into_response(),
        Err(WeftError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(path, error = %e, "sidecar read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_delete(
    Extension(store): Extension<Arc<dyn ContentStore>>,
    Path(path): Path<String>,
) -> Response {
    match store.del(&path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(WeftError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(path, error = %e, "sidecar delete failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// `addr` で sidecar を起動し、`shutdown` まで動かす
pub async fn serve_store(
    addr: SocketAddr,
    store: Arc<dyn ContentStore>,
    shutdown: CancellationToken,
) -> Result<(), WeftError> {
    let listener = TcpListener::bind(addr).await?;
    serve_store_on(listener, store, shutdown).await
}

/// bind 済みの listener で sidecar を動かす（テストでは `127.0.0.1:0`）
pub async fn serve_store_on(
    listener: TcpListener,
    store: Arc<dyn ContentStore>,
    shutdown: CancellationToken,
) -> Result<(), WeftError> {
    tracing::info!(addr = ?listener.local_addr().ok(), "store sidecar listening");
    axum::serve(listener, store_router(store))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
