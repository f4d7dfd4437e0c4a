//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! HTTP snapshot/stream surface (spec §4.6, §6): `GET /` returns the latest
//! JPEG, `GET /stream` serves MJPEG over `multipart/x-mixed-replace`. The
//! axum router here is built by the supervisor's tokio runtime; this crate
//! only owns the shared state the snapshot multiplexer writes into.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const BOUNDARY: &str = "sentrymesh-frame-boundary";

#[derive(Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

pub struct HttpSnapshotState {
    current: Mutex<Option<Arc<Vec<u8>>>>,
    stream_tx: broadcast::Sender<Arc<Vec<u8>>>,
    auth: Option<BasicAuthConfig>,
}

impl HttpSnapshotState {
    pub fn new(auth: Option<BasicAuthConfig>) -> Arc<Self> {
        let (stream_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            current: Mutex::new(None),
            stream_tx,
            auth,
        })
    }

    /// Called from the snapshot multiplexer's worker thread (spec §5
    /// "shared-resource policy": replaced under a mutex, readers take a
    /// local copy before releasing the lock).
    pub fn publish(&self, jpeg: Vec<u8>) {
        let jpeg = Arc::new(jpeg);
        *self.current.lock().unwrap() = Some(Arc::clone(&jpeg));
        let _ = self.stream_tx.send(jpeg);
    }

    pub fn has_snapshot(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    #[cfg(test)]
    pub fn clear_for_test(&self) {
        *self.current.lock().unwrap() = None;
    }
}

pub fn router(state: Arc<HttpSnapshotState>) -> Router {
    Router::new()
        .route("/", get(get_snapshot))
        .route("/stream", get(get_stream))
        .with_state(state)
}

fn check_auth(state: &HttpSnapshotState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(auth) = &state.auth else {
        return Ok(());
    };
    let unauthorized = || {
        let mut resp = StatusCode::UNAUTHORIZED.into_response();
        resp.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            "Basic realm=\"MatrixPipeline\"".parse().unwrap(),
        );
        resp
    };

    let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(unauthorized());
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Err(unauthorized());
    };
    let Ok(decoded) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded) else {
        return Err(unauthorized());
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Err(unauthorized());
    };
    let expected = format!("{}:{}", auth.username, auth.password);
    if decoded == expected {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

async fn get_snapshot(State(state): State<Arc<HttpSnapshotState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let current = state.current.lock().unwrap().clone();
    match current {
        Some(jpeg) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/jpeg")],
            (*jpeg).clone(),
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn get_stream(State(state): State<Arc<HttpSnapshotState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let rx = state.stream_tx.subscribe();
    let body_stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(jpeg) => {
                let mut chunk = Vec::with_capacity(jpeg.len() + 64);
                chunk.extend_from_slice(
                    format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", jpeg.len())
                        .as_bytes(),
                );
                chunk.extend_from_slice(&jpeg);
                chunk.extend_from_slice(b"\r\n");
                Some((Ok::<_, std::io::Error>(bytes::Bytes::from(chunk)), rx))
            }
            // A lagging receiver skips ahead rather than terminating the stream.
            Err(broadcast::error::RecvError::Lagged(_)) => Some((Ok(bytes::Bytes::new()), rx)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(body_stream))
        .unwrap()
}
