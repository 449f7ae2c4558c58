use std::sync::Arc;

use bytes::Bytes;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::warn;

use crate::error::AppError;
use crate::phase::Phase;
use crate::session::{identify, session_token};
use crate::{websocket, AppState};

fn header_is<B>(request: &Request<B>, name: http::header::HeaderName, token: &str) -> bool {
    request
        .headers()
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|value| value.trim().eq_ignore_ascii_case(token))
}

fn accept_key<B>(request: &Request<B>) -> Result<HeaderValue, AppError> {
    let upgrade = request.method() == Method::GET
        && header_is(request, CONNECTION, "upgrade")
        && header_is(request, UPGRADE, "websocket")
        && header_is(request, SEC_WEBSOCKET_VERSION, "13");
    let key = request
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .filter(|_| upgrade)
        .ok_or(AppError::NotWebSocket)?;
    HeaderValue::from_str(&derive_accept_key(key.as_bytes())).map_err(|_| AppError::NotWebSocket)
}

/// Upgrades a student's request to the real-time selection connection.
pub async fn websocket<B>(
    state: &AppState,
    mut request: Request<B>,
) -> Result<Response<Full<Bytes>>, AppError> {
    let identity = identify(state.sessions.as_ref(), session_token(&request)).await?;
    if state.control.cohorts().is_staff(&identity.department) {
        return Err(AppError::StudentsOnly);
    }
    if state.control.phase() == Phase::Closed {
        return Err(AppError::SelectionsClosed);
    }
    let accept = accept_key(&request)?;

    let upgrade = hyper::upgrade::on(&mut request);
    let control = Arc::clone(&state.control);
    let send_queue = state.send_queue;
    tokio::spawn(async move {
        match upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                websocket::serve(control, identity, socket, send_queue).await;
            }
            Err(err) => warn!(user = %identity.user_id, %err, "websocket upgrade failed"),
        }
    });

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Full::default())?)
}
