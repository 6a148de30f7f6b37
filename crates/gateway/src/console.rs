//! WebSocket endpoints that bridge a browser to a container: an attached
//! shell, and the container's own terminal server.

use std::collections::HashMap;

use {
    axum::{
        body::{Body, to_bytes},
        extract::{
            FromRequestParts, Path, Request, State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        http::{HeaderMap, HeaderValue, header},
        response::{IntoResponse, Response},
    },
    futures::{Sink, SinkExt, Stream, StreamExt, future},
    kennel_agent_config::paths::AGENT_USER,
    kennel_console::{Frame, ProxyRequest, attach, connect_upstream, pump, pump_upstream},
    tracing::{debug, warn},
};

use crate::{
    error::{ApiError, ApiResult},
    state::{AppState, OWNER_HEADER, Owner},
};

const MAX_PROXY_BODY: usize = 4 * 1024 * 1024;

// ── Frame adapters ───────────────────────────────────────────────────────────

fn to_frame(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(t) => Some(Frame::Text(t.as_str().to_string())),
        Message::Binary(b) => Some(Frame::Binary(b)),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(t) => Message::Text(t.into()),
        Frame::Binary(b) => Message::Binary(b),
        Frame::Close => Message::Close(None),
    }
}

/// Split an axum socket into the frame stream and sink the console pumps use.
fn frames(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Frame, axum::Error>> + Unpin,
    impl Sink<Frame, Error = axum::Error> + Unpin,
) {
    let (tx, rx) = socket.split();
    let rx = rx.filter_map(|m| future::ready(m.map(to_frame).transpose()));
    let tx = tx.with(|f: Frame| future::ready(Ok::<_, axum::Error>(from_frame(f))));
    (rx, tx)
}

// ── Shell ────────────────────────────────────────────────────────────────────

pub async fn shell(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let container_id = state.service.shell_target(&owner, &id).await?;
    let runtime = state.service.runtime().clone();

    Ok(ws
        .on_upgrade(move |socket| async move {
            let (rx, mut tx) = frames(socket);
            match attach(runtime.as_ref(), &container_id, Some(AGENT_USER)).await {
                Ok(session) => {
                    let summary = pump(session, rx, tx).await;
                    debug!(project_id = %id, ?summary, "shell finished");
                },
                Err(e) => {
                    warn!(project_id = %id, error = %e, "shell attach failed");
                    let _ = tx.send(Frame::Close).await;
                },
            }
        })
        .into_response())
}

// ── Terminal server ──────────────────────────────────────────────────────────

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Forward anything under `/terminal/` to the terminal server, upgrading to a
/// relayed WebSocket when the client asks for one.
pub async fn terminal(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> ApiResult<Response> {
    let id = params
        .get("id")
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("missing project id".into()))?;
    let bases = state.service.terminal_urls(&owner, &id).await?;

    let (mut parts, body) = req.into_parts();
    parts.headers.remove(OWNER_HEADER);
    let mut path_and_query = format!("/{}", params.get("path").map_or("", String::as_str));
    if let Some(q) = parts.uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(q);
    }

    if is_websocket_upgrade(&parts.headers) {
        let protocols = parts
            .headers
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => ws,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        let upstream = connect_upstream(&bases, &path_and_query, protocols.as_deref()).await?;
        let offered: Vec<String> = protocols
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        return Ok(ws
            .protocols(offered)
            .on_upgrade(move |socket| async move {
                let (rx, tx) = frames(socket);
                let end = pump_upstream(upstream, rx, tx).await;
                debug!(project_id = %id, ?end, "terminal relay finished");
            })
            .into_response());
    }

    let body = to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("request body: {e}")))?;
    let resp = state
        .terminal
        .forward(&bases, ProxyRequest {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
        .await?;

    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = resp.status;
    *response.headers_mut() = resp.headers;
    response
        .headers_mut()
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-store"));
    Ok(response)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, bytes::Bytes};

    #[test]
    fn control_messages_are_not_forwarded() {
        assert_eq!(to_frame(Message::Ping(Bytes::new())), None);
        assert_eq!(to_frame(Message::Text("x".into())), Some(Frame::Text("x".into())));
        assert!(matches!(from_frame(Frame::Close), Message::Close(None)));
    }

    #[test]
    fn detects_upgrade_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
    }
}
