//! Reverse proxy to the terminal server inside a container.
//!
//! Plain HTTP requests are forwarded with `reqwest`; WebSocket upgrades are
//! re-established upstream with `tokio-tungstenite` and pumped frame by frame.
//! Candidate base URLs come ranked from the caller; the first that accepts a
//! connection wins.

use std::{fmt::Display, time::Duration};

use {
    bytes::Bytes,
    futures::{Sink, SinkExt, Stream, StreamExt},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    tokio::net::TcpStream,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::client::IntoClientRequest,
    },
    tracing::{debug, info},
    url::Url,
};

use crate::{
    error::{ConsoleError, Result},
    frame::Frame,
    shell::SessionEnd,
};

pub type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: &[header::HeaderName] = &[
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path below the terminal root, with query, e.g. `/token?x=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct TerminalProxy {
    client: reqwest::Client,
}

impl TerminalProxy {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Forward one request, trying each base URL until one connects.
    pub async fn forward(&self, bases: &[String], req: ProxyRequest) -> Result<ProxyResponse> {
        let mut headers = req.headers;
        strip_hop_by_hop(&mut headers);

        let mut last = String::from("no candidate addresses");
        for base in bases {
            let url = format!("{}{}", base.trim_end_matches('/'), req.path_and_query);
            let sent = self
                .client
                .request(req.method.clone(), &url)
                .headers(headers.clone())
                .body(req.body.clone())
                .send()
                .await;
            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let mut headers = resp.headers().clone();
                    strip_hop_by_hop(&mut headers);
                    let body = resp.bytes().await?;
                    debug!(%url, %status, "terminal request forwarded");
                    return Ok(ProxyResponse {
                        status,
                        headers,
                        body,
                    });
                },
                Err(e) if e.is_connect() || e.is_timeout() => {
                    debug!(%url, error = %e, "terminal candidate unreachable");
                    last = e.to_string();
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(ConsoleError::Unreachable(last))
    }
}

/// `http://host:port` + path → `ws://host:port/path`.
pub fn websocket_url(base: &str, path_and_query: &str) -> Result<Url> {
    let joined = format!("{}{}", base.trim_end_matches('/'), path_and_query);
    let mut url = Url::parse(&joined).map_err(|e| ConsoleError::InvalidUrl(format!("{joined}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConsoleError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| ConsoleError::InvalidUrl(joined.clone()))?;
    Ok(url)
}

/// Open the upstream WebSocket, forwarding the client's subprotocol list.
pub async fn connect_upstream(
    bases: &[String],
    path_and_query: &str,
    protocols: Option<&str>,
) -> Result<Upstream> {
    let mut last = String::from("no candidate addresses");
    for base in bases {
        let url = websocket_url(base, path_and_query)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(p) = protocols
            && let Ok(value) = HeaderValue::from_str(p)
        {
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
        match connect_async(request).await {
            Ok((stream, _)) => {
                info!(%url, "terminal websocket connected");
                return Ok(stream);
            },
            Err(e) => {
                debug!(%url, error = %e, "terminal websocket candidate failed");
                last = e.to_string();
            },
        }
    }
    Err(ConsoleError::Unreachable(last))
}

/// Relay frames between the client and the upstream terminal server until
/// either side closes.
pub async fn pump_upstream<R, W, E>(upstream: Upstream, mut client_rx: R, mut client_tx: W) -> SessionEnd
where
    R: Stream<Item = std::result::Result<Frame, E>> + Unpin,
    E: Display,
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let (mut up_tx, mut up_rx) = upstream.split();

    let to_client = async {
        while let Some(msg) = up_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => return SessionEnd::Failed(format!("upstream read: {e}")),
            };
            let Some(frame) = Frame::from_upstream(msg) else {
                continue;
            };
            let closing = frame == Frame::Close;
            if let Err(e) = client_tx.send(frame).await {
                return SessionEnd::Failed(format!("client write: {e}"));
            }
            if closing {
                break;
            }
        }
        SessionEnd::ContainerClosed
    };

    let to_upstream = async {
        while let Some(frame) = client_rx.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return SessionEnd::Failed(format!("client read: {e}")),
            };
            let closing = frame == Frame::Close;
            if let Err(e) = up_tx.send(frame.into_upstream()).await {
                return SessionEnd::Failed(format!("upstream write: {e}"));
            }
            if closing {
                break;
            }
        }
        let _ = up_tx.close().await;
        SessionEnd::ClientClosed
    };

    tokio::select! {
        end = to_client => end,
        end = to_upstream => end,
    }
}
