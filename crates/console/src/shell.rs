//! Interactive shell sessions: an attached TTY exec pumped to a client.

use std::fmt::Display;

use {
    bytes::Bytes,
    futures::{Sink, SinkExt, Stream, StreamExt},
    kennel_runtime::{ExecSession, RuntimeDriver},
    tokio::io::AsyncWriteExt,
    tracing::{debug, info},
};

use crate::{error::Result, frame::Frame};

/// Prefer a login bash, fall back to plain sh on minimal images.
pub const DEFAULT_SHELL: &[&str] = &["/bin/sh", "-c", "exec bash -l 2>/dev/null || exec sh -l"];

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The shell exited or the container stream closed.
    ContainerClosed,
    /// The client hung up or sent a close frame.
    ClientClosed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    /// Bytes written into the container.
    pub bytes_in: u64,
    /// Bytes delivered to the client.
    pub bytes_out: u64,
}

/// Attach a TTY shell inside `container_id`.
pub async fn attach(
    runtime: &dyn RuntimeDriver,
    container_id: &str,
    user: Option<&str>,
) -> Result<ExecSession> {
    let argv: Vec<String> = DEFAULT_SHELL.iter().map(|s| s.to_string()).collect();
    Ok(runtime.open_shell(container_id, &argv, user).await?)
}

/// Pump bytes both ways until either side ends.
///
/// Two independent loops run concurrently: container output to the client,
/// client frames to the container. Whichever finishes first (EOF, close or
/// error) ends the session and the other is dropped.
pub async fn pump<R, W, E>(session: ExecSession, mut client_rx: R, mut client_tx: W) -> SessionSummary
where
    R: Stream<Item = std::result::Result<Frame, E>> + Unpin,
    E: Display,
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let ExecSession {
        mut output,
        mut input,
    } = session;
    let mut bytes_in = 0u64;
    let mut bytes_out = 0u64;

    let end = {
        let to_client = async {
            while let Some(chunk) = output.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => return SessionEnd::Failed(format!("container read: {e}")),
                };
                bytes_out += chunk.len() as u64;
                if let Err(e) = client_tx.send(Frame::Binary(chunk)).await {
                    return SessionEnd::Failed(format!("client write: {e}"));
                }
            }
            let _ = client_tx.send(Frame::Close).await;
            SessionEnd::ContainerClosed
        };

        let to_container = async {
            while let Some(frame) = client_rx.next().await {
                let data = match frame {
                    Ok(Frame::Binary(b)) => b,
                    Ok(Frame::Text(t)) => Bytes::from(t),
                    Ok(Frame::Close) => break,
                    Err(e) => return SessionEnd::Failed(format!("client read: {e}")),
                };
                bytes_in += data.len() as u64;
                if let Err(e) = input.write_all(&data).await {
                    return SessionEnd::Failed(format!("container write: {e}"));
                }
                if let Err(e) = input.flush().await {
                    return SessionEnd::Failed(format!("container write: {e}"));
                }
            }
            let _ = input.shutdown().await;
            SessionEnd::ClientClosed
        };

        tokio::select! {
            end = to_client => end,
            end = to_container => end,
        }
    };

    match end {
        SessionEnd::Failed(ref reason) => debug!(%reason, "console session failed"),
        _ => info!(?end, bytes_in, bytes_out, "console session closed"),
    }
    SessionSummary {
        end,
        bytes_in,
        bytes_out,
    }
}
