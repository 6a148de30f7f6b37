use {bytes::Bytes, tokio_tungstenite::tungstenite::Message};

/// A client-facing WebSocket frame, independent of the server framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close,
}

impl Frame {
    /// Map an upstream message. Control frames are handled by the
    /// WebSocket layer and yield `None`.
    pub fn from_upstream(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(t) => Some(Self::Text(t.as_str().to_string())),
            Message::Binary(b) => Some(Self::Binary(b)),
            Message::Close(_) => Some(Self::Close),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }

    pub fn into_upstream(self) -> Message {
        match self {
            Self::Text(t) => Message::text(t),
            Self::Binary(b) => Message::binary(b),
            Self::Close => Message::Close(None),
        }
    }
}
