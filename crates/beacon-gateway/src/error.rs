use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("payload encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gateway discovery failed: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("gateway closed the session with fatal code {code}: {reason}")]
    Fatal { code: u16, reason: String },
    #[error("event receiver dropped")]
    ReceiverDropped,
}
