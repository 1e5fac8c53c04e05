//! Crate-wide error type.
//!
//! One variant per failure category in the call-flow engine's error
//! taxonomy: configuration, gateway transport, management API, flow
//! semantics, and handler protocol violations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("gateway transport error: {0}")]
    GatewayTransport(String),

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("management API error: {0}")]
    ManagementApi(String),

    #[error("flow semantic error: {0}")]
    FlowSemantic(String),

    #[error("handler protocol error: {0}")]
    HandlerProtocol(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn gateway_transport<S: Into<String>>(msg: S) -> Self {
        Self::GatewayTransport(msg.into())
    }

    pub fn management_api<S: Into<String>>(msg: S) -> Self {
        Self::ManagementApi(msg.into())
    }

    pub fn flow_semantic<S: Into<String>>(msg: S) -> Self {
        Self::FlowSemantic(msg.into())
    }

    pub fn handler_protocol<S: Into<String>>(msg: S) -> Self {
        Self::HandlerProtocol(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
}
