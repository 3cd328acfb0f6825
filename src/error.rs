#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("cannot bind sflow listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("sflow port range exhausted")]
    PortExhausted,
    #[error("path resolution error: {0}")]
    PathResolution(String),
    #[error("switch control error: {0}")]
    Switch(String),
    #[error("rule store error: {0}")]
    Kv(#[from] KvError),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("spawn error: {0}")]
    Spawn(String),
}

/// Errors surfaced by the replicated key-value collaborator.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("store connection closed")]
    Closed,
    #[error("backend error: {0}")]
    Backend(String),
}
