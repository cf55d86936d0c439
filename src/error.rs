use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid callback path: {0}")]
    InvalidCallbackPath(String),

    #[error("relay result channel closed before a redirect arrived")]
    ChannelClosed,

    #[error("no redirect received within {timeout:?}")]
    Timeout { timeout: std::time::Duration },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
