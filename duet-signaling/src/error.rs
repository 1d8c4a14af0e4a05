use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("parent document missing: {0}")]
    ParentMissing(String),
    #[error("channel closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<anyhow::Error> for ChannelError {
    fn from(err: anyhow::Error) -> Self {
        ChannelError::Transport(format!("{err:#}"))
    }
}
