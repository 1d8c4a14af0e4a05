use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("session description rejected: {0}")]
    DescriptionRejected(String),
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("media session closed")]
    Closed,
    #[error(transparent)]
    Other(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for MediaError {
    fn from(err: anyhow::Error) -> Self {
        MediaError::Other(Box::new(err))
    }
}
