use duet_protocol::{RecordError, Role};
use duet_signaling::error::ChannelError;
use duet_webrtc::error::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("a call is already active")]
    CallActive,
    #[error("no call active")]
    NoCallActive,
    #[error("no incoming call to answer")]
    NoIncomingCall,
    #[error("operation not permitted for the {0:?} role")]
    WrongRole(Role),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("signaling error: {0}")]
    Channel(#[from] ChannelError),
    #[error("malformed record: {0}")]
    Decode(#[from] RecordError),
    #[error("call state machine stopped")]
    Stopped,
    #[error(transparent)]
    Other(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for CallError {
    fn from(err: anyhow::Error) -> Self {
        CallError::Other(Box::new(err))
    }
}
