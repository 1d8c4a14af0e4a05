pub mod config;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod peer;
mod receiver;
mod sender;

pub use engine::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEngine, MediaEvent, MediaSession, SdpType,
    SessionDescription,
};
pub use peer::{AudioTrack, Peer, WebrtcEngine};
pub use receiver::Receiver;
pub use sender::Sender;

use bytes::Bytes;

/// One encoded (Opus) audio frame as written to or read from the peer connection.
pub type EncodedAudioFrame = Bytes;
