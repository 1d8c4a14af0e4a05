use crate::error::MediaError;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mline_index: u16,
    /// Media stream identification tag, empty if the engine did not report one.
    pub sdp_mid: String,
}

impl IceCandidate {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mline_index: u16,
        sdp_mid: impl Into<String>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mline_index,
            sdp_mid: sdp_mid.into(),
        }
    }
}

/// Aggregate connectivity of a media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Whether the session can no longer carry media. There is no recovery from these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

impl Display for ConnectivityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    Error(String),
}

/// Opens media sessions and controls the process-wide audio session.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Session: MediaSession;

    /// Opens a new session. Every local candidate and connectivity change of the session is
    /// delivered on the returned receiver, in the order the engine raised them.
    async fn open_session(
        &self,
    ) -> Result<(Self::Session, mpsc::UnboundedReceiver<MediaEvent>), MediaError>;

    /// Activates or deactivates the platform audio session (routing, device configuration).
    fn set_audio_session_active(&self, active: bool) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaSession: Send + Sync + 'static {
    type Track: LocalTrack;

    async fn create_local_track(&self) -> Result<Self::Track, MediaError>;
    async fn add_track(&self, track: &Self::Track) -> Result<(), MediaError>;
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn close(&self) -> Result<(), MediaError>;
}

pub trait LocalTrack: Clone + Send + Sync + 'static {
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
}
