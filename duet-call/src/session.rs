use crate::relay::CandidateRelay;
use duet_protocol::Role;
use duet_signaling::SignalingChannel;
use duet_webrtc::MediaSession;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateCounters {
    /// Local candidates written to the signaling channel.
    pub sent: u64,
    /// Remote candidates accepted by the media session.
    pub applied: u64,
}

/// The one live call of a state machine: who is calling whom, the media session and the
/// one-shot guards of the description exchange.
pub struct CallSession<C: SignalingChannel, S: MediaSession> {
    pub(crate) role: Role,
    pub(crate) call_id: String,
    pub(crate) local_id: String,
    pub(crate) peer_id: String,
    pub(crate) media: Arc<S>,
    pub(crate) track: S::Track,
    pub(crate) relay: CandidateRelay<C>,
    /// Stops every forwarder and the candidate writer of this session.
    pub(crate) cancel: CancellationToken,
    pub(crate) offer_published: bool,
    pub(crate) answer_published: bool,
    pub(crate) answer_applied: bool,
    pub(crate) audio_active: bool,
}

impl<C: SignalingChannel, S: MediaSession> CallSession<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        role: Role,
        call_id: String,
        local_id: String,
        peer_id: String,
        media: Arc<S>,
        track: S::Track,
        relay: CandidateRelay<C>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            role,
            call_id,
            local_id,
            peer_id,
            media,
            track,
            relay,
            cancel,
            offer_published: false,
            answer_published: false,
            answer_applied: false,
            audio_active: false,
        }
    }
}
