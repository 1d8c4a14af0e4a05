use crate::EncodedAudioFrame;
use crate::config::{
    IceConfig, IntoRtc, WEBRTC_CHANNELS, WEBRTC_SAMPLE_RATE, WEBRTC_TRACK_ID,
    WEBRTC_TRACK_STREAM_ID,
};
use crate::engine::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEngine, MediaEvent, MediaSession, SdpType,
    SessionDescription,
};
use crate::error::MediaError;
use crate::receiver::Receiver;
use crate::sender::Sender;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::instrument;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine as RtcMediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// [`MediaEngine`] backed by `webrtc` peer connections carrying one Opus audio track.
///
/// Captured frames are read from an optional broadcast pipe and written to the track of every
/// session that added one, received frames are forwarded to an optional playback pipe.
pub struct WebrtcEngine {
    config: IceConfig,
    capture_tx: Option<broadcast::Sender<EncodedAudioFrame>>,
    playback_tx: Option<mpsc::Sender<EncodedAudioFrame>>,
    audio_session_active: AtomicBool,
}

impl WebrtcEngine {
    pub fn new(config: IceConfig) -> Self {
        Self {
            config,
            capture_tx: None,
            playback_tx: None,
            audio_session_active: AtomicBool::new(false),
        }
    }

    pub fn with_capture(mut self, capture_tx: broadcast::Sender<EncodedAudioFrame>) -> Self {
        self.capture_tx = Some(capture_tx);
        self
    }

    pub fn with_playback(mut self, playback_tx: mpsc::Sender<EncodedAudioFrame>) -> Self {
        self.playback_tx = Some(playback_tx);
        self
    }

    pub fn is_audio_session_active(&self) -> bool {
        self.audio_session_active.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaEngine for WebrtcEngine {
    type Session = Peer;

    async fn open_session(
        &self,
    ) -> Result<(Self::Session, mpsc::UnboundedReceiver<MediaEvent>), MediaError> {
        Peer::new(
            self.config.clone(),
            self.capture_tx.as_ref().map(broadcast::Sender::subscribe),
            self.playback_tx.clone(),
        )
        .await
    }

    fn set_audio_session_active(&self, active: bool) -> Result<(), MediaError> {
        let was_active = self.audio_session_active.swap(active, Ordering::Relaxed);
        if was_active != active {
            tracing::debug!(?active, "Audio session activation changed");
        }
        Ok(())
    }
}

/// Local Opus track. Clones share the enabled flag.
#[derive(Clone)]
pub struct AudioTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl AudioTrack {
    fn new() -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: WEBRTC_SAMPLE_RATE,
                channels: WEBRTC_CHANNELS,
                ..Default::default()
            },
            WEBRTC_TRACK_ID.to_owned(),
            WEBRTC_TRACK_STREAM_ID.to_owned(),
        ));

        Self {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn sample_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }
}

impl LocalTrack for AudioTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

pub struct Peer {
    peer_connection: RTCPeerConnection,
    capture_rx: Mutex<Option<broadcast::Receiver<EncodedAudioFrame>>>,
    sender: Mutex<Option<Sender>>,
    receiver: Mutex<Option<Receiver>>,
}

impl Peer {
    #[instrument(level = "debug", skip(capture_rx, playback_tx), err)]
    pub async fn new(
        config: IceConfig,
        capture_rx: Option<broadcast::Receiver<EncodedAudioFrame>>,
        playback_tx: Option<mpsc::Sender<EncodedAudioFrame>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MediaEvent>), MediaError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("Failed to register default codecs")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register default interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = api
            .new_peer_connection(config.into_rtc())
            .await
            .context("Failed to create peer connection")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        {
            let events_tx = events_tx.clone();
            peer_connection.on_peer_connection_state_change(Box::new(
                move |state: RTCPeerConnectionState| {
                    tracing::trace!(?state, "Peer connection state changed");
                    if let Some(state) = connectivity_from(state)
                        && events_tx.send(MediaEvent::Connectivity(state)).is_err()
                    {
                        tracing::trace!(?state, "Session events dropped, ignoring state change");
                    }
                    Box::pin(async {})
                },
            ));
        }

        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            tracing::trace!(?candidate, "ICE candidate gathered");
            if let Some(candidate) = candidate {
                let event = match candidate.to_json() {
                    Ok(init) => MediaEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
                        sdp_mid: init.sdp_mid.unwrap_or_default(),
                    }),
                    Err(err) => {
                        tracing::warn!(?err, "Failed to serialize ICE candidate");
                        MediaEvent::Error(format!("failed to serialize ICE candidate: {err}"))
                    }
                };
                if events_tx.send(event).is_err() {
                    tracing::trace!("Session events dropped, ignoring ICE candidate");
                }
            }
            Box::pin(async {})
        }));

        let receiver = playback_tx.map(|playback_tx| Receiver::new(&peer_connection, playback_tx));

        Ok((
            Self {
                peer_connection,
                capture_rx: Mutex::new(capture_rx),
                sender: Mutex::new(None),
                receiver: Mutex::new(receiver),
            },
            events_rx,
        ))
    }

    /// Frames handed to the playback pipe so far, zero without one.
    pub fn received_frames(&self) -> u64 {
        self.receiver.lock().as_ref().map_or(0, Receiver::frames)
    }
}

#[async_trait]
impl MediaSession for Peer {
    type Track = AudioTrack;

    async fn create_local_track(&self) -> Result<AudioTrack, MediaError> {
        Ok(AudioTrack::new())
    }

    #[instrument(level = "trace", skip_all, err)]
    async fn add_track(&self, track: &AudioTrack) -> Result<(), MediaError> {
        self.peer_connection
            .add_track(Arc::clone(track.sample_track()) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("Failed to add track to peer connection")?;

        let capture_rx = self.capture_rx.lock().take();
        if let Some(capture_rx) = capture_rx {
            tracing::trace!("Starting sender");
            *self.sender.lock() = Some(Sender::new(track.clone(), capture_rx));
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .context("Failed to create offer")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("Failed to create answer")?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    #[instrument(level = "trace", skip(self, description), fields(kind = ?description.kind), err)]
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.peer_connection
            .set_local_description(into_rtc_description(description)?)
            .await
            .map_err(|err| MediaError::DescriptionRejected(err.to_string()))
    }

    #[instrument(level = "trace", skip(self, description), fields(kind = ?description.kind), err)]
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.peer_connection
            .set_remote_description(into_rtc_description(description)?)
            .await
            .map_err(|err| MediaError::DescriptionRejected(err.to_string()))
    }

    #[instrument(level = "trace", skip(self, candidate), err)]
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: Some(candidate.sdp_mid),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                ..Default::default()
            })
            .await
            .map_err(|err| MediaError::CandidateRejected(err.to_string()))
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn close(&self) -> Result<(), MediaError> {
        tracing::debug!("Closing peer");
        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            tracing::trace!("Shutting down sender");
            sender.stop().await.context("Failed to stop sender")?;
        }
        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            tracing::trace!("Shutting down receiver");
            receiver.shutdown();
        }

        self.peer_connection
            .close()
            .await
            .context("Failed to close peer connection")?;

        tracing::trace!("Successfully closed peer connection");
        Ok(())
    }
}

fn into_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, MediaError> {
    match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|err| MediaError::DescriptionRejected(err.to_string()))
}

fn connectivity_from(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::Unspecified => None,
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_matches};
    use test_log::test;

    fn offline_config() -> IceConfig {
        IceConfig {
            ice_servers: Vec::new(),
        }
    }

    #[test]
    fn connectivity_mapping() {
        assert_eq!(connectivity_from(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            connectivity_from(RTCPeerConnectionState::Connected),
            Some(ConnectivityState::Connected)
        );
        assert_eq!(
            connectivity_from(RTCPeerConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
    }

    #[test(tokio::test)]
    async fn offer_carries_audio() {
        let engine = WebrtcEngine::new(offline_config());
        let (peer, _events) = engine.open_session().await.unwrap();

        let track = peer.create_local_track().await.unwrap();
        peer.add_track(&track).await.unwrap();

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.to_lowercase().contains("opus"));

        peer.close().await.unwrap();
    }

    #[test(tokio::test)]
    async fn garbage_remote_description_rejected() {
        let engine = WebrtcEngine::new(offline_config());
        let (peer, _events) = engine.open_session().await.unwrap();

        assert_matches!(
            peer.set_remote_description(SessionDescription::answer("not sdp"))
                .await,
            Err(MediaError::DescriptionRejected(_))
        );
    }

    #[test]
    fn track_toggle() {
        let track = AudioTrack::new();
        let clone = track.clone();
        assert!(track.is_enabled());
        clone.set_enabled(false);
        assert!(!track.is_enabled());
    }

    #[test(tokio::test)]
    async fn playback_pipe_starts_empty() {
        let (playback_tx, _playback_rx) = mpsc::channel(8);
        let engine = WebrtcEngine::new(offline_config()).with_playback(playback_tx);
        let (peer, _events) = engine.open_session().await.unwrap();
        assert_eq!(peer.received_frames(), 0);

        peer.close().await.unwrap();
        assert_eq!(peer.received_frames(), 0);
    }

    #[test]
    fn audio_session_flag() {
        let engine = WebrtcEngine::new(offline_config());
        assert!(!engine.is_audio_session_active());
        engine.set_audio_session_active(true).unwrap();
        assert!(engine.is_audio_session_active());
    }
}
