use crate::engine::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEngine, MediaEvent, MediaSession, SdpType,
    SessionDescription,
};
use crate::error::MediaError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const MOCK_OFFER_SDP: &str = concat!(
    "v=0\r\n",
    "o=- 1 1 IN IP4 127.0.0.1\r\n",
    "s=-\r\n",
    "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
    "a=setup:passive\r\n",
    "a=mid:0\r\n",
);
pub const MOCK_ANSWER_SDP: &str = concat!(
    "v=0\r\n",
    "o=- 2 1 IN IP4 127.0.0.1\r\n",
    "s=-\r\n",
    "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
    "a=setup:active\r\n",
    "a=mid:0\r\n",
);

/// Behaviour of the sessions opened by a [`MockMediaEngine`]. A session copies the script that
/// is current when it is opened.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub offer_sdp: String,
    pub answer_sdp: String,
    pub fail_open: bool,
    pub fail_create_offer: bool,
    pub fail_create_answer: bool,
    pub fail_set_local: bool,
    pub fail_set_remote: bool,
    pub reject_candidates: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            offer_sdp: MOCK_OFFER_SDP.to_string(),
            answer_sdp: MOCK_ANSWER_SDP.to_string(),
            fail_open: false,
            fail_create_offer: false,
            fail_create_answer: false,
            fail_set_local: false,
            fail_set_remote: false,
            reject_candidates: false,
        }
    }
}

/// Engine operation as recorded by a mock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateLocalTrack,
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    AddRemoteCandidate(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct MockTrack {
    enabled: Arc<AtomicBool>,
}

impl LocalTrack for MockTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    calls: Vec<MockCall>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    tracks: Vec<MockTrack>,
    closed: bool,
}

#[derive(Debug)]
struct SessionShared {
    script: MockScript,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    state: Mutex<SessionState>,
}

impl SessionShared {
    fn record(&self, call: MockCall) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MediaError::Closed);
        }
        state.calls.push(call);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockMediaEngine {
    script: Mutex<MockScript>,
    sessions_tx: watch::Sender<Vec<MockSessionHandle>>,
    audio_session_history: Mutex<Vec<bool>>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        let (sessions_tx, _) = watch::channel(Vec::new());
        Self {
            script: Mutex::new(MockScript::default()),
            sessions_tx,
            audio_session_history: Mutex::new(Vec::new()),
        }
    }
}

impl MockMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: MockScript) -> Self {
        let engine = Self::default();
        *engine.script.lock() = script;
        engine
    }

    /// Changes the script applied to sessions opened from now on.
    pub fn update_script(&self, f: impl FnOnce(&mut MockScript)) {
        f(&mut self.script.lock());
    }

    pub fn sessions(&self) -> Vec<MockSessionHandle> {
        self.sessions_tx.borrow().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions_tx.borrow().len()
    }

    /// Waits until at least `index + 1` sessions were opened and returns the one at `index`.
    pub async fn wait_for_session(
        &self,
        index: usize,
        timeout: Duration,
    ) -> anyhow::Result<MockSessionHandle> {
        let mut sessions_rx = self.sessions_tx.subscribe();
        let sessions = tokio::time::timeout(
            timeout,
            sessions_rx.wait_for(|sessions| sessions.len() > index),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out waiting for media session {index}"))??;
        Ok(sessions[index].clone())
    }

    /// Every value passed to [`MediaEngine::set_audio_session_active`], in call order.
    pub fn audio_session_history(&self) -> Vec<bool> {
        self.audio_session_history.lock().clone()
    }

    pub fn is_audio_session_active(&self) -> bool {
        self.audio_session_history
            .lock()
            .last()
            .copied()
            .unwrap_or(false)
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    type Session = MockSession;

    async fn open_session(
        &self,
    ) -> Result<(Self::Session, mpsc::UnboundedReceiver<MediaEvent>), MediaError> {
        let script = self.script.lock().clone();
        if script.fail_open {
            return Err(anyhow::anyhow!("injected open failure").into());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            script,
            events_tx,
            state: Mutex::new(SessionState::default()),
        });

        self.sessions_tx.send_modify(|sessions| {
            sessions.push(MockSessionHandle {
                shared: Arc::clone(&shared),
            });
        });
        tracing::trace!("Opened mock media session");

        Ok((MockSession { shared }, events_rx))
    }

    fn set_audio_session_active(&self, active: bool) -> Result<(), MediaError> {
        self.audio_session_history.lock().push(active);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockSession {
    shared: Arc<SessionShared>,
}

#[async_trait]
impl MediaSession for MockSession {
    type Track = MockTrack;

    async fn create_local_track(&self) -> Result<MockTrack, MediaError> {
        self.shared.record(MockCall::CreateLocalTrack)?;
        let track = MockTrack {
            enabled: Arc::new(AtomicBool::new(true)),
        };
        self.shared.state.lock().tracks.push(track.clone());
        Ok(track)
    }

    async fn add_track(&self, _track: &MockTrack) -> Result<(), MediaError> {
        self.shared.record(MockCall::AddTrack)
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.record(MockCall::CreateOffer)?;
        if self.shared.script.fail_create_offer {
            return Err(anyhow::anyhow!("injected create offer failure").into());
        }
        Ok(SessionDescription::offer(&self.shared.script.offer_sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.record(MockCall::CreateAnswer)?;
        if self.shared.script.fail_create_answer {
            return Err(anyhow::anyhow!("injected create answer failure").into());
        }
        Ok(SessionDescription::answer(&self.shared.script.answer_sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.shared
            .record(MockCall::SetLocalDescription(description.kind))?;
        if self.shared.script.fail_set_local {
            return Err(MediaError::DescriptionRejected(
                "injected local description failure".to_string(),
            ));
        }
        self.shared.state.lock().local_description = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.shared
            .record(MockCall::SetRemoteDescription(description.kind))?;
        if self.shared.script.fail_set_remote {
            return Err(MediaError::DescriptionRejected(
                "injected remote description failure".to_string(),
            ));
        }
        self.shared.state.lock().remote_description = Some(description);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.shared
            .record(MockCall::AddRemoteCandidate(candidate.candidate.clone()))?;
        if self.shared.script.reject_candidates {
            return Err(MediaError::CandidateRejected(candidate.candidate));
        }
        self.shared.state.lock().remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.calls.push(MockCall::Close);
            state.closed = true;
        }
        let _ = self
            .shared
            .events_tx
            .send(MediaEvent::Connectivity(ConnectivityState::Closed));
        Ok(())
    }
}

/// Test-side view of a session opened by a [`MockMediaEngine`], used to raise engine events and
/// inspect what the session was asked to do.
#[derive(Debug, Clone)]
pub struct MockSessionHandle {
    shared: Arc<SessionShared>,
}

impl MockSessionHandle {
    /// Raises a local candidate as if the engine had gathered it.
    pub fn emit_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(MediaEvent::LocalCandidate(candidate))
    }

    pub fn set_connectivity(&self, state: ConnectivityState) -> bool {
        self.emit(MediaEvent::Connectivity(state))
    }

    pub fn emit(&self, event: MediaEvent) -> bool {
        self.shared.events_tx.send(event).is_ok()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.state.lock().calls.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().remote_description.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.shared.state.lock().remote_candidates.clone()
    }

    pub fn track(&self) -> Option<MockTrack> {
        self.shared.state.lock().tracks.first().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_matches};
    use test_log::test;

    #[test(tokio::test)]
    async fn records_calls_and_events() {
        let engine = MockMediaEngine::new();
        let (session, mut events) = engine.open_session().await.unwrap();
        let handle = engine
            .wait_for_session(0, Duration::from_millis(100))
            .await
            .unwrap();

        let offer = session.create_offer().await.unwrap();
        assert!(offer.sdp.contains("a=setup:passive"));
        session.set_local_description(offer).await.unwrap();

        assert!(handle.emit_candidate(IceCandidate::new("candidate:1", 0, "0")));
        assert_eq!(
            events.recv().await,
            Some(MediaEvent::LocalCandidate(IceCandidate::new(
                "candidate:1",
                0,
                "0"
            )))
        );
        assert_eq!(
            handle.calls(),
            vec![
                MockCall::CreateOffer,
                MockCall::SetLocalDescription(SdpType::Offer)
            ]
        );
    }

    #[test(tokio::test)]
    async fn scripted_failures() {
        let engine = MockMediaEngine::with_script(MockScript {
            fail_set_remote: true,
            reject_candidates: true,
            ..Default::default()
        });
        let (session, _events) = engine.open_session().await.unwrap();

        assert_matches!(
            session
                .set_remote_description(SessionDescription::answer("sdp"))
                .await,
            Err(MediaError::DescriptionRejected(_))
        );
        assert_matches!(
            session
                .add_remote_candidate(IceCandidate::new("candidate:1", 0, ""))
                .await,
            Err(MediaError::CandidateRejected(_))
        );
    }

    #[test(tokio::test)]
    async fn close_is_final() {
        let engine = MockMediaEngine::new();
        let (session, mut events) = engine.open_session().await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(MediaEvent::Connectivity(ConnectivityState::Closed))
        );
        assert_matches!(session.create_offer().await, Err(MediaError::Closed));
        assert_eq!(engine.sessions()[0].calls(), vec![MockCall::Close]);
    }
}
