use crate::config::CallConfig;
use crate::machine::{CallEvent, CallState, CallStateMachine};
use crate::phase::Phase;
use async_trait::async_trait;
use duet_signaling::{MemoryChannel, SignalingChannel};
use duet_webrtc::ConnectivityState;
use duet_webrtc::mock::{MockMediaEngine, MockSessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

pub const CALLER_ID: &str = "UserA";
pub const CALLEE_ID: &str = "UserB";
pub const TEST_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait AwaitCallStateExt {
    async fn wait_for_state<F>(
        &mut self,
        timeout: Duration,
        predicate: F,
    ) -> anyhow::Result<CallState>
    where
        F: Fn(&CallState) -> bool + Send;
}

#[async_trait]
impl AwaitCallStateExt for watch::Receiver<CallState> {
    async fn wait_for_state<F>(
        &mut self,
        timeout: Duration,
        predicate: F,
    ) -> anyhow::Result<CallState>
    where
        F: Fn(&CallState) -> bool + Send,
    {
        let wait = async move {
            loop {
                let state = self.borrow_and_update().clone();
                if predicate(&state) {
                    return anyhow::Ok(state);
                }
                self.changed().await?;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("Timeout")),
        }
    }
}

#[async_trait]
pub trait AwaitCallEventExt {
    async fn recv_with_timeout<F>(
        &mut self,
        timeout: Duration,
        predicate: F,
    ) -> anyhow::Result<CallEvent>
    where
        F: Fn(&CallEvent) -> bool + Send;
}

#[async_trait]
impl AwaitCallEventExt for broadcast::Receiver<CallEvent> {
    async fn recv_with_timeout<F>(
        &mut self,
        timeout: Duration,
        predicate: F,
    ) -> anyhow::Result<CallEvent>
    where
        F: Fn(&CallEvent) -> bool + Send,
    {
        loop {
            match tokio::time::timeout(timeout, self.recv()).await {
                Ok(Ok(event)) if predicate(&event) => return Ok(event),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(anyhow::anyhow!("Timeout")),
                _ => continue,
            }
        }
    }
}

/// Polls `condition` until it holds.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Timeout"))
}

pub struct TestPeer {
    pub id: String,
    pub machine: CallStateMachine,
    pub engine: Arc<MockMediaEngine>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl TestPeer {
    pub fn new<C: SignalingChannel>(
        id: &str,
        channel: Arc<C>,
        engine: MockMediaEngine,
        shutdown_token: CancellationToken,
    ) -> Self {
        let engine = Arc::new(engine);
        let machine = CallStateMachine::new(
            channel,
            Arc::clone(&engine),
            &CallConfig::default(),
            shutdown_token,
        );
        let events = machine.subscribe();
        Self {
            id: id.to_string(),
            machine,
            engine,
            events,
        }
    }

    pub async fn wait_for_phase<F>(&self, predicate: F) -> anyhow::Result<CallState>
    where
        F: Fn(&Phase) -> bool + Send,
    {
        self.machine
            .subscribe_state()
            .wait_for_state(TEST_TIMEOUT, move |state| predicate(&state.phase))
            .await
    }

    pub async fn wait_for_event<F>(&mut self, predicate: F) -> anyhow::Result<CallEvent>
    where
        F: Fn(&CallEvent) -> bool + Send,
    {
        self.events.recv_with_timeout(TEST_TIMEOUT, predicate).await
    }

    /// The media session opened last, once there are at least `count` sessions.
    pub async fn session(&self, count: usize) -> anyhow::Result<MockSessionHandle> {
        self.engine
            .wait_for_session(count.saturating_sub(1), TEST_TIMEOUT)
            .await
    }
}

/// A caller and a callee sharing one signaling channel. The callee listens for incoming calls
/// right away.
pub struct TestRig<C: SignalingChannel = MemoryChannel> {
    channel: Arc<C>,
    caller: TestPeer,
    callee: TestPeer,
    shutdown_token: CancellationToken,
}

impl TestRig<MemoryChannel> {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_channel(
            Arc::new(MemoryChannel::new()),
            MockMediaEngine::new(),
            MockMediaEngine::new(),
        )
        .await
    }
}

impl<C: SignalingChannel> TestRig<C> {
    pub async fn with_channel(
        channel: Arc<C>,
        caller_engine: MockMediaEngine,
        callee_engine: MockMediaEngine,
    ) -> anyhow::Result<Self> {
        let shutdown_token = CancellationToken::new();
        let caller = TestPeer::new(
            CALLER_ID,
            Arc::clone(&channel),
            caller_engine,
            shutdown_token.child_token(),
        );
        let callee = TestPeer::new(
            CALLEE_ID,
            Arc::clone(&channel),
            callee_engine,
            shutdown_token.child_token(),
        );
        callee.machine.listen_for_incoming_calls(CALLEE_ID).await?;

        Ok(Self {
            channel,
            caller,
            callee,
            shutdown_token,
        })
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    pub fn caller(&self) -> &TestPeer {
        &self.caller
    }

    pub fn caller_mut(&mut self) -> &mut TestPeer {
        &mut self.caller
    }

    pub fn callee(&self) -> &TestPeer {
        &self.callee
    }

    pub fn callee_mut(&mut self) -> &mut TestPeer {
        &mut self.callee
    }

    /// Dials the callee and waits until both sides completed the description exchange.
    /// Returns the call id with the media sessions of caller and callee.
    pub async fn dial(&self) -> anyhow::Result<(String, MockSessionHandle, MockSessionHandle)> {
        let caller_sessions = self.caller.engine.session_count();
        let callee_sessions = self.callee.engine.session_count();

        let call_id = self.caller.machine.start_call(CALLEE_ID, CALLER_ID).await?;
        let caller_session = self.caller.session(caller_sessions + 1).await?;
        let callee_session = self.callee.session(callee_sessions + 1).await?;
        wait_until(TEST_TIMEOUT, || caller_session.remote_description().is_some()).await?;

        Ok((call_id, caller_session, callee_session))
    }

    /// Dials, answers and reports connectivity on both sides until both are active.
    pub async fn connect(&self) -> anyhow::Result<(String, MockSessionHandle, MockSessionHandle)> {
        let (call_id, caller_session, callee_session) = self.dial().await?;
        self.callee.machine.answer_call().await?;

        caller_session.set_connectivity(ConnectivityState::Connected);
        callee_session.set_connectivity(ConnectivityState::Connected);
        self.caller.wait_for_phase(|phase| *phase == Phase::Active).await?;
        self.callee.wait_for_phase(|phase| *phase == Phase::Active).await?;

        Ok((call_id, caller_session, callee_session))
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

impl<C: SignalingChannel> Drop for TestRig<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
