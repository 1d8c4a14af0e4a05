use crate::actor::{CallActor, Command};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::phase::Phase;
use crate::session::CandidateCounters;
use duet_signaling::SignalingChannel;
use duet_webrtc::{ConnectivityState, MediaEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

/// Snapshot of the state machine, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallState {
    pub phase: Phase,
    pub muted: bool,
    /// Call of the live session, or of the session being torn down.
    pub call_id: Option<String>,
    /// Counters of the current session, or of the last one once it ended.
    pub candidates: CandidateCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    Connectivity(ConnectivityState),
    /// The call record could not be written.
    Failed,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    IncomingCall { call_id: String, caller_id: String },
    Connected { call_id: String },
    Ended { call_id: String, reason: EndReason },
    Error { call_id: Option<String>, message: String },
}

/// Handle to a call state machine running on its own task.
///
/// Clones share the same state machine. Dropping the last clone stops it.
#[derive(Clone)]
pub struct CallStateMachine {
    inner: Arc<Inner>,
}

struct Inner {
    commands_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<CallState>,
    events_tx: broadcast::Sender<CallEvent>,
    shutdown_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl CallStateMachine {
    pub fn new<C: SignalingChannel, E: MediaEngine>(
        channel: Arc<C>,
        engine: Arc<E>,
        config: &CallConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        let shutdown_token = shutdown_token.child_token();
        let (commands_tx, commands_rx) = mpsc::channel(config.channels.commands.max(1));
        let (state_tx, state_rx) = watch::channel(CallState::default());
        let (events_tx, _) = broadcast::channel(config.channels.call_events.max(1));

        let actor = CallActor::new(
            channel,
            engine,
            config,
            commands_rx,
            state_tx,
            events_tx.clone(),
            shutdown_token.clone(),
        );
        let task = tokio::runtime::Handle::current()
            .spawn(actor.run().instrument(tracing::Span::current()));

        Self {
            inner: Arc::new(Inner {
                commands_tx,
                state_rx,
                events_tx,
                shutdown_token,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Calls `callee_id` and returns the identifier of the new call.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn start_call(&self, callee_id: &str, caller_id: &str) -> Result<String, CallError> {
        self.request(|reply| Command::StartCall {
            callee_id: callee_id.to_string(),
            caller_id: caller_id.to_string(),
            reply,
        })
        .await?
    }

    /// Watches for ringing calls addressed to `self_id`, replacing any previous watch.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn listen_for_incoming_calls(&self, self_id: &str) -> Result<(), CallError> {
        self.request(|reply| Command::Listen {
            self_id: self_id.to_string(),
            reply,
        })
        .await?
    }

    #[instrument(level = "debug", skip(self), err)]
    pub async fn stop_listening(&self) -> Result<(), CallError> {
        self.request(|reply| Command::StopListening { reply }).await
    }

    /// Records that the user picked up the incoming call. The call becomes active once media
    /// connectivity is established.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn answer_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Answer { reply }).await?
    }

    /// Returns whether the microphone is muted after the toggle.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleMute { reply }).await
    }

    /// Ends the current call and waits until its records were deleted. Ending without a call is
    /// a no-op.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::EndCall { reply }).await?
    }

    pub fn state(&self) -> CallState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state_rx.borrow().phase.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.inner.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Stops the state machine, tearing down a live call, and waits for it to finish.
    #[instrument(level = "debug", skip(self))]
    pub async fn shutdown(&self) {
        self.inner.shutdown_token.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            tracing::warn!(?err, "Call actor task failed");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .commands_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| CallError::Stopped)?;
        reply_rx.await.map_err(|_| CallError::Stopped)
    }
}
