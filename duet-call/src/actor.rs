use crate::config::CallConfig;
use crate::error::CallError;
use crate::machine::{CallEvent, CallState, EndReason};
use crate::negotiation::NegotiationCoordinator;
use crate::phase::{Phase, Trigger};
use crate::relay::CandidateRelay;
use crate::session::{CallSession, CandidateCounters};
use crate::teardown;
use duet_protocol::call::{FIELD_CALLEE_ID, FIELD_STATUS};
use duet_protocol::{CallRecord, CallStatus, CollectionLayout, Role};
use duet_signaling::error::ChannelError;
use duet_signaling::{ChangeKind, Document, DocumentChange, Query, SignalingChannel, Subscription};
use duet_webrtc::{ConnectivityState, LocalTrack, MediaEngine, MediaEvent, MediaSession};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};
use uuid::Uuid;

type Track<E> = <<E as MediaEngine>::Session as MediaSession>::Track;

pub(crate) enum Command {
    StartCall {
        callee_id: String,
        caller_id: String,
        reply: oneshot::Sender<Result<String, CallError>>,
    },
    Listen {
        self_id: String,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    StopListening {
        reply: oneshot::Sender<()>,
    },
    Answer {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    ToggleMute {
        reply: oneshot::Sender<bool>,
    },
    EndCall {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
}

/// Notification belonging to the session of one call.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Media(MediaEvent),
    CallRecord(DocumentChange),
    RemoteCandidate(DocumentChange),
    CandidateSent,
}

#[derive(Debug)]
pub(crate) enum ActorEvent {
    Session {
        call_id: String,
        event: SessionEvent,
    },
    Incoming {
        generation: u64,
        change: DocumentChange,
    },
    TeardownFinished {
        call_id: String,
        reason: EndReason,
        result: Result<(), ChannelError>,
    },
}

/// Caller waiting for a teardown to complete.
enum TeardownWaiter {
    EndCall(oneshot::Sender<Result<(), CallError>>),
    /// A call whose record could not be written, answered with the write error.
    StartCall(oneshot::Sender<Result<String, CallError>>, CallError),
}

impl TeardownWaiter {
    fn complete(self, result: &Result<(), ChannelError>) {
        match self {
            TeardownWaiter::EndCall(reply) => {
                let _ = reply.send(result.clone().map_err(CallError::from));
            }
            TeardownWaiter::StartCall(reply, err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn abandon(self) {
        match self {
            TeardownWaiter::EndCall(reply) => {
                let _ = reply.send(Err(CallError::Stopped));
            }
            TeardownWaiter::StartCall(reply, err) => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct Listener {
    self_id: String,
    generation: u64,
    cancel: CancellationToken,
}

/// Owns all call state. Commands and notifications are handled strictly one at a time.
pub(crate) struct CallActor<C: SignalingChannel, E: MediaEngine> {
    channel: Arc<C>,
    engine: Arc<E>,
    layout: CollectionLayout,
    commands_rx: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<ActorEvent>,
    events_rx: mpsc::Receiver<ActorEvent>,
    state_tx: watch::Sender<CallState>,
    call_events_tx: broadcast::Sender<CallEvent>,
    shutdown_token: CancellationToken,

    phase: Phase,
    muted: bool,
    session: Option<CallSession<C, E::Session>>,
    teardown_call_id: Option<String>,
    teardown_waiters: Vec<TeardownWaiter>,
    last_counters: CandidateCounters,
    listener: Option<Listener>,
    next_generation: u64,
    /// Ringing call that arrived while busy, re-read once the machine is idle again.
    deferred_incoming: Option<String>,
}

impl<C: SignalingChannel, E: MediaEngine> CallActor<C, E> {
    pub(crate) fn new(
        channel: Arc<C>,
        engine: Arc<E>,
        config: &CallConfig,
        commands_rx: mpsc::Receiver<Command>,
        state_tx: watch::Sender<CallState>,
        call_events_tx: broadcast::Sender<CallEvent>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channels.events.max(1));
        Self {
            channel,
            engine,
            layout: config.collections.clone(),
            commands_rx,
            events_tx,
            events_rx,
            state_tx,
            call_events_tx,
            shutdown_token,
            phase: Phase::Idle,
            muted: false,
            session: None,
            teardown_call_id: None,
            teardown_waiters: Vec::new(),
            last_counters: CandidateCounters::default(),
            listener: None,
            next_generation: 0,
            deferred_incoming: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("Call actor started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => {
                    tracing::trace!("Shutdown signalled, stopping call actor");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::trace!("All handles dropped, stopping call actor");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        tracing::debug!("Call actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall {
                callee_id,
                caller_id,
                reply,
            } => self.start_call(callee_id, caller_id, reply).await,
            Command::Listen { self_id, reply } => {
                let result = self.listen(self_id).await;
                let _ = reply.send(result);
            }
            Command::StopListening { reply } => {
                self.stop_listening();
                let _ = reply.send(());
            }
            Command::Answer { reply } => {
                let _ = reply.send(self.answer_call());
            }
            Command::ToggleMute { reply } => {
                let _ = reply.send(self.toggle_mute());
            }
            Command::EndCall { reply } => self.end_call(reply),
        }
    }

    async fn handle_event(&mut self, event: ActorEvent) {
        match event {
            ActorEvent::Session { call_id, event } => {
                self.handle_session_event(call_id, event).await;
            }
            ActorEvent::Incoming { generation, change } => {
                self.handle_incoming(generation, change).await;
            }
            ActorEvent::TeardownFinished {
                call_id,
                reason,
                result,
            } => self.finish_teardown(call_id, reason, result).await,
        }
    }

    fn is_busy(&self) -> bool {
        !self.phase.is_idle() || self.session.is_some() || self.teardown_call_id.is_some()
    }

    #[instrument(level = "debug", skip(self, reply))]
    async fn start_call(
        &mut self,
        callee_id: String,
        caller_id: String,
        reply: oneshot::Sender<Result<String, CallError>>,
    ) {
        if self.is_busy() {
            tracing::debug!(phase = %self.phase, "Call already active, rejecting new call");
            let _ = reply.send(Err(CallError::CallActive));
            return;
        }

        let call_id = Uuid::new_v4().to_string();
        let session = match self
            .open_session(Role::Initiator, &call_id, caller_id, callee_id)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(?err, "Failed to open media session");
                let _ = reply.send(Err(err));
                return;
            }
        };
        self.install_session(session);
        self.transition(Trigger::Dial);

        let result = match self.session.as_mut() {
            Some(session) => {
                NegotiationCoordinator::new(self.channel.as_ref(), &self.layout)
                    .create_and_publish_offer(session)
                    .await
            }
            None => Err(CallError::NoCallActive),
        };
        match result {
            Ok(()) => {
                let _ = reply.send(Ok(call_id));
            }
            Err(CallError::Channel(err)) => {
                tracing::warn!(?err, "Failed to publish call record, tearing down");
                self.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: err.to_string(),
                });
                self.teardown_waiters
                    .push(TeardownWaiter::StartCall(reply, CallError::Channel(err)));
                self.begin_teardown(EndReason::Failed);
            }
            Err(err) => {
                tracing::warn!(?err, "Failed to create offer");
                let _ = reply.send(Err(err));
            }
        }
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn listen(&mut self, self_id: String) -> Result<(), CallError> {
        self.stop_listening();

        let query = Query::collection(self.layout.calls())
            .where_eq(FIELD_CALLEE_ID, self_id.as_str())
            .where_eq(FIELD_STATUS, CallStatus::Ringing.as_str());
        let mut subscription = self.channel.subscribe(query).await?;

        let generation = self.next_generation;
        self.next_generation += 1;
        let cancel = self.shutdown_token.child_token();

        let events_tx = self.events_tx.clone();
        let forwarder_cancel = cancel.clone();
        tokio::spawn(
            async move {
                loop {
                    let change = tokio::select! {
                        biased;
                        _ = forwarder_cancel.cancelled() => break,
                        change = subscription.recv() => match change {
                            Some(change) => change,
                            None => break,
                        },
                    };
                    let event = ActorEvent::Incoming { generation, change };
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                tracing::trace!(generation, "Incoming call forwarder stopped");
            }
            .instrument(tracing::Span::current()),
        );

        tracing::debug!(generation, "Listening for incoming calls");
        self.listener = Some(Listener {
            self_id,
            generation,
            cancel,
        });
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cancel.cancel();
            tracing::debug!(self_id = %listener.self_id, "Stopped listening for incoming calls");
        }
    }

    fn answer_call(&mut self) -> Result<(), CallError> {
        match (&self.phase, &self.session) {
            (Phase::Incoming { .. }, Some(session)) => {
                tracing::debug!(call_id = %session.call_id, "User answered incoming call");
                Ok(())
            }
            _ => Err(CallError::NoIncomingCall),
        }
    }

    fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if let Some(session) = &self.session {
            session.track.set_enabled(!self.muted);
        }
        tracing::debug!(muted = self.muted, "Toggled mute");
        self.publish_state();
        self.muted
    }

    fn end_call(&mut self, reply: oneshot::Sender<Result<(), CallError>>) {
        if self.session.is_some() {
            self.teardown_waiters.push(TeardownWaiter::EndCall(reply));
            self.begin_teardown(EndReason::LocalHangup);
        } else if self.teardown_call_id.is_some() {
            tracing::trace!("Teardown already in progress, waiting for it");
            self.teardown_waiters.push(TeardownWaiter::EndCall(reply));
        } else {
            tracing::trace!("No call to end");
            let _ = reply.send(Ok(()));
        }
    }

    /// Opens the media session of a new call and wires its notifications into the actor.
    async fn open_session(
        &mut self,
        role: Role,
        call_id: &str,
        local_id: String,
        peer_id: String,
    ) -> Result<CallSession<C, E::Session>, CallError> {
        let (media, media_rx) = self.engine.open_session().await?;
        let media = Arc::new(media);
        let cancel = self.shutdown_token.child_token();

        match self
            .prepare_session(&media, media_rx, role, call_id, &cancel)
            .await
        {
            Ok((track, relay)) => Ok(CallSession::new(
                role,
                call_id.to_string(),
                local_id,
                peer_id,
                media,
                track,
                relay,
                cancel,
            )),
            Err(err) => {
                cancel.cancel();
                if let Err(close_err) = media.close().await {
                    tracing::warn!(?close_err, "Failed to close media session");
                }
                Err(err)
            }
        }
    }

    async fn prepare_session(
        &self,
        media: &Arc<E::Session>,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        role: Role,
        call_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(Track<E>, CandidateRelay<C>), CallError> {
        let track = media.create_local_track().await?;
        track.set_enabled(!self.muted);
        media.add_track(&track).await?;

        self.forward_media_events(call_id, media_rx, cancel.clone());

        let record = self
            .channel
            .subscribe(Query::document(self.layout.calls(), call_id))
            .await?;
        self.forward_subscription(call_id, record, SessionEvent::CallRecord, cancel.clone());

        let relay = CandidateRelay::new(
            Arc::clone(&self.channel),
            &self.layout,
            call_id,
            role,
            self.events_tx.clone(),
            cancel.clone(),
        );
        let candidates = self.channel.subscribe(relay.inbound_query()).await?;
        self.forward_subscription(
            call_id,
            candidates,
            SessionEvent::RemoteCandidate,
            cancel.clone(),
        );

        Ok((track, relay))
    }

    fn forward_media_events(
        &self,
        call_id: &str,
        mut media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        cancel: CancellationToken,
    ) {
        let events_tx = self.events_tx.clone();
        let call_id = call_id.to_string();
        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        event = media_rx.recv() => match event {
                            Some(event) => event,
                            None => break,
                        },
                    };
                    let event = ActorEvent::Session {
                        call_id: call_id.clone(),
                        event: SessionEvent::Media(event),
                    };
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                tracing::trace!("Media event forwarder stopped");
            }
            .instrument(tracing::Span::current()),
        );
    }

    fn forward_subscription(
        &self,
        call_id: &str,
        mut subscription: Subscription,
        wrap: fn(DocumentChange) -> SessionEvent,
        cancel: CancellationToken,
    ) {
        let events_tx = self.events_tx.clone();
        let call_id = call_id.to_string();
        tokio::spawn(
            async move {
                loop {
                    let change = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        change = subscription.recv() => match change {
                            Some(change) => change,
                            None => break,
                        },
                    };
                    let event = ActorEvent::Session {
                        call_id: call_id.clone(),
                        event: wrap(change),
                    };
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                tracing::trace!("Subscription forwarder stopped");
            }
            .instrument(tracing::Span::current()),
        );
    }

    fn install_session(&mut self, session: CallSession<C, E::Session>) {
        self.last_counters = CandidateCounters::default();
        self.session = Some(session);
    }

    async fn handle_session_event(&mut self, call_id: String, event: SessionEvent) {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.call_id == call_id)
        else {
            tracing::trace!(%call_id, ?event, "Ignoring event of stale session");
            return;
        };

        match event {
            SessionEvent::Media(MediaEvent::LocalCandidate(candidate)) => {
                session.relay.push_local(candidate);
            }
            SessionEvent::Media(MediaEvent::Connectivity(state)) => {
                self.handle_connectivity(state);
            }
            SessionEvent::Media(MediaEvent::Error(message)) => {
                tracing::warn!(%call_id, %message, "Media session reported an error");
                self.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message,
                });
            }
            SessionEvent::CallRecord(change) => self.handle_call_record(change).await,
            SessionEvent::RemoteCandidate(change) => {
                session
                    .relay
                    .on_remote_change(session.media.as_ref(), change)
                    .await;
                self.publish_state();
            }
            SessionEvent::CandidateSent => {
                session.relay.record_sent();
                self.publish_state();
            }
        }
    }

    fn handle_connectivity(&mut self, state: ConnectivityState) {
        tracing::debug!(%state, "Connectivity changed");
        match Trigger::from_connectivity(state) {
            Some(Trigger::Connected) => {
                if !self.transition(Trigger::Connected) {
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match self.engine.set_audio_session_active(true) {
                    Ok(()) => session.audio_active = true,
                    Err(err) => tracing::warn!(?err, "Failed to activate audio session"),
                }
                let call_id = session.call_id.clone();
                self.emit(CallEvent::Connected { call_id });
            }
            Some(_) => self.begin_teardown(EndReason::Connectivity(state)),
            None => {}
        }
    }

    async fn handle_call_record(&mut self, change: DocumentChange) {
        if change.kind == ChangeKind::Removed {
            tracing::debug!("Call record removed, peer hung up");
            self.begin_teardown(EndReason::RemoteHangup);
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.role != Role::Initiator {
            return;
        }

        let record = match CallRecord::decode(&change.document.fields) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(?err, "Ignoring malformed call record");
                return;
            }
        };
        let Some(answer) = record.answer else {
            tracing::trace!("Call record carries no answer yet");
            return;
        };

        let result = NegotiationCoordinator::new(self.channel.as_ref(), &self.layout)
            .apply_remote_answer(session, answer)
            .await;
        match result {
            Ok(true) => self.publish_state(),
            Ok(false) => tracing::trace!("Remote answer already applied"),
            Err(err) => tracing::warn!(?err, "Failed to apply remote answer, call stays outgoing"),
        }
    }

    async fn handle_incoming(&mut self, generation: u64, change: DocumentChange) {
        match &self.listener {
            Some(listener) if listener.generation == generation => {}
            _ => {
                tracing::trace!(generation, "Ignoring incoming call of stale listener");
                return;
            }
        }
        if change.kind != ChangeKind::Added {
            tracing::trace!(kind = ?change.kind, "Ignoring incoming call change");
            return;
        }

        self.accept_ringing(change.document).await;
    }

    #[instrument(level = "debug", skip_all, fields(call_id = %document.id))]
    async fn accept_ringing(&mut self, document: Document) {
        let Some(self_id) = self
            .listener
            .as_ref()
            .map(|listener| listener.self_id.clone())
        else {
            return;
        };
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.call_id == document.id)
        {
            return;
        }
        if self.is_busy() {
            tracing::debug!(phase = %self.phase, "Busy, deferring incoming call");
            self.deferred_incoming = Some(document.id);
            return;
        }

        let record = match CallRecord::decode(&document.fields) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(?err, "Ignoring malformed incoming call");
                return;
            }
        };
        if !record.is_ringing() || record.callee_id != self_id {
            tracing::trace!(status = ?record.status, "Ignoring call not ringing for us");
            return;
        }
        let Some(offer) = record.offer else {
            tracing::warn!("Ignoring incoming call without offer");
            return;
        };

        let call_id = document.id;
        let caller_id = record.caller_id;
        let session = match self
            .open_session(Role::Responder, &call_id, self_id, caller_id.clone())
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(?err, "Failed to open media session for incoming call");
                self.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: err.to_string(),
                });
                return;
            }
        };
        self.install_session(session);
        self.transition(Trigger::Ring {
            caller_id: caller_id.clone(),
        });
        self.emit(CallEvent::IncomingCall {
            call_id: call_id.clone(),
            caller_id,
        });

        let result = match self.session.as_mut() {
            Some(session) => {
                NegotiationCoordinator::new(self.channel.as_ref(), &self.layout)
                    .accept_negotiated_offer(session, offer)
                    .await
            }
            None => Err(CallError::NoCallActive),
        };
        match result {
            Ok(()) => self.publish_state(),
            Err(CallError::Channel(err)) => {
                tracing::warn!(?err, "Failed to publish answer, tearing down");
                self.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: err.to_string(),
                });
                self.begin_teardown(EndReason::Failed);
            }
            Err(err) => {
                tracing::warn!(?err, "Failed to answer offer");
                self.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Moves the live session into teardown. Media shutdown and record deletion run on their own
    /// task which reports back with [`ActorEvent::TeardownFinished`].
    fn begin_teardown(&mut self, reason: EndReason) {
        let Some(session) = self.session.take() else {
            tracing::trace!(?reason, "No session to tear down");
            return;
        };
        tracing::debug!(call_id = %session.call_id, ?reason, "Tearing down call");

        session.cancel.cancel();
        self.last_counters = session.relay.counters();
        self.teardown_call_id = Some(session.call_id.clone());
        self.transition(Trigger::Hangup);

        let channel = Arc::clone(&self.channel);
        let engine = Arc::clone(&self.engine);
        let layout = self.layout.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(
            async move {
                let CallSession {
                    call_id,
                    media,
                    audio_active,
                    ..
                } = session;

                if let Err(err) = media.close().await {
                    tracing::warn!(?err, "Failed to close media session");
                }
                if audio_active && let Err(err) = engine.set_audio_session_active(false) {
                    tracing::warn!(?err, "Failed to deactivate audio session");
                }
                let result =
                    teardown::delete_call_with_candidates(channel.as_ref(), &layout, &call_id)
                        .await;

                let event = ActorEvent::TeardownFinished {
                    call_id,
                    reason,
                    result,
                };
                if events_tx.send(event).await.is_err() {
                    tracing::trace!("Call actor stopped before teardown finished");
                }
            }
            .instrument(tracing::Span::current()),
        );
    }

    async fn finish_teardown(
        &mut self,
        call_id: String,
        reason: EndReason,
        result: Result<(), ChannelError>,
    ) {
        if self.teardown_call_id.as_deref() != Some(call_id.as_str()) {
            tracing::trace!(%call_id, "Ignoring teardown of stale call");
            return;
        }

        self.teardown_call_id = None;
        self.transition(Trigger::TornDown);

        if let Err(err) = &result {
            tracing::warn!(?err, %call_id, "Failed to delete call record");
            self.emit(CallEvent::Error {
                call_id: Some(call_id.clone()),
                message: err.to_string(),
            });
        }
        for waiter in std::mem::take(&mut self.teardown_waiters) {
            waiter.complete(&result);
        }
        tracing::debug!(%call_id, ?reason, "Call ended");
        self.emit(CallEvent::Ended { call_id, reason });

        self.resume_deferred_incoming().await;
    }

    async fn resume_deferred_incoming(&mut self) {
        let Some(call_id) = self.deferred_incoming.take() else {
            return;
        };
        if self.listener.is_none() {
            return;
        }

        match self.channel.get_once(&self.layout.calls(), &call_id).await {
            Ok(Some(document)) => self.accept_ringing(document).await,
            Ok(None) => tracing::debug!(%call_id, "Deferred incoming call is gone"),
            Err(err) => {
                tracing::warn!(?err, %call_id, "Failed to re-read deferred incoming call");
            }
        }
    }

    /// Tears down a live call inline, the actor does not outlive this.
    async fn shutdown(&mut self) {
        self.stop_listening();

        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(err) = session.media.close().await {
                tracing::warn!(?err, "Failed to close media session");
            }
            if session.audio_active
                && let Err(err) = self.engine.set_audio_session_active(false)
            {
                tracing::warn!(?err, "Failed to deactivate audio session");
            }
            if let Err(err) = teardown::delete_call_with_candidates(
                self.channel.as_ref(),
                &self.layout,
                &session.call_id,
            )
            .await
            {
                tracing::warn!(?err, "Failed to delete call record on shutdown");
            }

            self.last_counters = session.relay.counters();
            self.transition(Trigger::Hangup);
            self.transition(Trigger::TornDown);
            self.emit(CallEvent::Ended {
                call_id: session.call_id,
                reason: EndReason::Shutdown,
            });
        }

        for waiter in std::mem::take(&mut self.teardown_waiters) {
            waiter.abandon();
        }
    }

    /// Applies `trigger` to the current phase. Returns `false` if it was not valid.
    fn transition(&mut self, trigger: Trigger) -> bool {
        match self.phase.next(&trigger) {
            Some(next) => {
                tracing::debug!(from = %self.phase, to = %next, "Phase changed");
                self.phase = next;
                self.publish_state();
                true
            }
            None => {
                tracing::debug!(phase = %self.phase, ?trigger, "Ignoring trigger");
                false
            }
        }
    }

    fn publish_state(&self) {
        let (call_id, candidates) = match &self.session {
            Some(session) => (Some(session.call_id.clone()), session.relay.counters()),
            None => (self.teardown_call_id.clone(), self.last_counters),
        };
        self.state_tx.send_replace(CallState {
            phase: self.phase.clone(),
            muted: self.muted,
            call_id,
            candidates,
        });
    }

    fn emit(&self, event: CallEvent) {
        if self.call_events_tx.send(event).is_err() {
            tracing::trace!("No call event subscribers");
        }
    }
}
