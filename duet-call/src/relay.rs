use crate::actor::{ActorEvent, SessionEvent};
use crate::session::CandidateCounters;
use duet_protocol::{CandidateRecord, CollectionLayout, CollectionPath, Fields, Role};
use duet_signaling::{ChangeKind, DocumentChange, Query, SignalingChannel};
use duet_webrtc::{IceCandidate, MediaSession};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Streams candidates between the two peers of one call.
///
/// Local candidates are appended to the collection of the local role, remote candidates are read
/// from the collection of the opposite role. Local candidates are held back until [`Self::open`]
/// and remote candidates until [`Self::mark_inbound_ready`], both in the order they arrived.
pub struct CandidateRelay<C: SignalingChannel> {
    channel: Arc<C>,
    call_id: String,
    outbound: CollectionPath,
    inbound: CollectionPath,
    events_tx: mpsc::Sender<ActorEvent>,
    cancel: CancellationToken,
    pending_local: Vec<IceCandidate>,
    writer_tx: Option<mpsc::UnboundedSender<IceCandidate>>,
    inbound_ready: bool,
    pending_remote: VecDeque<Fields>,
    counters: CandidateCounters,
}

impl<C: SignalingChannel> CandidateRelay<C> {
    pub(crate) fn new(
        channel: Arc<C>,
        layout: &CollectionLayout,
        call_id: &str,
        role: Role,
        events_tx: mpsc::Sender<ActorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            call_id: call_id.to_string(),
            outbound: layout.candidates(call_id, role),
            inbound: layout.candidates(call_id, role.opposite()),
            events_tx,
            cancel,
            pending_local: Vec::new(),
            writer_tx: None,
            inbound_ready: false,
            pending_remote: VecDeque::new(),
            counters: CandidateCounters::default(),
        }
    }

    pub fn inbound_query(&self) -> Query {
        Query::collection(self.inbound.clone())
    }

    pub fn outbound(&self) -> &CollectionPath {
        &self.outbound
    }

    pub fn is_open(&self) -> bool {
        self.writer_tx.is_some()
    }

    pub fn counters(&self) -> CandidateCounters {
        self.counters
    }

    pub fn push_local(&mut self, candidate: IceCandidate) {
        match &self.writer_tx {
            Some(writer_tx) => {
                if writer_tx.send(candidate).is_err() {
                    tracing::trace!("Candidate writer stopped, dropping local candidate");
                }
            }
            None => {
                tracing::trace!(
                    pending = self.pending_local.len() + 1,
                    "Buffering local candidate"
                );
                self.pending_local.push(candidate);
            }
        }
    }

    /// Starts publishing local candidates, beginning with the ones buffered so far.
    pub fn open(&mut self) {
        if self.writer_tx.is_some() {
            return;
        }

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<IceCandidate>();
        tracing::debug!(
            buffered = self.pending_local.len(),
            collection = %self.outbound,
            "Opening candidate relay"
        );
        for candidate in self.pending_local.drain(..) {
            let _ = writer_tx.send(candidate);
        }

        let channel = Arc::clone(&self.channel);
        let outbound = self.outbound.clone();
        let call_id = self.call_id.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(
            async move {
                loop {
                    let candidate = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        candidate = writer_rx.recv() => match candidate {
                            Some(candidate) => candidate,
                            None => break,
                        },
                    };

                    let record = CandidateRecord::new(
                        candidate.candidate,
                        candidate.sdp_mline_index,
                        candidate.sdp_mid,
                    );
                    let fields = match record.encode() {
                        Ok(fields) => fields,
                        Err(err) => {
                            tracing::warn!(?err, "Failed to encode local candidate");
                            continue;
                        }
                    };

                    let id = Uuid::new_v4().to_string();
                    if let Err(err) = channel.create_or_update(&outbound, &id, fields).await {
                        tracing::warn!(?err, "Failed to publish local candidate");
                        continue;
                    }

                    let event = ActorEvent::Session {
                        call_id: call_id.clone(),
                        event: SessionEvent::CandidateSent,
                    };
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                tracing::trace!("Candidate writer stopped");
            }
            .instrument(tracing::Span::current()),
        );

        self.writer_tx = Some(writer_tx);
    }

    pub fn record_sent(&mut self) {
        self.counters.sent += 1;
    }

    /// Handles a change of the inbound collection. Only additions are applied.
    pub async fn on_remote_change<S: MediaSession>(&mut self, media: &S, change: DocumentChange) {
        if change.kind != ChangeKind::Added {
            tracing::trace!(kind = ?change.kind, "Ignoring remote candidate change");
            return;
        }
        if change.document.collection != self.inbound {
            tracing::trace!(collection = %change.document.collection, "Ignoring foreign candidate");
            return;
        }

        if self.inbound_ready {
            self.apply(media, &change.document.fields).await;
        } else {
            tracing::trace!("Remote description not set yet, holding remote candidate");
            self.pending_remote.push_back(change.document.fields);
        }
    }

    /// Applies every held remote candidate and applies later ones right away.
    pub async fn mark_inbound_ready<S: MediaSession>(&mut self, media: &S) {
        if self.inbound_ready {
            return;
        }
        self.inbound_ready = true;
        while let Some(fields) = self.pending_remote.pop_front() {
            self.apply(media, &fields).await;
        }
    }

    async fn apply<S: MediaSession>(&mut self, media: &S, fields: &Fields) {
        let record = match CandidateRecord::decode(fields) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(?err, "Dropping malformed remote candidate");
                return;
            }
        };

        let candidate = IceCandidate::new(record.payload, record.media_line_index, record.media_id);
        match media.add_remote_candidate(candidate).await {
            Ok(()) => self.counters.applied += 1,
            Err(err) => tracing::warn!(?err, "Failed to apply remote candidate"),
        }
    }
}
