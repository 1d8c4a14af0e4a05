use crate::error::CallError;
use crate::session::CallSession;
use duet_protocol::{CallRecord, CollectionLayout, Role};
use duet_signaling::SignalingChannel;
use duet_webrtc::{MediaSession, SessionDescription};
use tracing::instrument;

const SETUP_PASSIVE: &str = "a=setup:passive";
const SETUP_ACTPASS: &str = "a=setup:actpass";

/// Rewrites a passive DTLS role to `actpass`, so the answering side is free to pick its role
/// when both peers dial each other at the same time.
pub fn avoid_glare(sdp: &str) -> String {
    sdp.replace(SETUP_PASSIVE, SETUP_ACTPASS)
}

/// Drives the offer/answer exchange of a [`CallSession`] through the media session and the
/// call record. Engine errors are returned without touching the channel.
pub struct NegotiationCoordinator<'a, C: SignalingChannel> {
    channel: &'a C,
    layout: &'a CollectionLayout,
}

impl<'a, C: SignalingChannel> NegotiationCoordinator<'a, C> {
    pub fn new(channel: &'a C, layout: &'a CollectionLayout) -> Self {
        Self { channel, layout }
    }

    /// Creates the offer, applies it locally and only then publishes the ringing call record.
    /// Opens the candidate relay once the record exists.
    #[instrument(level = "debug", skip_all, fields(call_id = %session.call_id), err)]
    pub async fn create_and_publish_offer<S: MediaSession>(
        &self,
        session: &mut CallSession<C, S>,
    ) -> Result<(), CallError> {
        if session.role != Role::Initiator {
            return Err(CallError::WrongRole(session.role));
        }
        if session.offer_published {
            tracing::trace!("Offer already published");
            return Ok(());
        }

        let offer = session.media.create_offer().await?;
        let offer = avoid_glare(&offer.sdp);
        session
            .media
            .set_local_description(SessionDescription::offer(offer.as_str()))
            .await?;

        let record = CallRecord::ringing(
            session.local_id.as_str(),
            session.peer_id.as_str(),
            offer,
        );
        self.channel
            .create_or_update(&self.layout.calls(), &session.call_id, record.encode()?)
            .await?;
        session.offer_published = true;
        tracing::debug!(callee_id = %session.peer_id, "Published call offer");

        session.relay.open();
        Ok(())
    }

    /// Applies the remote offer, answers it and merges the answer into the call record. Opens
    /// the candidate relay once the answer is stored.
    #[instrument(level = "debug", skip_all, fields(call_id = %session.call_id), err)]
    pub async fn accept_negotiated_offer<S: MediaSession>(
        &self,
        session: &mut CallSession<C, S>,
        offer: String,
    ) -> Result<(), CallError> {
        if session.role != Role::Responder {
            return Err(CallError::WrongRole(session.role));
        }
        if session.answer_published {
            tracing::trace!("Answer already published");
            return Ok(());
        }

        session
            .media
            .set_remote_description(SessionDescription::offer(offer))
            .await?;
        session.relay.mark_inbound_ready(session.media.as_ref()).await;

        let answer = session.media.create_answer().await?;
        session.media.set_local_description(answer.clone()).await?;

        self.channel
            .update(
                &self.layout.calls(),
                &session.call_id,
                CallRecord::accepted_fields(answer.sdp),
            )
            .await?;
        session.answer_published = true;
        tracing::debug!(caller_id = %session.peer_id, "Published call answer");

        session.relay.open();
        Ok(())
    }

    /// Applies the answer of the responder. Returns `false` if an answer was applied before.
    #[instrument(level = "debug", skip_all, fields(call_id = %session.call_id), err)]
    pub async fn apply_remote_answer<S: MediaSession>(
        &self,
        session: &mut CallSession<C, S>,
        answer: String,
    ) -> Result<bool, CallError> {
        if session.role != Role::Initiator {
            return Err(CallError::WrongRole(session.role));
        }
        if session.answer_applied {
            return Ok(false);
        }

        session
            .media
            .set_remote_description(SessionDescription::answer(answer))
            .await?;
        session.answer_applied = true;
        session.relay.mark_inbound_ready(session.media.as_ref()).await;

        tracing::debug!("Applied remote answer");
        Ok(true)
    }
}
