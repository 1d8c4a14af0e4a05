use duet_protocol::{CollectionLayout, CollectionPath, Role};
use duet_signaling::SignalingChannel;
use duet_signaling::error::ChannelError;
use futures_util::future::join_all;
use tracing::instrument;

/// Deletes the call record of `call_id` together with both candidate collections.
///
/// Both collections are swept concurrently and the call record is only deleted once both sweeps
/// completed. Failures while deleting candidates are logged and swallowed, the result is the one
/// of the final call record delete.
#[instrument(level = "debug", skip(channel, layout), err)]
pub async fn delete_call_with_candidates<C: SignalingChannel + ?Sized>(
    channel: &C,
    layout: &CollectionLayout,
    call_id: &str,
) -> Result<(), ChannelError> {
    let initiator = layout.candidates(call_id, Role::Initiator);
    let responder = layout.candidates(call_id, Role::Responder);
    tokio::join!(sweep(channel, &initiator), sweep(channel, &responder));

    channel.delete(&layout.calls(), call_id).await?;
    tracing::debug!("Deleted call record");
    Ok(())
}

async fn sweep<C: SignalingChannel + ?Sized>(channel: &C, collection: &CollectionPath) {
    let ids = match channel.list_documents(collection).await {
        Ok(ids) => ids,
        Err(err) => {
            tracing::warn!(?err, %collection, "Failed to list candidates");
            return;
        }
    };

    let results = join_all(ids.iter().map(|id| channel.delete(collection, id))).await;
    for (id, result) in ids.iter().zip(results) {
        if let Err(err) = result {
            tracing::warn!(?err, %collection, %id, "Failed to delete candidate");
        }
    }
    tracing::trace!(%collection, count = ids.len(), "Swept candidates");
}
