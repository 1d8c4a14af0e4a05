use crate::EncodedAudioFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::instrument;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Forwards the payload of every RTP packet of the remote audio track to the playback pipe.
pub struct Receiver {
    shutdown_tx: watch::Sender<()>,
    frames: Arc<AtomicU64>,
}

impl Receiver {
    #[instrument(level = "trace", skip_all)]
    pub fn new(
        peer_connection: &RTCPeerConnection,
        playback_tx: mpsc::Sender<EncodedAudioFrame>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let frames = Arc::new(AtomicU64::new(0));

        let track_frames = Arc::clone(&frames);
        peer_connection.on_track(Box::new(move |track, _, _| {
            let playback_tx = playback_tx.clone();
            let shutdown_rx = shutdown_rx.clone();
            let frames = Arc::clone(&track_frames);

            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    tracing::debug!(kind = ?track.kind(), "Ignoring non-audio remote track");
                    return;
                }
                forward_track(track, playback_tx, shutdown_rx, frames).await;
            })
        }));

        Self { shutdown_tx, frames }
    }

    /// Number of frames handed to the playback pipe so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn forward_track(
    track: Arc<TrackRemote>,
    playback_tx: mpsc::Sender<EncodedAudioFrame>,
    mut shutdown_rx: watch::Receiver<()>,
    frames: Arc<AtomicU64>,
) {
    tracing::debug!(ssrc = track.ssrc(), "Remote audio track started");
    loop {
        let packet = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            rtp = track.read_rtp() => match rtp {
                Ok((packet, _)) => packet,
                Err(err) => {
                    tracing::debug!(?err, "Remote track ended");
                    break;
                }
            },
        };

        if packet.payload.is_empty() {
            continue;
        }
        if playback_tx.send(packet.payload).await.is_err() {
            tracing::debug!("Playback closed, stopping receiver");
            break;
        }
        frames.fetch_add(1, Ordering::Relaxed);
    }
    tracing::trace!(frames = frames.load(Ordering::Relaxed), "Receiver stopped");
}
