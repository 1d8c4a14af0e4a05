use crate::EncodedAudioFrame;
use crate::config::FRAME_DURATION_MS;
use crate::engine::LocalTrack;
use crate::peer::AudioTrack;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, instrument};
use webrtc::media::Sample;

/// Writes captured frames to a local track. Frames arriving while the track is disabled are
/// dropped.
pub struct Sender {
    shutdown_tx: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl Sender {
    #[instrument(level = "trace", skip_all)]
    pub fn new(track: AudioTrack, mut capture_rx: broadcast::Receiver<EncodedAudioFrame>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let task = tokio::runtime::Handle::current().spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            tracing::trace!("Shutdown signalled, stopping sending");
                            break;
                        }
                        frame = capture_rx.recv() => {
                            match frame {
                                Ok(frame) => {
                                    if !track.is_enabled() {
                                        continue;
                                    }

                                    let sample = Sample {
                                        data: frame,
                                        duration: Duration::from_millis(FRAME_DURATION_MS),
                                        ..Default::default()
                                    };

                                    if let Err(err) =
                                        track.sample_track().write_sample(&sample).await
                                    {
                                        tracing::warn!(?err, "Failed to write sample to track");
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    tracing::trace!(?skipped, "Sender lagged behind capture");
                                }
                                Err(broadcast::error::RecvError::Closed) => {
                                    tracing::trace!("Capture closed, stopping sending");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(tracing::Span::current()),
        );

        Self { shutdown_tx, task }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    #[instrument(level = "trace", skip(self), err)]
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        tracing::trace!("Waiting for sender task to finish");
        self.task.await.context("Failed to join sender task")
    }
}
