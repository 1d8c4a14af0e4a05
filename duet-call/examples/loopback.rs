//! Calls between two state machines in one process, over an in-memory channel and real
//! peer connections.
//!
//! `cargo run -p duet-call --example loopback`

use duet_call::{CallConfig, CallEvent, CallStateMachine, Phase};
use duet_signaling::MemoryChannel;
use duet_webrtc::WebrtcEngine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_DURATION: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=debug,duet_call=debug,duet_webrtc=debug",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CallConfig::parse(Path::new("."))?;
    let channel = Arc::new(MemoryChannel::new());
    let shutdown_token = CancellationToken::new();

    let alice = CallStateMachine::new(
        Arc::clone(&channel),
        Arc::new(WebrtcEngine::new(config.ice.clone())),
        &config,
        shutdown_token.clone(),
    );
    let bob = CallStateMachine::new(
        Arc::clone(&channel),
        Arc::new(WebrtcEngine::new(config.ice.clone())),
        &config,
        shutdown_token.clone(),
    );

    let mut bob_events = bob.subscribe();
    bob.listen_for_incoming_calls("bob").await?;

    let call_id = alice.start_call("bob", "alice").await?;
    tracing::info!(%call_id, "Calling bob");

    loop {
        if let CallEvent::IncomingCall { caller_id, .. } = bob_events.recv().await? {
            tracing::info!(%caller_id, "Bob is ringing, answering");
            bob.answer_call().await?;
            break;
        }
    }

    let mut alice_state = alice.subscribe_state();
    tokio::select! {
        result = alice_state.wait_for(|state| state.phase == Phase::Active) => {
            result?;
            tracing::info!("Call connected");
            tokio::select! {
                _ = tokio::time::sleep(CALL_DURATION) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
        }
        _ = tokio::time::sleep(CONNECT_TIMEOUT) => {
            tracing::warn!(phase = %alice.phase(), "Timed out waiting for connectivity");
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    alice.end_call().await?;
    tracing::info!(alice = %alice.phase(), bob = %bob.phase(), "Call ended");

    shutdown_token.cancel();
    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}
