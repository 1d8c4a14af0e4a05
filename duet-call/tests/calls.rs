use duet_call::test_utils::{
    AwaitCallEventExt, AwaitCallStateExt, CALLEE_ID, CALLER_ID, TEST_TIMEOUT, TestPeer, TestRig,
    wait_until,
};
use duet_call::config::ChannelsConfig;
use duet_call::{CallConfig, CallError, CallEvent, CallStateMachine, EndReason, Phase};
use duet_protocol::{CallRecord, CallStatus, CollectionLayout, Role};
use duet_signaling::channel::mock::{OperationKind, RecordingChannel};
use duet_signaling::error::ChannelError;
use duet_signaling::{MemoryChannel, SignalingChannel};
use duet_webrtc::mock::{MockMediaEngine, MockScript};
use duet_webrtc::{ConnectivityState, IceCandidate, LocalTrack};
use pretty_assertions::{assert_eq, assert_matches};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_log::test;
use tokio_util::sync::CancellationToken;

async fn recording_rig() -> (TestRig<RecordingChannel>, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::new());
    let rig = TestRig::with_channel(
        Arc::clone(&channel),
        MockMediaEngine::new(),
        MockMediaEngine::new(),
    )
    .await
    .unwrap();
    (rig, channel)
}

async fn call_record<C: SignalingChannel>(channel: &C, call_id: &str) -> Option<CallRecord> {
    channel
        .get_once(&CollectionLayout::default().calls(), call_id)
        .await
        .unwrap()
        .map(|document| CallRecord::decode(&document.fields).unwrap())
}

async fn assert_call_deleted<C: SignalingChannel>(channel: &C, call_id: &str) {
    let layout = CollectionLayout::default();
    assert!(call_record(channel, call_id).await.is_none());
    for role in [Role::Initiator, Role::Responder] {
        assert!(
            channel
                .list_documents(&layout.candidates(call_id, role))
                .await
                .unwrap()
                .is_empty()
        );
    }
}

#[test(tokio::test)]
async fn ringing_record_is_picked_up_once() {
    let mut rig = TestRig::new().await.unwrap();
    rig.callee().machine.stop_listening().await.unwrap();

    let call_id = rig
        .caller()
        .machine
        .start_call(CALLEE_ID, CALLER_ID)
        .await
        .unwrap();
    assert_eq!(rig.caller().machine.phase(), Phase::Outgoing);
    assert_eq!(
        rig.caller().machine.state().call_id.as_deref(),
        Some(call_id.as_str())
    );

    let document = rig
        .channel()
        .get_once(&CollectionLayout::default().calls(), &call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.fields["status"], json!("ringing"));
    assert_eq!(document.fields["caller_id"], json!(CALLER_ID));
    assert_eq!(document.fields["receiver_id"], json!(CALLEE_ID));
    assert!(!document.fields.contains_key("answer"));

    let caller_session = rig.caller().session(1).await.unwrap();
    let offer = caller_session.local_description().unwrap().sdp;
    assert_eq!(document.fields["offer"], json!(offer));
    assert!(offer.contains("a=setup:actpass"));

    rig.callee()
        .machine
        .listen_for_incoming_calls(CALLEE_ID)
        .await
        .unwrap();
    let event = rig
        .callee_mut()
        .wait_for_event(|event| matches!(event, CallEvent::IncomingCall { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        CallEvent::IncomingCall {
            call_id: call_id.clone(),
            caller_id: CALLER_ID.to_string(),
        }
    );
    rig.callee()
        .wait_for_phase(|phase| {
            *phase
                == Phase::Incoming {
                    caller_id: CALLER_ID.to_string(),
                }
        })
        .await
        .unwrap();

    assert!(
        rig.callee_mut()
            .events
            .recv_with_timeout(Duration::from_millis(100), |event| {
                matches!(event, CallEvent::IncomingCall { .. })
            })
            .await
            .is_err()
    );
    assert_eq!(rig.callee().engine.session_count(), 1);
}

#[test(tokio::test)]
async fn answer_accepted_and_active_after_connectivity() {
    let mut rig = TestRig::new().await.unwrap();
    let (call_id, caller_session, callee_session) = rig.dial().await.unwrap();

    let record = call_record(rig.channel().as_ref(), &call_id).await.unwrap();
    assert_eq!(record.status, CallStatus::Accepted);
    let answer = callee_session.local_description().unwrap().sdp;
    assert_eq!(record.answer.as_deref(), Some(answer.as_str()));
    assert_eq!(caller_session.remote_description().unwrap().sdp, answer);
    assert_eq!(
        callee_session.remote_description().unwrap().sdp,
        caller_session.local_description().unwrap().sdp
    );

    assert_eq!(rig.caller().machine.phase(), Phase::Outgoing);
    assert_matches!(rig.callee().machine.phase(), Phase::Incoming { .. });
    rig.callee().machine.answer_call().await.unwrap();

    caller_session.set_connectivity(ConnectivityState::Connecting);
    caller_session.set_connectivity(ConnectivityState::Connected);
    rig.caller()
        .wait_for_phase(|phase| *phase == Phase::Active)
        .await
        .unwrap();
    assert_eq!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Connected { .. }))
            .await
            .unwrap(),
        CallEvent::Connected {
            call_id: call_id.clone()
        }
    );
    assert!(rig.caller().engine.is_audio_session_active());
    assert_matches!(rig.callee().machine.phase(), Phase::Incoming { .. });

    callee_session.set_connectivity(ConnectivityState::Connected);
    rig.callee()
        .wait_for_phase(|phase| *phase == Phase::Active)
        .await
        .unwrap();
    assert!(rig.callee().engine.is_audio_session_active());
}

#[test(tokio::test)]
async fn candidates_are_applied_in_order() {
    let rig = TestRig::new().await.unwrap();
    let (_call_id, caller_session, callee_session) = rig.dial().await.unwrap();

    caller_session.emit_candidate(IceCandidate::new("c1", 0, "0"));
    caller_session.emit_candidate(IceCandidate::new("c2", 0, "0"));
    wait_until(TEST_TIMEOUT, || callee_session.remote_candidates().len() == 2)
        .await
        .unwrap();
    assert_eq!(
        callee_session.remote_candidates(),
        vec![
            IceCandidate::new("c1", 0, "0"),
            IceCandidate::new("c2", 0, "0")
        ]
    );

    callee_session.emit_candidate(IceCandidate::new("r1", 0, "0"));
    wait_until(TEST_TIMEOUT, || caller_session.remote_candidates().len() == 1)
        .await
        .unwrap();

    let caller_state = rig
        .caller()
        .machine
        .subscribe_state()
        .wait_for_state(TEST_TIMEOUT, |state| {
            state.candidates.sent == 2 && state.candidates.applied == 1
        })
        .await
        .unwrap();
    assert_eq!(caller_state.phase, Phase::Outgoing);
    rig.callee()
        .machine
        .subscribe_state()
        .wait_for_state(TEST_TIMEOUT, |state| {
            state.candidates.sent == 1 && state.candidates.applied == 2
        })
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn malformed_candidate_is_skipped() {
    let rig = TestRig::new().await.unwrap();
    let (call_id, _caller_session, callee_session) = rig.dial().await.unwrap();

    let collection = CollectionLayout::default().candidates(&call_id, Role::Initiator);
    let serde_json::Value::Object(malformed) = json!({"sdpMLineIndex": 0, "sdpMid": "0"}) else {
        unreachable!()
    };
    let serde_json::Value::Object(valid) =
        json!({"candidate": "c1", "sdpMLineIndex": 0, "sdpMid": "0"})
    else {
        unreachable!()
    };
    rig.channel()
        .create_or_update(&collection, "malformed", malformed)
        .await
        .unwrap();
    rig.channel()
        .create_or_update(&collection, "valid", valid)
        .await
        .unwrap();

    wait_until(TEST_TIMEOUT, || !callee_session.remote_candidates().is_empty())
        .await
        .unwrap();
    assert_eq!(
        callee_session.remote_candidates(),
        vec![IceCandidate::new("c1", 0, "0")]
    );
    let state = rig
        .callee()
        .machine
        .subscribe_state()
        .wait_for_state(TEST_TIMEOUT, |state| state.candidates.applied == 1)
        .await
        .unwrap();
    assert_matches!(state.phase, Phase::Incoming { .. });
}

#[test(tokio::test)]
async fn connectivity_failure_ends_active_call() {
    let mut rig = TestRig::new().await.unwrap();
    let (call_id, caller_session, callee_session) = rig.connect().await.unwrap();

    caller_session.set_connectivity(ConnectivityState::Failed);
    assert_eq!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Ended { .. }))
            .await
            .unwrap(),
        CallEvent::Ended {
            call_id: call_id.clone(),
            reason: EndReason::Connectivity(ConnectivityState::Failed),
        }
    );
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert!(caller_session.is_closed());
    assert_eq!(rig.caller().engine.audio_session_history(), vec![true, false]);
    assert_call_deleted(rig.channel().as_ref(), &call_id).await;

    assert_eq!(
        rig.callee_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Ended { .. }))
            .await
            .unwrap(),
        CallEvent::Ended {
            call_id: call_id.clone(),
            reason: EndReason::RemoteHangup,
        }
    );
    rig.callee()
        .wait_for_phase(|phase| *phase == Phase::Idle)
        .await
        .unwrap();
    assert!(callee_session.is_closed());

    rig.caller().machine.end_call().await.unwrap();
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
}

#[test(tokio::test)]
async fn ending_twice_is_a_no_op() {
    let mut rig = TestRig::new().await.unwrap();
    let (call_id, _caller_session, _callee_session) = rig.connect().await.unwrap();

    rig.caller().machine.end_call().await.unwrap();
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert_call_deleted(rig.channel().as_ref(), &call_id).await;
    rig.caller().machine.end_call().await.unwrap();

    assert_eq!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Ended { .. }))
            .await
            .unwrap(),
        CallEvent::Ended {
            call_id: call_id.clone(),
            reason: EndReason::LocalHangup,
        }
    );
    assert!(
        rig.caller_mut()
            .events
            .recv_with_timeout(Duration::from_millis(100), |event| {
                matches!(event, CallEvent::Ended { .. })
            })
            .await
            .is_err()
    );
}

#[test(tokio::test)]
async fn remote_hangup_ends_call() {
    let mut rig = TestRig::new().await.unwrap();
    let (call_id, caller_session, _callee_session) = rig.connect().await.unwrap();

    rig.callee().machine.end_call().await.unwrap();
    assert_eq!(rig.callee().machine.phase(), Phase::Idle);

    assert_eq!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Ended { .. }))
            .await
            .unwrap(),
        CallEvent::Ended {
            call_id,
            reason: EndReason::RemoteHangup,
        }
    );
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert!(caller_session.is_closed());
}

#[test(tokio::test)]
async fn second_call_is_rejected_while_active() {
    let rig = TestRig::new().await.unwrap();
    rig.dial().await.unwrap();

    assert_matches!(
        rig.caller()
            .machine
            .start_call(CALLEE_ID, CALLER_ID)
            .await,
        Err(CallError::CallActive)
    );
    assert_matches!(
        rig.callee()
            .machine
            .start_call(CALLER_ID, CALLEE_ID)
            .await,
        Err(CallError::CallActive)
    );
    assert_eq!(rig.caller().engine.session_count(), 1);
    assert_eq!(rig.callee().engine.session_count(), 1);
}

#[test(tokio::test)]
async fn answer_without_incoming_call() {
    let rig = TestRig::new().await.unwrap();
    assert_matches!(
        rig.callee().machine.answer_call().await,
        Err(CallError::NoIncomingCall)
    );

    rig.dial().await.unwrap();
    assert_matches!(
        rig.caller().machine.answer_call().await,
        Err(CallError::NoIncomingCall)
    );
    rig.callee().machine.answer_call().await.unwrap();
}

#[test(tokio::test)]
async fn mute_persists_across_calls() {
    let rig = TestRig::new().await.unwrap();
    assert!(rig.caller().machine.toggle_mute().await.unwrap());
    assert!(rig.caller().machine.state().muted);

    let (_call_id, caller_session, callee_session) = rig.dial().await.unwrap();
    let track = caller_session.track().unwrap();
    assert!(!track.is_enabled());
    assert!(callee_session.track().unwrap().is_enabled());

    assert!(!rig.caller().machine.toggle_mute().await.unwrap());
    assert!(track.is_enabled());
    assert!(rig.caller().machine.toggle_mute().await.unwrap());
    assert!(!track.is_enabled());

    rig.caller().machine.end_call().await.unwrap();
    assert!(rig.caller().machine.state().muted);
}

#[test(tokio::test)]
async fn incoming_call_waits_until_idle() {
    let mut rig = TestRig::new().await.unwrap();
    let (first_call_id, _caller_session, _callee_session) = rig.connect().await.unwrap();

    let mut third = TestPeer::new(
        "UserC",
        Arc::clone(rig.channel()),
        MockMediaEngine::new(),
        CancellationToken::new(),
    );
    let second_call_id = third.machine.start_call(CALLEE_ID, "UserC").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.callee().machine.phase(), Phase::Active);
    assert_eq!(rig.callee().engine.session_count(), 1);

    rig.caller().machine.end_call().await.unwrap();
    assert_eq!(
        rig.callee_mut()
            .wait_for_event(|event| {
                matches!(event, CallEvent::IncomingCall { caller_id, .. } if caller_id == "UserC")
            })
            .await
            .unwrap(),
        CallEvent::IncomingCall {
            call_id: second_call_id.clone(),
            caller_id: "UserC".to_string(),
        }
    );
    assert_ne!(first_call_id, second_call_id);
    rig.callee()
        .wait_for_phase(|phase| {
            *phase
                == Phase::Incoming {
                    caller_id: "UserC".to_string(),
                }
        })
        .await
        .unwrap();

    let third_session = third.session(1).await.unwrap();
    wait_until(TEST_TIMEOUT, || third_session.remote_description().is_some())
        .await
        .unwrap();
    third_session.set_connectivity(ConnectivityState::Connected);
    third
        .wait_for_event(|event| matches!(event, CallEvent::Connected { .. }))
        .await
        .unwrap();
    third.machine.shutdown().await;
}

#[test(tokio::test)]
async fn stopped_listener_ignores_calls() {
    let rig = TestRig::new().await.unwrap();
    rig.callee().machine.stop_listening().await.unwrap();

    let call_id = rig
        .caller()
        .machine
        .start_call(CALLEE_ID, CALLER_ID)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(rig.callee().machine.phase(), Phase::Idle);
    assert_eq!(rig.callee().engine.session_count(), 0);
    let record = call_record(rig.channel().as_ref(), &call_id).await.unwrap();
    assert_eq!(record.status, CallStatus::Ringing);
    assert_eq!(record.answer, None);
}

#[test(tokio::test)]
async fn offer_failure_keeps_call_outgoing() {
    let channel = Arc::new(MemoryChannel::new());
    let rig = TestRig::with_channel(
        Arc::clone(&channel),
        MockMediaEngine::with_script(MockScript {
            fail_create_offer: true,
            ..Default::default()
        }),
        MockMediaEngine::new(),
    )
    .await
    .unwrap();

    assert_matches!(
        rig.caller()
            .machine
            .start_call(CALLEE_ID, CALLER_ID)
            .await,
        Err(CallError::Media(_))
    );
    assert_eq!(rig.caller().machine.phase(), Phase::Outgoing);
    assert!(
        channel
            .list_documents(&CollectionLayout::default().calls())
            .await
            .unwrap()
            .is_empty()
    );

    rig.caller().machine.end_call().await.unwrap();
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert!(rig.caller().session(1).await.unwrap().is_closed());
}

#[test(tokio::test)]
async fn record_write_failure_fails_call() {
    let (mut rig, channel) = recording_rig().await;
    channel.fail(
        OperationKind::CreateOrUpdate,
        CollectionLayout::default().calls(),
        None,
    );

    assert_matches!(
        rig.caller()
            .machine
            .start_call(CALLEE_ID, CALLER_ID)
            .await,
        Err(CallError::Channel(ChannelError::Transport(_)))
    );
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert_matches!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Ended { .. }))
            .await
            .unwrap(),
        CallEvent::Ended {
            reason: EndReason::Failed,
            ..
        }
    );
    assert_eq!(rig.callee().engine.session_count(), 0);
}

#[test(tokio::test)]
async fn parent_delete_failure_is_reported() {
    let (mut rig, channel) = recording_rig().await;
    let (call_id, _caller_session, _callee_session) = rig.connect().await.unwrap();
    channel.fail(
        OperationKind::Delete,
        CollectionLayout::default().calls(),
        Some(call_id.as_str()),
    );

    assert_matches!(
        rig.caller().machine.end_call().await,
        Err(CallError::Channel(ChannelError::Transport(_)))
    );
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert_eq!(
        rig.caller_mut()
            .wait_for_event(|event| matches!(event, CallEvent::Error { .. }))
            .await
            .unwrap(),
        CallEvent::Error {
            call_id: Some(call_id.clone()),
            message: ChannelError::Transport("injected failure".to_string()).to_string(),
        }
    );
    assert!(call_record(channel.as_ref(), &call_id).await.is_some());
}

#[test(tokio::test)]
async fn shutdown_tears_down_live_call() {
    let mut rig = TestRig::new().await.unwrap();
    let (call_id, caller_session, _callee_session) = rig.connect().await.unwrap();

    rig.caller().machine.shutdown().await;
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
    assert!(caller_session.is_closed());
    assert_call_deleted(rig.channel().as_ref(), &call_id).await;
    assert_matches!(
        rig.caller().machine.start_call(CALLEE_ID, CALLER_ID).await,
        Err(CallError::Stopped)
    );

    rig.callee_mut()
        .wait_for_event(|event| {
            matches!(
                event,
                CallEvent::Ended {
                    reason: EndReason::RemoteHangup,
                    ..
                }
            )
        })
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn slow_teardown_keeps_machine_responsive() {
    let (rig, channel) = recording_rig().await;
    rig.connect().await.unwrap();
    channel.delay(OperationKind::List, Duration::from_millis(300));

    let caller = rig.caller().machine.clone();
    let end = tokio::spawn(async move { caller.end_call().await });
    rig.caller()
        .wait_for_phase(|phase| *phase == Phase::Ended)
        .await
        .unwrap();

    let muted = tokio::time::timeout(
        Duration::from_millis(100),
        rig.caller().machine.toggle_mute(),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(muted);
    assert_eq!(rig.caller().machine.phase(), Phase::Ended);

    end.await.unwrap().unwrap();
    assert_eq!(rig.caller().machine.phase(), Phase::Idle);
}

#[test(tokio::test)]
async fn zero_queue_capacity_still_runs() {
    let config = CallConfig {
        channels: ChannelsConfig {
            commands: 0,
            events: 0,
            call_events: 0,
        },
        ..Default::default()
    };
    let machine = CallStateMachine::new(
        Arc::new(MemoryChannel::new()),
        Arc::new(MockMediaEngine::new()),
        &config,
        CancellationToken::new(),
    );

    assert!(machine.toggle_mute().await.unwrap());
    machine.start_call(CALLEE_ID, CALLER_ID).await.unwrap();
    assert_eq!(machine.phase(), Phase::Outgoing);
    machine.end_call().await.unwrap();
    assert_eq!(machine.phase(), Phase::Idle);
    machine.shutdown().await;
}
