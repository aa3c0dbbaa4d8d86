use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use peer_call::mock::{MockCapture, MockPeerFactory, MockRender, PeerOp, host_candidate};
use peer_call::signaling::LoopbackSignaling;
use peer_call::{
    Call, CallError, CallParts, Disposition, InboundFrames, MediaConstraints, MediaStream,
    MediaTrack, NegotiationPhase, NegotiationStateMachine, RemoteCandidate, SdpKind,
    SessionDescription, SignalingChannel, SignalingMessage, TrackKind, Trigger,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

async fn within<F: Future>(future: F) -> F::Output {
    timeout(WAIT, future).await.expect("timed out")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

async fn wait_for_phase(machine: &NegotiationStateMachine, phase: NegotiationPhase) {
    let mut rx = machine.subscribe_phase();
    within(rx.wait_for(|current| *current == phase))
        .await
        .expect("phase channel closed");
}

struct Side {
    machine: Arc<NegotiationStateMachine>,
    signaling: Arc<LoopbackSignaling>,
    peers: Arc<MockPeerFactory>,
    render: Arc<MockRender>,
}

impl Side {
    fn new(signaling: Arc<LoopbackSignaling>) -> Self {
        let peers = MockPeerFactory::new();
        let render = MockRender::new();
        let (machine, _events) = NegotiationStateMachine::new(
            CallParts {
                signaling: signaling.clone(),
                peers: peers.clone(),
                capture: MockCapture::new(),
                render: render.clone(),
            },
            MediaConstraints::default(),
        );
        Self {
            machine,
            signaling,
            peers,
            render,
        }
    }

    fn parts(&self) -> CallParts {
        CallParts {
            signaling: self.signaling.clone(),
            peers: self.peers.clone(),
            capture: MockCapture::new(),
            render: self.render.clone(),
        }
    }
}

/// Two sides over a loopback pair, each returned with the frames sent to it.
fn pair() -> ((Side, InboundFrames), (Side, InboundFrames)) {
    let ((a, a_rx), (b, b_rx)) = LoopbackSignaling::pair();
    ((Side::new(a), a_rx), (Side::new(b), b_rx))
}

/// Hands every frame already waiting in `inbound` to `side`.
async fn pump(side: &Side, inbound: &mut InboundFrames) -> Vec<Disposition> {
    let mut dispositions = Vec::new();
    while let Ok(frame) = inbound.try_recv() {
        dispositions.push(side.machine.on_signaling_frame(&frame).await.unwrap());
    }
    dispositions
}

#[tokio::test]
async fn offer_answer_reaches_stable_on_both_sides() {
    init_tracing();
    let ((caller, mut caller_rx), (callee, mut callee_rx)) = pair();

    assert_eq!(caller.machine.start_call().await, Ok(Disposition::Applied));
    assert_eq!(caller.machine.phase(), NegotiationPhase::Offering);

    assert_eq!(pump(&callee, &mut callee_rx).await, vec![Disposition::Applied]);
    assert_eq!(callee.machine.phase(), NegotiationPhase::Stable);

    assert_eq!(pump(&caller, &mut caller_rx).await, vec![Disposition::Applied]);
    assert_eq!(caller.machine.phase(), NegotiationPhase::Stable);

    assert!(
        caller
            .peers
            .latest()
            .unwrap()
            .ops()
            .contains(&PeerOp::ApplyRemote(SdpKind::Answer))
    );
    assert_eq!(caller.render.local_streams().len(), 1);
    assert_eq!(callee.render.local_streams().len(), 1);
}

#[tokio::test]
async fn early_candidates_are_committed_in_order_after_the_offer() {
    init_tracing();
    let ((caller, _caller_rx), (callee, mut callee_rx)) = pair();

    for n in 1..=3 {
        caller
            .signaling
            .send(&SignalingMessage::Candidate(host_candidate(n)))
            .await
            .unwrap();
    }
    caller.machine.start_call().await.unwrap();

    assert_eq!(
        pump(&callee, &mut callee_rx).await,
        vec![
            Disposition::Buffered,
            Disposition::Buffered,
            Disposition::Buffered,
            Disposition::Applied,
        ]
    );
    assert_eq!(callee.machine.phase(), NegotiationPhase::Stable);
    assert_eq!(callee.machine.pending_len(), 0);

    let ops = callee.peers.latest().unwrap().ops();
    let applied = ops
        .iter()
        .position(|op| *op == PeerOp::ApplyRemote(SdpKind::Offer))
        .unwrap();
    let first_candidate = ops
        .iter()
        .position(|op| matches!(op, PeerOp::AddCandidate(_)))
        .unwrap();
    assert!(applied < first_candidate);
    assert_eq!(
        callee.peers.latest().unwrap().committed_candidates(),
        (1..=3)
            .map(|n| RemoteCandidate::Candidate(host_candidate(n)))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn mutual_glare_leaves_both_sides_offering() {
    init_tracing();
    let ((a, mut a_rx), (b, mut b_rx)) = pair();

    assert_eq!(a.machine.start_call().await, Ok(Disposition::Applied));
    assert_eq!(b.machine.start_call().await, Ok(Disposition::Applied));

    let glare = |phase| {
        vec![Disposition::Dropped(CallError::InvalidTransition {
            phase,
            trigger: Trigger::Offer,
        })]
    };
    assert_eq!(pump(&a, &mut a_rx).await, glare(NegotiationPhase::Offering));
    assert_eq!(pump(&b, &mut b_rx).await, glare(NegotiationPhase::Offering));
    assert_eq!(a.machine.phase(), NegotiationPhase::Offering);
    assert_eq!(b.machine.phase(), NegotiationPhase::Offering);
}

#[tokio::test]
async fn malformed_frames_leave_phase_and_queue_alone() {
    init_tracing();
    let ((caller, _caller_rx), (callee, mut callee_rx)) = pair();
    caller.machine.start_call().await.unwrap();
    pump(&callee, &mut callee_rx).await;
    assert_eq!(callee.machine.phase(), NegotiationPhase::Stable);

    let frames = [
        "not json",
        r#"{"type":"sdp-answer"}"#,
        r#"{"type":"sdp-offer","data":{"type":"answer","sdp":"v=0"}}"#,
        r#"{"type":"ice-candidate","data":{"sdpMid":"0"}}"#,
        r#"{"type":"hangup","data":null}"#,
    ];
    for frame in frames {
        let disposition = callee.machine.on_signaling_frame(frame).await.unwrap();
        assert!(
            matches!(disposition, Disposition::Dropped(CallError::MalformedMessage(_))),
            "{frame}: {disposition:?}"
        );
        assert_eq!(callee.machine.phase(), NegotiationPhase::Stable);
        assert_eq!(callee.machine.pending_len(), 0);
    }
}

#[derive(Debug, Clone, Copy)]
enum Input {
    StartCall,
    Offer,
    Answer,
    Candidate,
}

const INPUTS: [Input; 4] = [Input::StartCall, Input::Offer, Input::Answer, Input::Candidate];

fn sequences(max_len: usize) -> Vec<Vec<Input>> {
    let mut all = vec![vec![]];
    let mut frontier = vec![vec![]];
    for _ in 0..max_len {
        let mut next = Vec::new();
        for seq in &frontier {
            for input in INPUTS {
                let mut longer: Vec<Input> = seq.clone();
                longer.push(input);
                next.push(longer);
            }
        }
        all.extend(next.iter().cloned());
        frontier = next;
    }
    all
}

fn predicted(phase: NegotiationPhase, input: Input) -> NegotiationPhase {
    use NegotiationPhase::*;
    match (phase, input) {
        (Idle, Input::StartCall) => Offering,
        (Idle, Input::Offer) => Stable,
        (Offering, Input::Answer) => Stable,
        (phase, _) => phase,
    }
}

#[tokio::test]
async fn every_short_trigger_sequence_follows_the_table() {
    for seq in sequences(4) {
        let (side, _outbound) = {
            let (signaling, outbound) = LoopbackSignaling::detached();
            (Side::new(signaling), outbound)
        };
        let mut expected = NegotiationPhase::Idle;
        let mut delivered = Vec::new();

        for input in &seq {
            let before_queue = side.machine.pending_len();
            let disposition = match input {
                Input::StartCall => side.machine.start_call().await,
                Input::Offer => {
                    side.machine
                        .on_signaling_message(SignalingMessage::Offer(SessionDescription::offer(
                            "v=0",
                        )))
                        .await
                }
                Input::Answer => {
                    side.machine
                        .on_signaling_message(SignalingMessage::Answer(
                            SessionDescription::answer("v=0"),
                        ))
                        .await
                }
                Input::Candidate => {
                    let candidate = host_candidate(delivered.len() as u8 + 1);
                    delivered.push(RemoteCandidate::Candidate(candidate.clone()));
                    side.machine
                        .on_signaling_message(SignalingMessage::Candidate(candidate))
                        .await
                }
            }
            .unwrap_or_else(|err| panic!("{seq:?}: {err}"));

            expected = predicted(expected, *input);
            assert_eq!(side.machine.phase(), expected, "{seq:?}");
            if let Disposition::Dropped(_) = disposition {
                assert_eq!(side.machine.pending_len(), before_queue, "{seq:?}");
            }
        }

        let committed = side
            .peers
            .latest()
            .map(|peer| peer.committed_candidates())
            .unwrap_or_default();
        if expected == NegotiationPhase::Stable {
            assert_eq!(committed, delivered, "{seq:?}");
            assert_eq!(side.machine.pending_len(), 0, "{seq:?}");
        } else {
            assert!(committed.is_empty(), "{seq:?}");
            assert_eq!(side.machine.pending_len(), delivered.len(), "{seq:?}");
        }
    }
}

#[tokio::test]
async fn in_flight_offer_blocks_competing_triggers() {
    init_tracing();
    let ((caller, _caller_rx), _callee) = pair();
    caller.peers.hold_local_descriptions();

    let machine = caller.machine.clone();
    let offering = tokio::spawn(async move { machine.start_call().await });
    wait_for_phase(&caller.machine, NegotiationPhase::Offering).await;

    assert_eq!(
        caller.machine.start_call().await,
        Ok(Disposition::Dropped(CallError::InvalidTransition {
            phase: NegotiationPhase::Offering,
            trigger: Trigger::StartCall,
        }))
    );
    assert_eq!(
        caller
            .machine
            .on_signaling_message(SignalingMessage::Offer(SessionDescription::offer("v=0")))
            .await,
        Ok(Disposition::Dropped(CallError::InvalidTransition {
            phase: NegotiationPhase::Offering,
            trigger: Trigger::Offer,
        }))
    );

    caller.peers.release_local_descriptions();
    assert_eq!(within(offering).await.unwrap(), Ok(Disposition::Applied));
    assert_eq!(caller.signaling.sent().len(), 1);
}

#[tokio::test]
async fn hang_up_cancels_an_offer_in_flight() {
    init_tracing();
    let ((caller, _caller_rx), _callee) = pair();
    caller.peers.hold_local_descriptions();

    let machine = caller.machine.clone();
    let offering = tokio::spawn(async move { machine.start_call().await });
    wait_for_phase(&caller.machine, NegotiationPhase::Offering).await;
    let cancelled = caller.machine.session_id().unwrap();

    caller.machine.hang_up().await;
    caller.peers.release_local_descriptions();

    assert_eq!(
        within(offering).await.unwrap(),
        Ok(Disposition::Dropped(CallError::SessionReplaced(cancelled)))
    );
    assert_eq!(caller.machine.phase(), NegotiationPhase::Idle);
    assert!(caller.signaling.sent().is_empty());
    assert!(caller.peers.peers()[0].is_closed());
}

#[tokio::test]
async fn hang_up_cancels_an_answer_in_flight() {
    init_tracing();
    let ((_caller, _caller_rx), (callee, _callee_rx)) = pair();
    callee.peers.hold_local_descriptions();

    let machine = callee.machine.clone();
    let answering = tokio::spawn(async move {
        machine
            .on_signaling_message(SignalingMessage::Offer(SessionDescription::offer("v=0")))
            .await
    });
    wait_for_phase(&callee.machine, NegotiationPhase::Answering).await;

    callee.machine.hang_up().await;
    callee.peers.release_local_descriptions();

    assert!(matches!(
        within(answering).await.unwrap(),
        Ok(Disposition::Dropped(CallError::SessionReplaced(_)))
    ));
    assert_eq!(callee.machine.phase(), NegotiationPhase::Idle);
    assert!(callee.signaling.sent().is_empty());
}

#[tokio::test]
async fn calls_negotiate_through_their_pumps() {
    init_tracing();
    let ((a, a_rx), (b, b_rx)) = pair();
    let caller = Call::connect(a.parts(), MediaConstraints::default(), a_rx)
        .await
        .unwrap();
    let callee = Call::connect(b.parts(), MediaConstraints::default(), b_rx)
        .await
        .unwrap();

    assert_eq!(caller.start_call().await, Ok(Disposition::Applied));
    wait_for_phase(caller.machine(), NegotiationPhase::Stable).await;
    wait_for_phase(callee.machine(), NegotiationPhase::Stable).await;

    // Locally gathered candidates travel through the event pump to the far side.
    let callee_peer = b.peers.latest().unwrap();
    callee_peer.events().local_candidate(host_candidate(5));
    callee_peer.events().gathering_complete();
    let caller_peer = a.peers.latest().unwrap();
    eventually(|| caller_peer.committed_candidates().len() == 2).await;
    assert_eq!(
        caller_peer.committed_candidates(),
        vec![
            RemoteCandidate::Candidate(host_candidate(5)),
            RemoteCandidate::EndOfCandidates,
        ]
    );

    // The remote stream is shown only once its track goes live.
    let stream = MediaStream::new("far-end");
    caller_peer
        .events()
        .remote_track(MediaTrack::muted("far-audio", TrackKind::Audio), stream);
    sleep(Duration::from_millis(20)).await;
    assert!(a.render.remote_streams().is_empty());
    caller_peer.events().track_unmuted("far-audio");
    eventually(|| a.render.remote_streams() == vec!["far-end".to_string()]).await;

    caller.hang_up().await;
    assert_eq!(caller.phase(), NegotiationPhase::Idle);
    assert!(caller_peer.is_closed());

    // The retired session can no longer reach the signaling channel.
    let sent = a.signaling.sent().len();
    caller_peer.events().local_candidate(host_candidate(6));
    sleep(Duration::from_millis(20)).await;
    assert_eq!(a.signaling.sent().len(), sent);
}
