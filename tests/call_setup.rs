//! Call setup and two-peer scenarios over in-process transports

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use rtpcall::mux::ConsumerHandle;
use rtpcall::transport::{IcePipes, IceTransport};
use rtpcall::{
    CallConfig, CallEvent, ChannelConfig, Direction, Error, MediaKind, OscArg, OscMessage,
    SessionId, SessionMux,
};

/// Log to stderr per RUST_LOG when a scenario is run by hand
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A pair of linked transports plus the senders that must stay alive for
/// the duration of the scenario
struct PipePair {
    a: IceTransport,
    b: IceTransport,
    _keepalive: Vec<mpsc::UnboundedSender<Bytes>>,
}

/// Build two transports where A's output feeds B's input and B's RTCP
/// output feeds A's RTCP input
fn linked_transports() -> PipePair {
    let (a_rtp_tx, b_rtp_rx) = mpsc::unbounded_channel();
    let (b_rtcp_tx, a_rtcp_rx) = mpsc::unbounded_channel();
    let (a_unused_rtp_tx, a_rtp_rx) = mpsc::unbounded_channel();
    let (a_rtcp_out_tx, _a_rtcp_out_rx) = mpsc::unbounded_channel();
    let (b_rtp_out_tx, _b_rtp_out_rx) = mpsc::unbounded_channel();
    let (b_unused_rtcp_tx, b_rtcp_rx) = mpsc::unbounded_channel();

    let a = IceTransport::new(IcePipes {
        rtp_tx: a_rtp_tx,
        rtp_rx: a_rtp_rx,
        rtcp_rx: a_rtcp_rx,
        rtcp_tx: a_rtcp_out_tx,
    });
    let b = IceTransport::new(IcePipes {
        rtp_tx: b_rtp_out_tx,
        rtp_rx: b_rtp_rx,
        rtcp_rx: b_rtcp_rx,
        rtcp_tx: b_rtcp_tx,
    });
    PipePair { a, b, _keepalive: vec![a_unused_rtp_tx, b_unused_rtcp_tx] }
}

#[tokio::test]
async fn two_channel_call_numbers_sessions_and_rejects_late_adds() {
    init_tracing();
    let m = SessionMux::new(CallConfig::default());

    let video = m
        .add_channel(MediaKind::Video, Direction::Send, ChannelConfig::video(640, 480, 30))
        .unwrap();
    let audio = m
        .add_channel(MediaKind::Audio, Direction::Send, ChannelConfig::audio())
        .unwrap();
    assert_eq!(video, SessionId(0));
    assert_eq!(audio, SessionId(1));

    m.start().await.unwrap();

    let err = m
        .add_channel(MediaKind::Depth, Direction::Send, ChannelConfig::depth(640, 480, 30))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    // Channel descriptions follow the wire contract
    let descs = m.descriptions();
    assert_eq!(descs.len(), 2);
    assert_eq!(descs[0].media, "video");
    assert_eq!(descs[0].payload_type, 96);
    assert_eq!(descs[1].media, "audio");
    assert_eq!(descs[1].clock_rate, 48_000);
}

#[tokio::test]
async fn video_frames_cross_between_two_muxes() {
    init_tracing();
    let pair = linked_transports();

    let sender = SessionMux::new(CallConfig::default());
    let send_id = sender
        .add_channel(MediaKind::Video, Direction::Send, ChannelConfig::video(4, 4, 30))
        .unwrap();
    sender.attach_send_transport(send_id, Box::new(pair.a)).unwrap();
    sender.start().await.unwrap();

    let receiver = SessionMux::new(CallConfig::default());
    let recv_id = receiver
        .add_channel(MediaKind::Video, Direction::Recv, ChannelConfig::video(4, 4, 30))
        .unwrap();
    let Some(ConsumerHandle::Video(mut frames)) = receiver.take_consumer(recv_id) else {
        panic!("expected a video consumer");
    };
    receiver.on_receive_pad_ready(recv_id, Box::new(pair.b));

    let frame = vec![7u8; 4 * 4 * 3];
    sender.submit_video_frame(send_id, &frame).unwrap();

    let got = timeout(Duration::from_secs(2), async {
        loop {
            if frames.poll() {
                return frames.frame().unwrap().clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frame never arrived");
    assert_eq!(got.len(), 4 * 4 * 3);
    assert!(got.iter().all(|&b| b == 7));
}

#[tokio::test]
async fn osc_messages_cross_and_malformed_traffic_is_absorbed() {
    init_tracing();
    let pair = linked_transports();

    let sender = SessionMux::new(CallConfig::default());
    let send_id = sender
        .add_channel(MediaKind::Osc, Direction::Send, ChannelConfig::osc())
        .unwrap();
    sender.attach_send_transport(send_id, Box::new(pair.a)).unwrap();
    sender.start().await.unwrap();

    let receiver = SessionMux::new(CallConfig::default());
    let recv_id = receiver
        .add_channel(MediaKind::Osc, Direction::Recv, ChannelConfig::osc())
        .unwrap();
    let Some(ConsumerHandle::Osc(mut messages)) = receiver.take_consumer(recv_id) else {
        panic!("expected an OSC consumer");
    };
    receiver.on_receive_pad_ready(recv_id, Box::new(pair.b));

    let mut msg = OscMessage::new("/wand/position");
    msg.push(OscArg::Float(0.25));
    msg.push(OscArg::Int32(-3));
    msg.push(OscArg::String("ok".into()));
    sender.send_osc(send_id, &msg).unwrap();

    let got = timeout(Duration::from_secs(2), async {
        loop {
            if messages.poll() {
                return messages.message().clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("message never arrived");
    assert_eq!(got, msg);
}

#[tokio::test]
async fn receiver_reports_establish_the_senders_session() {
    init_tracing();
    let pair = linked_transports();

    // Sender: a video send session whose RTCP input is fed by the
    // receiver's periodic reports
    let mut sender = SessionMux::new(CallConfig::default());
    let mut sender_events = sender.take_events().unwrap();
    let send_id = sender
        .add_channel(MediaKind::Video, Direction::Send, ChannelConfig::video(2, 2, 30))
        .unwrap();
    sender.attach_send_transport(send_id, Box::new(pair.a)).unwrap();
    sender.start().await.unwrap();

    let receiver = SessionMux::new(CallConfig::default());
    let recv_id = receiver
        .add_channel(MediaKind::Video, Direction::Recv, ChannelConfig::video(2, 2, 30))
        .unwrap();
    receiver.on_receive_pad_ready(recv_id, Box::new(pair.b));

    for _ in 0..3 {
        sender.submit_video_frame(send_id, &vec![1u8; 2 * 2 * 3]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The receiver's first report carries the remote SSRC back and moves
    // the send session out of its startup state
    let event = timeout(Duration::from_secs(3), sender_events.recv())
        .await
        .expect("no event before timeout")
        .expect("event channel closed");
    assert!(matches!(event, CallEvent::SsrcObserved { session, .. } if session == send_id));
}

#[tokio::test]
async fn crafted_loss_report_triggers_a_keyframe_request() {
    init_tracing();
    use rtpcall::rtcp::{ReportBlock, RtcpPacket};

    // Feed a receiver report with growing loss straight into a send
    // session's RTCP input and watch the key-frame request come out
    let (rtp_in_tx, rtp_in_rx) = mpsc::unbounded_channel();
    let (rtcp_in_tx, rtcp_in_rx) = mpsc::unbounded_channel();
    let (rtp_out_tx, _rtp_out_rx) = mpsc::unbounded_channel();
    let (rtcp_out_tx, _rtcp_out_rx) = mpsc::unbounded_channel();
    let transport = IceTransport::new(IcePipes {
        rtp_tx: rtp_out_tx,
        rtp_rx: rtp_in_rx,
        rtcp_rx: rtcp_in_rx,
        rtcp_tx: rtcp_out_tx,
    });
    let _keep = rtp_in_tx;

    let mut sender = SessionMux::new(CallConfig::default());
    let mut events = sender.take_events().unwrap();
    let send_id = sender
        .add_channel(MediaKind::Video, Direction::Send, ChannelConfig::video(2, 2, 30))
        .unwrap();
    sender.attach_send_transport(send_id, Box::new(transport)).unwrap();
    sender.start().await.unwrap();

    let report = |lost: i32| {
        RtcpPacket::ReceiverReport {
            ssrc: 0x5151,
            reports: vec![ReportBlock {
                ssrc: 1,
                fraction_lost: 0,
                cumulative_lost: lost,
                highest_seq: 100,
                jitter: 0,
                last_sr: 0,
                delay_since_last_sr: 0,
            }],
        }
        .serialize()
    };

    rtcp_in_tx.send(report(0)).unwrap();
    rtcp_in_tx.send(report(3)).unwrap();
    rtcp_in_tx.send(report(3)).unwrap();

    let first = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(first, CallEvent::SsrcObserved { .. }));
    let second = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert_eq!(second, CallEvent::KeyFrameRequested { session: send_id });

    // The equal reading produced no second request; the cached stats hold
    // the latest loss count
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(sender.get_stats(send_id).unwrap().packets_lost, 3);
}

#[tokio::test]
async fn keyframe_dedup_on_equal_loss_readings() {
    init_tracing();
    // Pure-logic check at the call level: two polls with the same
    // cumulative loss produce one request
    use rtpcall::types::RtcpSnapshot;
    use rtpcall::RecoveryController;

    let mut c = RecoveryController::new(200);
    c.register(SessionId(0), MediaKind::Video);

    let lossy = RtcpSnapshot { packets_lost: 2, ..Default::default() };
    assert!(c.evaluate(SessionId(0), &lossy));
    assert!(!c.evaluate(SessionId(0), &lossy));
}

#[tokio::test]
async fn latency_change_widens_the_live_jitter_buffer() {
    init_tracing();
    use rtpcall::rtp::RtpPacket;

    let packet = |seq: u16| {
        RtpPacket {
            marker: true,
            payload_type: 96,
            sequence: seq,
            timestamp: 0,
            ssrc: 0x7777,
            payload: Bytes::copy_from_slice(&[seq as u8; 12]),
        }
        .serialize()
    };

    let (rtp_in_tx, rtp_in_rx) = mpsc::unbounded_channel();
    let (_rtcp_in_tx, rtcp_in_rx) = mpsc::unbounded_channel();
    let (rtp_out_tx, _rtp_out_rx) = mpsc::unbounded_channel();
    let (rtcp_out_tx, _rtcp_out_rx) = mpsc::unbounded_channel();

    // At the default 200 ms and 30 fps the buffer holds 6 packets; after
    // raising the latency to 2000 ms the already-linked chain must hold
    // 60 and keep a run of 8 waiting behind a missing head
    let receiver = SessionMux::new(CallConfig::default());
    let recv_id = receiver
        .add_channel(MediaKind::Video, Direction::Recv, ChannelConfig::video(2, 2, 30))
        .unwrap();
    let Some(ConsumerHandle::Video(mut frames)) = receiver.take_consumer(recv_id) else {
        panic!("expected a video consumer");
    };
    receiver.on_receive_pad_ready(
        recv_id,
        Box::new(IceTransport::new(IcePipes {
            rtp_tx: rtp_out_tx,
            rtp_rx: rtp_in_rx,
            rtcp_rx: rtcp_in_rx,
            rtcp_tx: rtcp_out_tx,
        })),
    );

    receiver.set_latency(2000).unwrap();

    rtp_in_tx.send(packet(0)).unwrap();
    timeout(Duration::from_secs(2), async {
        loop {
            if frames.poll() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first frame never arrived");

    // Sequence 1 goes missing; 2..=9 must wait instead of overflowing the
    // old capacity and being released past the gap
    for seq in 2..=9u16 {
        rtp_in_tx.send(packet(seq)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!frames.poll(), "frames surfaced past the gap");

    // The missing head arrives and everything drains in order
    rtp_in_tx.send(packet(1)).unwrap();
    let got = timeout(Duration::from_secs(2), async {
        loop {
            if frames.poll() {
                return frames.frame().unwrap().clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("drained frames never arrived");
    assert_eq!(got[0], 9);
}

#[tokio::test]
async fn receive_sessions_report_with_distinct_reporter_ssrcs() {
    init_tracing();
    use rtpcall::rtcp::RtcpPacket;
    use rtpcall::rtp::RtpPacket;

    // Spin up one receive session, feed it a packet, and capture the SSRC
    // its periodic receiver report is sent under
    async fn reporter_ssrc() -> u32 {
        let (rtp_in_tx, rtp_in_rx) = mpsc::unbounded_channel();
        let (_rtcp_in_tx, rtcp_in_rx) = mpsc::unbounded_channel();
        let (rtp_out_tx, _rtp_out_rx) = mpsc::unbounded_channel();
        let (rtcp_out_tx, mut rtcp_out_rx) = mpsc::unbounded_channel();

        let receiver = SessionMux::new(CallConfig::default());
        let recv_id = receiver
            .add_channel(MediaKind::Video, Direction::Recv, ChannelConfig::video(2, 2, 30))
            .unwrap();
        receiver.on_receive_pad_ready(
            recv_id,
            Box::new(IceTransport::new(IcePipes {
                rtp_tx: rtp_out_tx,
                rtp_rx: rtp_in_rx,
                rtcp_rx: rtcp_in_rx,
                rtcp_tx: rtcp_out_tx,
            })),
        );

        let wire = RtpPacket {
            marker: true,
            payload_type: 96,
            sequence: 1,
            timestamp: 0,
            ssrc: 0x1234,
            payload: Bytes::from_static(&[0u8; 12]),
        }
        .serialize();
        rtp_in_tx.send(wire).unwrap();

        loop {
            let report = rtcp_out_rx.recv().await.expect("rtcp pipe closed");
            if let Ok(RtcpPacket::ReceiverReport { ssrc, .. }) = RtcpPacket::parse(report) {
                return ssrc;
            }
        }
    }

    let first = timeout(Duration::from_secs(3), reporter_ssrc()).await.unwrap();
    let second = timeout(Duration::from_secs(3), reporter_ssrc()).await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn reset_allows_a_full_second_call() {
    init_tracing();
    let m = SessionMux::new(CallConfig::default());
    m.add_channel(MediaKind::Video, Direction::Send, ChannelConfig::video(640, 480, 30))
        .unwrap();
    m.start().await.unwrap();

    m.reset();

    let id = m
        .add_channel(MediaKind::Audio, Direction::Send, ChannelConfig::audio())
        .unwrap();
    assert_eq!(id, SessionId(0));
    m.start().await.unwrap();
}
