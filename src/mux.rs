//! Session multiplexer: the per-call owner of all media sessions
//!
//! One [`SessionMux`] per call. Channels are added before `start()` and get
//! monotonically numbered sessions from 0; adding after start or starting
//! twice is a configuration error. Each session owns a transport: in direct
//! UDP mode the mux binds the port blocks itself at start, in NAT-traversed
//! mode the caller attaches externally connected transports (send sessions
//! via [`SessionMux::attach_send_transport`], receive sessions via
//! [`SessionMux::on_receive_pad_ready`] when the agent reports the pad).
//!
//! Receive chains wait in an explicit session-id map until their pad shows
//! up; binding happens at most once and a failed bind is logged, never
//! propagated. Per-session tasks parse incoming traffic, keep the RTCP
//! statistics cache fresh, and feed the recovery controller, which answers
//! with key-frame requests on the matching send chains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio_bridge::{EchoCancelBridge, QuantumSlicer};
use crate::codec::{NullAudioProcessor, PassthroughVideoCodec, PcmAudioCodec};
use crate::config::{CallConfig, ChannelConfig};
use crate::depth::{DepthCalibration, DepthColorLut, DepthDeltaCodec, DEFAULT_MAX_DEPTH};
use crate::error::{Error, Result};
use crate::events::CallEvent;
use crate::exchange::{FrameExchange, OscExchange};
use crate::osc::OscMessage;
use crate::pipeline::{
    AudioRecvChain, AudioSendChain, Depth16RecvChain, Depth16SendChain, DepthColorRecvChain,
    DepthColorSendChain, JitterBuffer, OscRecvChain, OscSendChain, RecvChain, VideoRecvChain,
    VideoSendChain,
};
use crate::recovery::RecoveryController;
use crate::rtcp::{ntp_now, ntp_short, ReceptionTracker, RtcpPacket};
use crate::rtp::RtpPacket;
use crate::transport::{PortBlock, Transport, TransportEvent, UdpTransport};
use crate::types::{
    ChannelDescription, Direction, MediaKind, RtcpSnapshot, SessionId, VideoFormat,
};

/// How often the per-session control loops report and evaluate
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Jitter buffer capacity for a stream at `fps` with the given latency
fn jitter_capacity(latency_ms: u32, fps: u32) -> usize {
    ((latency_ms as usize * fps.max(1) as usize) / 1000).max(4)
}

enum SendChain {
    Video(VideoSendChain),
    Depth(DepthColorSendChain),
    Depth16(Depth16SendChain),
    Audio(AudioSendChain),
    Osc(OscSendChain),
}

/// Consumer half handed to the application for a receive session
pub enum ConsumerHandle {
    /// Decoded video frames, newest wins
    Video(FrameExchange<Bytes>),
    /// Reconstructed depth frames, newest wins
    Depth(FrameExchange<Vec<u16>>),
    /// Decoded control messages, newest wins
    Osc(OscExchange),
    /// Decoded voice samples, queued in order
    Audio(mpsc::UnboundedReceiver<Vec<i16>>),
}

struct SessionEntry {
    kind: MediaKind,
    direction: Direction,
    config: ChannelConfig,
    send: Option<SendChain>,
    /// Wire bytes produced by the send chain, drained into the transport
    /// once one is wired
    send_out: Option<mpsc::UnboundedReceiver<Bytes>>,
    force_key: Arc<AtomicBool>,
    pending_recv: Option<RecvChain>,
    consumer: Option<ConsumerHandle>,
    /// Live jitter buffer capacity of a receive chain, retargeted on
    /// latency changes
    recv_capacity: Option<Arc<AtomicUsize>>,
    transport: Option<Box<dyn Transport>>,
    linked: bool,
}

struct MuxState {
    sessions: Vec<SessionEntry>,
    started: bool,
}

struct MuxInner {
    config: CallConfig,
    state: Mutex<MuxState>,
    recovery: Mutex<RecoveryController>,
    stats: RwLock<HashMap<SessionId, RtcpSnapshot>>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    audio_bridge: Mutex<Option<EchoCancelBridge>>,
    /// Quantum slicing for the capture path when no bridge is configured
    plain_slicer: Mutex<QuantumSlicer>,
    /// Calibration for receive depth16 sessions, refreshed per keyframe
    depth_calibration: Mutex<DepthCalibration>,
}

/// The per-call session multiplexer
pub struct SessionMux {
    inner: Arc<MuxInner>,
    events_rx: Option<mpsc::UnboundedReceiver<CallEvent>>,
}

impl SessionMux {
    /// New mux for one call
    pub fn new(config: CallConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let latency = config.latency_ms;
        let audio_bridge = config.audio_processing.clone().map(|apc| {
            EchoCancelBridge::new(Box::new(NullAudioProcessor::new()), apc)
        });
        Self {
            inner: Arc::new(MuxInner {
                config,
                state: Mutex::new(MuxState { sessions: Vec::new(), started: false }),
                recovery: Mutex::new(RecoveryController::new(latency)),
                stats: RwLock::new(HashMap::new()),
                events_tx,
                tasks: Mutex::new(Vec::new()),
                audio_bridge: Mutex::new(audio_bridge),
                plain_slicer: Mutex::new(QuantumSlicer::new()),
                depth_calibration: Mutex::new(DepthCalibration::default()),
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Replace the echo-cancel bridge, e.g. to inject a real processor
    pub fn set_audio_bridge(&self, bridge: EchoCancelBridge) {
        *self.inner.audio_bridge.lock() = Some(bridge);
    }

    /// Take the call event receiver. Yields once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.events_rx.take()
    }

    /// Add one media channel. Sessions are numbered monotonically from 0
    /// in add order; adding after `start()` is a configuration error.
    pub fn add_channel(
        &self,
        kind: MediaKind,
        direction: Direction,
        config: ChannelConfig,
    ) -> Result<SessionId> {
        let latency = self.inner.recovery.lock().latency_ms();
        let mut state = self.inner.state.lock();
        if state.started {
            return Err(Error::config("cannot add channels after start"));
        }
        let id = SessionId(state.sessions.len());

        let mut entry = SessionEntry {
            kind,
            direction,
            config: config.clone(),
            send: None,
            send_out: None,
            force_key: Arc::new(AtomicBool::new(false)),
            pending_recv: None,
            consumer: None,
            recv_capacity: None,
            transport: None,
            linked: false,
        };

        match direction {
            Direction::Send => {
                let (tx, rx) = mpsc::unbounded_channel();
                entry.send = Some(Self::build_send_chain(kind, &config, tx)?);
                entry.send_out = Some(rx);
            }
            Direction::Recv => {
                let capacity = jitter_capacity(latency, config.fps);
                let drop = self.inner.config.drop_on_latency;
                let (chain, consumer, cap) = Self::build_recv_chain(kind, &config, capacity, drop)?;
                entry.pending_recv = Some(chain);
                entry.consumer = Some(consumer);
                entry.recv_capacity = Some(cap);
            }
        }

        self.inner.recovery.lock().register(id, kind);
        info!("added {} {:?} channel as {}", kind, direction, id);
        state.sessions.push(entry);
        Ok(id)
    }

    fn build_send_chain(
        kind: MediaKind,
        config: &ChannelConfig,
        tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<SendChain> {
        let format = VideoFormat { width: config.width, height: config.height, channels: 3 };
        Ok(match kind {
            MediaKind::Video => SendChain::Video(VideoSendChain::new(
                kind,
                format,
                config.fps,
                Box::new(PassthroughVideoCodec::new(config.bitrate)),
                tx,
            )),
            MediaKind::Depth => SendChain::Depth(DepthColorSendChain::new(
                format,
                config.fps,
                DepthColorLut::new(DEFAULT_MAX_DEPTH),
                Box::new(PassthroughVideoCodec::new(config.bitrate)),
                tx,
            )),
            MediaKind::Depth16 => SendChain::Depth16(Depth16SendChain::new(
                format.pixel_count(),
                config.fps,
                DepthDeltaCodec::new(DepthCalibration::default()),
                tx,
            )),
            MediaKind::Audio => SendChain::Audio(AudioSendChain::new(
                Box::new(PcmAudioCodec::new(config.bitrate)),
                tx,
            )),
            MediaKind::Osc => SendChain::Osc(OscSendChain::new(tx)),
        })
    }

    fn build_recv_chain(
        kind: MediaKind,
        config: &ChannelConfig,
        capacity: usize,
        drop_on_overflow: bool,
    ) -> Result<(RecvChain, ConsumerHandle, Arc<AtomicUsize>)> {
        let jitter = JitterBuffer::new(capacity, drop_on_overflow);
        let cap = jitter.capacity_handle();
        let (chain, consumer) = match kind {
            MediaKind::Video => {
                let (producer, consumer) = FrameExchange::channel();
                (
                    RecvChain::Video(VideoRecvChain::new(
                        jitter,
                        Box::new(PassthroughVideoCodec::new(config.bitrate)),
                        producer,
                    )),
                    ConsumerHandle::Video(consumer),
                )
            }
            MediaKind::Depth => {
                let (producer, consumer) = FrameExchange::channel();
                (
                    RecvChain::Depth(DepthColorRecvChain::new(
                        jitter,
                        Box::new(PassthroughVideoCodec::new(config.bitrate)),
                        DepthColorLut::new(DEFAULT_MAX_DEPTH),
                        producer,
                    )),
                    ConsumerHandle::Depth(consumer),
                )
            }
            MediaKind::Depth16 => {
                let format =
                    VideoFormat { width: config.width, height: config.height, channels: 3 };
                let (producer, consumer) = FrameExchange::channel();
                (
                    RecvChain::Depth16(Depth16RecvChain::new(
                        jitter,
                        DepthDeltaCodec::new(DepthCalibration::default()),
                        format.pixel_count(),
                        producer,
                    )),
                    ConsumerHandle::Depth(consumer),
                )
            }
            MediaKind::Audio => {
                let (tx, rx) = mpsc::unbounded_channel();
                (
                    RecvChain::Audio(AudioRecvChain::new(
                        jitter,
                        Box::new(PcmAudioCodec::new(config.bitrate)),
                        tx,
                    )),
                    ConsumerHandle::Audio(rx),
                )
            }
            MediaKind::Osc => {
                let (producer, consumer) = OscExchange::channel();
                (RecvChain::Osc(OscRecvChain::new(jitter, producer)), ConsumerHandle::Osc(consumer))
            }
        };
        Ok((chain, consumer, cap))
    }

    /// Pool the application checks raw frames out of for a video send
    /// session, so steady-state capture reuses buffers
    pub fn frame_pool(&self, id: SessionId) -> Result<crate::pool::FrameBufferPool<u8>> {
        let state = self.inner.state.lock();
        match state.sessions.get(id.0).and_then(|e| e.send.as_ref()) {
            Some(SendChain::Video(c)) => Ok(c.pool()),
            _ => Err(Error::config(format!("{} is not a video send session", id))),
        }
    }

    /// Take the consumer half of a receive session. Yields once.
    pub fn take_consumer(&self, id: SessionId) -> Option<ConsumerHandle> {
        let mut state = self.inner.state.lock();
        state.sessions.get_mut(id.0).and_then(|e| e.consumer.take())
    }

    /// Attach an externally connected transport to a send session before
    /// or after start
    pub fn attach_send_transport(&self, id: SessionId, transport: Box<dyn Transport>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let started = state.started;
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        if entry.direction != Direction::Send {
            return Err(Error::config(format!("{} is not a send session", id)));
        }
        if started {
            let mut transport = transport;
            Self::wire_send_session(&self.inner, id, entry, &mut transport);
            entry.transport = Some(transport);
        } else {
            entry.transport = Some(transport);
        }
        Ok(())
    }

    /// Bind an arrived network pad to its waiting receive chain. Binds at
    /// most once; failures are logged, the call keeps running.
    pub fn on_receive_pad_ready(&self, id: SessionId, mut pad: Box<dyn Transport>) {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.sessions.get_mut(id.0) else {
            warn!(
                "{}",
                Error::Link { session: id, details: "no such session".into() }
            );
            return;
        };
        if entry.direction != Direction::Recv {
            warn!(
                "{}",
                Error::Link { session: id, details: "pad offered to a send session".into() }
            );
            return;
        }
        if entry.linked {
            warn!(
                "{}",
                Error::Link { session: id, details: "already linked, ignoring pad".into() }
            );
            return;
        }
        let Some(chain) = entry.pending_recv.take() else {
            warn!(
                "{}",
                Error::Link { session: id, details: "no pending receive chain".into() }
            );
            return;
        };
        entry.linked = true;
        Self::spawn_recv_task(&self.inner, id, chain, &mut pad);
        entry.transport = Some(pad);
        info!("{} linked to its network pad", id);
    }

    /// Start the call. In direct UDP mode this binds the per-session port
    /// blocks and links everything; in NAT-traversed mode it wires whatever
    /// transports have been attached so far. Starting twice without a
    /// reset is a configuration error.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.started {
                return Err(Error::config("call already started"));
            }
        }

        // Bind UDP transports outside the lock
        let mut bound: Vec<(usize, Box<dyn Transport>)> = Vec::new();
        if let Some(remote_ip) = self.inner.config.remote_address {
            let base = self.inner.config.base_port;
            let needs: Vec<(usize, Direction)> = {
                let state = self.inner.state.lock();
                state
                    .sessions
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.transport.is_none())
                    .map(|(i, e)| (i, e.direction))
                    .collect()
            };
            for (index, direction) in needs {
                let block = PortBlock::for_session(base, index as u16);
                let transport = UdpTransport::bind(block, remote_ip, block, direction).await?;
                bound.push((index, Box::new(transport)));
            }
        }

        let mut state = self.inner.state.lock();
        if state.started {
            return Err(Error::config("call already started"));
        }
        for (index, transport) in bound {
            state.sessions[index].transport = Some(transport);
        }
        for (index, entry) in state.sessions.iter_mut().enumerate() {
            let id = SessionId(index);
            match entry.direction {
                Direction::Send => {
                    if let Some(mut transport) = entry.transport.take() {
                        Self::wire_send_session(&self.inner, id, entry, &mut transport);
                        entry.transport = Some(transport);
                    }
                }
                Direction::Recv => {
                    if let Some(mut transport) = entry.transport.take() {
                        if let Some(chain) = entry.pending_recv.take() {
                            entry.linked = true;
                            Self::spawn_recv_task(&self.inner, id, chain, &mut transport);
                        }
                        entry.transport = Some(transport);
                    }
                }
            }
        }
        state.started = true;
        info!("call started with {} sessions", state.sessions.len());
        Ok(())
    }

    /// Wire a send session: drain its chain output into the transport and
    /// run the RTCP control loop
    fn wire_send_session(
        inner: &Arc<MuxInner>,
        id: SessionId,
        entry: &mut SessionEntry,
        transport: &mut Box<dyn Transport>,
    ) {
        let Some(mut out_rx) = entry.send_out.take() else {
            return;
        };
        let mut events = transport.take_events();

        // Control loop: forward wire bytes, consume remote RTCP, report
        // once per interval
        let task_inner = Arc::clone(inner);
        let force_key = Arc::clone(&entry.force_key);
        let control = tokio::spawn(async move {
            let inner = task_inner;
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            let mut last_bytes = 0u64;
            loop {
                tokio::select! {
                    wire = out_rx.recv() => {
                        let Some(packet) = wire else { break };
                        let state = inner.state.lock();
                        if let Some(entry) = state.sessions.get(id.0) {
                            if let Some(t) = entry.transport.as_ref() {
                                if let Err(e) = t.send_rtp(packet) {
                                    warn!("{}: {}", id, e);
                                }
                            }
                        }
                    }
                    event = async {
                        match events.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        let Some(event) = event else { break };
                        match event {
                            TransportEvent::Rtcp(data) => {
                                Self::handle_send_rtcp(&inner, id, &force_key, data);
                            }
                            TransportEvent::Disconnected => {
                                let _ = inner.events_tx.send(CallEvent::RemoteDisconnected);
                                break;
                            }
                            TransportEvent::Rtp(_) => {}
                        }
                    }
                    _ = interval.tick() => {
                        last_bytes = Self::send_sender_report(&inner, id, last_bytes);
                    }
                }
            }
        });
        inner.tasks.lock().push(control);
    }

    /// One remote RTCP packet arrived for a send session
    fn handle_send_rtcp(
        inner: &Arc<MuxInner>,
        id: SessionId,
        force_key: &Arc<AtomicBool>,
        data: Bytes,
    ) {
        let packet = match RtcpPacket::parse(data) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: {}", id, e);
                return;
            }
        };
        match packet {
            RtcpPacket::ReceiverReport { ssrc, reports } => {
                let newly_established = inner.recovery.lock().on_ssrc_observed(id);
                if newly_established {
                    let _ = inner.events_tx.send(CallEvent::SsrcObserved { session: id, ssrc });
                }
                let Some(block) = reports.first() else { return };

                let snapshot = {
                    let mut stats = inner.stats.write();
                    let snapshot = stats.entry(id).or_default();
                    snapshot.packets_lost = block.cumulative_lost;
                    snapshot.fraction_lost = block.fraction_lost;
                    snapshot.jitter = block.jitter;
                    snapshot.round_trip = block.round_trip(ntp_short(ntp_now()));
                    snapshot.clone()
                };

                if inner.recovery.lock().evaluate(id, &snapshot) {
                    force_key.store(true, Ordering::Release);
                    let _ = inner.events_tx.send(CallEvent::KeyFrameRequested { session: id });
                }
            }
            RtcpPacket::Bye { .. } => {
                let _ = inner.events_tx.send(CallEvent::RemoteDisconnected);
            }
            RtcpPacket::SenderReport { .. } => {}
        }
    }

    /// Emit one SR and refresh the local bitrate estimate. Returns the new
    /// byte watermark.
    fn send_sender_report(inner: &Arc<MuxInner>, id: SessionId, last_bytes: u64) -> u64 {
        let state = inner.state.lock();
        let Some(entry) = state.sessions.get(id.0) else {
            return last_bytes;
        };
        let (ssrc, packets, bytes) = match entry.send.as_ref() {
            Some(SendChain::Video(c)) => {
                let (p, b) = c.sent_counts();
                (c.ssrc(), p, b)
            }
            Some(SendChain::Depth(c)) => {
                let (p, b) = c.sent_counts();
                (c.ssrc(), p, b)
            }
            Some(SendChain::Depth16(c)) => {
                let (p, b) = c.sent_counts();
                (c.ssrc(), p, b)
            }
            Some(SendChain::Audio(c)) => {
                let (p, b) = c.sent_counts();
                (c.ssrc(), p, b)
            }
            Some(SendChain::Osc(c)) => {
                let (p, b) = c.sent_counts();
                (c.ssrc(), p, b)
            }
            None => return last_bytes,
        };

        {
            let mut stats = inner.stats.write();
            let snapshot = stats.entry(id).or_default();
            snapshot.local_bitrate =
                bytes.saturating_sub(last_bytes) * 8 * 1000 / STATS_INTERVAL.as_millis() as u64;
        }

        let sr = RtcpPacket::SenderReport {
            ssrc,
            ntp: ntp_now(),
            rtp_timestamp: 0,
            packet_count: packets as u32,
            octet_count: bytes as u32,
            reports: vec![],
        };
        if let Some(t) = entry.transport.as_ref() {
            if let Err(e) = t.send_rtcp(sr.serialize()) {
                debug!("{}: {}", id, e);
            }
        }
        bytes
    }

    /// Run the receive loop for a linked session
    fn spawn_recv_task(
        inner: &Arc<MuxInner>,
        id: SessionId,
        mut chain: RecvChain,
        pad: &mut Box<dyn Transport>,
    ) {
        let Some(mut events) = pad.take_events() else {
            warn!(
                "{}",
                Error::Link { session: id, details: "pad has no event stream".into() }
            );
            return;
        };
        let local_ssrc: u32 = rand::thread_rng().gen();
        let task_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            let inner = task_inner;
            let mut tracker = ReceptionTracker::new();
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            let _ = inner.events_tx.send(CallEvent::RemoteDisconnected);
                            break;
                        };
                        match event {
                            TransportEvent::Rtp(data) => {
                                let packet = match RtpPacket::parse(data) {
                                    Ok(p) => p,
                                    Err(e) => {
                                        warn!("{}: {}", id, e);
                                        continue;
                                    }
                                };
                                let first = tracker.remote_ssrc().is_none();
                                tracker.on_packet(packet.ssrc, packet.sequence);
                                if first {
                                    inner.recovery.lock().on_ssrc_observed(id);
                                    let _ = inner.events_tx.send(CallEvent::SsrcObserved {
                                        session: id,
                                        ssrc: packet.ssrc,
                                    });
                                }
                                chain.handle_packet(packet);
                                if let RecvChain::Depth16(c) = &chain {
                                    *inner.depth_calibration.lock() = c.calibration();
                                }
                            }
                            TransportEvent::Rtcp(data) => {
                                match RtcpPacket::parse(data) {
                                    Ok(RtcpPacket::SenderReport { ntp, .. }) => {
                                        tracker.on_sender_report(ntp);
                                    }
                                    Ok(RtcpPacket::Bye { .. }) => {
                                        let _ = inner
                                            .events_tx
                                            .send(CallEvent::RemoteDisconnected);
                                    }
                                    Ok(_) => {}
                                    Err(e) => warn!("{}: {}", id, e),
                                }
                            }
                            TransportEvent::Disconnected => {
                                let _ = inner.events_tx.send(CallEvent::RemoteDisconnected);
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        if tracker.remote_ssrc().is_none() {
                            continue;
                        }
                        let block = tracker.report_block();
                        {
                            let mut stats = inner.stats.write();
                            let snapshot = stats.entry(id).or_default();
                            snapshot.packets_lost = block.cumulative_lost;
                            snapshot.fraction_lost = block.fraction_lost;
                            snapshot.jitter = block.jitter;
                        }
                        let rr = RtcpPacket::ReceiverReport { ssrc: local_ssrc, reports: vec![block] };
                        let state = inner.state.lock();
                        if let Some(entry) = state.sessions.get(id.0) {
                            if let Some(t) = entry.transport.as_ref() {
                                if let Err(e) = t.send_rtcp(rr.serialize()) {
                                    debug!("{}: {}", id, e);
                                }
                            }
                        }
                    }
                }
            }
        });
        inner.tasks.lock().push(task);
    }

    /// Submit one raw video frame on a send session. Per-frame problems
    /// are logged and absorbed; only using the wrong session is an error.
    pub fn submit_video_frame(&self, id: SessionId, frame: &[u8]) -> Result<()> {
        let nag = self.inner.recovery.lock().force_keyframe_for_submit(id);
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        let force = nag || entry.force_key.swap(false, Ordering::AcqRel);
        match entry.send.as_mut() {
            Some(SendChain::Video(chain)) => {
                if let Err(e) = chain.push_frame(frame, force) {
                    warn!("{}: {}", id, e);
                }
                Ok(())
            }
            _ => Err(Error::config(format!("{} is not a video send session", id))),
        }
    }

    /// Submit one depth frame on a send session (color-ramp or raw mode,
    /// depending on the channel's kind)
    pub fn submit_depth_frame(&self, id: SessionId, depth: &[u16]) -> Result<()> {
        let nag = self.inner.recovery.lock().force_keyframe_for_submit(id);
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        let force = nag || entry.force_key.swap(false, Ordering::AcqRel);
        match entry.send.as_mut() {
            Some(SendChain::Depth(chain)) => {
                if let Err(e) = chain.push_depth(depth, force) {
                    warn!("{}: {}", id, e);
                }
                Ok(())
            }
            Some(SendChain::Depth16(chain)) => {
                if let Err(e) = chain.push_depth(depth, force) {
                    warn!("{}: {}", id, e);
                }
                Ok(())
            }
            _ => Err(Error::config(format!("{} is not a depth send session", id))),
        }
    }

    /// Feed captured audio of any arrival size. Slices into quanta
    /// (through the echo bridge when one is configured) and sends each.
    pub fn submit_audio_capture(&self, id: SessionId, samples: &[i16]) -> Result<()> {
        let quanta: Vec<(Vec<i16>, u64)> = {
            let mut bridge = self.inner.audio_bridge.lock();
            match bridge.as_mut() {
                Some(bridge) => bridge
                    .push_capture(samples)
                    .into_iter()
                    .map(|q| (q.samples.to_vec(), q.timestamp))
                    .collect(),
                None => {
                    let mut out = Vec::new();
                    self.inner.plain_slicer.lock().push(samples, |quantum, ts| {
                        out.push((quantum.to_vec(), ts));
                    });
                    out
                }
            }
        };

        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        match entry.send.as_mut() {
            Some(SendChain::Audio(chain)) => {
                for (quantum, ts) in quanta {
                    if let Err(e) = chain.push_quantum(&quantum, ts) {
                        warn!("{}: {}", id, e);
                    }
                }
                Ok(())
            }
            _ => Err(Error::config(format!("{} is not an audio send session", id))),
        }
    }

    /// Feed far-end audio about to be played out, for echo estimation
    pub fn submit_audio_render(&self, samples: &[i16]) {
        if let Some(bridge) = self.inner.audio_bridge.lock().as_mut() {
            bridge.push_render(samples);
        }
    }

    /// Send one control message
    pub fn send_osc(&self, id: SessionId, msg: &OscMessage) -> Result<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        match entry.send.as_mut() {
            Some(SendChain::Osc(chain)) => {
                if let Err(e) = chain.send_message(msg) {
                    warn!("{}: {}", id, e);
                }
                Ok(())
            }
            _ => Err(Error::config(format!("{} is not an OSC send session", id))),
        }
    }

    /// Retarget an encoder's bitrate at runtime. Video/depth in kbit/s,
    /// audio in bit/s.
    pub fn set_bitrate(&self, id: SessionId, bitrate: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .sessions
            .get_mut(id.0)
            .ok_or_else(|| Error::config(format!("unknown session {}", id)))?;
        match entry.send.as_mut() {
            Some(SendChain::Video(c)) => c.set_bitrate(bitrate),
            Some(SendChain::Depth(c)) => c.set_bitrate(bitrate),
            Some(SendChain::Audio(c)) => c.set_bitrate(bitrate),
            _ => return Err(Error::config(format!("{} has no adjustable encoder", id))),
        }
        Ok(())
    }

    /// Change the receive latency at runtime (0..=2000 ms) without tearing
    /// the call down. Running receive chains get their jitter buffer
    /// capacity retargeted in place; every affected visual stream gets a
    /// fresh sync point requested.
    pub fn set_latency(&self, latency_ms: u32) -> Result<()> {
        let rekey = self.inner.recovery.lock().set_latency(latency_ms)?;
        let state = self.inner.state.lock();
        for entry in state.sessions.iter() {
            if let Some(cap) = entry.recv_capacity.as_ref() {
                cap.store(jitter_capacity(latency_ms, entry.config.fps), Ordering::Relaxed);
            }
        }
        for id in rekey {
            if let Some(entry) = state.sessions.get(id.0) {
                entry.force_key.store(true, Ordering::Release);
                let _ = self.inner.events_tx.send(CallEvent::KeyFrameRequested { session: id });
            }
        }
        let _ = self.inner.events_tx.send(CallEvent::LatencyChanged { latency_ms });
        Ok(())
    }

    /// Current receive latency in milliseconds
    pub fn latency_ms(&self) -> u32 {
        self.inner.recovery.lock().latency_ms()
    }

    /// Cached statistics snapshot for one session. Never blocks on the
    /// network.
    pub fn get_stats(&self, id: SessionId) -> Result<RtcpSnapshot> {
        {
            let state = self.inner.state.lock();
            if state.sessions.get(id.0).is_none() {
                return Err(Error::config(format!("unknown session {}", id)));
            }
        }
        Ok(self.inner.stats.read().get(&id).cloned().unwrap_or_default())
    }

    /// Zero-plane calibration last received on a raw depth session
    pub fn depth_calibration(&self) -> DepthCalibration {
        *self.inner.depth_calibration.lock()
    }

    /// Session descriptions for the signaling boundary, in session order
    pub fn descriptions(&self) -> Vec<ChannelDescription> {
        let state = self.inner.state.lock();
        state
            .sessions
            .iter()
            .map(|e| ChannelDescription {
                media: e.kind.as_str().to_string(),
                payload_type: e.kind.payload_type(),
                clock_rate: e.kind.clock_rate(),
                codec: match e.kind {
                    MediaKind::Video | MediaKind::Depth => "H264".to_string(),
                    MediaKind::Depth16 => "DEPTH16".to_string(),
                    MediaKind::Audio => "PCM".to_string(),
                    MediaKind::Osc => "OSC".to_string(),
                },
            })
            .collect()
    }

    /// Tear the call down: stop all tasks, drop all sessions and stats,
    /// renumber from 0. The mux is ready for a fresh `add_channel` /
    /// `start()` cycle afterwards.
    pub fn reset(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let mut state = self.inner.state.lock();
        state.sessions.clear();
        state.started = false;
        self.inner.recovery.lock().reset();
        self.inner.stats.write().clear();
        *self.inner.plain_slicer.lock() = QuantumSlicer::new();
        info!("call reset");
    }
}
