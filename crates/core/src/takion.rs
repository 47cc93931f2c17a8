//! Takion transport (C6): a reliable-enough control/data layer over one UDP
//! 4-tuple. Control messages get sequence numbers and RTO-backed
//! retransmission; media datagrams are sent once each and loss is left to
//! C7's FEC.

use crate::crypto::{constant_time_eq, gmac_tag};
use crate::handshake::HandshakeOutput;
use remoteplay_protocol::{
    TAKION_MAC_LEN, TakionConfig, TakionPacket, TakionPacketType,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const NUM_PACKET_TYPES: usize = 9;

#[derive(Debug, Error)]
pub enum TakionError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("takion handshake exhausted all {0} RTO attempts")]
    Stalled(u32),
    #[error("heartbeat missed deadline, transport considered dead")]
    HeartbeatMissed,
    #[error("transport already closed")]
    Closed,
}

/// Current position in the transport's own (C6-local) state machine. This is
/// distinct from, and feeds into, the session orchestrator's state (C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Init,
    Cookie,
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPacket {
    Video(TakionPacket),
    Audio(TakionPacket),
    Control(TakionPacket),
}

struct GmacKeys {
    auth: [u8; 32],
    video: [u8; 32],
    audio: [u8; 32],
    feedback: [u8; 32],
}

fn gmac_key_for(keys: &GmacKeys, packet_type: TakionPacketType) -> &[u8; 32] {
    match packet_type {
        TakionPacketType::Video => &keys.video,
        TakionPacketType::Audio => &keys.audio,
        TakionPacketType::FeedbackState | TakionPacketType::FeedbackHistory => &keys.feedback,
        _ => &keys.auth,
    }
}

/// The live transport: a bound UDP socket, per-channel send sequence
/// counters, and the derived GMAC keys for every packet type.
pub struct Takion {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    keys: GmacKeys,
    send_sequences: [AtomicU32; NUM_PACKET_TYPES],
    state: AtomicU8,
    last_received_at_ms: AtomicU64,
    started_at: Instant,
}

impl Takion {
    pub async fn bind(peer_addr: SocketAddr, handshake: &HandshakeOutput) -> Result<Self, TakionError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(peer_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            peer_addr,
            keys: GmacKeys {
                auth: handshake.auth_keys.gmac_key,
                video: handshake.video_keys.gmac_key,
                audio: handshake.audio_keys.gmac_key,
                feedback: handshake.feedback_keys.gmac_key,
            },
            send_sequences: Default::default(),
            state: AtomicU8::new(TransportState::Init as u8),
            last_received_at_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    pub fn state(&self) -> TransportState {
        match self.state.load(Ordering::Acquire) {
            0 => TransportState::Init,
            1 => TransportState::Cookie,
            2 => TransportState::Ready,
            _ => TransportState::Closed,
        }
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn next_sequence(&self, packet_type: TakionPacketType) -> u32 {
        self.send_sequences[packet_type.tag() as usize].fetch_add(1, Ordering::Relaxed)
    }

    fn mark_received(&self) {
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        self.last_received_at_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    fn ms_since_last_received(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64 - self.last_received_at_ms.load(Ordering::Relaxed)
    }

    /// Build, MAC, and send one packet; returns the sequence number used.
    pub async fn send(&self, packet_type: TakionPacketType, payload: Vec<u8>) -> Result<u32, TakionError> {
        if self.state() == TransportState::Closed {
            return Err(TakionError::Closed);
        }
        let sequence = self.next_sequence(packet_type);
        let packet = TakionPacket::new(packet_type, packet_type.tag(), sequence, payload);
        let mac_input = packet.mac_input();
        let mac = gmac_tag(gmac_key_for(&self.keys, packet_type), &mac_input, sequence);
        let bytes = packet.serialize_with_mac(mac);
        self.socket.send(&bytes).await?;
        Ok(sequence)
    }

    /// Verify a received packet's MAC against the key for its own type.
    fn verify(&self, packet: &TakionPacket) -> bool {
        let mac_input = packet.mac_input();
        let expected = gmac_tag(gmac_key_for(&self.keys, packet.packet_type), &mac_input, packet.sequence);
        constant_time_eq(&expected, &packet.mac)
    }

    /// Spawn the receive loop. Valid `Video`/`Audio` packets are forwarded to
    /// `media_tx`; everything else (control, handshake, feedback acks) goes
    /// to `control_tx`. Packets failing MAC verification are dropped and
    /// counted but never forwarded (§4.1 invariant).
    pub fn spawn_recv_loop(
        self: &Arc<Self>,
        media_tx: mpsc::Sender<InboundPacket>,
        control_tx: mpsc::Sender<InboundPacket>,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("takion recv loop cancelled");
                        break;
                    }
                    result = this.socket.recv(&mut buf) => {
                        match result {
                            Ok(len) => this.handle_datagram(&buf[..len], &media_tx, &control_tx).await,
                            Err(e) => {
                                warn!(error = %e, "takion recv error");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    async fn handle_datagram(
        &self,
        bytes: &[u8],
        media_tx: &mpsc::Sender<InboundPacket>,
        control_tx: &mpsc::Sender<InboundPacket>,
    ) {
        let packet = match TakionPacket::deserialize(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed takion datagram");
                return;
            }
        };
        if bytes.len() < TAKION_MAC_LEN {
            return;
        }
        if !self.verify(&packet) {
            warn!(packet_type = ?packet.packet_type, sequence = packet.sequence, "dropping packet with bad MAC");
            return;
        }
        self.mark_received();
        trace!(packet_type = ?packet.packet_type, sequence = packet.sequence, "takion packet verified");

        let routed = match packet.packet_type {
            TakionPacketType::Video => media_tx.send(InboundPacket::Video(packet)).await,
            TakionPacketType::Audio => media_tx.send(InboundPacket::Audio(packet)).await,
            _ => control_tx.send(InboundPacket::Control(packet)).await,
        };
        if routed.is_err() {
            debug!("takion inbound consumer dropped, discarding packet");
        }
    }

    /// RTO-backed handshake: INIT → COOKIE → READY (§4.6). `control_rx`
    /// receives packets routed by `spawn_recv_loop`'s `control_tx` side.
    pub async fn run_client_handshake(
        self: &Arc<Self>,
        control_rx: &mut mpsc::Receiver<InboundPacket>,
        config: &TakionConfig,
    ) -> Result<(), TakionError> {
        let client_tag = rand_tag();
        let mut rto = config.rto_initial_ms;

        self.set_state(TransportState::Init);
        let cookie = self
            .retry_until_reply(control_rx, config.rto_max_attempts, &mut rto, config.rto_max_ms, || {
                client_tag.to_vec()
            })
            .await?;

        self.set_state(TransportState::Cookie);
        let mut rto = config.rto_initial_ms;
        let _server_tag = self
            .retry_until_reply(control_rx, config.rto_max_attempts, &mut rto, config.rto_max_ms, || {
                cookie.clone()
            })
            .await?;

        self.set_state(TransportState::Ready);
        self.mark_received();
        info!("takion transport reached READY");
        Ok(())
    }

    /// Send `make_payload()` as a `Handshake` packet, waiting up to `rto` ms
    /// for any control reply; on timeout, double `rto` (capped at
    /// `rto_max_ms`) and retry, up to `max_attempts` total.
    async fn retry_until_reply(
        &self,
        control_rx: &mut mpsc::Receiver<InboundPacket>,
        max_attempts: u32,
        rto: &mut u64,
        rto_max_ms: u64,
        make_payload: impl Fn() -> Vec<u8>,
    ) -> Result<Vec<u8>, TakionError> {
        for attempt in 1..=max_attempts {
            self.send(TakionPacketType::Handshake, make_payload()).await?;
            let wait = tokio::time::timeout(std::time::Duration::from_millis(*rto), control_rx.recv()).await;
            match wait {
                Ok(Some(InboundPacket::Control(packet))) if packet.packet_type == TakionPacketType::Handshake => {
                    return Ok(packet.payload);
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(TakionError::Closed),
                Err(_elapsed) => {
                    debug!(attempt, rto_ms = *rto, "takion handshake step timed out, retrying");
                    *rto = (*rto * 2).min(rto_max_ms);
                }
            }
        }
        Err(TakionError::Stalled(max_attempts))
    }

    /// Periodic empty `Control` heartbeat. On a missed deadline (or a send
    /// failure, which means the same thing -- the transport is dead), closes
    /// the transport's own state and pushes onto `stalled` so whoever owns
    /// the session (C9) can propagate the failure instead of it silently
    /// going unnoticed while `media_tx`/`control_tx` simply stop producing.
    pub fn spawn_heartbeat(self: &Arc<Self>, config: &TakionConfig, cancel: CancellationToken, stalled: mpsc::Sender<()>) {
        let this = Arc::clone(self);
        let interval = std::time::Duration::from_millis(config.heartbeat_interval_ms);
        let deadline_ms = config.heartbeat_miss_deadline_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if this.ms_since_last_received() > deadline_ms {
                            warn!("takion heartbeat deadline exceeded, closing transport");
                            this.set_state(TransportState::Closed);
                            let _ = stalled.try_send(());
                            break;
                        }
                        if this.send(TakionPacketType::Control, Vec::new()).await.is_err() {
                            this.set_state(TransportState::Closed);
                            let _ = stalled.try_send(());
                            break;
                        }
                    }
                }
            }
        });
    }

    pub async fn close(&self) {
        self.set_state(TransportState::Closed);
        let _ = self.send(TakionPacketType::Control, b"BYE".to_vec()).await;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

fn rand_tag() -> [u8; 16] {
    use rand::RngCore;
    let mut tag = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut tag);
    tag
}
