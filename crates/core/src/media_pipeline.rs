//! Media pipeline (C7): per-frame FEC assembly for video, a jitter buffer
//! for audio, and the sliding-window statistics surfaced to observers.

use crate::av_sink::{AVSink, StreamStats};
use crate::crypto::CtrKeystream;
use crate::input_source::InputSource;
use remoteplay_protocol::{AudioUnitHeader, MediaConfig, VideoCodec, VideoUnitHeader};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("reed-solomon setup failed: {0}")]
    Fec(#[from] reed_solomon_erasure::Error),
}

/// One frame's worth of data+parity slots, tracked from its first packet.
struct FrameAssembly {
    k: usize,
    m: usize,
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    first_seen: Instant,
    frames_seen_since: u32,
    codec_flags_is_key: bool,
}

impl FrameAssembly {
    fn new(k: usize, m: usize, is_key: bool) -> Self {
        Self {
            k,
            m,
            slots: vec![None; k + m],
            filled: 0,
            first_seen: Instant::now(),
            frames_seen_since: 0,
            codec_flags_is_key: is_key,
        }
    }

    fn place(&mut self, index: usize, data: Vec<u8>) -> bool {
        if index >= self.slots.len() || self.slots[index].is_some() {
            return false;
        }
        self.slots[index] = Some(data);
        self.filled += 1;
        true
    }

    fn data_complete(&self) -> bool {
        self.slots[0..self.k].iter().all(Option::is_some)
    }

    fn recoverable(&self) -> bool {
        self.filled >= self.k
    }
}

/// Mutable counters behind the `StreamStats` snapshot; lives inside the
/// pipeline, never handed out directly (§4.7: "snapshots are plain
/// immutable structs ... never a live handle").
#[derive(Default)]
struct StatsTracker {
    total_frames: u64,
    total_bytes: u64,
    byte_window: VecDeque<(Instant, usize)>,
    consecutive_failures: u32,
    fec_attempts: u64,
    fec_success: u64,
    fec_failure: u64,
    frames_lost: u64,
    idr_requests_total: u64,
    idr_window: VecDeque<Instant>,
    frame_times: VecDeque<Instant>,
}

impl StatsTracker {
    fn record_frame(&mut self, bytes: usize) {
        self.total_frames += 1;
        self.total_bytes += bytes as u64;
        self.consecutive_failures = 0;
        let now = Instant::now();
        self.byte_window.push_back((now, bytes));
        self.frame_times.push_back(now);
        self.trim(now);
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    fn record_idr_request(&mut self) {
        self.idr_requests_total += 1;
        self.idr_window.push_back(Instant::now());
    }

    fn trim(&mut self, now: Instant) {
        while let Some((t, _)) = self.byte_window.front() {
            if now.duration_since(*t).as_secs_f64() > 1.0 {
                self.byte_window.pop_front();
            } else {
                break;
            }
        }
        while let Some(t) = self.idr_window.front() {
            if now.duration_since(*t).as_secs_f64() > 10.0 {
                self.idr_window.pop_front();
            } else {
                break;
            }
        }
        while self.frame_times.len() > 120 {
            self.frame_times.pop_front();
        }
    }

    fn snapshot(&self) -> StreamStats {
        let windowed_bytes: usize = self.byte_window.iter().map(|(_, b)| *b).sum();
        let measured_mbps = windowed_bytes as f64 * 8.0 / 1_000_000.0;
        let (output_fps, avg_interval_ms) = if self.frame_times.len() >= 2 {
            let span = self
                .frame_times
                .back()
                .unwrap()
                .duration_since(*self.frame_times.front().unwrap())
                .as_secs_f64();
            let count = self.frame_times.len() as f64 - 1.0;
            if span > 0.0 {
                (count / span, span * 1000.0 / count)
            } else {
                (0.0, 0.0)
            }
        } else {
            (0.0, 0.0)
        };
        StreamStats {
            total_frames: self.total_frames,
            total_bytes: self.total_bytes,
            measured_mbps,
            consecutive_failures: self.consecutive_failures,
            fec_attempts: self.fec_attempts,
            fec_success: self.fec_success,
            fec_failure: self.fec_failure,
            frames_lost: self.frames_lost,
            idr_requests_total: self.idr_requests_total,
            idr_requests_window: self.idr_window.len() as u64,
            output_fps,
            avg_frame_interval_ms: avg_interval_ms,
        }
    }
}

/// Run Reed-Solomon reconstruction over `slots` (data followed by parity),
/// all padded to the same length. Returns the concatenated, trimmed data
/// shards on success.
fn reconstruct(slots: &mut [Option<Vec<u8>>], k: usize, m: usize, original_len: usize) -> Result<Vec<u8>, MediaError> {
    let shard_len = slots.iter().flatten().map(|s| s.len()).max().unwrap_or(0);
    for slot in slots.iter_mut() {
        if let Some(s) = slot {
            s.resize(shard_len, 0);
        }
    }
    let rs = ReedSolomon::new(k, m)?;
    rs.reconstruct(slots)?;

    let mut out = Vec::with_capacity(shard_len * k);
    for slot in &slots[0..k] {
        out.extend_from_slice(slot.as_ref().expect("reconstruct fills all data shards"));
    }
    out.truncate(original_len);
    Ok(out)
}

/// Owns in-flight frame assemblies, the audio jitter buffer, reuse policy,
/// and the stats tracker. One instance per active session.
pub struct MediaPipeline {
    config: MediaConfig,
    video_key: [u8; 16],
    audio_key: [u8; 16],
    session_iv: [u8; 8],
    in_flight: HashMap<u16, FrameAssembly>,
    order: VecDeque<u16>,
    stats: StatsTracker,
    last_decoded_frame: Option<Vec<u8>>,
    consecutive_reuses: u32,
    jitter_buffer: VecDeque<(u16, u32, Vec<u8>, Instant)>,
    audio_timeout_dropped: u64,
    sink: Arc<dyn AVSink>,
    input: Arc<dyn InputSource>,
}

impl MediaPipeline {
    pub fn new(
        config: MediaConfig,
        video_key: [u8; 16],
        audio_key: [u8; 16],
        session_iv: [u8; 8],
        sink: Arc<dyn AVSink>,
        input: Arc<dyn InputSource>,
    ) -> Self {
        Self {
            config,
            video_key,
            audio_key,
            session_iv,
            in_flight: HashMap::new(),
            order: VecDeque::new(),
            stats: StatsTracker::default(),
            last_decoded_frame: None,
            consecutive_reuses: 0,
            jitter_buffer: VecDeque::new(),
            audio_timeout_dropped: 0,
            sink,
            input,
        }
    }

    fn video_keystream(&self, frame_index: u16, packet_index: u16) -> CtrKeystream {
        let mut iv_high = [0u8; 8];
        iv_high[0..4].copy_from_slice(&self.session_iv[0..4]);
        iv_high[4..6].copy_from_slice(&frame_index.to_be_bytes());
        iv_high[6..8].copy_from_slice(&packet_index.to_be_bytes());
        CtrKeystream::new(&self.video_key, iv_high, 0)
    }

    /// Feed one decoded video datagram (header already parsed by the
    /// caller's demux, ciphertext payload passed separately).
    pub fn on_video_packet(&mut self, header: VideoUnitHeader, mut ciphertext: Vec<u8>) {
        self.video_keystream(header.frame_index, header.packet_index)
            .apply_keystream(&mut ciphertext);

        let k = header.data_unit_count() as usize;
        let m = header.unit_count_fec as usize;

        if !self.in_flight.contains_key(&header.frame_index) {
            if self.order.len() >= self.config.n_frames_in_flight {
                if let Some(oldest) = self.order.pop_front() {
                    self.in_flight.remove(&oldest);
                }
            }
            self.in_flight
                .insert(header.frame_index, FrameAssembly::new(k, m, header.is_key_frame()));
            self.order.push_back(header.frame_index);

            // A new frame_index showed up -- every other in-flight frame has
            // now had one more "later frame" arrive (§4.7 deadline rule).
            for frame_index in self.order.iter().copied().collect::<Vec<_>>() {
                if frame_index != header.frame_index
                    && let Some(assembly) = self.in_flight.get_mut(&frame_index)
                {
                    assembly.frames_seen_since += 1;
                }
            }
        }

        let frame_size = header.frame_size;
        let slot_index = header.packet_index as usize;
        let is_key = header.is_key_frame();
        let assembly = self.in_flight.get_mut(&header.frame_index).unwrap();
        assembly.place(slot_index, ciphertext);

        if assembly.data_complete() {
            self.emit_complete_frame(header.frame_index, frame_size, is_key);
        } else if assembly.recoverable() {
            // Enough data+parity shards are in hand; don't wait for the
            // deadline sweep to recover a frame that's already decodable
            // (§4.7: FEC runs as soon as received_data + received_parity >= k).
            self.try_fec_recover(header.frame_index, frame_size, is_key);
        }

        self.sweep_deadlines();
    }

    fn emit_complete_frame(&mut self, frame_index: u16, frame_size: u32, is_key: bool) {
        let Some(mut assembly) = self.in_flight.remove(&frame_index) else {
            return;
        };
        self.order.retain(|f| *f != frame_index);

        let mut out = Vec::with_capacity(frame_size as usize);
        for slot in &assembly.slots[0..assembly.k] {
            out.extend_from_slice(slot.as_ref().unwrap());
        }
        out.truncate(frame_size as usize);

        self.last_decoded_frame = Some(out.clone());
        self.consecutive_reuses = 0;
        self.stats.record_frame(out.len());
        self.sink.on_video(&out, VideoCodec::H264, is_key, 0);
        assembly.slots.clear();
    }

    /// For frames with enough shards to reconstruct but not all data slots
    /// present, attempt Reed-Solomon recovery.
    fn try_fec_recover(&mut self, frame_index: u16, frame_size: u32, is_key: bool) {
        let Some(assembly) = self.in_flight.get_mut(&frame_index) else {
            return;
        };
        if assembly.data_complete() || !assembly.recoverable() {
            return;
        }
        self.stats.fec_attempts += 1;
        match reconstruct(&mut assembly.slots, assembly.k, assembly.m, frame_size as usize) {
            Ok(data) => {
                self.stats.fec_success += 1;
                self.in_flight.remove(&frame_index);
                self.order.retain(|f| *f != frame_index);
                self.last_decoded_frame = Some(data.clone());
                self.consecutive_reuses = 0;
                self.stats.record_frame(data.len());
                self.sink.on_video(&data, VideoCodec::H264, is_key, 0);
            }
            Err(e) => {
                self.stats.fec_failure += 1;
                debug!(error = %e, frame_index, "FEC recovery failed");
            }
        }
    }

    /// Drop frames past their deadline: `N_drop` later frames arrived, or
    /// `T_frame_deadline` elapsed since the first packet (§4.7).
    fn sweep_deadlines(&mut self) {
        let deadline = std::time::Duration::from_millis(self.config.frame_deadline_ms);
        let expired: Vec<u16> = self
            .in_flight
            .iter()
            .filter(|(_, a)| {
                a.frames_seen_since >= self.config.n_drop || a.first_seen.elapsed() > deadline
            })
            .map(|(idx, _)| *idx)
            .collect();

        for frame_index in expired {
            let assembly_ref = self.in_flight.get(&frame_index);
            let (is_key, frame_size_guess, recoverable) = match assembly_ref {
                Some(a) => (a.codec_flags_is_key, a.slots.iter().flatten().map(|s| s.len()).max().unwrap_or(0) as u32, a.recoverable()),
                None => continue,
            };
            if recoverable {
                self.try_fec_recover(frame_index, frame_size_guess, is_key);
                if !self.in_flight.contains_key(&frame_index) {
                    continue;
                }
            }

            self.in_flight.remove(&frame_index);
            self.order.retain(|f| *f != frame_index);
            self.stats.frames_lost += 1;
            self.stats.record_failure();

            if !is_key {
                self.reuse_last_frame();
            }

            // §4.7: any deadline-declared loss requests an IDR; 30+
            // consecutive reuses is an additional forced-IDR trigger on top
            // of that, not a gate on the base request.
            self.input.request_idr();
            self.stats.record_idr_request();
            if is_key || self.consecutive_reuses >= self.config.consecutive_reuse_limit {
                self.consecutive_reuses = 0;
            }
        }
    }

    /// Repeat the last fully-decoded frame rather than stalling the sink.
    /// The PTS is repeated unchanged -- a deliberate simplification the AV
    /// sink adapter may override if it needs monotonically increasing PTS.
    fn reuse_last_frame(&mut self) {
        if let Some(frame) = self.last_decoded_frame.clone() {
            self.consecutive_reuses += 1;
            self.sink.on_video(&frame, VideoCodec::H264, false, 0);
        }
    }

    /// Feed one decoded audio datagram into the jitter buffer, then pop and
    /// emit anything ready for playback.
    pub fn on_audio_packet(&mut self, header: AudioUnitHeader, mut ciphertext: Vec<u8>) {
        let mut iv_high = [0u8; 8];
        iv_high[0..4].copy_from_slice(&self.session_iv[0..4]);
        iv_high[4..6].copy_from_slice(&header.frame_index.to_be_bytes());
        CtrKeystream::new(&self.audio_key, iv_high, 0).apply_keystream(&mut ciphertext);

        self.jitter_buffer
            .push_back((header.frame_index, header.sample_position, ciphertext, Instant::now()));

        let jitter = std::time::Duration::from_millis(self.config.audio_jitter_ms);
        while let Some((_, _, _, arrived)) = self.jitter_buffer.front() {
            if arrived.elapsed() < jitter {
                break;
            }
            let (_, _, data, _) = self.jitter_buffer.pop_front().unwrap();
            self.sink.on_audio(&data, 0);
        }

        while self.jitter_buffer.len() > 256 {
            self.jitter_buffer.pop_front();
            self.audio_timeout_dropped += 1;
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    pub fn audio_timeout_dropped(&self) -> u64 {
        self.audio_timeout_dropped
    }
}
