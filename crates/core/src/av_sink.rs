//! The adapter boundary between the media pipeline (C7) and whatever
//! forwards decoded audio/video onward (typically a WebRTC encoder on the
//! browser-facing side). Kept as a plain trait so tests can assert against a
//! channel-backed stub instead of a real encoder.

use remoteplay_protocol::VideoCodec;

/// Immutable snapshot of pipeline counters, handed to observers -- never a
/// live handle into the pipeline's mutable state (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    pub total_frames: u64,
    pub total_bytes: u64,
    pub measured_mbps: f64,
    pub consecutive_failures: u32,
    pub fec_attempts: u64,
    pub fec_success: u64,
    pub fec_failure: u64,
    pub frames_lost: u64,
    pub idr_requests_total: u64,
    pub idr_requests_window: u64,
    pub output_fps: f64,
    pub avg_frame_interval_ms: f64,
}

pub trait AVSink: Send + Sync {
    fn on_video(&self, frame_bytes: &[u8], codec: VideoCodec, is_key: bool, pts_us: u64);
    fn on_audio(&self, opus_bytes: &[u8], pts_us: u64);
    fn on_stream_stats(&self, stats: StreamStats);
}
