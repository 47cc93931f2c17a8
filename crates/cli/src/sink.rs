//! A minimal `AVSink` used by the demo binary: logs stream statistics and,
//! if `--dump-video` was given, writes each coded frame to its own file so
//! the bridge can be inspected without a real WebRTC peer on the other end.

use remoteplay_core::{AVSink, StreamStats};
use remoteplay_protocol::VideoCodec;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub(crate) struct DemoSink {
    dump_dir: Option<PathBuf>,
    frames_written: AtomicU64,
}

impl DemoSink {
    pub(crate) fn new(dump_dir: Option<String>) -> Self {
        Self {
            dump_dir: dump_dir.map(PathBuf::from),
            frames_written: AtomicU64::new(0),
        }
    }
}

impl AVSink for DemoSink {
    fn on_video(&self, frame_bytes: &[u8], codec: VideoCodec, is_key: bool, pts_us: u64) {
        let n = self.frames_written.fetch_add(1, Ordering::Relaxed);
        if let Some(dir) = &self.dump_dir {
            let ext = match codec {
                VideoCodec::H264 => "h264",
                VideoCodec::Hevc | VideoCodec::HevcHdr => "hevc",
            };
            let path = dir.join(format!("frame-{n:06}.{ext}"));
            if let Ok(mut f) = std::fs::File::create(&path) {
                let _ = f.write_all(frame_bytes);
            }
        }
        if is_key {
            tracing::debug!(pts_us, bytes = frame_bytes.len(), "key frame");
        }
    }

    fn on_audio(&self, opus_bytes: &[u8], pts_us: u64) {
        tracing::trace!(pts_us, bytes = opus_bytes.len(), "audio frame");
    }

    fn on_stream_stats(&self, stats: StreamStats) {
        info!(
            total_frames = stats.total_frames,
            mbps = stats.measured_mbps,
            fps = stats.output_fps,
            frames_lost = stats.frames_lost,
            fec_success = stats.fec_success,
            idr_requests = stats.idr_requests_total,
            "stream stats"
        );
    }
}
