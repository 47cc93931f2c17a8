//! Feedback channel (C8): a handle for posting controller input, backed by
//! an 8ms/100ms state ticker and a 200ms history batcher that both push
//! onto the takion control channel.

use crate::input_source::InputSource;
use crate::takion::Takion;
use remoteplay_protocol::{Button, ControllerState, FeedbackConfig, HistoryPacket, Side, TakionPacketType};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct SharedState {
    current: ControllerState,
    dirty: bool,
    history: VecDeque<ControllerState>,
}

/// Handle for posting controller input. Cheap to clone (wraps an `Arc`);
/// every clone mutates the same underlying state.
#[derive(Clone)]
pub struct FeedbackHandle {
    state: Arc<Mutex<SharedState>>,
    idr_requested: Arc<AtomicBool>,
}

impl FeedbackHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState {
                current: ControllerState::default(),
                dirty: false,
                history: VecDeque::new(),
            })),
            idr_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn press(&self, button: Button) {
        self.set_button(button, true).await;
    }

    pub async fn release(&self, button: Button) {
        self.set_button(button, false).await;
    }

    /// Press then schedule a release after `hold_ms` (default 100ms per
    /// §4.8). Spawns a detached task so callers don't block on the hold.
    pub fn tap(&self, button: Button, hold_ms: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            this.press(button).await;
            tokio::time::sleep(std::time::Duration::from_millis(hold_ms)).await;
            this.release(button).await;
        });
    }

    async fn set_button(&self, button: Button, pressed: bool) {
        let mut guard = self.state.lock().await;
        guard.current.set_button(button, pressed);
        guard.dirty = true;
    }

    pub async fn set_stick(&self, side: Side, x: i8, y: i8) {
        let mut guard = self.state.lock().await;
        match side {
            Side::Left => guard.current.left_stick = remoteplay_protocol::StickState { x, y },
            Side::Right => guard.current.right_stick = remoteplay_protocol::StickState { x, y },
        }
        guard.dirty = true;
    }

    pub async fn set_trigger(&self, side: Side, pressure: u8) {
        let mut guard = self.state.lock().await;
        match side {
            Side::Left => guard.current.l2_trigger = pressure,
            Side::Right => guard.current.r2_trigger = pressure,
        }
        guard.dirty = true;
    }

    /// Push a dedicated control message requesting an IDR key frame. C7
    /// invokes this on key-frame loss thresholds; callers may also invoke it
    /// directly (e.g. on session start).
    pub fn request_idr(&self) {
        self.idr_requested.store(true, Ordering::Relaxed);
    }

    async fn take_snapshot_if_dirty(&self) -> Option<ControllerState> {
        let mut guard = self.state.lock().await;
        if !guard.dirty {
            return None;
        }
        guard.dirty = false;
        guard.current.sequence = guard.current.sequence.wrapping_add(1);
        let snapshot = guard.current;
        guard.history.push_back(snapshot);
        while guard.history.len() > 30 {
            guard.history.pop_front();
        }
        Some(snapshot)
    }

    async fn force_snapshot(&self) -> ControllerState {
        let mut guard = self.state.lock().await;
        guard.current.sequence = guard.current.sequence.wrapping_add(1);
        guard.dirty = false;
        let snapshot = guard.current;
        guard.history.push_back(snapshot);
        while guard.history.len() > 30 {
            guard.history.pop_front();
        }
        snapshot
    }

    async fn history_snapshot(&self) -> HistoryPacket {
        let guard = self.state.lock().await;
        HistoryPacket {
            entries: guard.history.iter().copied().collect(),
        }
    }

    fn take_idr_request(&self) -> bool {
        self.idr_requested.swap(false, Ordering::Relaxed)
    }
}

/// Spawn the three background tasks (state ticker, heartbeat floor, history
/// batcher) that drive a `FeedbackHandle` onto the takion transport.
pub fn spawn(
    takion: Arc<Takion>,
    config: FeedbackConfig,
    cancel: CancellationToken,
) -> FeedbackHandle {
    let handle = FeedbackHandle::new();

    {
        let handle = handle.clone();
        let takion = Arc::clone(&takion);
        let cancel = cancel.clone();
        let state_interval = std::time::Duration::from_millis(config.state_interval_ms);
        let heartbeat_interval = std::time::Duration::from_millis(config.heartbeat_interval_ms);
        tokio::spawn(async move {
            let mut last_sent = tokio::time::Instant::now() - heartbeat_interval;
            let mut ticker = tokio::time::interval(state_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let due_for_heartbeat = last_sent.elapsed() >= heartbeat_interval;
                        let snapshot = if due_for_heartbeat {
                            Some(handle.force_snapshot().await)
                        } else {
                            handle.take_snapshot_if_dirty().await
                        };
                        if let Some(state) = snapshot {
                            last_sent = tokio::time::Instant::now();
                            if takion.send(TakionPacketType::FeedbackState, state.encode().to_vec()).await.is_err() {
                                warn!("failed to send feedback state, takion transport likely closed");
                                break;
                            }
                        }
                        if handle.take_idr_request() {
                            let _ = takion.send(TakionPacketType::Control, b"IDR".to_vec()).await;
                        }
                    }
                }
            }
        });
    }

    {
        let handle = handle.clone();
        let takion = Arc::clone(&takion);
        let cancel = cancel.clone();
        let history_interval = std::time::Duration::from_millis(config.history_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(history_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let history = handle.history_snapshot().await;
                        if history.entries.is_empty() {
                            continue;
                        }
                        debug!(entries = history.entries.len(), "sending feedback history batch");
                        if takion.send(TakionPacketType::FeedbackHistory, history.encode()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    handle
}

/// Bridges browser input events straight onto a `FeedbackHandle`. Each
/// method spawns the async state update rather than blocking, matching the
/// fire-and-forget pattern this codebase already uses for sync callbacks
/// that need to touch async-guarded state (e.g. `WebRTCPeer::on_input_event`).
impl InputSource for FeedbackHandle {
    fn on_button(&self, button: Button, pressed: bool) {
        let this = self.clone();
        tokio::spawn(async move { this.set_button(button, pressed).await });
    }

    fn on_stick(&self, side: Side, x: i8, y: i8) {
        let this = self.clone();
        tokio::spawn(async move { this.set_stick(side, x, y).await });
    }

    fn on_trigger(&self, side: Side, pressure: u8) {
        let this = self.clone();
        tokio::spawn(async move { this.set_trigger(side, pressure).await });
    }

    fn request_idr(&self) {
        FeedbackHandle::request_idr(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn press_marks_dirty_and_sets_bit() {
        let handle = FeedbackHandle::new();
        handle.press(Button::Cross).await;
        let snapshot = handle.take_snapshot_if_dirty().await.unwrap();
        assert!(snapshot.buttons.contains(remoteplay_protocol::ButtonBitmap::CROSS));
    }

    #[tokio::test]
    async fn clean_state_yields_no_snapshot() {
        let handle = FeedbackHandle::new();
        assert!(handle.take_snapshot_if_dirty().await.is_none());
    }

    #[tokio::test]
    async fn history_caps_at_thirty_entries() {
        let handle = FeedbackHandle::new();
        for _ in 0..40 {
            handle.press(Button::Cross).await;
            handle.take_snapshot_if_dirty().await;
            handle.release(Button::Cross).await;
            handle.take_snapshot_if_dirty().await;
        }
        let history = handle.history_snapshot().await;
        assert_eq!(history.entries.len(), 30);
    }

    #[tokio::test]
    async fn request_idr_is_consumed_once() {
        let handle = FeedbackHandle::new();
        handle.request_idr();
        assert!(handle.take_idr_request());
        assert!(!handle.take_idr_request());
    }

    #[tokio::test]
    async fn sequence_increments_monotonically() {
        let handle = FeedbackHandle::new();
        handle.press(Button::Circle).await;
        let first = handle.take_snapshot_if_dirty().await.unwrap();
        handle.press(Button::Square).await;
        let second = handle.take_snapshot_if_dirty().await.unwrap();
        assert_eq!(second.sequence, first.sequence.wrapping_add(1));
    }
}
