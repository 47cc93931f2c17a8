//! The adapter boundary on the feedback side (C8): whatever receives browser
//! controller input implements this so the feedback channel doesn't need to
//! know about WebRTC data channels directly.

use remoteplay_protocol::{Button, Side};

pub trait InputSource: Send + Sync {
    fn on_button(&self, button: Button, pressed: bool);
    fn on_stick(&self, side: Side, x: i8, y: i8);
    fn on_trigger(&self, side: Side, pressure: u8);
    fn request_idr(&self);
}
