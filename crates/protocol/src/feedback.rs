//! Feedback channel wire format (C8): controller state packets and the
//! history batches used for loss recovery.
//!
//! The spec names 18 logical buttons but a 16-bit bitmap; PS and Touchpad
//! are carried as two separate flag bits outside the bitmap rather than
//! widening it, so the remaining 16 map one-to-one onto face/d-pad/shoulder/
//! stick/meta buttons.

use thiserror::Error;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ButtonBitmap: u16 {
        const CROSS       = 1 << 0;
        const CIRCLE      = 1 << 1;
        const SQUARE      = 1 << 2;
        const TRIANGLE    = 1 << 3;
        const DPAD_UP     = 1 << 4;
        const DPAD_DOWN   = 1 << 5;
        const DPAD_LEFT   = 1 << 6;
        const DPAD_RIGHT  = 1 << 7;
        const L1          = 1 << 8;
        const R1          = 1 << 9;
        const L2_DIGITAL  = 1 << 10;
        const R2_DIGITAL  = 1 << 11;
        const L3          = 1 << 12;
        const R3          = 1 << 13;
        const SHARE       = 1 << 14;
        const OPTIONS     = 1 << 15;
    }
}

/// A button recognized by `press`/`release`/`tap` (§4.8). `Ps` and
/// `Touchpad` are carried outside `ButtonBitmap` (see module docs); they
/// still go through the same handle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Cross,
    Circle,
    Square,
    Triangle,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    L1,
    R1,
    L2Digital,
    R2Digital,
    L3,
    R3,
    Share,
    Options,
    Ps,
    Touchpad,
}

impl Button {
    fn bitmap_bit(self) -> Option<ButtonBitmap> {
        Some(match self {
            Button::Cross => ButtonBitmap::CROSS,
            Button::Circle => ButtonBitmap::CIRCLE,
            Button::Square => ButtonBitmap::SQUARE,
            Button::Triangle => ButtonBitmap::TRIANGLE,
            Button::DpadUp => ButtonBitmap::DPAD_UP,
            Button::DpadDown => ButtonBitmap::DPAD_DOWN,
            Button::DpadLeft => ButtonBitmap::DPAD_LEFT,
            Button::DpadRight => ButtonBitmap::DPAD_RIGHT,
            Button::L1 => ButtonBitmap::L1,
            Button::R1 => ButtonBitmap::R1,
            Button::L2Digital => ButtonBitmap::L2_DIGITAL,
            Button::R2Digital => ButtonBitmap::R2_DIGITAL,
            Button::L3 => ButtonBitmap::L3,
            Button::R3 => ButtonBitmap::R3,
            Button::Share => ButtonBitmap::SHARE,
            Button::Options => ButtonBitmap::OPTIONS,
            Button::Ps | Button::Touchpad => return None,
        })
    }
}

/// Which analog stick or trigger an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StickState {
    pub x: i8,
    pub y: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchPoint {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub active: bool,
}

pub const CONTROLLER_STATE_LEN: usize = 23;

/// One point-in-time controller snapshot (§4.8 state packet payload, minus
/// the takion envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: ButtonBitmap,
    pub ps_button: bool,
    pub touchpad_button: bool,
    pub left_stick: StickState,
    pub right_stick: StickState,
    pub l2_trigger: u8,
    pub r2_trigger: u8,
    pub touch_points: [TouchPoint; 2],
    pub sequence: u32,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            buttons: ButtonBitmap::empty(),
            ps_button: false,
            touchpad_button: false,
            left_stick: StickState::default(),
            right_stick: StickState::default(),
            l2_trigger: 0,
            r2_trigger: 0,
            touch_points: [TouchPoint::default(); 2],
            sequence: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedbackCodecError {
    #[error("controller state too short: {0} bytes, need {CONTROLLER_STATE_LEN}")]
    TooShort(usize),
    #[error("history packet truncated at entry {0}")]
    HistoryTruncated(usize),
}

impl ControllerState {
    pub fn encode(&self) -> [u8; CONTROLLER_STATE_LEN] {
        let mut buf = [0u8; CONTROLLER_STATE_LEN];
        buf[0..2].copy_from_slice(&self.buttons.bits().to_be_bytes());
        let mut flags = 0u8;
        if self.ps_button {
            flags |= 0b0000_0001;
        }
        if self.touchpad_button {
            flags |= 0b0000_0010;
        }
        if self.touch_points[0].active {
            flags |= 0b0000_0100;
        }
        if self.touch_points[1].active {
            flags |= 0b0000_1000;
        }
        buf[2] = flags;
        buf[3] = self.left_stick.x as u8;
        buf[4] = self.left_stick.y as u8;
        buf[5] = self.right_stick.x as u8;
        buf[6] = self.right_stick.y as u8;
        buf[7] = self.l2_trigger;
        buf[8] = self.r2_trigger;
        buf[9] = self.touch_points[0].id;
        buf[10..12].copy_from_slice(&self.touch_points[0].x.to_be_bytes());
        buf[12..14].copy_from_slice(&self.touch_points[0].y.to_be_bytes());
        buf[14] = self.touch_points[1].id;
        buf[15..17].copy_from_slice(&self.touch_points[1].x.to_be_bytes());
        buf[17..19].copy_from_slice(&self.touch_points[1].y.to_be_bytes());
        buf[19..23].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FeedbackCodecError> {
        if bytes.len() < CONTROLLER_STATE_LEN {
            return Err(FeedbackCodecError::TooShort(bytes.len()));
        }
        let buttons = ButtonBitmap::from_bits_truncate(u16::from_be_bytes([bytes[0], bytes[1]]));
        let flags = bytes[2];
        let touch0_active = flags & 0b0000_0100 != 0;
        let touch1_active = flags & 0b0000_1000 != 0;
        Ok(Self {
            buttons,
            ps_button: flags & 0b0000_0001 != 0,
            touchpad_button: flags & 0b0000_0010 != 0,
            left_stick: StickState {
                x: bytes[3] as i8,
                y: bytes[4] as i8,
            },
            right_stick: StickState {
                x: bytes[5] as i8,
                y: bytes[6] as i8,
            },
            l2_trigger: bytes[7],
            r2_trigger: bytes[8],
            touch_points: [
                TouchPoint {
                    id: bytes[9],
                    x: u16::from_be_bytes([bytes[10], bytes[11]]),
                    y: u16::from_be_bytes([bytes[12], bytes[13]]),
                    active: touch0_active,
                },
                TouchPoint {
                    id: bytes[14],
                    x: u16::from_be_bytes([bytes[15], bytes[16]]),
                    y: u16::from_be_bytes([bytes[17], bytes[18]]),
                    active: touch1_active,
                },
            ],
            sequence: u32::from_be_bytes([bytes[19], bytes[20], bytes[21], bytes[22]]),
        })
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        match button {
            Button::Ps => self.ps_button = pressed,
            Button::Touchpad => self.touchpad_button = pressed,
            other => {
                if let Some(bit) = other.bitmap_bit() {
                    self.buttons.set(bit, pressed);
                }
            }
        }
    }
}

/// Batches the last `N` state diffs for loss recovery (§4.8 history
/// packet), sent every ~200 ms alongside the per-tick state packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPacket {
    pub entries: Vec<ControllerState>,
}

impl HistoryPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.entries.len() * CONTROLLER_STATE_LEN);
        buf.push(self.entries.len() as u8);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.encode());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FeedbackCodecError> {
        if bytes.is_empty() {
            return Err(FeedbackCodecError::HistoryTruncated(0));
        }
        let count = bytes[0] as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = 1;
        for i in 0..count {
            let end = offset + CONTROLLER_STATE_LEN;
            let chunk = bytes
                .get(offset..end)
                .ok_or(FeedbackCodecError::HistoryTruncated(i))?;
            entries.push(ControllerState::decode(chunk).map_err(|_| FeedbackCodecError::HistoryTruncated(i))?);
            offset = end;
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_roundtrips() {
        let state = ControllerState::default();
        let bytes = state.encode();
        assert_eq!(bytes.len(), CONTROLLER_STATE_LEN);
        assert_eq!(ControllerState::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn press_and_release_toggle_bitmap_bit() {
        let mut state = ControllerState::default();
        state.set_button(Button::Circle, true);
        assert!(state.buttons.contains(ButtonBitmap::CIRCLE));
        state.set_button(Button::Circle, false);
        assert!(!state.buttons.contains(ButtonBitmap::CIRCLE));
    }

    #[test]
    fn ps_and_touchpad_are_outside_bitmap() {
        let mut state = ControllerState::default();
        state.set_button(Button::Ps, true);
        assert_eq!(state.buttons, ButtonBitmap::empty());
        assert!(state.ps_button);
    }

    #[test]
    fn sticks_and_triggers_roundtrip_full_range() {
        let mut state = ControllerState::default();
        state.left_stick = StickState { x: -128, y: 127 };
        state.r2_trigger = 255;
        let bytes = state.encode();
        let parsed = ControllerState::decode(&bytes).unwrap();
        assert_eq!(parsed.left_stick, StickState { x: -128, y: 127 });
        assert_eq!(parsed.r2_trigger, 255);
    }

    #[test]
    fn touch_point_active_flag_roundtrips() {
        let mut state = ControllerState::default();
        state.touch_points[0] = TouchPoint { id: 3, x: 900, y: 400, active: true };
        let bytes = state.encode();
        let parsed = ControllerState::decode(&bytes).unwrap();
        assert!(parsed.touch_points[0].active);
        assert_eq!(parsed.touch_points[0].x, 900);
        assert!(!parsed.touch_points[1].active);
    }

    #[test]
    fn too_short_is_rejected() {
        let bytes = [0u8; CONTROLLER_STATE_LEN - 1];
        assert_eq!(
            ControllerState::decode(&bytes),
            Err(FeedbackCodecError::TooShort(bytes.len()))
        );
    }

    #[test]
    fn history_packet_roundtrips() {
        let entries: Vec<_> = (0..5)
            .map(|i| {
                let mut s = ControllerState::default();
                s.sequence = i;
                s
            })
            .collect();
        let history = HistoryPacket { entries: entries.clone() };
        let bytes = history.encode();
        let parsed = HistoryPacket::decode(&bytes).unwrap();
        assert_eq!(parsed.entries, entries);
    }

    #[test]
    fn empty_history_roundtrips() {
        let history = HistoryPacket { entries: vec![] };
        let bytes = history.encode();
        assert_eq!(bytes, vec![0]);
        assert_eq!(HistoryPacket::decode(&bytes).unwrap().entries.len(), 0);
    }

    #[test]
    fn truncated_history_is_rejected() {
        let bytes = vec![2u8, 0, 0]; // claims 2 entries, has none
        assert!(HistoryPacket::decode(&bytes).is_err());
    }
}
