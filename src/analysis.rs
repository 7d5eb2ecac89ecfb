//! Data produced and consumed between pipeline passes

use crate::geometry::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Key colour class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyClass {
    White,
    Black,
}

impl KeyClass {
    pub fn name(&self) -> &'static str {
        match self {
            KeyClass::White => "white",
            KeyClass::Black => "black",
        }
    }
}

/// Validated keyboard: white and black keys, each sorted by x.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedLayout {
    pub white_keys: Vec<Rect>,
    pub black_keys: Vec<Rect>,
}

impl KeyedLayout {
    pub fn key_count(&self) -> usize {
        self.white_keys.len() + self.black_keys.len()
    }
}

/// One watched key: its rectangle, class and sample points. The position of a
/// `WatchedKey` in its list is the key's column in the DPF matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedKey {
    pub rect: Rect,
    pub class: KeyClass,
    pub points: Vec<Point>,
}

/// A note detected in the DPF signal. Frames are timeline frames: DPF row `t`
/// describes the change arriving at frame `t + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub key_index: usize,
    pub on_frame: usize,
    pub off_frame: usize,
    /// Still sounding when the signal ended; closed at the last frame.
    pub closed_at_end: bool,
}

impl NoteEvent {
    pub fn duration_frames(&self) -> usize {
        self.off_frame - self.on_frame
    }
}
