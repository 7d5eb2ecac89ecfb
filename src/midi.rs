//! MIDI export

use crate::analysis::NoteEvent;
use crate::config::MidiConfig;
use crate::error::{PianoError, Result as PianoResult};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, TrackEvent, TrackEventKind};
use std::path::Path;

const MAX_TEMPO_US: u32 = 0x00FF_FFFF;
const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// Single-track performance ready to be written as a Standard MIDI File.
#[derive(Debug, Clone, PartialEq)]
pub struct PianoMidi {
    ticks_per_beat: u16,
    tempo_us: u32,
    events: Vec<TrackEvent<'static>>,
}

impl PianoMidi {
    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    /// Microseconds per beat.
    pub fn tempo_us(&self) -> u32 {
        self.tempo_us
    }

    pub fn events(&self) -> &[TrackEvent<'static>] {
        &self.events
    }

    pub fn smf(&self) -> Smf<'static> {
        Smf {
            header: Header {
                format: Format::SingleTrack,
                timing: midly::Timing::Metrical(u15::from(self.ticks_per_beat)),
            },
            tracks: vec![self.events.clone()],
        }
    }

    pub fn to_bytes(&self) -> PianoResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.smf()
            .write(&mut bytes)
            .map_err(|e| PianoError::MidiExportError(format!("failed to encode MIDI data: {:?}", e)))?;
        Ok(bytes)
    }

    pub fn save(&self, path: &Path) -> PianoResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_bytes()?)?;
        log::info!("Saved MIDI with {} events to {}", self.events.len(), path.display());
        Ok(())
    }
}

/// Microseconds per beat for `bpm`, clamped to what a MIDI tempo event holds.
pub fn tempo_from_bpm(bpm: f64) -> u32 {
    let tempo = (60_000_000.0 / bpm).round();
    if !tempo.is_finite() || tempo >= MAX_TEMPO_US as f64 {
        MAX_TEMPO_US
    } else {
        (tempo as u32).max(1)
    }
}

/// MIDI ticks spanned by one video frame.
pub fn ticks_per_frame(ticks_per_beat: u16, fps: f64, tempo_us: u32) -> f64 {
    ticks_per_beat as f64 * (1.0 / fps) * 1e6 / tempo_us as f64
}

/// Note messages in emission order: by frame, then key; at the same frame and
/// key a closing note-off comes before the next note-on.
fn ordered_messages(notes: &[NoteEvent]) -> Vec<(usize, usize, u8, bool)> {
    let mut messages = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        messages.push((note.on_frame, note.key_index, 1, true));
        // a zero-length note closes after its own note-on
        let off_rank = if note.off_frame == note.on_frame { 2 } else { 0 };
        messages.push((note.off_frame, note.key_index, off_rank, false));
    }
    messages.sort_by_key(|&(frame, key, rank, _)| (frame, key, rank));
    messages
}

/// Build the performance track. Fractional ticks are carried between messages
/// so rounding never accumulates; every delta up to and including the first
/// note-on is zero.
pub fn build(notes: &[NoteEvent], bpm: f64, fps: f64, config: &MidiConfig) -> PianoResult<PianoMidi> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(PianoError::MidiExportError(format!("invalid frame rate {}", fps)));
    }
    if !(bpm.is_finite() && bpm > 0.0) {
        return Err(PianoError::MidiExportError(format!("invalid tempo {} BPM", bpm)));
    }
    if config.channel > 15 {
        return Err(PianoError::MidiExportError(format!("invalid channel {}", config.channel)));
    }
    let tempo_us = tempo_from_bpm(bpm);
    let frame_ticks = ticks_per_frame(config.ticks_per_beat, fps, tempo_us);
    let channel = u4::from(config.channel);

    let mut events: Vec<TrackEvent<'static>> = Vec::with_capacity(notes.len() * 2 + 2);
    events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(tempo_us))),
    });

    let mut bucket = 0.0f64;
    let mut cursor = 0usize;
    let mut seen_note_on = false;
    for (frame, key, _, is_on) in ordered_messages(notes) {
        let note = config.base_note as usize + key;
        if note > 127 {
            return Err(PianoError::MidiExportError(format!(
                "key {} maps to note {}, above 127",
                key, note
            )));
        }

        bucket += (frame - cursor) as f64 * frame_ticks;
        cursor = frame;
        let whole = bucket.trunc();
        bucket -= whole;
        let delta = if seen_note_on {
            (whole as u32).min(MAX_DELTA)
        } else {
            0
        };

        let key = u7::from(note as u8);
        let message = if is_on {
            seen_note_on = true;
            MidiMessage::NoteOn {
                key,
                vel: u7::from(config.note_on_velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key,
                vel: u7::from(config.note_off_velocity),
            }
        };
        events.push(TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    log::debug!(
        "  MIDI track: {} events, tempo {} us/beat, {:.3} ticks/frame",
        events.len(),
        tempo_us,
        frame_ticks
    );
    Ok(PianoMidi {
        ticks_per_beat: config.ticks_per_beat,
        tempo_us,
        events,
    })
}
