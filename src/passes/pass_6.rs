//! Pass 6: Note Segmentation
//!
//! Turns the DPF matrix into note events with a two-state machine per key and
//! estimates the tempo from the most common note length.

use crate::analysis::NoteEvent;
use crate::config::SegmentationConfig;
use crate::error::{PianoError, Result as PianoResult};
use std::collections::HashMap;

/// Tempo used when no note has a usable length.
pub const FALLBACK_BPM: f64 = 120.0;

/// Segment every key column of `dpf`. Row `t` is timeline frame `t + 1`.
/// A rise above `on_threshold` while a note is already sounding closes it at
/// the same frame before opening the next one. Notes still sounding after the
/// last row are closed at frame `dpf.len()` and flagged `closed_at_end`.
pub fn segment(dpf: &[Vec<i32>], config: &SegmentationConfig) -> Vec<NoteEvent> {
    let columns = dpf.iter().map(|row| row.len()).max().unwrap_or(0);
    let mut open: Vec<Option<usize>> = vec![None; columns];
    let mut notes = Vec::new();

    for (t, row) in dpf.iter().enumerate() {
        let frame = t + 1;
        for (key, &diff) in row.iter().enumerate() {
            if diff > config.on_threshold {
                if let Some(on_frame) = open[key].take() {
                    notes.push(NoteEvent {
                        key_index: key,
                        on_frame,
                        off_frame: frame,
                        closed_at_end: false,
                    });
                }
                open[key] = Some(frame);
            } else if diff < -config.off_threshold {
                if let Some(on_frame) = open[key].take() {
                    notes.push(NoteEvent {
                        key_index: key,
                        on_frame,
                        off_frame: frame,
                        closed_at_end: false,
                    });
                }
            }
        }
    }

    let end = dpf.len();
    for (key, slot) in open.into_iter().enumerate() {
        if let Some(on_frame) = slot {
            notes.push(NoteEvent {
                key_index: key,
                on_frame,
                off_frame: end,
                closed_at_end: true,
            });
        }
    }

    notes.sort_by_key(|n| (n.on_frame, n.key_index));
    notes
}

/// Most frequent note length in frames, ignoring zero lengths and notes cut
/// off by the end of the signal (unless nothing else is left). Ties go to
/// the shorter length.
pub fn dominant_duration(notes: &[NoteEvent]) -> Option<usize> {
    let mode_of = |closed_allowed: bool| -> Option<usize> {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for note in notes {
            if note.closed_at_end && !closed_allowed {
                continue;
            }
            let duration = note.duration_frames();
            if duration > 0 {
                *counts.entry(duration).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
            .map(|(duration, _)| duration)
    };
    mode_of(false).or_else(|| mode_of(true))
}

/// Beats per minute that make the dominant note length one beat.
pub fn estimate_bpm(notes: &[NoteEvent], fps: f64) -> PianoResult<f64> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(PianoError::InputValidationError(format!(
            "frame rate must be positive, got {}",
            fps
        )));
    }
    match dominant_duration(notes) {
        Some(frames) => Ok(60.0 / (frames as f64 / fps)),
        None => {
            log::warn!("  no measurable note length, using {} BPM", FALLBACK_BPM);
            Ok(FALLBACK_BPM)
        }
    }
}

/// Note events and tempo for a DPF matrix.
pub fn run(dpf: &[Vec<i32>], fps: f64, config: &SegmentationConfig) -> PianoResult<(Vec<NoteEvent>, f64)> {
    log::info!("Pass 6: Note Segmentation ({} DPF rows)", dpf.len());
    let notes = segment(dpf, config);
    if notes.is_empty() {
        return Err(PianoError::NoNotesDetected);
    }
    let bpm = estimate_bpm(&notes, fps)?;
    log::info!("  ✓ {} notes, tempo {:.1} BPM", notes.len(), bpm);
    Ok((notes, bpm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(on: usize, off: usize) -> NoteEvent {
        NoteEvent {
            key_index: 0,
            on_frame: on,
            off_frame: off,
            closed_at_end: false,
        }
    }

    #[test]
    fn mode_prefers_shorter_on_tie() {
        let notes = vec![note(0, 4), note(10, 14), note(20, 26), note(30, 36)];
        assert_eq!(dominant_duration(&notes), Some(4));
    }

    #[test]
    fn notes_cut_at_end_are_only_a_fallback() {
        let mut tail = note(0, 9);
        tail.closed_at_end = true;
        assert_eq!(dominant_duration(&[note(0, 3), tail, tail]), Some(3));
        assert_eq!(dominant_duration(&[tail]), Some(9));
    }

    #[test]
    fn bpm_from_dominant_length() {
        // 15 frames at 30 fps is half a second
        let bpm = estimate_bpm(&[note(0, 15)], 30.0).unwrap();
        assert!((bpm - 120.0).abs() < 1e-9);
        assert!(estimate_bpm(&[note(0, 15)], 0.0).is_err());
    }
}
