//! Pass 5: Frame Differencing
//!
//! Each frame is reduced to one brightness deviation per watched key: the L1
//! distance between the key's mean colour and the robust mean colour of its
//! class (white or black) in that same frame. Consecutive deviation rows are
//! differenced into the DPF matrix.

use crate::analysis::{KeyClass, WatchedKey};
use crate::error::{PianoError, Result as PianoResult};
use crate::geometry::Point;
use crate::raster::Frame;
use crate::video::VideoSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Blue, green, red.
pub type Bgr = [i32; 3];

/// Pseudo-luminance weights applied to (b, g, r) when ranking colours.
const LUMINANCE_WEIGHTS: Bgr = [3, 6, 1];

/// Integer mean colour of the frame at `points`; coordinates are clamped to
/// the frame. An empty point list yields black.
pub fn average_color(frame: &Frame, points: &[Point]) -> Bgr {
    if points.is_empty() || frame.width() == 0 || frame.height() == 0 {
        return [0; 3];
    }
    let max_x = frame.width() as i32 - 1;
    let max_y = frame.height() as i32 - 1;
    let mut sum = [0i64; 3];
    for p in points {
        let px = frame.pixel(p.x.clamp(0, max_x) as usize, p.y.clamp(0, max_y) as usize);
        for c in 0..3 {
            sum[c] += px[c] as i64;
        }
    }
    let n = points.len() as i64;
    [(sum[0] / n) as i32, (sum[1] / n) as i32, (sum[2] / n) as i32]
}

fn luminance(color: &Bgr) -> i32 {
    color
        .iter()
        .zip(LUMINANCE_WEIGHTS.iter())
        .map(|(c, w)| c * w)
        .sum()
}

/// Mean of the middle half of `colors` ranked by pseudo-luminance
/// (indices `n/4 ..= 3n/4`), truncated to integers. Bright and dark extremes,
/// such as a hand over the keys, do not move it.
pub fn interquartile_mean(colors: &[Bgr]) -> Bgr {
    if colors.is_empty() {
        return [0; 3];
    }
    let mut sorted = colors.to_vec();
    sorted.sort_by_key(luminance);
    let n = sorted.len();
    let lo = n / 4;
    let hi = (3 * n / 4).min(n - 1);
    let middle = &sorted[lo..=hi];
    let mut sum = [0i64; 3];
    for color in middle {
        for c in 0..3 {
            sum[c] += color[c] as i64;
        }
    }
    let m = middle.len() as i64;
    [(sum[0] / m) as i32, (sum[1] / m) as i32, (sum[2] / m) as i32]
}

/// Per-key deviation from the class reference colour for one frame.
pub fn deviation_row(frame: &Frame, keys: &[WatchedKey]) -> Vec<i32> {
    let colors: Vec<Bgr> = keys.iter().map(|k| average_color(frame, &k.points)).collect();

    let class_colors = |class: KeyClass| -> Vec<Bgr> {
        keys.iter()
            .zip(colors.iter())
            .filter(|(k, _)| k.class == class)
            .map(|(_, c)| *c)
            .collect()
    };
    let white_reference = interquartile_mean(&class_colors(KeyClass::White));
    let black_reference = interquartile_mean(&class_colors(KeyClass::Black));

    keys.iter()
        .zip(colors.iter())
        .map(|(key, color)| {
            let reference = match key.class {
                KeyClass::White => &white_reference,
                KeyClass::Black => &black_reference,
            };
            (0..3).map(|c| (color[c] - reference[c]).abs()).sum()
        })
        .collect()
}

/// `rows[t] - rows[t-1]` for every `t >= 1`.
pub fn first_difference(rows: &[Vec<i32>]) -> Vec<Vec<i32>> {
    rows.windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(cur, prev)| cur - prev)
                .collect()
        })
        .collect()
}

/// Append-only store of deviation rows shared between the processing thread
/// and any number of observers. Rows are inserted whole under a write lock,
/// so readers never see a partial row.
#[derive(Debug, Clone, Default)]
pub struct DpfRecorder {
    rows: Arc<RwLock<Vec<Vec<i32>>>>,
}

impl DpfRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.rows.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn push_row(&self, row: Vec<i32>) {
        self.rows.write().unwrap_or_else(|e| e.into_inner()).push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent deviation row, for live display.
    pub fn latest_row(&self) -> Option<Vec<i32>> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Vec<i32>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// DPF matrix of the rows recorded so far.
    pub fn dpf(&self) -> Vec<Vec<i32>> {
        first_difference(&self.rows.read().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Cooperative stop flag checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read the rest of `video`, recording one deviation row per frame, and
/// return the DPF matrix (one row fewer than frames read).
pub fn run(
    video: &mut dyn VideoSource,
    keys: &[WatchedKey],
    recorder: &DpfRecorder,
    cancel: &CancelToken,
    progress: Option<&(dyn Fn(f32) + Send + Sync)>,
) -> PianoResult<Vec<Vec<i32>>> {
    log::info!("Pass 5: Frame Differencing ({} keys)", keys.len());
    if keys.is_empty() {
        return Err(PianoError::InsufficientData("no watched keys".to_string()));
    }

    recorder.clear();
    let mut shape: Option<(usize, usize)> = None;
    loop {
        if cancel.is_cancelled() {
            log::warn!("  frame differencing cancelled after {} frames", recorder.len());
            return Err(PianoError::Cancelled);
        }
        if !video.read_next()? {
            break;
        }
        let frame = video
            .current_frame()
            .ok_or_else(|| PianoError::InvalidFrame("video reported a frame but has none".to_string()))?;

        let dims = (frame.width(), frame.height());
        match shape {
            None => shape = Some(dims),
            Some(expected) if expected != dims => {
                return Err(PianoError::InvalidFrame(format!(
                    "frame {} is {}x{}, expected {}x{}",
                    video.current_frame_count(),
                    dims.0,
                    dims.1,
                    expected.0,
                    expected.1
                )));
            }
            Some(_) => {}
        }

        recorder.push_row(deviation_row(frame, keys));
        if let Some(report) = progress {
            report(video.progress());
        }
    }

    let dpf = recorder.dpf();
    log::info!("  ✓ {} frames differenced into {} DPF rows", recorder.len(), dpf.len());
    Ok(dpf)
}
