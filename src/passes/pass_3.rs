//! Pass 3: Key Validator
//!
//! Accepts a (white, black) candidate pairing only when it looks like a real
//! keyboard: even key widths, a gap-free row of white keys (small gaps are
//! repaired by synthesising the missing keys) and black keys grouped 2-3-2-3
//! between white-key boundaries.

use crate::analysis::{KeyClass, KeyedLayout};
use crate::config::ValidationConfig;
use crate::geometry::{group_by_tolerance, interquartile, mean, Rect};
use std::fmt;

/// Reason a candidate pairing was not accepted as a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    UnevenWidth(KeyClass),
    /// Smallest white-key spacing is implausible for the key width
    Disconnected,
    /// Gaps remain after repair
    MissingKeys,
    TooFewBlackKeys,
    /// Black keys are not grouped like a piano's
    BlackPattern,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "no white or no black keys"),
            Rejection::UnevenWidth(class) => write!(f, "uneven {} key widths", class.name()),
            Rejection::Disconnected => write!(f, "white keys are not connected"),
            Rejection::MissingKeys => write!(f, "white keys still missing after repair"),
            Rejection::TooFewBlackKeys => write!(f, "not enough black keys"),
            Rejection::BlackPattern => write!(f, "black keys do not follow the 2-3 grouping"),
        }
    }
}

/// Flag values outside the interquartile range widened by
/// `max(min_tol, iq_mean * ratio, iqr_factor * iq_range)`.
pub fn is_outlier(data: &[i32], config: &ValidationConfig) -> Vec<bool> {
    let iq = interquartile(data);
    let (Some(iq_mean), Some(&iq_min), Some(&iq_max)) = (mean(&iq), iq.first(), iq.last()) else {
        return Vec::new();
    };
    let k1 = config.min_outlier_tolerance.max(iq_mean * config.outlier_mean_ratio);
    let k2 = config.outlier_iqr_factor * (iq_max - iq_min) as f64;
    let k = k1.max(k2);
    let lower = (iq_min as f64 - k).floor();
    let upper = (iq_max as f64 + k).ceil();
    data.iter()
        .map(|&w| (w as f64) < lower || (w as f64) > upper)
        .collect()
}

/// True when any key not clipped by the frame edge has an outlier width.
pub fn has_uneven_width(keys: &[Rect], frame_width: i32, config: &ValidationConfig) -> bool {
    let widths: Vec<i32> = keys
        .iter()
        .filter(|k| k.x > config.edge_margin && k.right() < frame_width - config.edge_margin)
        .map(|k| k.width)
        .collect();
    is_outlier(&widths, config).into_iter().any(|o| o)
}

fn x_gaps(keys: &[Rect]) -> Vec<i32> {
    keys.windows(2).map(|pair| pair[1].x - pair[0].x).collect()
}

/// Check that x-sorted white keys form one evenly spaced row and return the
/// row with missing keys synthesised into oversized gaps.
pub fn connect_white_keys(keys: &[Rect], config: &ValidationConfig) -> Result<Vec<Rect>, Rejection> {
    if keys.len() < 2 {
        return Err(Rejection::Disconnected);
    }
    let widths: Vec<i32> = keys.iter().map(|k| k.width).collect();
    let width_mean = mean(&interquartile(&widths)).ok_or(Rejection::Empty)? as i32;

    let gaps = x_gaps(keys);
    let min_gap = gaps.iter().copied().min().unwrap_or(0);
    let gap_groups = group_by_tolerance(&gaps, |g| *g as f64, min_gap as f64 * config.gap_group_ratio);
    let smallest_group = gap_groups.first().ok_or(Rejection::Disconnected)?;
    let lowest_gap = mean(smallest_group).ok_or(Rejection::Disconnected)? as i32;

    let w = width_mean as f64;
    if lowest_gap as f64 > (w * 1.5).max(w + 10.0) {
        return Err(Rejection::Disconnected);
    }
    if (lowest_gap as f64) < (w * 0.6).min(w - 10.0) || lowest_gap <= 0 {
        return Err(Rejection::Disconnected);
    }

    let repair_limit = lowest_gap as f64 * config.gap_repair_ratio;
    let mut repaired: Vec<Rect> = Vec::with_capacity(keys.len());
    repaired.push(keys[0]);
    for &next in &keys[1..] {
        loop {
            let prev = repaired[repaired.len() - 1];
            if ((next.x - prev.x) as f64) <= repair_limit {
                break;
            }
            let x = prev.x + lowest_gap.max(prev.width);
            let width = width_mean.min(next.x - prev.x - prev.width).max(1);
            if x >= next.x {
                break;
            }
            log::trace!("  inserting missing white key at x={}", x);
            repaired.push(Rect::new(x, prev.y, width, prev.height));
        }
        repaired.push(next);
    }

    let first_min = smallest_group.iter().copied().min().unwrap_or(0);
    let first_max = smallest_group.iter().copied().max().unwrap_or(0);
    let tolerance = (first_max - first_min) as f64 + config.gap_regroup_slack;
    let regrouped = group_by_tolerance(&x_gaps(&repaired), |g| *g as f64, tolerance);
    if regrouped.len() > 1 {
        return Err(Rejection::MissingKeys);
    }
    Ok(repaired)
}

/// Number of black keys in each run of consecutive white-key boundaries that
/// have a black key, walking both x-sorted rows left to right. Leading and
/// trailing zero runs are stripped. `None` when more black keys than allowed
/// sit right of the last white key.
pub fn black_group_record(
    white_keys: &[Rect],
    black_keys: &[Rect],
    config: &ValidationConfig,
) -> Option<Vec<usize>> {
    let mut record = Vec::new();
    let mut consecutive = 0usize;
    let mut black_idx = 0usize;
    for white in white_keys {
        let Some(black) = black_keys.get(black_idx) else {
            break;
        };
        if black.x < white.x {
            black_idx += 1;
            consecutive += 1;
        } else {
            record.push(consecutive);
            consecutive = 0;
        }
    }
    if black_keys.len() - black_idx > config.max_trailing_black_keys {
        return None;
    }
    record.push(consecutive);

    if record.first() == Some(&0) {
        record.remove(0);
    }
    if record.last() == Some(&0) {
        record.pop();
    }
    Some(record)
}

/// Piano grouping check on a stripped group record: edge runs may be partial
/// but must not combine with their neighbour beyond one octave; interior runs
/// alternate 2 and 3.
pub fn black_groups_are_valid(record: &[usize]) -> bool {
    let n = record.len();
    if n < 2 {
        return false;
    }
    if record[0] + record[1] > 5 || record[n - 1] + record[n - 2] > 5 {
        return false;
    }
    let interior = &record[1..n - 1];
    if interior.iter().any(|&g| g != 2 && g != 3) {
        return false;
    }
    interior.windows(2).all(|pair| pair[0] + pair[1] == 5)
}

/// Validate a candidate pairing. On success both rows are x-sorted, white gaps
/// are repaired and black heights are normalised to the tallest black key.
pub fn run(
    white_keys: &[Rect],
    black_keys: &[Rect],
    frame_width: i32,
    config: &ValidationConfig,
) -> Result<KeyedLayout, Rejection> {
    if white_keys.is_empty() || black_keys.is_empty() {
        return Err(Rejection::Empty);
    }
    let mut white = white_keys.to_vec();
    let mut black = black_keys.to_vec();
    white.sort_by_key(|k| k.x);
    black.sort_by_key(|k| k.x);

    if has_uneven_width(&white, frame_width, config) {
        return Err(Rejection::UnevenWidth(KeyClass::White));
    }
    if has_uneven_width(&black, frame_width, config) {
        return Err(Rejection::UnevenWidth(KeyClass::Black));
    }

    let white = connect_white_keys(&white, config)?;

    if black.len() < config.min_black_keys {
        return Err(Rejection::TooFewBlackKeys);
    }
    let record = black_group_record(&white, &black, config).ok_or(Rejection::BlackPattern)?;
    if !black_groups_are_valid(&record) {
        return Err(Rejection::BlackPattern);
    }

    let max_height = black.iter().map(|k| k.height).max().unwrap_or(0);
    for key in &mut black {
        key.height = max_height;
    }

    Ok(KeyedLayout {
        white_keys: white,
        black_keys: black,
    })
}
