//! Pass 2: Key Classifier

use crate::analysis::KeyedLayout;
use crate::config::{ClassificationConfig, ValidationConfig};
use crate::geometry::{group_by_tolerance, Rect};
use crate::passes::pass_3;

/// Split key-like rectangles into rows (by top edge) and, within each row,
/// into height bands. Bands come out in ascending height order.
pub fn group_rows(keys: &[Rect], config: &ClassificationConfig) -> Vec<Vec<Vec<Rect>>> {
    group_by_tolerance(keys, |k| k.y as f64, config.y_tolerance as f64)
        .into_iter()
        .map(|row| group_by_tolerance(&row, |k| k.height as f64, config.height_tolerance as f64))
        .collect()
}

/// Pick the best keyboard among adjacent height bands: the shorter band is
/// tried as black keys and the taller as white keys. Of all pairings the
/// validator accepts, the one with the most keys (after repair) wins; on a tie the later
/// pairing is kept.
pub fn run(
    keys: &[Rect],
    frame_width: i32,
    classification: &ClassificationConfig,
    validation: &ValidationConfig,
) -> Option<KeyedLayout> {
    let mut best: Option<KeyedLayout> = None;
    let mut best_score = 1.0f64;

    for row in group_rows(keys, classification) {
        for pair in row.windows(2) {
            let (black, white) = (&pair[0], &pair[1]);
            let layout = match pass_3::run(white, black, frame_width, validation) {
                Ok(layout) => layout,
                Err(reason) => {
                    log::trace!(
                        "  rejected {} white / {} black at y={}: {}",
                        white.len(),
                        black.len(),
                        white[0].y,
                        reason
                    );
                    continue;
                }
            };
            let score = 1.0 / layout.key_count() as f64;
            if score > best_score {
                continue;
            }
            best_score = score;
            best = Some(layout);
        }
    }

    best
}
