//! Pass 4: Watch Point Generation

use crate::analysis::{KeyClass, KeyedLayout, WatchedKey};
use crate::config::SamplingConfig;
use crate::geometry::{Point, Rect};

/// Grid of points at the configured relative offsets inside `rect`,
/// column-major (x offset outer), truncated towards zero.
pub fn grid_points(rect: &Rect, offsets: &[f64]) -> Vec<Point> {
    let mut points = Vec::with_capacity(offsets.len() * offsets.len());
    for &fx in offsets {
        for &fy in offsets {
            let x = rect.x as f64 + fx * rect.width as f64;
            let y = rect.y as f64 + fy * rect.height as f64;
            points.push(Point::new(x as i32, y as i32));
        }
    }
    points
}

/// Watch points for every key, ordered by x across both classes. White-key
/// points near any black key are dropped; black keys keep their full grid.
pub fn run(layout: &KeyedLayout, config: &SamplingConfig) -> Vec<WatchedKey> {
    let mut keys: Vec<(Rect, KeyClass)> = layout
        .white_keys
        .iter()
        .map(|r| (*r, KeyClass::White))
        .chain(layout.black_keys.iter().map(|r| (*r, KeyClass::Black)))
        .collect();
    keys.sort_by_key(|(r, _)| r.x);

    let margin = config.occlusion_margin;
    let watched: Vec<WatchedKey> = keys
        .into_iter()
        .map(|(rect, class)| {
            let mut points = grid_points(&rect, &config.offsets);
            if class == KeyClass::White {
                points.retain(|p| !layout.black_keys.iter().any(|b| b.contains(*p, margin, margin)));
            }
            WatchedKey {
                rect,
                class,
                points,
            }
        })
        .collect();

    log::debug!(
        "  {} watched keys, {} watch points",
        watched.len(),
        watched.iter().map(|k| k.points.len()).sum::<usize>()
    );
    watched
}
