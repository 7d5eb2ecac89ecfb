//! Pass 1: Key Locator

use crate::config::DetectionConfig;
use crate::contours::{approx_poly_closed, arc_length_closed, bounding_rect, find_contours};
use crate::geometry::{remove_duplicate_rects, Rect};
use crate::raster::{binarize, canny, draw_border, gaussian_blur, Frame, GrayImage};

/// Edge map prepared for contour extraction: blurred Canny edges with a closed
/// border, thickened along the vertical axis and binarised.
pub fn preprocess_frame(frame: &Frame, config: &DetectionConfig) -> GrayImage {
    let gray = frame.to_gray();
    let (pw, ph) = config.pre_blur_kernel;
    let blurred = gaussian_blur(&gray, pw, ph);

    let mut edges = canny(&blurred, config.canny_low, config.canny_high);
    draw_border(&mut edges, 255);

    let (mw, mh) = config.merge_blur_kernel;
    let mut merged = gaussian_blur(&edges, mw, mh);
    binarize(&mut merged, 0);
    merged
}

/// Bounding rectangles of every polygonal contour in the binary edge map,
/// with near-duplicates removed.
pub fn detect_rects(edges: &GrayImage, config: &DetectionConfig) -> Vec<Rect> {
    let mut rects = Vec::new();
    for contour in find_contours(edges) {
        let epsilon = config.approx_epsilon_ratio * arc_length_closed(&contour);
        let approx = approx_poly_closed(&contour, epsilon);
        if approx.len() < config.min_polygon_vertices {
            continue;
        }
        if let Some(rect) = bounding_rect(&approx) {
            rects.push(rect);
        }
    }
    remove_duplicate_rects(&rects, config.dedup_tolerance)
}

/// Key-shaped rectangle candidates found in a frame. Never fails; an empty
/// vector means nothing resembling a key was visible.
pub fn run(frame: &Frame, config: &DetectionConfig) -> Vec<Rect> {
    let edges = preprocess_frame(frame, config);
    let rects = detect_rects(&edges, config);
    let keys_like: Vec<Rect> = rects
        .into_iter()
        .filter(|r| r.is_key_like(config.key_aspect_ratio))
        .collect();
    log::trace!("  located {} key-like rectangles", keys_like.len());
    keys_like
}
