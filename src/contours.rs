//! Contour extraction on binary images.
//!
//! Every connected foreground region (8-connected) and every connected
//! background region (4-connected, i.e. the holes enclosed by foreground)
//! yields one closed boundary, traced with Moore-neighbour following. Key
//! rectangles show up as background holes enclosed by edge lines.

use crate::geometry::{Point, Rect};
use crate::raster::GrayImage;
use std::collections::VecDeque;

/// Clockwise ring of neighbour offsets in y-down coordinates, starting west.
const RING: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

const FOUR: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Label connected components of pixels where `(v != 0) == foreground`.
/// Returns per-pixel labels (0 = not part of any component) and, for each
/// label `i + 1`, the first pixel of that component in raster order.
fn label_components(img: &GrayImage, foreground: bool, eight: bool) -> (Vec<u32>, Vec<Point>) {
    let (w, h) = (img.w, img.h);
    let mut labels = vec![0u32; w * h];
    let mut starts = Vec::new();
    let mut queue = VecDeque::new();
    let member = |idx: usize| (img.data[idx] != 0) == foreground;

    for start in 0..w * h {
        if labels[start] != 0 || !member(start) {
            continue;
        }
        let label = starts.len() as u32 + 1;
        starts.push(Point::new((start % w) as i32, (start / w) as i32));
        labels[start] = label;
        queue.push_back(start);
        while let Some(idx) = queue.pop_front() {
            let (x, y) = ((idx % w) as i32, (idx / w) as i32);
            let offsets: &[(i32, i32)] = if eight { &RING } else { &FOUR };
            for &(dx, dy) in offsets {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if labels[n] == 0 && member(n) {
                    labels[n] = label;
                    queue.push_back(n);
                }
            }
        }
    }
    (labels, starts)
}

fn ring_index(offset: (i32, i32)) -> usize {
    RING.iter().position(|&o| o == offset).unwrap_or(0)
}

/// Moore-neighbour trace of the outer boundary of component `label`,
/// starting from its first pixel in raster order.
fn trace_boundary(labels: &[u32], w: usize, h: usize, label: u32, start: Point) -> Vec<Point> {
    let inside = |p: Point| {
        p.x >= 0
            && p.y >= 0
            && (p.x as usize) < w
            && (p.y as usize) < h
            && labels[p.y as usize * w + p.x as usize] == label
    };

    let mut contour = vec![start];
    let mut current = start;
    // the pixel west of the start is never part of the component
    let mut back_dir = 0usize;
    let mut second: Option<Point> = None;
    let max_steps = 4 * w * h + 8;

    for _ in 0..max_steps {
        let mut found = None;
        for i in 1..=8 {
            let d = (back_dir + i) % 8;
            let candidate = Point::new(current.x + RING[d].0, current.y + RING[d].1);
            if inside(candidate) {
                found = Some((d, candidate));
                break;
            }
        }
        let Some((d, next)) = found else {
            break;
        };

        if current == start && second == Some(next) {
            break;
        }
        if second.is_none() {
            second = Some(next);
        }

        let prev_dir = (d + 7) % 8;
        let prev = Point::new(current.x + RING[prev_dir].0, current.y + RING[prev_dir].1);
        back_dir = ring_index((prev.x - next.x, prev.y - next.y));
        contour.push(next);
        current = next;
    }

    if contour.len() > 1 && contour.last() == Some(&start) {
        contour.pop();
    }
    contour
}

/// All region boundaries of a binary image: foreground outlines and holes.
pub fn find_contours(binary: &GrayImage) -> Vec<Vec<Point>> {
    let (w, h) = (binary.w, binary.h);
    let mut contours = Vec::new();
    for (foreground, eight) in [(true, true), (false, false)] {
        let (labels, starts) = label_components(binary, foreground, eight);
        for (i, start) in starts.into_iter().enumerate() {
            contours.push(trace_boundary(&labels, w, h, i as u32 + 1, start));
        }
    }
    contours
}

/// Perimeter of the closed polyline through `points`.
pub fn arc_length_closed(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        total += (((b.x - a.x) as f64).powi(2) + ((b.y - a.y) as f64).powi(2)).sqrt();
    }
    total
}

fn point_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return (((p.x - a.x) as f64).powi(2) + ((p.y - a.y) as f64).powi(2)).sqrt();
    }
    ((p.x - a.x) as f64 * dy - (p.y - a.y) as f64 * dx).abs() / len
}

fn douglas_peucker(chain: &[Point], epsilon: f64, out: &mut Vec<Point>) {
    // pushes every kept point except the chain's last one
    if chain.len() < 3 {
        out.push(chain[0]);
        return;
    }
    let (first, last) = (chain[0], chain[chain.len() - 1]);
    let mut max_dist = 0.0;
    let mut split = 0;
    for (i, &p) in chain.iter().enumerate().take(chain.len() - 1).skip(1) {
        let d = point_segment_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            split = i;
        }
    }
    if max_dist > epsilon {
        douglas_peucker(&chain[..=split], epsilon, out);
        douglas_peucker(&chain[split..], epsilon, out);
    } else {
        out.push(first);
    }
}

/// Douglas–Peucker approximation of a closed contour. The contour is split at
/// its first point and the point farthest from it; each half is simplified
/// independently.
pub fn approx_poly_closed(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let origin = points[0];
    let far = points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| (p.x - origin.x).pow(2) + (p.y - origin.y).pow(2))
        .map(|(i, _)| i)
        .unwrap_or(0);
    if far == 0 {
        return vec![origin];
    }

    let mut out = Vec::new();
    douglas_peucker(&points[..=far], epsilon, &mut out);
    let mut tail: Vec<Point> = points[far..].to_vec();
    tail.push(origin);
    douglas_peucker(&tail, epsilon, &mut out);
    out
}

/// Smallest upright rectangle covering all points (inclusive pixel extent).
pub fn bounding_rect(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Some(Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_image() -> GrayImage {
        // 12x10 image with a 1px foreground frame enclosing a 8x6 hole
        let mut img = GrayImage::new(12, 10);
        for x in 1..11 {
            img.set(x, 1, 255);
            img.set(x, 8, 255);
        }
        for y in 1..9 {
            img.set(1, y, 255);
            img.set(10, y, 255);
        }
        img
    }

    #[test]
    fn finds_outline_hole_and_outside() {
        let contours = find_contours(&ring_image());
        let rects: Vec<Rect> = contours.iter().filter_map(|c| bounding_rect(c)).collect();
        assert!(rects.contains(&Rect::new(1, 1, 10, 8)), "{rects:?}");
        assert!(rects.contains(&Rect::new(2, 2, 8, 6)), "{rects:?}");
        assert!(rects.contains(&Rect::new(0, 0, 12, 10)), "{rects:?}");
    }

    #[test]
    fn rectangle_boundary_approximates_to_four_vertices() {
        let contours = find_contours(&ring_image());
        let hole = contours
            .iter()
            .find(|c| bounding_rect(c) == Some(Rect::new(2, 2, 8, 6)))
            .unwrap();
        let eps = 0.02 * arc_length_closed(hole);
        let poly = approx_poly_closed(hole, eps);
        assert_eq!(poly.len(), 4, "{poly:?}");
    }

    #[test]
    fn single_pixel_component_traces_to_itself() {
        let mut img = GrayImage::new(5, 5);
        img.set(2, 2, 255);
        let contours = find_contours(&img);
        assert!(contours.iter().any(|c| c == &vec![Point::new(2, 2)]));
    }
}
