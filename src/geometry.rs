//! Geometry primitives shared by key detection and validation

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel space, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Inclusive containment test with the rectangle grown by the given margins.
    pub fn contains(&self, point: Point, x_margin: i32, y_margin: i32) -> bool {
        self.x - x_margin <= point.x
            && point.x <= self.right() + x_margin
            && self.y - y_margin <= point.y
            && point.y <= self.bottom() + y_margin
    }

    /// Tall narrow shape typical of a piano key.
    pub fn is_key_like(&self, aspect_ratio: f64) -> bool {
        (self.width as f64) * aspect_ratio < self.height as f64
    }

    /// Every field differs from `other` by strictly less than `tolerance`.
    pub fn is_near(&self, other: &Rect, tolerance: i32) -> bool {
        (self.x - other.x).abs() < tolerance
            && (self.y - other.y).abs() < tolerance
            && (self.width - other.width).abs() < tolerance
            && (self.height - other.height).abs() < tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Sort `items` by `key` and split them into groups. A new group starts when
/// an item's key is further than `tolerance` from the key of the group's
/// first element, so groups cannot drift.
pub fn group_by_tolerance<T, F>(items: &[T], key: F, tolerance: f64) -> Vec<Vec<T>>
where
    T: Clone,
    F: Fn(&T) -> f64,
{
    let mut sorted: Vec<T> = items.to_vec();
    sorted.sort_by(|a, b| key(a).total_cmp(&key(b)));

    let mut groups: Vec<Vec<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    for item in sorted {
        match current.first() {
            None => current.push(item),
            Some(first) if (key(first) - key(&item)).abs() <= tolerance => current.push(item),
            Some(_) => {
                groups.push(std::mem::take(&mut current));
                current.push(item);
            }
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Sorted middle half of `data`: indices `len/4 ..= 3*len/4` of the sorted copy.
pub fn interquartile<T: Copy + Ord>(data: &[T]) -> Vec<T> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let q1 = sorted.len() / 4;
    let q3 = (sorted.len() * 3 / 4).min(sorted.len() - 1);
    sorted[q1..=q3].to_vec()
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(data: &[i32]) -> Option<f64> {
    if data.is_empty() {
        None
    } else {
        Some(data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64)
    }
}

/// Drop rectangles that are near-identical to one already kept; first seen wins.
pub fn remove_duplicate_rects(rects: &[Rect], tolerance: i32) -> Vec<Rect> {
    let mut unique: Vec<Rect> = Vec::with_capacity(rects.len());
    for rect in rects {
        if !unique.iter().any(|kept| rect.is_near(kept, tolerance)) {
            unique.push(*rect);
        }
    }
    unique
}
