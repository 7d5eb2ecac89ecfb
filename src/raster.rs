//! Raster buffers and the filters used by the key locator.
//!
//! - `Frame`: owned BGR8 video frame, row-major, no padding.
//! - `GrayImage`: owned 8-bit single channel buffer.
//! - `gaussian_blur`, `canny`, `draw_border`, `binarize`: the edge
//!   preprocessing chain. Borders are handled by reflect-101 indexing.

use crate::error::{PianoError, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Owned BGR8 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap raw BGR bytes; `data.len()` must equal `width * height * 3`.
    pub fn from_bgr(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height * 3 {
            return Err(PianoError::InvalidFrame(format!(
                "expected {} bytes for {}x{} BGR frame, got {}",
                width * height * 3,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Solid colour frame.
    pub fn filled(width: usize, height: usize, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_rgb_image(img: &image::RgbImage) -> Self {
        let width = img.width() as usize;
        let height = img.height() as usize;
        let mut data = Vec::with_capacity(width * height * 3);
        for px in img.pixels() {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, bgr: [u8; 3]) {
        let idx = (y * self.width + x) * 3;
        self.data[idx..idx + 3].copy_from_slice(&bgr);
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, bgr: [u8; 3]) {
        let x0 = x.max(0) as usize;
        let y0 = y.max(0) as usize;
        let x1 = ((x + w).max(0) as usize).min(self.width);
        let y1 = ((y + h).max(0) as usize).min(self.height);
        for yy in y0..y1 {
            for xx in x0..x1 {
                self.set_pixel(xx, yy, bgr);
            }
        }
    }

    /// Luma with the BT.601 weights used for BGR→gray conversion.
    pub fn to_gray(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        for (dst, px) in gray.data.iter_mut().zip(self.data.chunks_exact(3)) {
            let v = 0.114 * px[0] as f32 + 0.587 * px[1] as f32 + 0.299 * px[2] as f32;
            *dst = v.round().clamp(0.0, 255.0) as u8;
        }
        gray
    }

    /// Scale the frame up or down so it fits in `max_w`×`max_h`, keeping
    /// aspect ratio. Every detection constant is tuned for that canvas.
    /// Resampling uses the triangle (bilinear) filter; frames that already
    /// match exactly are returned unchanged.
    pub fn resize_to_fit(self, max_w: usize, max_h: usize) -> Self {
        if (self.width == max_w && self.height == max_h) || self.width == 0 || self.height == 0 {
            return self;
        }
        let scale = (max_w as f64 / self.width as f64).min(max_h as f64 / self.height as f64);
        let new_w = ((self.width as f64 * scale) as usize).max(1);
        let new_h = ((self.height as f64 * scale) as usize).max(1);
        if new_w == self.width && new_h == self.height {
            return self;
        }

        // BGR bytes pass through an RGB buffer untouched; the filter is per channel
        let resized = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(
            self.width as u32,
            self.height as u32,
            self.data.as_slice(),
        )
        .map(|view| imageops::resize(&view, new_w as u32, new_h as u32, FilterType::Triangle));
        match resized {
            Some(buffer) => Self {
                width: new_w,
                height: new_h,
                data: buffer.into_raw(),
            },
            None => self,
        }
    }
}

/// Owned 8-bit grayscale buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub w: usize,
    pub h: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0; w * h],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.w + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.w + x] = v;
    }
}

#[inline]
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * (n - 1) - i;
        }
    }
    i as usize
}

/// 1D Gaussian taps for an odd kernel size, with sigma derived from the size
/// the same way common vision libraries do when no sigma is given.
pub fn gaussian_taps(ksize: usize) -> Vec<f32> {
    match ksize {
        0 | 1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        _ => {
            let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
            let half = (ksize / 2) as isize;
            let mut taps: Vec<f32> = (-half..=half)
                .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
                .collect();
            let sum: f32 = taps.iter().sum();
            for t in &mut taps {
                *t /= sum;
            }
            taps
        }
    }
}

/// Separable Gaussian blur with a `kw`×`kh` kernel.
pub fn gaussian_blur(src: &GrayImage, kw: usize, kh: usize) -> GrayImage {
    let (w, h) = (src.w, src.h);
    if w == 0 || h == 0 {
        return src.clone();
    }
    let tx = gaussian_taps(kw);
    let ty = gaussian_taps(kh);
    let rx = (tx.len() / 2) as isize;
    let ry = (ty.len() / 2) as isize;

    let mut tmp = vec![0f32; w * h];
    for y in 0..h {
        let row = &src.data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &tap) in tx.iter().enumerate() {
                let sx = reflect101(x as isize + k as isize - rx, w);
                acc += tap * row[sx] as f32;
            }
            tmp[y * w + x] = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &tap) in ty.iter().enumerate() {
                let sy = reflect101(y as isize + k as isize - ry, h);
                acc += tap * tmp[sy * w + x];
            }
            out.data[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Canny edge detector: 3×3 Sobel with L1 magnitude, four-direction
/// non-maximum suppression and 8-connected hysteresis. Output pixels are 0 or
/// 255.
pub fn canny(src: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = (src.w, src.h);
    let mut out = GrayImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }

    let mut gx = vec![0f32; w * h];
    let mut gy = vec![0f32; w * h];
    let mut mag = vec![0f32; w * h];
    for y in 0..h {
        let ys = [
            reflect101(y as isize - 1, h),
            y,
            reflect101(y as isize + 1, h),
        ];
        for x in 0..w {
            let xs = [
                reflect101(x as isize - 1, w),
                x,
                reflect101(x as isize + 1, w),
            ];
            let p = |i: usize, j: usize| src.get(xs[i], ys[j]) as f32;
            let dx = (p(2, 0) + 2.0 * p(2, 1) + p(2, 2)) - (p(0, 0) + 2.0 * p(0, 1) + p(0, 2));
            let dy = (p(0, 2) + 2.0 * p(1, 2) + p(2, 2)) - (p(0, 0) + 2.0 * p(1, 0) + p(2, 0));
            let idx = y * w + x;
            gx[idx] = dx;
            gy[idx] = dy;
            mag[idx] = dx.abs() + dy.abs();
        }
    }

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            let m = mag[idx];
            if m <= low {
                continue;
            }
            let mut angle = gy[idx].atan2(gx[idx]).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            // neighbours along the gradient: (before, after)
            let (before, after) = if !(22.5..157.5).contains(&angle) {
                (idx - 1, idx + 1)
            } else if angle < 67.5 {
                (idx - w - 1, idx + w + 1)
            } else if angle < 112.5 {
                (idx - w, idx + w)
            } else {
                (idx - w + 1, idx + w - 1)
            };
            // asymmetric test keeps one pixel of a two-pixel plateau
            if m > mag[before] && m >= mag[after] {
                class[idx] = if m > high { 2 } else { 1 };
            }
        }
    }

    let mut stack: Vec<usize> = Vec::new();
    for (idx, &c) in class.iter().enumerate() {
        if c == 2 {
            out.data[idx] = 255;
            stack.push(idx);
        }
    }
    while let Some(idx) = stack.pop() {
        let (x, y) = ((idx % w) as isize, (idx / w) as isize);
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if class[n] == 1 && out.data[n] == 0 {
                    out.data[n] = 255;
                    stack.push(n);
                }
            }
        }
    }
    out
}

/// Paint a 1px frame of `value` around the image.
pub fn draw_border(img: &mut GrayImage, value: u8) {
    if img.w == 0 || img.h == 0 {
        return;
    }
    let (w, h) = (img.w, img.h);
    for x in 0..w {
        img.set(x, 0, value);
        img.set(x, h - 1, value);
    }
    for y in 0..h {
        img.set(0, y, value);
        img.set(w - 1, y, value);
    }
}

/// Every pixel above `thresh` becomes 255, the rest 0.
pub fn binarize(img: &mut GrayImage, thresh: u8) {
    for v in &mut img.data {
        *v = if *v > thresh { 255 } else { 0 };
    }
}
