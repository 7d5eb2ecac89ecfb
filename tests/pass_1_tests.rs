//! Validation tests for Pass 1: Key Locator

use piano2midi::config::Config;
use piano2midi::geometry::{remove_duplicate_rects, Rect};
use piano2midi::passes::{pass_1, pass_2};
use piano2midi::raster::Frame;
use piano2midi::video::{ImageSequenceVideo, VideoSource};
use piano2midi::CancelToken;

const BACKGROUND: [u8; 3] = [110, 110, 110];
const WHITE: [u8; 3] = [250, 250, 250];
const GAP: [u8; 3] = [40, 40, 40];
const BLACK: [u8; 3] = [0, 0, 0];

/// Two octaves starting at C: 14 white keys 30px wide on a 32px pitch and the
/// 10 black keys centred on the C-D, D-E, F-G, G-A and A-B boundaries.
fn draw_keyboard(width: usize, height: usize) -> Frame {
    let mut frame = Frame::filled(width, height, BACKGROUND);
    let (left, top, key_h) = (40, 100, 200);
    for i in 0..14 {
        let x = left + 32 * i;
        frame.fill_rect(x, top, 30, key_h, WHITE);
        frame.fill_rect(x + 30, top, 2, key_h, GAP);
    }
    for octave in 0..2 {
        for boundary in [1, 2, 4, 5, 6] {
            let b = left + 32 * (7 * octave + boundary) - 1;
            frame.fill_rect(b - 9, top, 18, 120, BLACK);
        }
    }
    frame
}

/// The same two octaves at half scale on a 640x360 canvas: 14px white keys
/// on a 16px pitch, 9px black keys.
fn draw_half_scale_keyboard() -> Frame {
    let mut frame = Frame::filled(640, 360, BACKGROUND);
    let (left, top, key_h) = (20, 50, 100);
    for i in 0..14 {
        let x = left + 16 * i;
        frame.fill_rect(x, top, 14, key_h, WHITE);
        frame.fill_rect(x + 14, top, 2, key_h, GAP);
    }
    for octave in 0..2 {
        for boundary in [1, 2, 4, 5, 6] {
            let b = left + 16 * (7 * octave + boundary) - 1;
            frame.fill_rect(b - 4, top, 9, 60, BLACK);
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_frame_has_no_keys() {
        let config = Config::default();
        let frame = Frame::filled(320, 180, BACKGROUND);
        assert!(pass_1::run(&frame, &config.detection).is_empty());
    }

    #[test]
    fn test_single_bar_is_located() {
        let config = Config::default();
        let mut frame = Frame::filled(640, 360, WHITE);
        frame.fill_rect(300, 50, 40, 250, BLACK);

        let rects = pass_1::run(&frame, &config.detection);
        assert!(!rects.is_empty(), "bar should produce a key-like rect");
        assert!(
            rects.iter().any(|r| (r.x - 300).abs() <= 6
                && (r.width - 40).abs() <= 8
                && (r.height - 250).abs() <= 16),
            "no rect close to the drawn bar: {:?}",
            rects
        );
        for r in &rects {
            assert!(r.is_key_like(config.detection.key_aspect_ratio));
        }
    }

    #[test]
    fn test_wide_shapes_are_filtered() {
        let config = Config::default();
        let mut frame = Frame::filled(640, 360, WHITE);
        frame.fill_rect(100, 150, 300, 40, BLACK);
        assert!(pass_1::run(&frame, &config.detection).is_empty());
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let rects = vec![
            Rect::new(10, 10, 30, 100),
            Rect::new(15, 12, 28, 104),
            Rect::new(60, 10, 30, 100),
            Rect::new(62, 25, 30, 100),
            Rect::new(200, 10, 30, 100),
            Rect::new(10, 10, 30, 100),
        ];
        let once = remove_duplicate_rects(&rects, 20);
        let twice = remove_duplicate_rects(&once, 20);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
        assert_eq!(once[0], Rect::new(10, 10, 30, 100));
    }

    #[test]
    fn test_synthetic_keyboard_is_recognised() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = Config::default();
        let frame = draw_keyboard(640, 360);

        let candidates = pass_1::run(&frame, &config.detection);
        let layout = pass_2::run(
            &candidates,
            frame.width() as i32,
            &config.classification,
            &config.validation,
        )
        .expect("keyboard should be accepted");

        assert_eq!(layout.white_keys.len(), 14);
        assert_eq!(layout.black_keys.len(), 10);
        assert!(layout.white_keys.windows(2).all(|p| p[0].x < p[1].x));
        let black_height = layout.black_keys[0].height;
        assert!(layout.black_keys.iter().all(|k| k.height == black_height));
        assert!(black_height < layout.white_keys[0].height);
    }

    #[test]
    fn test_small_video_is_scaled_up_before_search() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = Config::default();
        let dir = std::env::temp_dir().join(format!("piano2midi-half-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        // gray levels only, so BGR and RGB byte order agree
        let frame = draw_half_scale_keyboard();
        image::RgbImage::from_raw(640, 360, frame.as_bytes().to_vec())
            .unwrap()
            .save(dir.join("frame_000.png"))
            .unwrap();

        let mut video = ImageSequenceVideo::open(&dir, &config.video).unwrap();
        let layout = piano2midi::find_keyboard(&mut video, &config, &CancelToken::new(), None)
            .expect("half-resolution keyboard should be found");
        let frame = video.current_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (1280, 720));
        assert_eq!(layout.white_keys.len(), 14);
        assert_eq!(layout.black_keys.len(), 10);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
