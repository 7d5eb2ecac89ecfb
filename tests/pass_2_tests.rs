//! Validation tests for Pass 2: Key Classifier

use piano2midi::config::Config;
use piano2midi::geometry::Rect;
use piano2midi::passes::pass_2;

/// Key rectangles as the locator reports them for a two-octave keyboard
/// starting at C.
fn keyboard_rects(left: i32, top: i32) -> (Vec<Rect>, Vec<Rect>) {
    let white: Vec<Rect> = (0..14).map(|i| Rect::new(left + 32 * i, top, 26, 190)).collect();
    let mut black = Vec::new();
    for octave in 0..2 {
        for boundary in [1, 2, 4, 5, 6] {
            let b = left + 32 * (7 * octave + boundary) - 2;
            black.push(Rect::new(b - 7, top, 14, 110));
        }
    }
    (white, black)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_split_by_top_and_height() {
        let config = Config::default();
        let (white, black) = keyboard_rects(42, 105);
        let mut keys = white.clone();
        keys.extend(black.iter().copied());
        keys.push(Rect::new(600, 10, 10, 40));

        let rows = pass_2::group_rows(&keys, &config.classification);
        assert_eq!(rows.len(), 2);
        let keyboard_row = rows.iter().find(|r| r.len() == 2).expect("keyboard row");
        // shorter band first
        assert_eq!(keyboard_row[0].len(), 10);
        assert_eq!(keyboard_row[1].len(), 14);
    }

    #[test]
    fn test_keyboard_is_classified() {
        let config = Config::default();
        let (white, black) = keyboard_rects(42, 105);
        let mut keys = black.clone();
        keys.extend(white.iter().copied());

        let layout = pass_2::run(&keys, 640, &config.classification, &config.validation)
            .expect("keyboard accepted");
        assert_eq!(layout.white_keys, white);
        assert_eq!(layout.black_keys, black);
    }

    #[test]
    fn test_larger_keyboard_wins() {
        let config = Config::default();
        let (white, black) = keyboard_rects(42, 105);
        let small_white: Vec<Rect> = white.iter().take(7).map(|r| Rect::new(r.x, 400, 26, 150)).collect();
        let small_black: Vec<Rect> = black.iter().take(5).map(|r| Rect::new(r.x, 400, 14, 90)).collect();

        let mut keys = small_white;
        keys.extend(small_black);
        keys.extend(white.iter().copied());
        keys.extend(black.iter().copied());

        let layout = pass_2::run(&keys, 640, &config.classification, &config.validation)
            .expect("keyboard accepted");
        assert_eq!(layout.key_count(), 24);
        assert_eq!(layout.white_keys[0].y, 105);
    }

    #[test]
    fn test_equal_keyboards_keep_the_last_found() {
        let config = Config::default();
        let (upper_white, upper_black) = keyboard_rects(42, 105);
        let (lower_white, lower_black) = keyboard_rects(42, 400);
        let mut keys = lower_white;
        keys.extend(upper_black);
        keys.extend(upper_white);
        keys.extend(lower_black);

        // rows are visited top to bottom
        let layout = pass_2::run(&keys, 640, &config.classification, &config.validation)
            .expect("keyboard accepted");
        assert_eq!(layout.key_count(), 24);
        assert_eq!(layout.white_keys[0].y, 400);
    }

    #[test]
    fn test_single_band_is_not_a_keyboard() {
        let config = Config::default();
        let (white, _) = keyboard_rects(42, 105);
        assert!(pass_2::run(&white, 640, &config.classification, &config.validation).is_none());
    }
}
