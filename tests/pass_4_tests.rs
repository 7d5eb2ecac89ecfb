//! Validation tests for Pass 4: Watch Point Generation

use piano2midi::analysis::{KeyClass, KeyedLayout};
use piano2midi::config::Config;
use piano2midi::geometry::{Point, Rect};
use piano2midi::passes::pass_4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_points_follow_offsets() {
        let points = pass_4::grid_points(&Rect::new(0, 0, 100, 100), &[0.2, 0.5, 0.8]);
        assert_eq!(points.len(), 9);
        assert_eq!(points[0], Point::new(20, 20));
        assert_eq!(points[1], Point::new(20, 50));
        assert_eq!(points[3], Point::new(50, 20));
        assert_eq!(points[8], Point::new(80, 80));
    }

    #[test]
    fn test_covered_white_key_loses_all_points() {
        let config = Config::default();
        let covered = Rect::new(10, 10, 30, 100);
        let free = Rect::new(200, 10, 30, 100);
        let layout = KeyedLayout {
            white_keys: vec![covered, free],
            black_keys: vec![Rect::new(10, 10, 30, 100)],
        };

        let watched = pass_4::run(&layout, &config.sampling);
        assert_eq!(watched.len(), 3);

        let covered_key = watched
            .iter()
            .find(|k| k.class == KeyClass::White && k.rect == covered)
            .unwrap();
        let free_key = watched
            .iter()
            .find(|k| k.class == KeyClass::White && k.rect == free)
            .unwrap();
        let black_key = watched.iter().find(|k| k.class == KeyClass::Black).unwrap();
        assert!(covered_key.points.is_empty());
        assert_eq!(free_key.points.len(), 9);
        assert_eq!(black_key.points.len(), 9);
    }

    #[test]
    fn test_margin_reaches_neighbouring_points() {
        let config = Config::default();
        // black key ends at x = 50; white points at x = 60 are within the 11px margin
        let white = Rect::new(50, 0, 50, 100);
        let layout = KeyedLayout {
            white_keys: vec![white],
            black_keys: vec![Rect::new(30, 0, 20, 60)],
        };
        let watched = pass_4::run(&layout, &config.sampling);
        let white_key = watched.iter().find(|k| k.class == KeyClass::White).unwrap();
        // column x=60 loses rows y=20 and y=50; row y=80 is below the margin
        assert_eq!(white_key.points.len(), 7);
        assert!(!white_key.points.contains(&Point::new(60, 20)));
        assert!(white_key.points.contains(&Point::new(60, 80)));
    }

    #[test]
    fn test_watched_keys_are_ordered_by_x() {
        let config = Config::default();
        let layout = KeyedLayout {
            white_keys: vec![Rect::new(0, 0, 30, 200), Rect::new(32, 0, 30, 200)],
            black_keys: vec![Rect::new(22, 0, 18, 120)],
        };
        let watched = pass_4::run(&layout, &config.sampling);
        let classes: Vec<KeyClass> = watched.iter().map(|k| k.class).collect();
        assert_eq!(classes, vec![KeyClass::White, KeyClass::Black, KeyClass::White]);
    }
}
