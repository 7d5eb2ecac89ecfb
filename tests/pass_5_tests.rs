//! Validation tests for Pass 5: Frame Differencing and DPF history

use piano2midi::analysis::{KeyClass, WatchedKey};
use piano2midi::config::Config;
use piano2midi::error::PianoError;
use piano2midi::geometry::{Point, Rect};
use piano2midi::history::{self, DpfData};
use piano2midi::passes::pass_5::{self, CancelToken, DpfRecorder};
use piano2midi::processing::ProcessingJob;
use piano2midi::raster::Frame;
use piano2midi::video::MemoryVideo;
use std::path::PathBuf;

const WHITE: [u8; 3] = [240, 240, 240];

/// Four white keys side by side, each watched at one central point.
fn white_keys() -> Vec<WatchedKey> {
    (0..4)
        .map(|i| {
            let rect = Rect::new(10 + 20 * i, 10, 16, 60);
            WatchedKey {
                rect,
                class: KeyClass::White,
                points: vec![Point::new(rect.x + 8, rect.y + 30)],
            }
        })
        .collect()
}

fn keyboard_frame(pressed: Option<usize>) -> Frame {
    let mut frame = Frame::filled(100, 80, [20, 20, 20]);
    for (i, key) in white_keys().iter().enumerate() {
        let color = if pressed == Some(i) { [200, 60, 60] } else { WHITE };
        frame.fill_rect(key.rect.x, key.rect.y, key.rect.width, key.rect.height, color);
    }
    frame
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("piano2midi-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_video_gives_zero_dpf() {
        let frames = vec![keyboard_frame(None); 3];
        let mut video = MemoryVideo::new("constant", frames, 30.0);
        let recorder = DpfRecorder::new();

        let dpf = pass_5::run(&mut video, &white_keys(), &recorder, &CancelToken::new(), None).unwrap();
        assert_eq!(dpf.len(), 2);
        assert!(dpf.iter().flatten().all(|&v| v == 0));
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn test_pressed_key_deviates_from_reference() {
        let frames = vec![keyboard_frame(None), keyboard_frame(Some(2)), keyboard_frame(None)];
        let mut video = MemoryVideo::new("press", frames, 30.0);
        let recorder = DpfRecorder::new();

        let dpf = pass_5::run(&mut video, &white_keys(), &recorder, &CancelToken::new(), None).unwrap();
        // |200-240| + |60-240| + |60-240|
        assert_eq!(dpf[0], vec![0, 0, 400, 0]);
        assert_eq!(dpf[1], vec![0, 0, -400, 0]);
    }

    #[test]
    fn test_single_row_gives_empty_dpf() {
        let mut video = MemoryVideo::new("one", vec![keyboard_frame(None)], 30.0);
        let dpf = pass_5::run(
            &mut video,
            &white_keys(),
            &DpfRecorder::new(),
            &CancelToken::new(),
            None,
        )
        .unwrap();
        assert!(dpf.is_empty());
    }

    #[test]
    fn test_frame_size_change_is_rejected() {
        let frames = vec![keyboard_frame(None), Frame::filled(50, 40, WHITE)];
        let mut video = MemoryVideo::new("resized", frames, 30.0);
        let err = pass_5::run(
            &mut video,
            &white_keys(),
            &DpfRecorder::new(),
            &CancelToken::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PianoError::InvalidFrame(_)));
    }

    #[test]
    fn test_cancel_stops_processing() {
        let mut video = MemoryVideo::new("cancel", vec![keyboard_frame(None); 5], 30.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pass_5::run(&mut video, &white_keys(), &DpfRecorder::new(), &cancel, None).unwrap_err();
        assert_eq!(err, PianoError::Cancelled);
    }

    #[test]
    fn test_worker_thread_with_observer() {
        let frames: Vec<Frame> = (0..20)
            .map(|i| keyboard_frame(if i % 4 == 0 { Some(1) } else { None }))
            .collect();
        let recorder = DpfRecorder::new();
        let observer = recorder.clone();
        let progress = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = progress.clone();

        let worker = std::thread::spawn(move || {
            let mut video = MemoryVideo::new("threaded", frames, 30.0);
            let report = move |p: f32| sink.lock().unwrap().push(p);
            pass_5::run(&mut video, &white_keys(), &recorder, &CancelToken::new(), Some(&report))
        });
        while !worker.is_finished() {
            if let Some(row) = observer.latest_row() {
                assert_eq!(row.len(), 4);
            }
        }
        let dpf = worker.join().unwrap().unwrap();
        assert_eq!(dpf.len(), 19);
        assert_eq!(observer.len(), 20);

        let progress = progress.lock().unwrap();
        assert_eq!(progress.len(), 20);
        assert!((progress[19] - 1.0).abs() < 1e-6);
        assert!(progress.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn test_dpf_json_round_trip() {
        let data = DpfData::new(29.97002997002997, vec![vec![0, -415, 1200], vec![7, 0, -1]]);
        let json = data.to_json().unwrap();
        let back = DpfData::from_json(&json).unwrap();
        assert_eq!(back, data);
        assert_eq!(back.fps.to_bits(), data.fps.to_bits());
    }

    #[test]
    fn test_history_save_load_and_malformed() {
        let dir = scratch_dir("history");
        let data = DpfData::new(25.0, vec![vec![1, 2], vec![-3, 4]]);

        let path = history::save_history(&dir, "My: Song?", &data).unwrap();
        assert!(path.ends_with("My_ Song_.dpf.json"));
        assert_eq!(history::load_history(&dir, "My: Song?").unwrap(), Some(data.clone()));
        assert_eq!(history::load_history(&dir, "absent").unwrap(), None);

        std::fs::write(dir.join("broken.dpf.json"), "{\"fps\": 30.0}").unwrap();
        assert_eq!(history::load_history(&dir, "broken").unwrap(), None);
        assert_eq!(history::load_history_dir(&dir).unwrap(), vec![data]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unique_name_counts_up() {
        let dir = scratch_dir("unique");
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join("song");

        let first = history::unique_name(&base, "mid");
        assert_eq!(first, dir.join("song.mid"));
        std::fs::write(&first, b"").unwrap();
        let second = history::unique_name(&base, "mid");
        assert_eq!(second, dir.join("song(0).mid"));
        std::fs::write(&second, b"").unwrap();
        assert_eq!(history::unique_name(&base, "mid"), dir.join("song(1).mid"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_history_replaces_vision_passes() {
        let dir = scratch_dir("reuse");
        let data = DpfData::new(30.0, vec![vec![0, 0], vec![0, 150], vec![0, -150]]);
        history::save_history(&dir, "stored", &data).unwrap();

        let mut config = Config::default();
        config.history.directory = dir.clone();
        let mut job = ProcessingJob::new("no-such-video.mp4", &config);
        job.set_title("stored");
        assert!(job.read_dpf_from_history().unwrap());
        assert_eq!(job.dpf().unwrap(), data.dpf.as_slice());
        assert!(job.midi().is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
