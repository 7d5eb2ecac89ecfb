//! Video sources feeding BGR frames into the pipeline

use crate::config::VideoConfig;
use crate::error::{PianoError, Result as PianoResult};
use crate::raster::Frame;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

/// Sequential frame supplier. `read_next` advances one frame and returns
/// `false` at end of stream; the frame it produced stays available through
/// `current_frame` until the next call.
pub trait VideoSource: Send {
    fn read_next(&mut self) -> PianoResult<bool>;

    fn current_frame(&self) -> Option<&Frame>;

    fn fps(&self) -> f64;

    fn total_frames(&self) -> usize;

    /// Number of frames read since the last rewind.
    fn current_frame_count(&self) -> usize;

    /// Seek back to frame 0.
    fn rewind(&mut self) -> PianoResult<()>;

    fn name(&self) -> &str;

    /// Fraction of the video consumed, in [0, 1].
    fn progress(&self) -> f32 {
        let total = self.total_frames();
        if total == 0 {
            return 0.0;
        }
        (self.current_frame_count() as f32 / total as f32).clamp(0.0, 1.0)
    }
}

/// Frames held in memory; used for synthetic input and tests.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    name: String,
    frames: Vec<Frame>,
    fps: f64,
    cursor: usize,
}

impl MemoryVideo {
    pub fn new(name: impl Into<String>, frames: Vec<Frame>, fps: f64) -> Self {
        Self {
            name: name.into(),
            frames,
            fps,
            cursor: 0,
        }
    }
}

impl VideoSource for MemoryVideo {
    fn read_next(&mut self) -> PianoResult<bool> {
        if self.cursor < self.frames.len() {
            self.cursor += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.cursor.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> usize {
        self.frames.len()
    }

    fn current_frame_count(&self) -> usize {
        self.cursor
    }

    fn rewind(&mut self) -> PianoResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Directory of still images read in lexicographic order.
pub struct ImageSequenceVideo {
    name: String,
    paths: Vec<PathBuf>,
    fps: f64,
    next_index: usize,
    current: Option<Frame>,
    max_size: (usize, usize),
}

impl ImageSequenceVideo {
    pub fn open<P: AsRef<Path>>(dir: P, config: &VideoConfig) -> PianoResult<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PianoError::VideoSourceError(format!(
                "no image frames in {}",
                dir.display()
            )));
        }
        Ok(Self {
            name: stem_of(dir),
            paths,
            fps: config.image_sequence_fps,
            next_index: 0,
            current: None,
            max_size: (config.max_width as usize, config.max_height as usize),
        })
    }
}

impl VideoSource for ImageSequenceVideo {
    fn read_next(&mut self) -> PianoResult<bool> {
        let Some(path) = self.paths.get(self.next_index) else {
            return Ok(false);
        };
        let img = image::open(path)?.into_rgb8();
        self.current = Some(Frame::from_rgb_image(&img).resize_to_fit(self.max_size.0, self.max_size.1));
        self.next_index += 1;
        Ok(true)
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> usize {
        self.paths.len()
    }

    fn current_frame_count(&self) -> usize {
        self.next_index
    }

    fn rewind(&mut self) -> PianoResult<()> {
        self.next_index = 0;
        self.current = None;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<usize>,
    height: Option<usize>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`.
pub fn parse_frame_rate(text: &str) -> Option<f64> {
    let mut parts = text.split('/');
    let num: f64 = parts.next()?.trim().parse().ok()?;
    let den: f64 = match parts.next() {
        Some(d) => d.trim().parse().ok()?,
        None => 1.0,
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Video file decoded by an `ffmpeg` child process emitting raw BGR24 frames.
pub struct FfmpegVideo {
    name: String,
    path: PathBuf,
    ffmpeg: String,
    width: usize,
    height: usize,
    fps: f64,
    total_frames: usize,
    max_size: (usize, usize),
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    /// Collects the decoder's diagnostics so the pipe never fills up.
    stderr: Option<JoinHandle<String>>,
    frame_count: usize,
    current: Option<Frame>,
}

impl FfmpegVideo {
    pub fn open<P: AsRef<Path>>(path: P, config: &VideoConfig) -> PianoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let output = Command::new(&config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_frames,duration",
                "-of",
                "json",
            ])
            .arg(&path)
            .output()
            .map_err(|e| {
                PianoError::VideoSourceError(format!("failed to run {}: {}", config.ffprobe_path, e))
            })?;
        if !output.status.success() {
            return Err(PianoError::VideoSourceError(format!(
                "ffprobe rejected {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let probe: ProbeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
            PianoError::VideoSourceError(format!("unreadable ffprobe output: {}", e))
        })?;
        let stream = probe.streams.into_iter().next().ok_or_else(|| {
            PianoError::VideoSourceError(format!("no video stream in {}", path.display()))
        })?;

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(PianoError::VideoSourceError(
                    "video stream has no dimensions".to_string(),
                ))
            }
        };
        let fps = stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .ok_or_else(|| PianoError::VideoSourceError("video stream has no frame rate".to_string()))?;
        let total_frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<usize>().ok())
            .or_else(|| {
                stream
                    .duration
                    .as_deref()
                    .and_then(|d| d.parse::<f64>().ok())
                    .map(|d| (d * fps).round() as usize)
            })
            .unwrap_or(0);

        log::debug!(
            "Opened {} ({}x{} @ {:.3} fps, {} frames)",
            path.display(),
            width,
            height,
            fps,
            total_frames
        );

        let mut video = Self {
            name: stem_of(&path),
            path,
            ffmpeg: config.ffmpeg_path.clone(),
            width,
            height,
            fps,
            total_frames,
            max_size: (config.max_width as usize, config.max_height as usize),
            child: None,
            stdout: None,
            stderr: None,
            frame_count: 0,
            current: None,
        };
        video.spawn()?;
        Ok(video)
    }

    fn spawn(&mut self) -> PianoResult<()> {
        self.stop();
        let mut child = Command::new(&self.ffmpeg)
            // frames must keep the coded size ffprobe reported
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(&self.path)
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PianoError::VideoSourceError(format!("failed to run {}: {}", self.ffmpeg, e)))?;
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        self.child = Some(child);
        self.frame_count = 0;
        self.current = None;
        Ok(())
    }

    /// Terminate the decoder early (rewind or drop); its exit status is
    /// irrelevant once killed.
    fn stop(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Reap the decoder after its output ended. A non-zero exit means the
    /// stream was cut short by a decode failure.
    fn finish(&mut self) -> PianoResult<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let diagnostics = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        Err(PianoError::VideoSourceError(format!(
            "{} failed on {} after {} frames ({}): {}",
            self.ffmpeg,
            self.path.display(),
            self.frame_count,
            status,
            diagnostics.trim()
        )))
    }
}

impl VideoSource for FfmpegVideo {
    fn read_next(&mut self) -> PianoResult<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };
        let mut buf = vec![0u8; self.width * self.height * 3];
        match stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish()?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
        let frame = Frame::from_bgr(self.width, self.height, buf)?;
        self.current = Some(frame.resize_to_fit(self.max_size.0, self.max_size.1));
        self.frame_count += 1;
        Ok(true)
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn current_frame_count(&self) -> usize {
        self.frame_count
    }

    fn rewind(&mut self) -> PianoResult<()> {
        self.spawn()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video")
        .to_string()
}

/// Open a directory as an image sequence and anything else through ffmpeg.
pub fn open_video<P: AsRef<Path>>(path: P, config: &VideoConfig) -> PianoResult<Box<dyn VideoSource>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PianoError::InputValidationError(format!(
            "input does not exist: {}",
            path.display()
        )));
    }
    if path.is_dir() {
        Ok(Box::new(ImageSequenceVideo::open(path, config)?))
    } else {
        Ok(Box::new(FfmpegVideo::open(path, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_video_reads_and_rewinds() {
        let frames = vec![Frame::filled(4, 4, [0, 0, 0]), Frame::filled(4, 4, [9, 9, 9])];
        let mut video = MemoryVideo::new("clip", frames, 25.0);
        assert!(video.current_frame().is_none());
        assert!(video.read_next().unwrap());
        assert!(video.read_next().unwrap());
        assert_eq!(video.current_frame().unwrap().pixel(0, 0), [9, 9, 9]);
        assert!(!video.read_next().unwrap());
        assert_eq!(video.progress(), 1.0);
        video.rewind().unwrap();
        assert_eq!(video.current_frame_count(), 0);
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    /// Stand-in ffprobe/ffmpeg pair: a 4x2 stream whose decoder emits one
    /// frame, complains on stderr and exits with `decoder_exit`.
    #[cfg(unix)]
    fn stub_tools(dir: &Path, decoder_exit: i32) -> VideoConfig {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(dir).unwrap();
        let probe = dir.join(format!("ffprobe-{}", decoder_exit));
        std::fs::write(
            &probe,
            "#!/bin/sh\necho '{\"streams\":[{\"width\":4,\"height\":2,\"r_frame_rate\":\"30/1\",\"nb_frames\":\"3\"}]}'\n",
        )
        .unwrap();
        let decoder = dir.join(format!("ffmpeg-{}", decoder_exit));
        std::fs::write(
            &decoder,
            format!("#!/bin/sh\nprintf '%024d' 0\necho 'corrupt packet' >&2\nexit {}\n", decoder_exit),
        )
        .unwrap();
        for tool in [&probe, &decoder] {
            std::fs::set_permissions(tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        VideoConfig {
            ffmpeg_path: decoder.to_string_lossy().into_owned(),
            ffprobe_path: probe.to_string_lossy().into_owned(),
            ..VideoConfig::default()
        }
    }

    // one test so no other thread forks while the stubs are being written
    #[cfg(unix)]
    #[test]
    fn decoder_exit_status_decides_end_of_stream() {
        let dir = std::env::temp_dir().join(format!("piano2midi-ffmpeg-{}", std::process::id()));
        let clip = dir.join("clip.mp4");

        let mut clean = FfmpegVideo::open(&clip, &stub_tools(&dir, 0)).unwrap();
        assert_eq!(clean.total_frames(), 3);
        assert!(clean.read_next().unwrap());
        assert!(!clean.read_next().unwrap());
        assert!(!clean.read_next().unwrap());

        let mut broken = FfmpegVideo::open(&clip, &stub_tools(&dir, 1)).unwrap();
        assert!(broken.read_next().unwrap());
        match broken.read_next() {
            Err(PianoError::VideoSourceError(msg)) => {
                assert!(msg.contains("after 1 frames"), "{}", msg);
                assert!(msg.contains("corrupt packet"), "{}", msg);
            }
            other => panic!("expected a decode failure, got {:?}", other),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
