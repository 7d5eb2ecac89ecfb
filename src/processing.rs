//! Per-video processing job
//!
//! A [`ProcessingJob`] owns everything needed to turn one video into MIDI and
//! computes each artifact on first use. Every step runs inside an explicit
//! state machine; nested steps collapse so observers see one state at a time
//! and only the outermost successful step reports `Completed`.

use crate::analysis::{KeyedLayout, WatchedKey};
use crate::config::Config;
use crate::error::{PianoError, Result as PianoResult};
use crate::history::{self, DpfData};
use crate::midi::{self, PianoMidi};
use crate::passes::pass_5::{CancelToken, DpfRecorder};
use crate::passes::{pass_4, pass_5, pass_6};
use crate::video::{self, VideoSource};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Externally visible job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    NotStarted,
    /// A step without a dedicated state is running
    Running,
    Downloading,
    FindingKeys,
    ProcessingVideo,
    GeneratingMidi,
    Completed,
    Error,
    FailedToFindKeys,
}

impl ProcessState {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::NotStarted => "Not Started",
            ProcessState::Running => "Loading",
            ProcessState::Downloading => "Downloading video",
            ProcessState::FindingKeys => "Finding Piano Keys",
            ProcessState::ProcessingVideo => "Processing video",
            ProcessState::GeneratingMidi => "Generating midi",
            ProcessState::Completed => "Completed",
            ProcessState::Error => "Error",
            ProcessState::FailedToFindKeys => "Failed to find piano keys",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessState::Error | ProcessState::FailedToFindKeys)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub type StateHook = Box<dyn Fn(ProcessState) + Send + Sync>;

/// Thread-safe view of a running job: state, progress, the live deviation
/// rows and the cancel switch.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    state: Arc<Mutex<ProcessState>>,
    progress: Arc<AtomicU32>,
    recorder: DpfRecorder,
    cancel: CancelToken,
}

impl JobMonitor {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            progress: Arc::new(AtomicU32::new(0f32.to_bits())),
            recorder: DpfRecorder::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_progress(&self, value: f32) {
        self.progress
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Video progress while searching or differencing, 1.0 once completed,
    /// 0.0 otherwise.
    pub fn progress(&self) -> f32 {
        match self.state() {
            ProcessState::FindingKeys | ProcessState::ProcessingVideo => {
                f32::from_bits(self.progress.load(Ordering::Relaxed))
            }
            ProcessState::Completed => 1.0,
            _ => 0.0,
        }
    }

    /// Latest per-key deviation row, for live display.
    pub fn latest_row(&self) -> Option<Vec<i32>> {
        self.recorder.latest_row()
    }

    pub fn recorded_frames(&self) -> usize {
        self.recorder.len()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_failed()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ProcessState::Completed
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state == ProcessState::NotStarted || state == ProcessState::Completed || state.is_failed()
    }
}

/// One video's conversion, computed lazily step by step
pub struct ProcessingJob {
    source: PathBuf,
    config: Config,
    active_steps: usize,
    hooks: Vec<StateHook>,
    monitor: JobMonitor,
    video: Option<Box<dyn VideoSource>>,
    title: Option<String>,
    fps: Option<f64>,
    layout: Option<KeyedLayout>,
    watched: Vec<WatchedKey>,
    dpf: Option<Vec<Vec<i32>>>,
    midi: Option<PianoMidi>,
}

impl ProcessingJob {
    /// Job for a video file or image-sequence directory; nothing is opened yet.
    pub fn new<P: AsRef<Path>>(source: P, config: &Config) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            config: config.clone(),
            active_steps: 0,
            hooks: Vec::new(),
            monitor: JobMonitor::new(),
            video: None,
            title: None,
            fps: None,
            layout: None,
            watched: Vec::new(),
            dpf: None,
            midi: None,
        }
    }

    /// Job over an already opened source.
    pub fn from_source(video: Box<dyn VideoSource>, config: &Config) -> Self {
        let mut job = Self::new(video.name(), config);
        job.title = Some(history::clean_filename(video.name(), '_'));
        job.video = Some(video);
        job
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor(&self) -> JobMonitor {
        self.monitor.clone()
    }

    /// Register a callback run synchronously on every state change.
    pub fn add_hook<F>(&mut self, hook: F)
    where
        F: Fn(ProcessState) + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn state(&self) -> ProcessState {
        self.monitor.state()
    }

    fn set_state(&mut self, state: ProcessState) {
        self.monitor.set_state(state);
        for hook in &self.hooks {
            hook(state);
        }
    }

    /// Enter a step and return the state to restore when it finishes.
    fn enter(&mut self, step: ProcessState) -> ProcessState {
        let previous = self.state();
        self.active_steps += 1;
        self.set_state(step);
        previous
    }

    fn leave<T>(&mut self, previous: ProcessState, result: PianoResult<T>) -> PianoResult<T> {
        self.active_steps = self.active_steps.saturating_sub(1);
        match &result {
            Err(e) if e.is_keys_not_found() => self.set_state(ProcessState::FailedToFindKeys),
            Err(_) => self.set_state(ProcessState::Error),
            Ok(_) if self.active_steps == 0 => self.set_state(ProcessState::Completed),
            Ok(_) => self.set_state(previous),
        }
        result
    }

    fn step<T, F>(&mut self, state: ProcessState, f: F) -> PianoResult<T>
    where
        F: FnOnce(&mut Self) -> PianoResult<T>,
    {
        let previous = self.enter(state);
        let result = f(self);
        self.leave(previous, result)
    }

    pub fn is_failed(&self) -> bool {
        self.monitor.is_failed()
    }

    pub fn is_completed(&self) -> bool {
        self.monitor.is_completed()
    }

    pub fn is_idle(&self) -> bool {
        self.monitor.is_idle()
    }

    pub fn progress(&self) -> f32 {
        self.monitor.progress()
    }

    /// File stem (or directory name) of the source, cleaned for use as a
    /// file name.
    pub fn title(&mut self) -> &str {
        if self.title.is_none() {
            let raw = if self.source.exists() {
                self.source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Unnamed".to_string())
            } else {
                "Unnamed".to_string()
            };
            self.title = Some(history::clean_filename(&raw, '_'));
        }
        self.title.as_deref().unwrap_or("Unnamed")
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = Some(history::clean_filename(title, '_'));
    }

    fn ensure_video(&mut self) -> PianoResult<()> {
        if self.video.is_none() {
            self.video = Some(video::open_video(&self.source, &self.config.video)?);
        }
        Ok(())
    }

    fn video_mut(&mut self) -> PianoResult<&mut Box<dyn VideoSource>> {
        self.ensure_video()?;
        self.video
            .as_mut()
            .ok_or_else(|| PianoError::VideoSourceError("video not opened".to_string()))
    }

    pub fn fps(&mut self) -> PianoResult<f64> {
        if let Some(fps) = self.fps {
            return Ok(fps);
        }
        let fps = self.video_mut()?.fps();
        self.fps = Some(fps);
        Ok(fps)
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.fps = Some(fps);
    }

    /// Search the video for a keyboard. A repeated search starts again from
    /// the first frame.
    pub fn find_keys(&mut self) -> PianoResult<KeyedLayout> {
        self.step(ProcessState::FindingKeys, |job| {
            let config = job.config.clone();
            let monitor = job.monitor.clone();
            let report = move |p: f32| monitor.set_progress(p);
            let cancel = job.monitor.cancel.clone();

            let video = job.video_mut()?;
            if video.current_frame_count() > 0 {
                video.rewind()?;
            }
            let layout = crate::find_keyboard(&mut **video, &config, &cancel, Some(&report))?;
            job.layout = Some(layout.clone());
            Ok(layout)
        })
    }

    pub fn layout(&mut self) -> PianoResult<&KeyedLayout> {
        if self.layout.is_none() {
            self.find_keys()?;
        }
        self.layout
            .as_ref()
            .ok_or_else(|| PianoError::ProcessingPipelineError("keyboard layout missing".to_string()))
    }

    pub fn set_layout(&mut self, layout: KeyedLayout) {
        self.layout = Some(layout);
    }

    /// Keys watched during differencing, in DPF column order.
    pub fn watched_keys(&self) -> &[WatchedKey] {
        &self.watched
    }

    fn compute_dpf(&mut self) -> PianoResult<Vec<Vec<i32>>> {
        let layout = self.layout()?.clone();
        self.watched = pass_4::run(&layout, &self.config.sampling);

        let monitor = self.monitor.clone();
        let report = move |p: f32| monitor.set_progress(p);
        let fps = self.fps()?;
        self.ensure_video()?;
        let video = self
            .video
            .as_mut()
            .ok_or_else(|| PianoError::VideoSourceError("video not opened".to_string()))?;
        let dpf = pass_5::run(
            &mut **video,
            &self.watched,
            &self.monitor.recorder,
            &self.monitor.cancel,
            Some(&report),
        )?;
        self.fps = Some(fps);
        Ok(dpf)
    }

    /// DPF matrix, running the vision passes on first use.
    pub fn dpf(&mut self) -> PianoResult<&[Vec<i32>]> {
        if self.dpf.is_none() {
            let dpf = self.step(ProcessState::ProcessingVideo, |job| job.compute_dpf())?;
            self.dpf = Some(dpf);
        }
        match &self.dpf {
            Some(dpf) => Ok(dpf),
            None => Err(PianoError::ProcessingPipelineError("DPF missing".to_string())),
        }
    }

    pub fn set_dpf(&mut self, dpf: Vec<Vec<i32>>) {
        self.dpf = Some(dpf);
        self.midi = None;
    }

    /// Install a stored DPF together with its frame rate.
    pub fn set_dpf_data(&mut self, data: DpfData) {
        self.fps = Some(data.fps);
        self.set_dpf(data.dpf);
    }

    pub fn dpf_data(&mut self) -> PianoResult<DpfData> {
        let dpf = self.dpf()?.to_vec();
        Ok(DpfData::new(self.fps()?, dpf))
    }

    /// Load the stored DPF for this title. Returns false when none is usable.
    pub fn read_dpf_from_history(&mut self) -> PianoResult<bool> {
        self.step(ProcessState::Running, |job| {
            let dir = job.config.history.directory.clone();
            let title = job.title().to_string();
            match history::load_history(&dir, &title)? {
                Some(data) => {
                    log::info!("Using DPF history for '{}' ({} rows)", title, data.dpf.len());
                    job.set_dpf_data(data);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn save_dpf_data(&mut self) -> PianoResult<PathBuf> {
        self.step(ProcessState::Running, |job| {
            let data = job.dpf_data()?;
            let dir = job.config.history.directory.clone();
            let title = job.title().to_string();
            history::save_history(&dir, &title, &data)
        })
    }

    fn compute_midi(&mut self) -> PianoResult<PianoMidi> {
        let fps = self.fps()?;
        let segmentation = self.config.segmentation.clone();
        let (notes, bpm) = pass_6::run(self.dpf()?, fps, &segmentation)?;
        midi::build(&notes, bpm, fps, &self.config.midi)
    }

    /// MIDI performance, computing the DPF first if needed.
    pub fn midi(&mut self) -> PianoResult<&PianoMidi> {
        if self.midi.is_none() {
            let midi = self.step(ProcessState::GeneratingMidi, |job| job.compute_midi())?;
            self.midi = Some(midi);
        }
        self.midi
            .as_ref()
            .ok_or_else(|| PianoError::ProcessingPipelineError("MIDI missing".to_string()))
    }

    pub fn set_midi(&mut self, midi: PianoMidi) {
        self.midi = Some(midi);
    }

    /// Save the DPF history (when enabled) and then the MIDI file.
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> PianoResult<()> {
        let path = path.as_ref().to_path_buf();
        self.step(ProcessState::Running, move |job| {
            if job.config.history.enabled {
                job.save_dpf_data()?;
            }
            job.midi()?.save(&path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::MemoryVideo;
    use std::sync::Mutex as StdMutex;

    fn empty_job() -> ProcessingJob {
        let video = MemoryVideo::new("empty", Vec::new(), 30.0);
        ProcessingJob::from_source(Box::new(video), &Config::default())
    }

    #[test]
    fn nested_steps_collapse_to_one_completion() {
        let mut job = empty_job();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        job.add_hook(move |s| sink.lock().unwrap().push(s));

        let result: PianoResult<()> = job.step(ProcessState::Running, |job| {
            job.step(ProcessState::GeneratingMidi, |_| Ok(()))
        });
        assert!(result.is_ok());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProcessState::Running,
                ProcessState::GeneratingMidi,
                ProcessState::Running,
                ProcessState::Completed,
            ]
        );
        assert!(job.is_completed());
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn keyboard_search_failure_is_distinct() {
        let mut job = empty_job();
        let err = job.find_keys().unwrap_err();
        assert!(err.is_keys_not_found());
        assert_eq!(job.state(), ProcessState::FailedToFindKeys);
        assert!(job.is_failed() && job.is_idle());
    }

    #[test]
    fn stored_dpf_skips_vision() {
        let mut job = empty_job();
        job.set_dpf_data(DpfData::new(30.0, vec![vec![0], vec![100], vec![-100]]));
        let midi = job.midi().unwrap();
        assert_eq!(midi.tempo_us(), 33_333);
        assert_eq!(job.state(), ProcessState::Completed);
    }
}
