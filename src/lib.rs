//! Piano-to-MIDI Transcription System
//!
//! Finds the keyboard in a piano performance video, tracks how the colour of
//! every key deviates from its neighbours frame by frame, and turns the
//! frame-to-frame change of that signal (the DPF matrix) into a MIDI file.

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod contours;
pub mod error;
pub mod geometry;
pub mod history;
pub mod midi;
pub mod passes;
pub mod processing;
pub mod raster;
pub mod video;

pub use analysis::{KeyClass, KeyedLayout, NoteEvent, WatchedKey};
pub use config::Config;
pub use error::{PianoError, Result as PianoResult};
pub use history::DpfData;
pub use midi::PianoMidi;
pub use passes::pass_5::{CancelToken, DpfRecorder};
pub use processing::{JobMonitor, ProcessState, ProcessingJob};
pub use video::VideoSource;

use std::path::{Path, PathBuf};

/// Run the key search (passes 1 to 3) frame by frame until one frame yields
/// an accepted keyboard. Exhausting the video is `KeysNotFound`.
pub fn find_keyboard(
    video: &mut dyn VideoSource,
    config: &Config,
    cancel: &CancelToken,
    progress: Option<&(dyn Fn(f32) + Send + Sync)>,
) -> PianoResult<KeyedLayout> {
    log::info!("Searching for a keyboard in {}", video.name());
    while video.read_next()? {
        if cancel.is_cancelled() {
            return Err(PianoError::Cancelled);
        }
        if let Some(report) = progress {
            report(video.progress());
        }
        let Some(frame) = video.current_frame() else {
            continue;
        };

        let candidates = passes::pass_1::run(frame, &config.detection);
        if let Some(layout) = passes::pass_2::run(
            &candidates,
            frame.width() as i32,
            &config.classification,
            &config.validation,
        ) {
            log::info!(
                "  ✓ keyboard found at frame {}: {} white, {} black keys",
                video.current_frame_count(),
                layout.white_keys.len(),
                layout.black_keys.len()
            );
            return Ok(layout);
        }
        log::debug!(
            "  frame {}: {} key-like candidates, no keyboard",
            video.current_frame_count(),
            candidates.len()
        );
    }
    Err(PianoError::KeysNotFound(video.name().to_string()))
}

/// Outcome of one video in a batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub input: PathBuf,
    pub result: PianoResult<PathBuf>,
}

/// Main processing pipeline for piano-to-MIDI conversion
pub struct PianoToMidi {
    config: Config,
}

impl PianoToMidi {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lazy job for one input; nothing runs until its artifacts are requested.
    pub fn job<P: AsRef<Path>>(&self, input: P) -> ProcessingJob {
        ProcessingJob::new(input, &self.config)
    }

    /// Convert one video and write `<output_dir>/<title>.mid` (made unique
    /// if taken). Returns the MIDI path.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output_dir: Q) -> PianoResult<PathBuf> {
        validate_input(&input, &self.config)?;
        let mut job = self.job(&input);
        self.run_job(&mut job, output_dir.as_ref())
    }

    /// Convert an already opened source.
    pub fn process_source(&self, video: Box<dyn VideoSource>, output_dir: &Path) -> PianoResult<PathBuf> {
        let mut job = ProcessingJob::from_source(video, &self.config);
        self.run_job(&mut job, output_dir)
    }

    /// DPF and MIDI for a source without writing anything.
    pub fn transcribe(&self, video: Box<dyn VideoSource>) -> PianoResult<(DpfData, PianoMidi)> {
        let mut job = ProcessingJob::from_source(video, &self.config);
        let midi = job.midi()?.clone();
        Ok((job.dpf_data()?, midi))
    }

    fn run_job(&self, job: &mut ProcessingJob, output_dir: &Path) -> PianoResult<PathBuf> {
        if self.config.history.reuse && !job.read_dpf_from_history()? {
            log::debug!("No DPF history for '{}'", job.title());
        }
        let title = job.title().to_string();
        let path = history::unique_name(&output_dir.join(&title), "mid");
        job.save_as(&path)?;
        Ok(path)
    }

    /// Convert every input independently; one failure never stops the rest.
    pub fn process_batch(&self, inputs: &[PathBuf], output_dir: &Path) -> Vec<BatchOutcome> {
        inputs
            .iter()
            .map(|input| {
                let result = self.process(input, output_dir);
                match &result {
                    Ok(path) => log::info!("{} -> {}", input.display(), path.display()),
                    Err(e) if e.is_keys_not_found() => {
                        log::warn!("{}: no keyboard found", input.display())
                    }
                    Err(e) => log::error!("{}: {}", input.display(), e),
                }
                BatchOutcome {
                    input: input.clone(),
                    result,
                }
            })
            .collect()
    }
}

/// Validate configuration and input path
pub fn validate_input<P: AsRef<Path>>(input_path: P, config: &Config) -> PianoResult<()> {
    let path = input_path.as_ref();
    if !path.exists() {
        return Err(PianoError::InputValidationError(format!(
            "input not found: {}",
            path.display()
        )));
    }
    config::validate_config(config).map_err(|e| match e.downcast::<PianoError>() {
        Ok(parameter) => parameter,
        Err(other) => PianoError::ConfigValidationFailed(other.to_string()),
    })?;
    Ok(())
}
