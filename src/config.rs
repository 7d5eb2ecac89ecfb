//! Configuration system for the piano-to-MIDI processor

use crate::error::PianoError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub detection: DetectionConfig,
    pub classification: ClassificationConfig,
    pub validation: ValidationConfig,
    pub sampling: SamplingConfig,
    pub segmentation: SegmentationConfig,
    pub midi: MidiConfig,
    pub video: VideoConfig,
    pub history: HistoryConfig,
    pub calibration: CalibrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            detection: DetectionConfig::default(),
            classification: ClassificationConfig::default(),
            validation: ValidationConfig::default(),
            sampling: SamplingConfig::default(),
            segmentation: SegmentationConfig::default(),
            midi: MidiConfig::default(),
            video: VideoConfig::default(),
            history: HistoryConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

/// Edge detection and contour extraction used by the key locator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Kernel size (width, height) of the pre-edge blur
    pub pre_blur_kernel: (usize, usize),
    pub canny_low: f32,
    pub canny_high: f32,
    /// Kernel size (width, height) of the edge-merging blur; taller than wide
    pub merge_blur_kernel: (usize, usize),
    /// Polygon approximation epsilon as a fraction of contour perimeter
    pub approx_epsilon_ratio: f64,
    pub min_polygon_vertices: usize,
    /// Rectangles closer than this on every field are duplicates
    pub dedup_tolerance: i32,
    /// A key-like rect satisfies `width * key_aspect_ratio < height`
    pub key_aspect_ratio: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            pre_blur_kernel: (3, 3),
            canny_low: 150.0,
            canny_high: 250.0,
            merge_blur_kernel: (3, 11),
            approx_epsilon_ratio: 0.02,
            min_polygon_vertices: 4,
            dedup_tolerance: 20,
            key_aspect_ratio: 1.5,
        }
    }
}

/// Row and height grouping used by the key classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub y_tolerance: i32,
    pub height_tolerance: i32,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            y_tolerance: 15,
            height_tolerance: 10,
        }
    }
}

/// Keyboard layout invariants checked by the key validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Keys within this many pixels of the frame edge skip the width check
    pub edge_margin: i32,
    pub min_outlier_tolerance: f64,
    pub outlier_mean_ratio: f64,
    pub outlier_iqr_factor: f64,
    pub min_black_keys: usize,
    /// Maximum black keys allowed right of the last white key
    pub max_trailing_black_keys: usize,
    pub gap_group_ratio: f64,
    pub gap_repair_ratio: f64,
    pub gap_regroup_slack: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            edge_margin: 3,
            min_outlier_tolerance: 7.0,
            outlier_mean_ratio: 0.1,
            outlier_iqr_factor: 1.5,
            min_black_keys: 5,
            max_trailing_black_keys: 2,
            gap_group_ratio: 0.5,
            gap_repair_ratio: 1.5,
            gap_regroup_slack: 5.0,
        }
    }
}

/// Watch point placement inside each key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Relative offsets applied on both axes to build the point grid
    pub offsets: Vec<f64>,
    /// Margin around black keys inside which white-key points are dropped
    pub occlusion_margin: i32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            offsets: vec![0.2, 0.5, 0.8],
            occlusion_margin: 11,
        }
    }
}

/// Thresholds turning DPF values into note transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub on_threshold: i32,
    pub off_threshold: i32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            on_threshold: 80,
            off_threshold: 80,
        }
    }
}

/// MIDI file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub ticks_per_beat: u16,
    /// MIDI note of key index 0
    pub base_note: u8,
    pub note_on_velocity: u8,
    pub note_off_velocity: u8,
    pub channel: u8,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            ticks_per_beat: 480,
            base_note: 24, // C1
            note_on_velocity: 64,
            note_off_velocity: 0,
            channel: 0,
        }
    }
}

/// Video decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames larger than this are scaled down to fit
    pub max_width: u32,
    pub max_height: u32,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Frame rate assumed for image sequences
    pub image_sequence_fps: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            image_sequence_fps: 30.0,
        }
    }
}

/// Persisted DPF artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub directory: PathBuf,
    /// Save the DPF of every processed video
    pub enabled: bool,
    /// Skip the vision passes when a stored DPF exists
    pub reuse: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/dpf"),
            enabled: true,
            reuse: false,
        }
    }
}

/// Offline threshold calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub n_components: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub reg_covar: f64,
    pub seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            n_components: 5,
            max_iterations: 100,
            tolerance: 1e-4,
            reg_covar: 1e-4,
            seed: 42,
        }
    }
}

fn invalid_parameter(message: impl Into<String>) -> anyhow::Error {
    PianoError::InvalidConfigParameter(message.into()).into()
}

/// Check every section for out-of-range values. Failures carry a
/// `PianoError::InvalidConfigParameter`.
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let detection = &config.detection;
    if detection.canny_low >= detection.canny_high {
        return Err(invalid_parameter("canny_low must be < canny_high"));
    }
    for (w, h) in [detection.pre_blur_kernel, detection.merge_blur_kernel] {
        if w == 0 || h == 0 || w % 2 == 0 || h % 2 == 0 {
            return Err(invalid_parameter(format!(
                "blur kernel sizes must be odd and positive, got {}x{}",
                w, h
            )));
        }
    }
    if !(detection.approx_epsilon_ratio > 0.0 && detection.approx_epsilon_ratio < 1.0) {
        return Err(invalid_parameter("approx_epsilon_ratio must be in (0, 1)"));
    }
    if detection.key_aspect_ratio <= 0.0 {
        return Err(invalid_parameter("key_aspect_ratio must be positive"));
    }

    if config.sampling.offsets.is_empty()
        || config
            .sampling
            .offsets
            .iter()
            .any(|o| !(0.0..=1.0).contains(o))
    {
        return Err(invalid_parameter("sampling offsets must be non-empty and within [0, 1]"));
    }

    if config.segmentation.on_threshold < 0 || config.segmentation.off_threshold < 0 {
        return Err(invalid_parameter("segmentation thresholds must be non-negative"));
    }

    if config.midi.ticks_per_beat == 0 || config.midi.ticks_per_beat > 0x7FFF {
        return Err(invalid_parameter("ticks_per_beat must be in 1..=32767"));
    }
    if config.midi.base_note > 127
        || config.midi.note_on_velocity > 127
        || config.midi.note_off_velocity > 127
    {
        return Err(invalid_parameter("MIDI note and velocities must be 7-bit values"));
    }
    if config.midi.channel > 15 {
        return Err(invalid_parameter("MIDI channel must be in 0..=15"));
    }

    if config.video.max_width == 0 || config.video.max_height == 0 {
        return Err(invalid_parameter("video max size must be positive"));
    }
    if config.video.image_sequence_fps <= 0.0 {
        return Err(invalid_parameter("image_sequence_fps must be positive"));
    }

    if config.calibration.n_components < 3 {
        // neutral cluster needs a neighbour on each side
        return Err(invalid_parameter("calibration needs at least 3 components"));
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"segmentation": {"on_threshold": 40}}"#).unwrap();
        assert_eq!(config.segmentation.on_threshold, 40);
        assert_eq!(config.segmentation.off_threshold, 80);
        assert_eq!(config.midi.base_note, 24);
    }

    #[test]
    fn even_kernel_is_rejected() {
        let mut config = Config::default();
        config.detection.merge_blur_kernel = (4, 11);
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PianoError>(),
            Some(PianoError::InvalidConfigParameter(_))
        ));
    }
}
