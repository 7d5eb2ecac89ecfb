//! Error types for the piano-to-MIDI system

use std::fmt;

/// Custom error type for piano-to-MIDI processing
#[derive(Debug, Clone, PartialEq)]
pub enum PianoError {
    /// E001: No frame of the video produced a valid keyboard layout
    KeysNotFound(String),
    /// E002: Keyboard was found but the DPF signal contains no notes
    NoNotesDetected,
    /// E003: Video source could not be opened or read
    VideoSourceError(String),
    /// E004: Frame has unexpected shape or contents
    InvalidFrame(String),
    /// E005: Configuration validation failed
    ConfigValidationFailed(String),
    /// E006: Invalid configuration parameter
    InvalidConfigParameter(String),
    /// E007: MIDI export error
    MidiExportError(String),
    /// E008: DPF history could not be written
    HistoryError(String),
    /// E009: Statistic requested over an empty data set
    InsufficientData(String),
    /// E010: Processing pipeline error
    ProcessingPipelineError(String),
    /// E011: Processing was stopped through its cancel token
    Cancelled,
    /// E012: Threshold calibration failed
    CalibrationError(String),
    /// E013: Input validation error
    InputValidationError(String),
    /// E014: File I/O error
    FileIoError(String),
}

impl PianoError {
    /// True when the failure means "no keyboard in this video" rather than a
    /// generic processing fault.
    pub fn is_keys_not_found(&self) -> bool {
        matches!(self, PianoError::KeysNotFound(_))
    }
}

impl fmt::Display for PianoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PianoError::KeysNotFound(source) => {
                write!(f, "E001: Failed to locate piano keys in {}", source)
            }
            PianoError::NoNotesDetected => {
                write!(f, "E002: No notes detected in difference-per-frame data")
            }
            PianoError::VideoSourceError(msg) => {
                write!(f, "E003: Video source error - {}", msg)
            }
            PianoError::InvalidFrame(msg) => {
                write!(f, "E004: Invalid frame - {}", msg)
            }
            PianoError::ConfigValidationFailed(msg) => {
                write!(f, "E005: Configuration validation failed - {}", msg)
            }
            PianoError::InvalidConfigParameter(msg) => {
                write!(f, "E006: Invalid configuration parameter - {}", msg)
            }
            PianoError::MidiExportError(msg) => {
                write!(f, "E007: MIDI export error - {}", msg)
            }
            PianoError::HistoryError(msg) => {
                write!(f, "E008: DPF history error - {}", msg)
            }
            PianoError::InsufficientData(msg) => {
                write!(f, "E009: Insufficient data - {}", msg)
            }
            PianoError::ProcessingPipelineError(msg) => {
                write!(f, "E010: Processing pipeline error - {}", msg)
            }
            PianoError::Cancelled => write!(f, "E011: Processing cancelled"),
            PianoError::CalibrationError(msg) => {
                write!(f, "E012: Calibration error - {}", msg)
            }
            PianoError::InputValidationError(msg) => {
                write!(f, "E013: Input validation error - {}", msg)
            }
            PianoError::FileIoError(msg) => {
                write!(f, "E014: File I/O error - {}", msg)
            }
        }
    }
}

impl std::error::Error for PianoError {}

impl From<std::io::Error> for PianoError {
    fn from(err: std::io::Error) -> Self {
        PianoError::FileIoError(err.to_string())
    }
}

impl From<serde_json::Error> for PianoError {
    fn from(err: serde_json::Error) -> Self {
        PianoError::HistoryError(format!("JSON serialization error: {}", err))
    }
}

impl From<image::ImageError> for PianoError {
    fn from(err: image::ImageError) -> Self {
        PianoError::VideoSourceError(format!("Image decode error: {}", err))
    }
}

impl From<anyhow::Error> for PianoError {
    fn from(err: anyhow::Error) -> Self {
        PianoError::ProcessingPipelineError(format!("Generic error: {}", err))
    }
}

/// Result type alias for piano-to-MIDI operations
pub type Result<T> = std::result::Result<T, PianoError>;
