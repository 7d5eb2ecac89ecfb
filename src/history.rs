//! Persisted DPF history
//!
//! A processed video is stored as `{"fps": float, "dpf": [[int]]}` under
//! `<history_dir>/<clean title>.dpf.json`, so later runs can skip the vision
//! passes.

use crate::error::Result as PianoResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_CHARS: usize = 255;
pub const HISTORY_EXTENSION: &str = "dpf.json";

/// Frame rate and DPF matrix of one processed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpfData {
    pub fps: f64,
    pub dpf: Vec<Vec<i32>>,
}

impl DpfData {
    pub fn new(fps: f64, dpf: Vec<Vec<i32>>) -> Self {
        Self { fps, dpf }
    }

    pub fn to_json(&self) -> PianoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> PianoResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Replace characters that are not allowed in file names, trim surrounding
/// whitespace and cap the length.
pub fn clean_filename(name: &str, replacement: char) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { replacement } else { c })
        .collect();
    replaced.trim().chars().take(MAX_FILENAME_CHARS).collect()
}

/// First of `base.ext`, `base(0).ext`, `base(1).ext`, ... that does not exist.
pub fn unique_name(base: &Path, ext: &str) -> PathBuf {
    let stem = base.as_os_str().to_string_lossy().into_owned();
    let mut candidate = PathBuf::from(format!("{}.{}", stem, ext));
    let mut n = 0usize;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}({}).{}", stem, n, ext));
        n += 1;
    }
    candidate
}

pub fn history_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.{}", clean_filename(title, '_'), HISTORY_EXTENSION))
}

/// Write `data` for `title`, creating the directory if needed.
pub fn save_history(dir: &Path, title: &str, data: &DpfData) -> PianoResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = history_path(dir, title);
    fs::write(&path, data.to_json()?)?;
    log::info!("Saved DPF history ({} rows) to {}", data.dpf.len(), path.display());
    Ok(path)
}

/// Read one history file. A file that is not a valid history artifact is
/// treated as absent.
pub fn load_history_file(path: &Path) -> PianoResult<Option<DpfData>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match DpfData::from_json(&text) {
        Ok(data) => Ok(Some(data)),
        Err(e) => {
            log::warn!("Ignoring malformed DPF history {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// History recorded for `title`, if any usable one exists.
pub fn load_history(dir: &Path, title: &str) -> PianoResult<Option<DpfData>> {
    load_history_file(&history_path(dir, title))
}

/// Every usable history artifact in `dir`, in file name order.
pub fn load_history_dir(dir: &Path) -> PianoResult<Vec<DpfData>> {
    let suffix = format!(".{}", HISTORY_EXTENSION);
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .map(|n| n.to_string_lossy().ends_with(&suffix))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut histories = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(data) = load_history_file(&path)? {
            histories.push(data);
        }
    }
    log::debug!("Loaded {} DPF histories from {}", histories.len(), dir.display());
    Ok(histories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_filename_replaces_reserved_characters() {
        assert_eq!(
            clean_filename("https://www.example.com/watch?v=abc", '_'),
            "https___www.example.com_watch_v=abc"
        );
        assert_eq!(clean_filename("  spaced  ", '_'), "spaced");
        assert_eq!(clean_filename(&"a".repeat(300), '_').len(), 255);
    }

    #[test]
    fn history_path_uses_clean_title() {
        let path = history_path(Path::new("data"), "a:b");
        assert_eq!(path, Path::new("data").join("a_b.dpf.json"));
    }
}
