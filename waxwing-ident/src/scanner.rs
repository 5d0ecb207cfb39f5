//! Audio file scanner
//!
//! Recursive discovery of audio files under a root folder. Extension-based
//! selection only; the corruption guard performs the real decodability
//! check before any file enters the pipeline.

use crate::error::ScanError;
use crate::types::ScannedFile;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Extensions accepted as audio files
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "wma", "aiff", "aif",
];

/// Scan result with statistics
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Audio files found, in traversal order
    pub files: Vec<ScannedFile>,
    pub total_size: u64,
    /// Count of files by extension
    pub by_format: HashMap<String, usize>,
    /// Non-fatal problems encountered along the way
    pub errors: Vec<String>,
}

/// Recursive audio file scanner
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FileScanner {
    /// Scanner with default ignore patterns for system litter
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Scan a directory tree for audio files
    pub fn scan(&self, root: &Path) -> Result<ScanResult, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut total_size = 0u64;
        let mut by_format: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(ext) = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
            else {
                continue;
            };
            if !AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }

            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    errors.push(format!("{}: {}", entry.path().display(), e));
                    continue;
                }
            };

            total_size += size_bytes;
            *by_format.entry(ext).or_insert(0) += 1;
            files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                size_bytes,
            });
        }

        debug!(
            root = %root.display(),
            files = files.len(),
            total_size,
            errors = errors.len(),
            "scan completed"
        );

        Ok(ScanResult {
            files,
            total_size,
            by_format,
            errors,
        })
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|name| self.ignore_patterns.iter().any(|p| p == name))
            .unwrap_or(false)
    }
}
