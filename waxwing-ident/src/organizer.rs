//! Organizer
//!
//! Downstream consumer of the batch manifest: renders a rename pattern from
//! each file's merged identification and plans (then optionally applies)
//! the moves. The identification core never moves files itself; this module
//! is the only place filesystem layout changes.

use crate::batch::BatchReport;
use crate::error::OrganizeError;
use crate::types::{MergedTrack, ResolutionStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default rename pattern
pub const DEFAULT_PATTERN: &str = "{artist}/{album}/{track} - {title}";

/// Attempts at "name (n).ext" before a collision becomes an error
const COLLISION_RETRIES: u32 = 50;

/// One planned rename/move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Pattern-driven file organizer
pub struct Organizer {
    pattern: String,
    target_root: PathBuf,
}

impl Organizer {
    pub fn new(pattern: impl Into<String>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            target_root: target_root.into(),
        }
    }

    /// Plan moves for every organizable outcome in a batch report
    ///
    /// Only resolved and partially resolved files are organizable, and only
    /// when the merged view carries at least artist and title; everything
    /// else stays where it is.
    pub fn plan(&self, report: &BatchReport) -> Vec<PlannedMove> {
        let mut moves = Vec::new();
        for outcome in &report.outcomes {
            match outcome.resolution.status {
                ResolutionStatus::Resolved | ResolutionStatus::PartiallyResolved => {}
                _ => continue,
            }
            let merged = &outcome.resolution.merged;
            if merged.artist.is_none() || merged.title.is_none() {
                debug!(
                    path = %outcome.path.display(),
                    "missing artist/title, not organizing"
                );
                continue;
            }

            let mut rendered = render_pattern(&self.pattern, merged);
            // Appended manually: set_extension would clip a title that
            // itself contains a dot.
            if let Some(ext) = outcome.path.extension().and_then(|e| e.to_str()) {
                rendered.push('.');
                rendered.push_str(ext);
            }
            let to: PathBuf = self
                .target_root
                .join(rendered.split('/').filter(|s| !s.is_empty()).collect::<PathBuf>());

            if to != outcome.path {
                moves.push(PlannedMove {
                    from: outcome.path.clone(),
                    to,
                });
            }
        }
        moves
    }

    /// Apply planned moves
    ///
    /// `dry_run` logs what would happen without touching the filesystem.
    /// Collisions get a " (n)" suffix; per-file failures are collected, not
    /// fatal to the rest of the plan.
    pub fn apply(&self, moves: &[PlannedMove], dry_run: bool) -> Vec<(PathBuf, OrganizeError)> {
        let mut failures = Vec::new();
        for planned in moves {
            if dry_run {
                info!(
                    from = %planned.from.display(),
                    to = %planned.to.display(),
                    "dry run, would move"
                );
                continue;
            }
            if let Err(e) = apply_one(planned) {
                warn!(
                    from = %planned.from.display(),
                    error = %e,
                    "move failed"
                );
                failures.push((planned.from.clone(), e));
            }
        }
        failures
    }
}

fn apply_one(planned: &PlannedMove) -> Result<(), OrganizeError> {
    if let Some(parent) = planned.to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let target = deconflict(&planned.to)?;
    std::fs::rename(&planned.from, &target)?;
    info!(
        from = %planned.from.display(),
        to = %target.display(),
        "file organized"
    );
    Ok(())
}

/// First free variant of the target path
fn deconflict(path: &Path) -> Result<PathBuf, OrganizeError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled");
    let extension = path.extension().and_then(|e| e.to_str());

    for n in 1..=COLLISION_RETRIES {
        let name = match extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(OrganizeError::DestinationOccupied(path.to_path_buf()))
}

/// Render the pattern from a merged identification
///
/// Unknown-but-referenced fields render as placeholder text so the path
/// stays well-formed. Slashes in the pattern are directory separators;
/// slashes inside tag values are sanitized away.
fn render_pattern(pattern: &str, merged: &MergedTrack) -> String {
    let artist = merged
        .artist
        .as_ref()
        .map(|f| f.value.clone())
        .unwrap_or_else(|| "Unknown Artist".to_string());
    let album = merged
        .album
        .as_ref()
        .map(|f| f.value.clone())
        .unwrap_or_else(|| "Unknown Album".to_string());
    let title = merged
        .title
        .as_ref()
        .map(|f| f.value.clone())
        .unwrap_or_else(|| "Unknown Title".to_string());
    let genre = merged
        .genre
        .as_ref()
        .map(|f| f.value.clone())
        .unwrap_or_else(|| "Unknown Genre".to_string());
    let year = merged
        .year
        .as_ref()
        .map(|f| f.value.to_string())
        .unwrap_or_else(|| "0000".to_string());
    let track = merged
        .track_number
        .as_ref()
        .map(|f| format!("{:02}", f.value))
        .unwrap_or_else(|| "00".to_string());

    pattern
        .replace("{artist}", &sanitize_component(&artist))
        .replace("{album}", &sanitize_component(&album))
        .replace("{title}", &sanitize_component(&title))
        .replace("{genre}", &sanitize_component(&genre))
        .replace("{year}", &year)
        .replace("{track}", &track)
}

/// Make a tag value safe as a single path component
fn sanitize_component(value: &str) -> String {
    let mut out: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    out = out.trim().trim_end_matches('.').to_string();
    if out.is_empty() {
        out = "_".to_string();
    }
    out
}
