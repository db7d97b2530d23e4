//! The capture store: the directory the producer writes into and the bridge
//! watches.
//!
//! Layout:
//!   `<capture_dir>/<prefix>_<index>.<ext>`  sequence-indexed captures
//!   stable aliases                          overwritten on every capture
//!   flag path                               zero-length trigger request
//!
//! The bridge decides whether a capture is *fresh* by comparing modification
//! times against a [`Baseline`] taken just before it raised the flag.  The
//! comparison is strict so a file already on disk before the trigger can
//! never be mistaken for the one that was asked for.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StoreError;

// ── CaptureFile ──────────────────────────────────────────────────────────

/// A capture on disk, as seen by one `stat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl CaptureFile {
    pub fn stat(path: &Path) -> Result<Self, StoreError> {
        let meta = std::fs::metadata(path).map_err(|e| StoreError::not_accessible(path, e))?;
        let modified = meta
            .modified()
            .map_err(|e| StoreError::not_accessible(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            modified,
        })
    }

    pub fn is_valid(&self, min_valid_size: u64) -> bool {
        self.size >= min_valid_size
    }
}

impl fmt::Display for CaptureFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modified: chrono::DateTime<chrono::Local> = self.modified.into();
        write!(
            f,
            "{} ({} bytes, modified {})",
            self.path.display(),
            self.size,
            modified.to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
        )
    }
}

// ── Baseline ─────────────────────────────────────────────────────────────

/// Newest valid modification time observed before a trigger was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline(Option<SystemTime>);

impl Baseline {
    /// No valid capture existed yet.
    pub const NONE: Baseline = Baseline(None);

    pub fn at(modified: SystemTime) -> Self {
        Self(Some(modified))
    }

    /// `true` iff `modified` is strictly later than the baseline.
    pub fn is_exceeded_by(&self, modified: SystemTime) -> bool {
        match self.0 {
            None => true,
            Some(baseline) => modified > baseline,
        }
    }
}

// ── CaptureStore ─────────────────────────────────────────────────────────

/// Handle on the shared capture directory, aliases and trigger flag.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
    prefix: String,
    extension: String,
    aliases: Vec<PathBuf>,
    flag_path: PathBuf,
    min_valid_size: u64,
}

impl CaptureStore {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.capture_dir.clone(),
            prefix: config.capture_prefix.clone(),
            extension: config.capture_ext.clone(),
            aliases: config.stable_aliases.clone(),
            flag_path: config.flag_path.clone(),
            min_valid_size: config.min_valid_size,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn min_valid_size(&self) -> u64 {
        self.min_valid_size
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag_path
    }

    /// The alias the producer overwrites on every capture.
    pub fn primary_alias(&self) -> Option<&Path> {
        self.aliases.first().map(PathBuf::as_path)
    }

    /// Path of the capture with sequence number `index`.
    pub fn indexed_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.prefix, index, self.extension))
    }

    /// Sequence number encoded in a capture file name, if it has one.
    pub fn parse_index(&self, path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    /// All paths matching `<prefix>_*.<ext>` in the capture directory.
    fn indexed_candidates(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/{}_*.{}",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(&self.prefix),
            glob::Pattern::escape(&self.extension),
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Bad capture pattern {pattern}: {e}");
                return vec![];
            }
        };
        paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!("Skipping unreadable entry {}: {}", e.path().display(), e.error());
                    None
                }
            })
            .collect()
    }

    /// The newest capture whose size reaches the validity threshold, looking
    /// at the stable aliases and the indexed captures alike.
    ///
    /// A file that cannot be stat'ed is skipped; it never aborts the scan.
    pub fn latest_valid_capture(&self) -> Option<CaptureFile> {
        self.aliases
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .chain(self.indexed_candidates())
            .filter_map(|path| match CaptureFile::stat(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    debug!("{e}");
                    None
                }
            })
            .filter(|file| file.is_valid(self.min_valid_size))
            .max_by_key(|file| file.modified)
    }

    /// Snapshot the freshness baseline before raising a trigger.
    pub fn baseline(&self) -> Baseline {
        self.latest_valid_capture()
            .map(|file| Baseline::at(file.modified))
            .unwrap_or(Baseline::NONE)
    }

    /// The latest valid capture, if it is strictly newer than `baseline`.
    pub fn newer_than(&self, baseline: Baseline) -> Option<CaptureFile> {
        self.latest_valid_capture()
            .filter(|file| baseline.is_exceeded_by(file.modified))
    }

    pub fn is_newer_than(&self, baseline: Baseline) -> bool {
        self.newer_than(baseline).is_some()
    }

    /// `1 + max(existing index)`, or `0` for an empty store.
    pub fn next_index(&self) -> u64 {
        self.indexed_candidates()
            .iter()
            .filter_map(|p| self.parse_index(p))
            .max()
            .map(|n| n + 1)
            .unwrap_or(0)
    }

    // ── trigger flag ─────────────────────────────────────────────────

    pub fn flag_present(&self) -> bool {
        self.flag_path.exists()
    }

    /// Create the zero-length trigger flag and hand it to `owner`.
    ///
    /// A failed ownership change is logged; the flag still counts as raised.
    pub fn raise_flag(&self, owner: Option<&str>) -> Result<(), StoreError> {
        File::create(&self.flag_path).map_err(|source| StoreError::Flag {
            path: self.flag_path.clone(),
            source,
        })?;

        if let Some(owner) = owner {
            if let Err(e) = chown_to_user(&self.flag_path, owner) {
                warn!(
                    "chown {} to {owner} failed (non-fatal): {e}",
                    self.flag_path.display()
                );
            }
        }
        info!("Created trigger flag {}", self.flag_path.display());
        Ok(())
    }

    /// Delete the flag.  Returns `false` when there was nothing to delete.
    pub fn consume_flag(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.flag_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Flag {
                path: self.flag_path.clone(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn chown_to_user(path: &Path, user: &str) -> std::io::Result<()> {
    use nix::unistd::{chown, User};

    let account = User::from_name(user)?.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such user: {user}"))
    })?;
    chown(path, Some(account.uid), Some(account.gid))?;
    Ok(())
}

#[cfg(not(unix))]
fn chown_to_user(_path: &Path, _user: &str) -> std::io::Result<()> {
    Ok(())
}

// ─── tests ───────────────────────────────────────────────────────────────
