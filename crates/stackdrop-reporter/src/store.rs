//! Pending report storage
//!
//! Manages the directory of report files waiting for the next dispatch.
//! Each file is named `<package_version>-<index>`, where the index is the
//! smallest one not yet used for that version.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use stackdrop_core::domain::DecodeError;

/// Errors returned by [`ReportStore::write`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Directory creation, file creation or the write itself failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every index for this version is taken
    #[error("No free report name left for version {0}")]
    NameSpaceExhausted(String),
}

/// A report file found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReport {
    /// Full path of the file
    pub path: PathBuf,
    /// File name, `<package_version>-<index>`
    pub file_name: String,
    /// Size of the file in bytes
    pub size_bytes: u64,
}

impl PendingReport {
    /// Package version embedded in the file name (everything before the last `-`)
    pub fn package_version(&self) -> Result<&str, DecodeError> {
        parse_report_name(&self.file_name)
            .map(|(version, _)| version)
            .ok_or_else(|| DecodeError::InvalidFileName(self.file_name.clone()))
    }

    /// Index embedded in the file name, if it has one
    pub fn index(&self) -> Option<u64> {
        parse_report_name(&self.file_name).and_then(|(_, index)| index.parse().ok())
    }
}

/// Result of [`ReportStore::delete_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// Manages the local directory of pending report files.
#[derive(Debug, Clone)]
pub struct ReportStore {
    reports_dir: PathBuf,
}

impl ReportStore {
    /// Creates a new store pointing at `reports_dir`.
    pub fn new(reports_dir: PathBuf) -> Self {
        Self { reports_dir }
    }

    /// Returns the default reports directory for `package_name`.
    ///
    /// Typically `$XDG_DATA_HOME/<package_name>/stacktraces` on Linux.
    pub fn default_dir(package_name: &str) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join(package_name)
            .join("stacktraces")
    }

    /// Returns the reports directory path.
    pub fn dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Lists the pending reports, ordered by version, then index, then name.
    ///
    /// Creates the directory if it is missing. A directory that cannot be
    /// read yields an empty list.
    pub fn list_pending(&self) -> Vec<PendingReport> {
        if let Err(e) = fs::create_dir_all(&self.reports_dir) {
            warn!(dir = %self.reports_dir.display(), error = %e, "Cannot create reports directory");
        }

        let entries = match fs::read_dir(&self.reports_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.reports_dir.display(), error = %e, "Cannot read reports directory, assuming no reports");
                return Vec::new();
            }
        };

        let mut reports: Vec<PendingReport> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(PendingReport {
                    path: entry.path(),
                    file_name: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: metadata.len(),
                })
            })
            .collect();

        reports.sort_by(|a, b| {
            let key = |r: &PendingReport| {
                (
                    r.package_version().map(str::to_owned).unwrap_or_default(),
                    r.index().unwrap_or(u64::MAX),
                )
            };
            key(a).cmp(&key(b)).then_with(|| a.file_name.cmp(&b.file_name))
        });
        reports
    }

    /// Counts the pending report files. A missing directory counts as empty.
    pub fn count_pending(&self) -> io::Result<usize> {
        match fs::read_dir(&self.reports_dir) {
            Ok(entries) => {
                let mut count = 0;
                for entry in entries {
                    if entry?.file_type()?.is_file() {
                        count += 1;
                    }
                }
                Ok(count)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Writes `bytes` as a new report for `package_version`.
    ///
    /// Picks the lowest unused index, creates the file exclusively, and
    /// syncs it to disk. A partially written file is removed on failure.
    pub fn write(&self, package_version: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.reports_dir)?;

        let used = self.used_indices(package_version)?;
        let mut index: u64 = 0;
        loop {
            while used.contains(&index) {
                index = index
                    .checked_add(1)
                    .ok_or_else(|| StoreError::NameSpaceExhausted(package_version.to_string()))?;
            }

            let path = self.reports_dir.join(report_file_name(package_version, index));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    // Lost a race with another writer; try the next index.
                    debug!(path = %path.display(), "Report name already taken");
                    index = index
                        .checked_add(1)
                        .ok_or_else(|| StoreError::NameSpaceExhausted(package_version.to_string()))?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let written = file.write_all(bytes).and_then(|()| file.sync_all());
            if let Err(e) = written {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove_err, "Cannot remove partial report");
                }
                return Err(e.into());
            }
            return Ok(path);
        }
    }

    /// Reads the text of a pending report.
    pub fn read(&self, report: &PendingReport) -> io::Result<String> {
        fs::read_to_string(&report.path)
    }

    /// Deletes every file in the directory, continuing past failures.
    pub fn delete_all(&self) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        let entries = match fs::read_dir(&self.reports_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = %self.reports_dir.display(), error = %e, "Cannot read reports directory for cleanup");
                }
                return summary;
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) if entry.file_type().is_ok_and(|t| !t.is_dir()) => entry.path(),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Cannot read reports directory entry");
                    summary.failed += 1;
                    continue;
                }
            };
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted report");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot delete report");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Deletes the given reports, continuing past failures.
    ///
    /// Files written after `reports` was listed are left alone. A report
    /// that is already gone counts as deleted.
    pub fn delete(&self, reports: &[PendingReport]) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        for report in reports {
            match fs::remove_file(&report.path) {
                Ok(()) => {
                    debug!(path = %report.path.display(), "Deleted report");
                    summary.deleted += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %report.path.display(), "Report already removed");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %report.path.display(), error = %e, "Cannot delete report");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn used_indices(&self, package_version: &str) -> io::Result<HashSet<u64>> {
        let mut used = HashSet::new();
        let entries = match fs::read_dir(&self.reports_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(used),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some((version, index)) = parse_report_name(&name) {
                if version == package_version {
                    if let Ok(index) = index.parse::<u64>() {
                        used.insert(index);
                    }
                }
            }
        }
        Ok(used)
    }
}

/// Builds the file name for report `index` of `package_version`.
pub fn report_file_name(package_version: &str, index: u64) -> String {
    format!("{package_version}-{index}")
}

/// Splits a report file name at its last `-` into (version, index).
fn parse_report_name(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('-')
}
