//! Collision-free persistence of generated Quarto documents.
//!
//! Documents are written with an exclusive-create open, so an existing file is never
//! truncated and there is no window between checking for a name and claiming it. When a
//! name is taken the writer inserts a numeric suffix before the extension and tries again:
//! `answer.qmd`, `answer-2.qmd`, `answer-3.qmd`, and so on.
//!
//! Filenames are not sanitized. Separators and `..` segments are joined onto the output
//! directory as given.

use crate::error::{QuartoChatError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension every written document carries.
pub const QUARTO_EXTENSION: &str = ".qmd";

/// First suffix used after the undecorated name collides.
const FIRST_SUFFIX: u64 = 2;

/// Writes documents into a directory without ever overwriting an existing file.
///
/// By default the writer keeps probing suffixes until a free name is found. A bound can be
/// set with [`UniqueWriter::with_max_attempts`], in which case running out of attempts is
/// reported as [`QuartoChatError::WriteExhausted`].
///
/// # Examples
///
/// ```no_run
/// use quarto_chat::writer::UniqueWriter;
///
/// let writer = UniqueWriter::new("answers");
/// let first = writer.write("linear-regression", "# One").unwrap();
/// let second = writer.write("linear-regression.qmd", "# Two").unwrap();
///
/// assert!(first.unwrap().ends_with("linear-regression.qmd"));
/// assert!(second.unwrap().ends_with("linear-regression-2.qmd"));
/// ```
#[derive(Debug, Clone)]
pub struct UniqueWriter {
    outdir: PathBuf,
    max_attempts: Option<u32>,
}

impl UniqueWriter {
    /// Create an unbounded writer for `outdir`.
    ///
    /// The directory is not checked here; a missing or read-only directory surfaces as an
    /// I/O error on the first write.
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` exclusive-create attempts. At least one attempt is
    /// always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Persist `content` under `filename` or the next free disambiguated variant.
    ///
    /// Returns `Ok(None)` without touching the filesystem when `filename` is empty.
    /// Only `AlreadyExists` failures are retried; every other I/O error is returned as is.
    /// If writing the content fails after the name was claimed, the partial file is removed.
    pub fn write(&self, filename: &str, content: &str) -> Result<Option<PathBuf>> {
        if filename.is_empty() {
            debug!("No filename given, nothing written");
            return Ok(None);
        }

        let normalized = normalize_filename(filename);
        let mut suffix: Option<u64> = None;
        let mut attempts: u32 = 0;

        loop {
            let candidate = match suffix {
                Some(n) => disambiguate(&normalized, n),
                None => normalized.clone(),
            };
            let path = self.outdir.join(&candidate);
            attempts = attempts.saturating_add(1);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_remove(file, &path, content)?;
                    debug!(path = %path.display(), attempts, "Document written");
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "Filename taken, trying next suffix");

                    let bound_reached = self.max_attempts.is_some_and(|max| attempts >= max);
                    let next = match suffix {
                        Some(n) => n.checked_add(1),
                        None => Some(FIRST_SUFFIX),
                    };

                    match next {
                        Some(n) if !bound_reached => suffix = Some(n),
                        _ => {
                            return Err(QuartoChatError::WriteExhausted {
                                filename: self.outdir.join(&normalized),
                                attempts,
                            })
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Write `content` into a freshly created file, removing it again if the write fails.
fn write_or_remove<W: Write>(mut out: W, path: &Path, content: &str) -> Result<()> {
    let written = out.write_all(content.as_bytes()).and_then(|_| out.flush());
    drop(out);

    if let Err(e) = written {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove_err, "Failed to remove partial document");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Persist `content` into `outdir` without overwriting anything. See [`UniqueWriter::write`].
pub fn write_unique(outdir: &Path, filename: &str, content: &str) -> Result<Option<PathBuf>> {
    UniqueWriter::new(outdir).write(filename, content)
}

/// Append the Quarto extension unless `filename` already ends with it.
pub fn normalize_filename(filename: &str) -> String {
    if filename.ends_with(QUARTO_EXTENSION) {
        filename.to_string()
    } else {
        format!("{}{}", filename, QUARTO_EXTENSION)
    }
}

/// Insert `-<n>` before the extension of an already normalized filename.
pub fn disambiguate(normalized: &str, n: u64) -> String {
    let stem = normalized.strip_suffix(QUARTO_EXTENSION).unwrap_or(normalized);
    format!("{}-{}{}", stem, n, QUARTO_EXTENSION)
}
