//! Klipper host configuration read-merge-write
//!
//! The host configuration is treated as a sectioned text document. Only the
//! sections owned by this tool are ever touched; everything else round-trips
//! byte-for-byte, in its original order. Writes go through a temporary file
//! and an atomic rename so a crash mid-write never leaves a truncated
//! configuration behind.

use std::fs;
use std::path::{Path, PathBuf};

use crate::board::{BoardKind, Mode};
use crate::error::{Error, Result};

/// Section owning the FPS board's CAN identifier
pub const FPS_SECTION: &str = "fps fps1";
/// Section owning the mainboard's CAN identifier
pub const MAINBOARD_SECTION: &str = "oams oams1";

const UUID_KEY: &str = "canbus_uuid";

/// Section marker for a board role
pub fn section_for(kind: BoardKind) -> &'static str {
    match kind {
        BoardKind::Fps => FPS_SECTION,
        BoardKind::Mainboard => MAINBOARD_SECTION,
    }
}

/// An in-memory host configuration document
#[derive(Debug, Clone)]
pub struct HostConfig {
    path: PathBuf,
    lines: Vec<String>,
}

impl HostConfig {
    /// Load an existing configuration file
    ///
    /// Fails with [`Error::ConfigUnwritable`] on unreadable or structurally
    /// broken files; no repair is attempted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::ConfigUnwritable(format!("{}: {}", path.display(), e)))?;
        Self::parse(path, &text)
    }

    /// Start an empty document that will be created on save
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: Vec::new(),
        }
    }

    /// Load the file if it exists, otherwise start empty
    pub fn load_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::empty(path))
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self> {
        for (n, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('[') && !trimmed.contains(']') {
                return Err(Error::ConfigUnwritable(format!(
                    "{}:{}: unterminated section header",
                    path.display(),
                    n + 1
                )));
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            lines: text.lines().map(str::to_string).collect(),
        })
    }

    /// Path this document was loaded from and will be saved to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the document text
    pub fn to_text(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Index of the header line for `section`, if present
    fn section_start(&self, section: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| header_name(l).map(|n| n == section).unwrap_or(false))
    }

    /// Index one past the last line belonging to the section at `start`
    fn section_end(&self, start: usize) -> usize {
        self.lines[start + 1..]
            .iter()
            .position(|l| header_name(l).is_some())
            .map(|off| start + 1 + off)
            .unwrap_or(self.lines.len())
    }

    /// The recorded CAN identifier for a board role, if any
    pub fn uuid_for(&self, kind: BoardKind) -> Option<&str> {
        let start = self.section_start(section_for(kind))?;
        let end = self.section_end(start);
        self.lines[start + 1..end].iter().find_map(|l| key_value(l, UUID_KEY))
    }

    /// Infer the previously chosen FPS firmware mode from the document
    ///
    /// A configuration that references the CAN bus (a recorded node id or a
    /// `canbus_serial` setting) was set up for canbus mode; any other
    /// existing configuration implies bridge mode.
    pub fn detect_mode(&self) -> Option<Mode> {
        if self.lines.is_empty() {
            return None;
        }
        let canbus = self.lines.iter().any(|l| {
            key_value(l, UUID_KEY).is_some() || key_value(l, "canbus_serial").is_some()
        });
        Some(if canbus { Mode::Canbus } else { Mode::Bridge })
    }

    /// Record a discovered CAN identifier under the section owned by `kind`
    ///
    /// Updates the key in place when the section exists, appends a new
    /// section otherwise. A no-op when the recorded value already matches.
    /// Returns whether the document changed.
    pub fn set_uuid(&mut self, kind: BoardKind, uuid: &str) -> bool {
        let section = section_for(kind);
        match self.section_start(section) {
            Some(start) => {
                let end = self.section_end(start);
                for i in start + 1..end {
                    if key_value(&self.lines[i], UUID_KEY).is_some() {
                        let updated = format!("{}: {}", UUID_KEY, uuid);
                        if self.lines[i] == updated {
                            return false;
                        }
                        self.lines[i] = updated;
                        return true;
                    }
                }
                // Section exists but has no uuid key yet
                self.lines.insert(start + 1, format!("{}: {}", UUID_KEY, uuid));
                true
            }
            None => {
                if !self.lines.is_empty() && !self.lines.last().unwrap().is_empty() {
                    self.lines.push(String::new());
                }
                self.lines.push(format!("[{}]", section));
                self.lines.push(format!("{}: {}", UUID_KEY, uuid));
                true
            }
        }
    }

    /// Record both identifiers and save if anything changed
    ///
    /// This is the Config Writer contract: merge-preserving, idempotent,
    /// atomic. Re-running with identical identifiers rewrites nothing.
    pub fn write_uuids(&mut self, fps_uuid: &str, mainboard_uuid: &str) -> Result<()> {
        let mut dirty = self.set_uuid(BoardKind::Fps, fps_uuid);
        dirty |= self.set_uuid(BoardKind::Mainboard, mainboard_uuid);
        if dirty {
            self.save()?;
            log::info!(
                "Recorded CAN identifiers in {} (fps={}, mainboard={})",
                self.path.display(),
                fps_uuid,
                mainboard_uuid
            );
        } else {
            log::debug!("CAN identifiers already recorded, nothing to write");
        }
        Ok(())
    }

    /// Write the document atomically: temp file in the same directory, then
    /// rename over the original.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("openams.tmp");
        fs::write(&tmp, self.to_text())
            .map_err(|e| Error::ConfigUnwritable(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::ConfigUnwritable(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

/// Section name of a header line, e.g. `[oams oams1]` -> `oams oams1`
fn header_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('[') {
        trimmed.find(']').map(|close| trimmed[1..close].trim())
    } else {
        None
    }
}

/// Value of a `key: value` or `key = value` line when `key` matches
fn key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix(key)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':').or_else(|| rest.strip_prefix('='))?;
    Some(rest.trim())
}
