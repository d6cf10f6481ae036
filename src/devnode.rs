/*
 * This file is part of lsstor.
 *
 * Copyright (C) 2025 lsstor contributors
 *
 * lsstor is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lsstor is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lsstor. If not, see <https://www.gnu.org/licenses/>.
 */

//! Index of the block and character special files in the device directory,
//! used to turn a sysfs `dev` attribute (`major:minor`) into a node path.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use crate::sysfs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Block,
    Char,
}

#[derive(Debug, Clone)]
pub struct DeviceNodeEntry {
    pub major: u32,
    pub minor: u32,
    pub kind: NodeKind,
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceNodeIndex {
    entries: Vec<DeviceNodeEntry>,
}

pub(crate) fn dev_major_minor(rdev: u64) -> (u32, u32) {
    // libc exposes these as safe or unsafe fns depending on its version
    #[allow(unused_unsafe)]
    unsafe {
        (libc::major(rdev as libc::dev_t) as u32, libc::minor(rdev as libc::dev_t) as u32)
    }
}

impl DeviceNodeIndex {
    /// Scan `dev_dir` (not recursively). Symbolic links are not followed
    /// and only block or character special files are kept. An unreadable
    /// directory gives an empty index.
    pub fn build<P: AsRef<Path>>(dev_dir: P) -> Self {
        let dev_dir = dev_dir.as_ref();
        let read = match fs::read_dir(dev_dir) {
            Ok(r) => r,
            Err(e) => {
                debug!("cannot scan {}: {}", dev_dir.display(), e);
                return Self::default();
            }
        };
        let mut entries = Vec::new();
        for ent in read.flatten() {
            let path = ent.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let ft = meta.file_type();
            let kind = if ft.is_block_device() {
                NodeKind::Block
            } else if ft.is_char_device() {
                NodeKind::Char
            } else {
                continue;
            };
            let (major, minor) = dev_major_minor(meta.rdev());
            entries.push(DeviceNodeEntry {
                major,
                minor,
                kind,
                path,
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
            });
        }
        debug!("indexed {} device nodes under {}", entries.len(), dev_dir.display());
        Self { entries }
    }

    pub fn from_entries(entries: Vec<DeviceNodeEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the node for (major, minor, kind). With duplicates the most
    /// recently modified one wins; on equal times the later entry wins.
    pub fn resolve(&self, major: u32, minor: u32, kind: NodeKind) -> Option<&Path> {
        let mut best: Option<&DeviceNodeEntry> = None;
        for e in &self.entries {
            if e.major != major || e.minor != minor || e.kind != kind {
                continue;
            }
            match best {
                Some(b) if b.modified > e.modified => {}
                _ => best = Some(e),
            }
        }
        best.map(|e| e.path.as_path())
    }

    /// Resolve the node for a sysfs class directory from its `dev`
    /// attribute.
    pub fn resolve_sysfs(&self, class_dir: &Path, kind: NodeKind) -> Option<&Path> {
        let value = sysfs::attr(class_dir, "dev")?;
        let (major, minor) = parse_maj_min(&value)?;
        self.resolve(major, minor, kind)
    }
}

/// Parse a `major:minor` pair as found in sysfs `dev` attributes.
pub fn parse_maj_min(s: &str) -> Option<(u32, u32)> {
    let (maj, min) = s.trim().split_once(':')?;
    Some((maj.parse().ok()?, min.parse().ok()?))
}
