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

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LsstorError, Result};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// Environment variable holding the default `--lunhex` count.
pub const LUNHEX_ENV: &str = "LSSCSI_LUNHEX_OPT";

/// Optional settings file. Every key may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SavedConfig {
    #[serde(default)]
    pub sysfs_root: Option<PathBuf>,
    #[serde(default)]
    pub dev_root: Option<PathBuf>,
    #[serde(default)]
    pub lunhex: Option<u8>,
}

/// Effective settings after merging defaults, the config file, the
/// environment and the command line (later wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    /// 0 for decimal LUNs, 1 for T10 hex, 2 for full hex.
    pub lunhex: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            lunhex: 0,
        }
    }
}

/// Command line values that override the other sources.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub sysfs_root: Option<PathBuf>,
    pub dev_root: Option<PathBuf>,
    pub lunhex: u8,
}

impl Settings {
    /// Build a settings object pointing at alternate roots, as tests and
    /// `--sysfsroot` do.
    pub fn with_roots<P: Into<PathBuf>, Q: Into<PathBuf>>(sysfs_root: P, dev_root: Q) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            lunhex: 0,
        }
    }

    /// Merge every source: defaults, then `saved`, then the environment,
    /// then `overrides`.
    pub fn resolve(saved: Option<&SavedConfig>, overrides: &Overrides) -> Self {
        let mut s = Settings::default();
        if let Some(saved) = saved {
            if let Some(root) = &saved.sysfs_root {
                s.sysfs_root = root.clone();
            }
            if let Some(root) = &saved.dev_root {
                s.dev_root = root.clone();
            }
            if let Some(n) = saved.lunhex {
                s.lunhex = n.min(2);
            }
        }
        if let Some(n) = lunhex_from_env() {
            s.lunhex = n;
        }
        if let Some(root) = &overrides.sysfs_root {
            s.sysfs_root = root.clone();
        }
        if let Some(root) = &overrides.dev_root {
            s.dev_root = root.clone();
        }
        if overrides.lunhex > 0 {
            s.lunhex = overrides.lunhex.min(2);
        }
        s
    }
}

/// `LSSCSI_LUNHEX_OPT` as a count, ignoring values that do not parse.
pub fn lunhex_from_env() -> Option<u8> {
    let v = env::var(LUNHEX_ENV).ok()?;
    let n = crate::sysfs::leading_int(&v)?;
    Some(n.clamp(0, 2) as u8)
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("lsstor").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("lsstor")
            .join("config.json");
    }
    PathBuf::from("/etc/lsstor/config.json")
}

/// Read the settings file at `path`. A missing file is not an error; a
/// file that does not parse is.
pub fn load_config_from(path: &Path) -> Result<Option<SavedConfig>> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LsstorError::FileRead { path: path.to_path_buf(), source: e });
        }
    };
    let cfg: SavedConfig = serde_json::from_str(&data)
        .map_err(|e| LsstorError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

pub fn load_saved_config() -> Result<Option<SavedConfig>> {
    load_config_from(&config_path())
}
