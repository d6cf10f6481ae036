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

//! Attribute store access for the kernel's sysfs tree.
//!
//! Every read here is best effort. A missing or unreadable attribute comes
//! back as `None` and the caller substitutes a placeholder; nothing in this
//! module aborts an enumeration.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::LsstorError;

/// Handle on a sysfs mount point (normally `/sys`).
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a path relative to the sysfs root, e.g. `bus/scsi/devices`.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    /// `<root>/class/<class>/<name>`
    pub fn class_entry(&self, class: &str, name: &str) -> PathBuf {
        self.root.join("class").join(class).join(name)
    }
}

/// Kind of a directory entry as reported by the directory scan itself,
/// without following symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Dir,
    Symlink,
    File,
    Block,
    Char,
    Other,
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryType,
}

impl DirEntryInfo {
    pub fn is_dir_or_link(&self) -> bool {
        matches!(self.kind, EntryType::Dir | EntryType::Symlink)
    }
}

/// List every entry of `dir`, sorted by name.
///
/// Callers narrow the result with ordinary iterator filters. An unreadable
/// directory yields an empty list.
pub fn list_dir<P: AsRef<Path>>(dir: P) -> Vec<DirEntryInfo> {
    let entries = match fs::read_dir(dir.as_ref()) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    let mut out: Vec<DirEntryInfo> = entries
        .flatten()
        .filter_map(|ent| {
            let name = ent.file_name().to_str()?.to_string();
            let kind = ent.file_type().map(entry_type).unwrap_or(EntryType::Other);
            Some(DirEntryInfo { name, path: ent.path(), kind })
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn entry_type(ft: fs::FileType) -> EntryType {
    use std::os::unix::fs::FileTypeExt;

    if ft.is_symlink() {
        EntryType::Symlink
    } else if ft.is_dir() {
        EntryType::Dir
    } else if ft.is_file() {
        EntryType::File
    } else if ft.is_block_device() {
        EntryType::Block
    } else if ft.is_char_device() {
        EntryType::Char
    } else {
        EntryType::Other
    }
}

/// Read a whole file and trim surrounding whitespace.
pub fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    File::open(p.as_ref())?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

/// Value of attribute `name` under `dir`: the first line without its
/// newline. Leading and trailing blanks inside the line are kept, since
/// INQUIRY strings are space padded.
pub fn attr<P: AsRef<Path>>(dir: P, name: &str) -> Option<String> {
    let path = dir.as_ref().join(name);
    let mut s = String::new();
    File::open(&path).ok()?.read_to_string(&mut s).ok()?;
    let line = s.split('\n').next().unwrap_or("");
    Some(line.to_string())
}

/// Like [`attr`] with surrounding whitespace removed.
pub fn attr_trimmed<P: AsRef<Path>>(dir: P, name: &str) -> Option<String> {
    attr(dir, name).map(|s| s.trim().to_string())
}

/// Parse an attribute as a leading decimal integer, the way `sscanf("%d")`
/// would.
pub fn attr_int<P: AsRef<Path>>(dir: P, name: &str) -> Option<i64> {
    attr(dir, name).and_then(|s| leading_int(&s))
}

/// Raw bytes of a binary attribute, at most `max_len` of them.
pub fn attr_bytes<P: AsRef<Path>>(dir: P, name: &str, max_len: usize) -> Option<Vec<u8>> {
    read_bytes(&dir.as_ref().join(name), max_len).ok()
}

/// At most `max_len` bytes of `path`, keeping the path on failure.
pub fn read_bytes(path: &Path, max_len: usize) -> crate::error::Result<Vec<u8>> {
    let read = || -> io::Result<Vec<u8>> {
        let f = File::open(path)?;
        let mut buf = Vec::with_capacity(max_len.min(4096));
        f.take(max_len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    };
    read().map_err(|source| LsstorError::FileRead { path: path.to_path_buf(), source })
}

/// Look up `name=value` in a `uevent` style file.
pub fn name_eq_value<P: AsRef<Path>>(dir: P, file: &str, name: &str) -> Option<String> {
    let mut s = String::new();
    File::open(dir.as_ref().join(file)).ok()?.read_to_string(&mut s).ok()?;
    s.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k == name).then(|| v.trim_end().to_string())
    })
}

/// True if `path` is a directory, following symlinks.
pub fn is_dir<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path.as_ref()).map(|m| m.is_dir()).unwrap_or(false)
}

/// True if `path` exists as a directory or as a symlink (dangling links
/// included).
pub fn is_dir_or_link<P: AsRef<Path>>(path: P) -> bool {
    match fs::symlink_metadata(path.as_ref()) {
        Ok(m) => m.is_dir() || m.file_type().is_symlink(),
        Err(_) => false,
    }
}

pub fn canonical<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    fs::canonicalize(path.as_ref()).ok()
}

/// Last path component as an owned string.
pub fn base_name<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

/// Decode the leading integer of `s`, skipping leading blanks. Trailing
/// garbage is ignored.
pub fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let v: i64 = digits[..end].parse().ok()?;
    Some(if neg { -v } else { v })
}

/// Decode a leading unsigned integer from `s`, returning it with the rest of
/// the string.
pub fn leading_u64(s: &str) -> Option<(u64, &str)> {
    let end = s.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let v = s[..end].parse().ok()?;
    Some((v, &s[end..]))
}

/// Ordered list of attribute name/value pairs.
///
/// Serializes as a JSON object with keys in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrList(Vec<(String, String)>);

impl AttrList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.push((key.into(), value.into()));
    }

    /// Read each named attribute from `dir` and append the ones present.
    pub fn extend_from_dir(&mut self, dir: &Path, names: &[&str]) {
        for name in names {
            if let Some(v) = attr(dir, name) {
                let key = name.rsplit('/').next().unwrap_or(name);
                self.push(key, v);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for AttrList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
