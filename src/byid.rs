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

//! Disk identifiers taken from the udev `disk/by-id` symlinks.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::sysfs::{self, EntryType, Sysfs};

/// Holder chains (dm on md on partitions ...) are never this deep in
/// practice; the bound keeps a cyclic tree from looping.
pub const MAX_HOLDER_DEPTH: usize = 8;

/// Designator type digits accepted for `scsi-` links, best first.
const SCSI_ID_PRIORITY: &str = "328S10";

#[derive(Debug, Clone, PartialEq, Eq)]
struct WwnEntry {
    wwn: String,
    disk: String,
}

/// Snapshot of `<dev>/disk/by-id`, taken once per run.
#[derive(Debug, Clone)]
pub struct ByIdIndex {
    dir: PathBuf,
    dev_root: PathBuf,
    wwns: Vec<WwnEntry>,
}

impl ByIdIndex {
    /// Collect the WWN links. Without `wwn_twice` these are the
    /// `scsi-3*`, `scsi-2*` and `scsi-8*` links (NAA, EUI-64 and SCSI name
    /// string designators); with it the `wwn-*` links. Partition links are
    /// skipped.
    pub fn build<P: AsRef<Path>>(dev_root: P, wwn_twice: bool) -> Self {
        let dev_root = dev_root.as_ref().to_path_buf();
        let dir = dev_root.join("disk").join("by-id");
        let mut wwns = Vec::new();
        for ent in sysfs::list_dir(&dir) {
            if ent.kind != EntryType::Symlink || ent.name.contains("part") {
                continue;
            }
            let wwn = if wwn_twice {
                match ent.name.strip_prefix("wwn-") {
                    Some(rest) => rest.to_string(),
                    None => continue,
                }
            } else {
                match ent.name.strip_prefix("scsi-").and_then(|r| r.strip_prefix(['3', '2', '8'])) {
                    Some(rest) => format!("0x{}", rest),
                    None => continue,
                }
            };
            let Some(disk) = fs::read_link(&ent.path).ok().and_then(sysfs::base_name) else {
                continue;
            };
            wwns.push(WwnEntry { wwn, disk });
        }
        debug!("collected {} disk WWN links from {}", wwns.len(), dir.display());
        Self { dir, dev_root, wwns }
    }

    /// WWN of the block device `kernel_name` (e.g. `sda`).
    pub fn disk_wwn(&self, kernel_name: &str) -> Option<&str> {
        self.wwns
            .iter()
            .find(|e| e.disk == kernel_name)
            .map(|e| e.wwn.as_str())
    }

    /// udev SCSI identifier for `dev_node`.
    ///
    /// Tries `scsi-` links, then multipath `dm-uuid-mpath-` links, then
    /// `usb-` links. If the node itself has none, its holders (stacked
    /// devices) are searched breadth first. With `strip` the leading
    /// designator type digit of a `scsi-` id is dropped.
    pub fn scsi_id(&self, sysfs: &Sysfs, dev_node: &Path, strip: bool) -> Option<String> {
        let lookup = |node: &Path| self.lookup_node(node, strip);
        let start = sysfs::base_name(dev_node)?;
        if let Some(id) = lookup(dev_node) {
            return Some(id);
        }
        walk_holders(sysfs, &start, |name| lookup(&self.dev_root.join(name)))
    }

    fn lookup_node(&self, node: &Path, strip: bool) -> Option<String> {
        let rdev = fs::metadata(node).ok()?.rdev();
        if let Some(id) = self.lookup_rdev("scsi-", Some(SCSI_ID_PRIORITY), rdev) {
            return Some(if strip { strip_type_digit(id) } else { id });
        }
        self.lookup_rdev("dm-uuid-mpath-", None, rdev)
            .or_else(|| self.lookup_rdev("usb-", None, rdev))
    }

    /// Names (prefix removed) of the by-id links with `prefix` that point
    /// at device `rdev`, reduced to the best one.
    fn lookup_rdev(&self, prefix: &str, priority: Option<&str>, rdev: u64) -> Option<String> {
        let names = sysfs::list_dir(&self.dir).into_iter().filter_map(|ent| {
            let id = ent.name.strip_prefix(prefix)?.to_string();
            let meta = fs::metadata(&ent.path).ok()?;
            (meta.rdev() == rdev).then_some(id)
        });
        pick_by_priority(names, priority)
    }
}

/// First name whose leading character ranks best in `priority`. An exact
/// match on the top rank ends the search; with no priority the first name
/// wins.
fn pick_by_priority<I: IntoIterator<Item = String>>(names: I, priority: Option<&str>) -> Option<String> {
    let Some(priority) = priority else {
        return names.into_iter().next();
    };
    let rank = |s: &str| {
        s.chars()
            .next()
            .and_then(|c| priority.find(c))
            .unwrap_or(usize::MAX)
    };
    let mut best: Option<(usize, String)> = None;
    for name in names {
        let r = rank(&name);
        if r == 0 {
            return Some(name);
        }
        match &best {
            Some((br, _)) if *br <= r => {}
            _ => best = Some((r, name)),
        }
    }
    best.map(|(_, n)| n)
}

/// udev id without its leading designator type character. Ids of a single
/// character are kept whole.
fn strip_type_digit(id: String) -> String {
    let mut chars = id.chars();
    chars.next();
    let rest = chars.as_str();
    if rest.is_empty() {
        return id;
    }
    rest.to_string()
}

/// Breadth-first search over `class/block/<name>/holders`, calling `check`
/// on each holder until it yields a value. Each name is visited once and
/// the walk stops at [`MAX_HOLDER_DEPTH`].
pub fn walk_holders<F>(sysfs: &Sysfs, start: &str, mut check: F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    seen.insert(start.to_string());
    queue.push_back((start.to_string(), 0));

    while let Some((name, depth)) = queue.pop_front() {
        if depth >= MAX_HOLDER_DEPTH {
            debug!("holder walk from {} stopped at {}", start, name);
            continue;
        }
        let holders = sysfs.class_entry("block", &name).join("holders");
        for ent in sysfs::list_dir(holders) {
            if !seen.insert(ent.name.clone()) {
                continue;
            }
            if let Some(id) = check(&ent.name) {
                return Some(id);
            }
            queue.push_back((ent.name, depth + 1));
        }
    }
    None
}
