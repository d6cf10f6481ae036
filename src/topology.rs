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

//! Walks the SCSI and NVMe parts of sysfs and turns each logical unit,
//! namespace, host and controller into a [`TopologyRecord`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::address::{AddrFilter, Address, NVME_HOST_NUM};
use crate::byid::ByIdIndex;
use crate::config::Settings;
use crate::devnode::{DeviceNodeIndex, NodeKind};
use crate::sysfs::{self, AttrList, DirEntryInfo, EntryType, Sysfs};
use crate::transport::{self, TransportInfo};
use crate::vpd::{self, LogicalUnitIdentity};

const SCSI_DEVICE_ATTRS: &[&str] = &[
    "vendor",
    "model",
    "rev",
    "type",
    "state",
    "queue_depth",
    "scsi_level",
    "device_blocked",
    "timeout",
    "iocounterbits",
    "iodone_cnt",
    "ioerr_cnt",
    "iorequest_cnt",
    "queue_type",
];

const SCSI_HOST_ATTRS: &[&str] = &[
    "active_mode",
    "can_queue",
    "cmd_per_lun",
    "host_busy",
    "nr_hw_queues",
    "sg_tablesize",
    "state",
    "unique_id",
    "use_blk_mq",
    "prot_capabilities",
    "prot_guard_type",
];

const NVME_NS_ATTRS: &[&str] = &[
    "capability",
    "ext_range",
    "hidden",
    "nsid",
    "range",
    "removable",
    "queue/nr_requests",
    "queue/read_ahead_kb",
    "queue/write_cache",
    "queue/logical_block_size",
    "queue/physical_block_size",
];

const NVME_CTL_ATTRS: &[&str] = &[
    "cntlid",
    "state",
    "device/current_link_width",
    "firmware_rev",
    "device/current_link_speed",
    "model",
    "serial",
    "subsysnqn",
    "transport",
    "address",
];

/// Values some drivers report instead of leaving an attribute out.
const NULL_NAMES: [&str; 2] = ["<NULL>", "(null)"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ScsiDevice,
    ScsiHost,
    NvmeNamespace,
    NvmeController,
}

/// Capacity as reported by the block layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskSize {
    pub blocks_512: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_block_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_block_size: Option<i64>,
}

impl DiskSize {
    pub fn bytes(&self) -> u64 {
        self.blocks_512.saturating_mul(512)
    }

    fn read(dir: &Path) -> Option<Self> {
        let blocks_512 = sysfs::attr(dir, "size")?.trim().parse().ok()?;
        Some(Self {
            blocks_512,
            logical_block_size: sysfs::attr_int(dir, "queue/logical_block_size"),
            physical_block_size: sysfs::attr_int(dir, "queue/physical_block_size"),
        })
    }
}

/// One fully resolved entry of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyRecord {
    pub kind: RecordKind,
    /// Directory name in sysfs, e.g. `2:0:0:0`, `host2`, `nvme0n1`.
    pub name: String,
    pub address: Address,
    pub sysfs_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_path: Option<PathBuf>,
    /// Canonical `device` directory of a host or controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_node: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_minor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_node: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_kernel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_major_minor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<LogicalUnitIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportInfo>,
    pub attributes: AttrList,
    /// Peripheral device type, when `type` decodes to 0..=31.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdt: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<DiskSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wwn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scsi_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection: Option<Protection>,
}

impl TopologyRecord {
    fn new(kind: RecordKind, name: &str, address: Address, sysfs_path: PathBuf) -> Self {
        Self {
            kind,
            name: name.to_string(),
            address,
            canonical_path: sysfs::canonical(&sysfs_path),
            sysfs_path,
            device_dir: None,
            device_node: None,
            kernel_name: None,
            major_minor: None,
            generic_node: None,
            generic_kernel_name: None,
            generic_major_minor: None,
            identity: None,
            transport: None,
            attributes: AttrList::new(),
            pdt: None,
            size: None,
            wwn: None,
            scsi_id: None,
            protection: None,
        }
    }
}

/// Data integrity settings of a SCSI disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Protection {
    /// Target protection type from the `scsi_disk` class, `0` when off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_type: Option<String>,
    /// Negotiated mode, e.g. `none`, `dif1` or `dix1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_mode: Option<String>,
    /// Initiator integrity profile of the block device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_format: Option<String>,
}

impl Protection {
    /// Settings of the SCSI device at `dev_dir`, `None` if it reports none.
    pub fn read(dev_dir: &Path, block_dir: Option<&Path>) -> Option<Self> {
        let sd = scsi_disk_dir(dev_dir);
        let prot = Self {
            protection_type: sd.as_ref().and_then(|d| sysfs::attr_trimmed(d, "protection_type")),
            protection_mode: sd.as_ref().and_then(|d| sysfs::attr_trimmed(d, "protection_mode")),
            integrity_format: block_dir.and_then(|b| sysfs::attr_trimmed(b.join("integrity"), "format")),
        };
        (prot != Self::default()).then_some(prot)
    }
}

/// Extra lookups that need the `/dev/disk/by-id` links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichOptions {
    pub wwn: bool,
    /// Take the WWN from `wwn-*` links instead of `scsi-*` ones.
    pub wwn_twice: bool,
    pub scsi_id: bool,
    /// Drop the designator type digit from `scsi-` identifiers.
    pub scsi_id_strip: bool,
}

impl EnrichOptions {
    fn needs_by_id(&self) -> bool {
        self.wwn || self.scsi_id
    }
}

/// PDTs whose devices have a capacity: disk, optical, RBC and ZBC.
pub fn is_direct_access(pdt: u8) -> bool {
    matches!(pdt, 0x0 | 0x5 | 0xe | 0x14)
}

/// Directory entry holding the primary (non generic) node of a SCSI device,
/// and the node kind it leads to.
fn primary_kind(name: &str) -> Option<NodeKind> {
    if name.starts_with("scsi_changer") {
        Some(NodeKind::Char)
    } else if name.starts_with("block") {
        Some(NodeKind::Block)
    } else if name == "tape" {
        Some(NodeKind::Char)
    } else if name.starts_with("scsi_tape:st") {
        name.ends_with(|c: char| c.is_ascii_digit()).then_some(NodeKind::Char)
    } else if name.starts_with("onstream_tape:os") {
        Some(NodeKind::Char)
    } else {
        None
    }
}

fn first_child(dir: &Path) -> Option<PathBuf> {
    sysfs::list_dir(dir)
        .into_iter()
        .find(DirEntryInfo::is_dir_or_link)
        .map(|e| e.path)
}

/// Class directory of the primary node, e.g. `<dev>/block/sda`.
fn primary_node_dir(dev_dir: &Path) -> Option<(PathBuf, NodeKind)> {
    for ent in sysfs::list_dir(dev_dir) {
        if !ent.is_dir_or_link() {
            continue;
        }
        let Some(kind) = primary_kind(&ent.name) else {
            continue;
        };
        if ent.kind == EntryType::Dir {
            let child = first_child(&ent.path)?;
            return Some((child, kind));
        }
        return Some((ent.path, kind));
    }
    None
}

/// `scsi_disk` class directory of a SCSI device, either a
/// `scsi_disk:<hctl>` link or the first entry of a `scsi_disk` directory.
fn scsi_disk_dir(dev_dir: &Path) -> Option<PathBuf> {
    let ent = sysfs::list_dir(dev_dir)
        .into_iter()
        .find(|e| e.is_dir_or_link() && e.name.starts_with("scsi_disk"))?;
    if ent.name.contains(':') {
        return Some(ent.path);
    }
    first_child(&ent.path)
}

/// Class directory of the SCSI generic (sg) node.
fn generic_node_dir(dev_dir: &Path) -> Option<PathBuf> {
    let generic = dev_dir.join("generic");
    if sysfs::is_dir(&generic) {
        return Some(generic);
    }
    let ent = sysfs::list_dir(dev_dir)
        .into_iter()
        .find(|e| e.is_dir_or_link() && e.name.starts_with("scsi_generic"))?;
    if ent.kind == EntryType::Dir && ent.name == "scsi_generic" {
        return first_child(&ent.path);
    }
    sysfs::is_dir(&ent.path).then_some(ent.path)
}

fn kernel_name(class_dir: &Path) -> Option<String> {
    let canon = sysfs::canonical(class_dir).unwrap_or_else(|| class_dir.to_path_buf());
    sysfs::base_name(canon)
}

/// Names in `bus/scsi/devices` that are logical units rather than hosts,
/// targets or the auxiliary entries of very old kernels.
fn is_scsi_device_name(name: &str) -> bool {
    if ["mt", "ot", "gen"].iter().any(|s| name.contains(s)) {
        return false;
    }
    if name.starts_with("host") || name.starts_with("target") {
        return false;
    }
    name.contains(':')
}

/// Number in `<prefix><digits>`, e.g. `host12` or `nvme0`.
fn numbered(name: &str, prefix: &str) -> Option<i32> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Controller number and namespace id of a namespace entry such as
/// `nvme0n1` or `nvme0c1n2`. The nsid follows the last `n`; a `v` there
/// marks something other than a namespace.
fn namespace_name(name: &str) -> Option<(i32, u32)> {
    let rest = name.strip_prefix("nvme")?;
    rest.find('n')?;
    let minor = sysfs::leading_int(rest).and_then(|m| i32::try_from(m).ok())?;
    let tail = &name[name.rfind('n')? + 1..];
    if tail.starts_with('v') {
        return None;
    }
    let (nsid, _) = sysfs::leading_u64(tail)?;
    Some((minor, u32::try_from(nsid).ok()?))
}

/// Attribute value unless a driver left it as a null placeholder.
fn non_null(value: Option<String>) -> Option<String> {
    value.filter(|v| !NULL_NAMES.iter().any(|n| v.starts_with(n)))
}

/// Device tree walker. Owns the per-run indexes.
#[derive(Debug)]
pub struct Topology {
    sysfs: Sysfs,
    dev_root: PathBuf,
    nodes: DeviceNodeIndex,
    by_id: Option<ByIdIndex>,
    options: EnrichOptions,
}

impl Topology {
    pub fn new(settings: &Settings) -> Self {
        Self::with_options(settings, EnrichOptions::default())
    }

    pub fn with_options(settings: &Settings, options: EnrichOptions) -> Self {
        let by_id = options
            .needs_by_id()
            .then(|| ByIdIndex::build(&settings.dev_root, options.wwn_twice));
        Self {
            sysfs: Sysfs::new(&settings.sysfs_root),
            dev_root: settings.dev_root.clone(),
            nodes: DeviceNodeIndex::build(&settings.dev_root),
            by_id,
            options,
        }
    }

    /// Replace the device node index, for trees whose nodes cannot be
    /// created on disk.
    pub fn with_nodes(mut self, nodes: DeviceNodeIndex) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn sysfs(&self) -> &Sysfs {
        &self.sysfs
    }

    pub fn dev_root(&self) -> &Path {
        &self.dev_root
    }

    /// SCSI logical units, in address order.
    pub fn list_scsi(&self, filter: &AddrFilter) -> Vec<TopologyRecord> {
        let root = self.sysfs.path("bus/scsi/devices");
        if !sysfs::is_dir(&root) {
            debug!("SCSI mid level not loaded, {} missing", root.display());
            return Vec::new();
        }
        let mut found: Vec<(Address, DirEntryInfo)> = sysfs::list_dir(&root)
            .into_iter()
            .filter(|e| is_scsi_device_name(&e.name))
            .filter_map(|e| match Address::parse(&e.name) {
                Ok(addr) => Some((addr, e)),
                Err(err) => {
                    debug!("skipping {}: {}", e.name, err);
                    None
                }
            })
            .filter(|(addr, _)| filter.matches(addr))
            .collect();
        found.sort_by(|x, y| x.0.cmp(&y.0));
        found
            .into_iter()
            .map(|(addr, ent)| self.scsi_record(addr, &ent.name, ent.path))
            .collect()
    }

    fn scsi_record(&self, addr: Address, name: &str, dir: PathBuf) -> TopologyRecord {
        let mut rec = TopologyRecord::new(RecordKind::ScsiDevice, name, addr, dir);
        let dir = rec.sysfs_path.clone();
        rec.attributes.extend_from_dir(&dir, SCSI_DEVICE_ATTRS);
        rec.pdt = rec
            .attributes
            .get("type")
            .and_then(sysfs::leading_int)
            .and_then(|p| u8::try_from(p).ok())
            .filter(|p| *p < 32);

        let primary = primary_node_dir(&dir);
        let block_dir = primary.as_ref().filter(|(_, k)| *k == NodeKind::Block).map(|(d, _)| d.as_path());
        rec.protection = Protection::read(&dir, block_dir);

        if let Some((class_dir, kind)) = primary {
            rec.kernel_name = kernel_name(&class_dir);
            rec.device_node = self.nodes.resolve_sysfs(&class_dir, kind).map(Path::to_path_buf);
            rec.major_minor = sysfs::attr_trimmed(&class_dir, "dev");
            if kind == NodeKind::Block {
                if rec.pdt.is_some_and(is_direct_access) {
                    rec.size = DiskSize::read(&class_dir);
                }
                if self.options.wwn {
                    rec.wwn = self.disk_wwn(rec.kernel_name.as_deref());
                }
            }
            if self.options.scsi_id {
                rec.scsi_id = self.scsi_id(&rec);
            }
        } else {
            debug!("no primary device node under {}", dir.display());
        }

        if let Some(gdir) = generic_node_dir(&dir) {
            rec.generic_kernel_name = kernel_name(&gdir);
            rec.generic_node = self.nodes.resolve_sysfs(&gdir, NodeKind::Char).map(Path::to_path_buf);
            rec.generic_major_minor = sysfs::attr_trimmed(&gdir, "dev");
        }

        rec.identity = vpd::lu_name(&self.sysfs, name, true);
        rec.transport = Some(transport::classify_device(&self.sysfs, &addr));
        rec
    }

    fn disk_wwn(&self, kernel_name: Option<&str>) -> Option<String> {
        let by_id = self.by_id.as_ref()?;
        by_id.disk_wwn(kernel_name?).map(str::to_string)
    }

    fn scsi_id(&self, rec: &TopologyRecord) -> Option<String> {
        let by_id = self.by_id.as_ref()?;
        let node = rec
            .device_node
            .clone()
            .or_else(|| rec.kernel_name.as_ref().map(|k| self.dev_root.join(k)))?;
        by_id.scsi_id(&self.sysfs, &node, self.options.scsi_id_strip)
    }

    /// NVMe controllers under `class/nvme` passing the host and channel
    /// parts of `filter`, paired with their controller number.
    fn nvme_controllers(&self, filter: &AddrFilter) -> Vec<(i32, DirEntryInfo)> {
        let root = self.sysfs.path("class/nvme");
        if !sysfs::is_dir(&root) {
            debug!("NVMe driver not loaded, {} missing", root.display());
            return Vec::new();
        }
        if !filter.matches_host(NVME_HOST_NUM) {
            return Vec::new();
        }
        let mut ctls: Vec<(i32, DirEntryInfo)> = sysfs::list_dir(&root)
            .into_iter()
            .filter_map(|e| numbered(&e.name, "nvme").map(|n| (n, e)))
            .filter(|(n, _)| filter.channel.map_or(true, |c| c == *n))
            .collect();
        ctls.sort_by_key(|(n, _)| *n);
        ctls
    }

    /// NVMe namespaces, in address order.
    pub fn list_nvme(&self, filter: &AddrFilter) -> Vec<TopologyRecord> {
        let mut out = Vec::new();
        for (_, ctl) in self.nvme_controllers(filter) {
            let cntlid = sysfs::attr_int(&ctl.path, "cntlid")
                .and_then(|c| i32::try_from(c).ok())
                .unwrap_or_else(|| {
                    debug!("no cntlid under {}", ctl.path.display());
                    0
                });
            if filter.target.is_some_and(|t| t != cntlid) {
                continue;
            }
            for ns in sysfs::list_dir(&ctl.path) {
                let Some((minor, nsid)) = namespace_name(&ns.name) else {
                    continue;
                };
                // A multipath namespace can sit under another controller's
                // directory, so its own address decides.
                let addr = Address::nvme(minor, cntlid, nsid);
                if !filter.matches(&addr) {
                    continue;
                }
                out.push(self.nvme_record(addr, &ns.name, ns.path, &ctl.path));
            }
        }
        out.sort_by(|x, y| x.address.cmp(&y.address));
        out
    }

    fn nvme_record(&self, addr: Address, name: &str, dir: PathBuf, ctl_dir: &Path) -> TopologyRecord {
        let mut rec = TopologyRecord::new(RecordKind::NvmeNamespace, name, addr, dir);
        let dir = rec.sysfs_path.clone();
        rec.attributes.extend_from_dir(&dir, NVME_NS_ATTRS);
        if let Some(model) = sysfs::attr_trimmed(ctl_dir, "model") {
            rec.attributes.push("model", model);
        }
        rec.pdt = Some(0);
        rec.kernel_name = Some(name.to_string());
        rec.device_node = self.nodes.resolve_sysfs(&dir, NodeKind::Block).map(Path::to_path_buf);
        rec.major_minor = sysfs::attr_trimmed(&dir, "dev");
        rec.size = DiskSize::read(&dir);
        if let Some(wwid) = sysfs::attr_trimmed(&dir, "wwid") {
            let id = vpd::identity_from_wwid(&wwid);
            rec.identity = (!id.is_none()).then_some(id);
            rec.wwn = Some(wwid);
        }
        rec.transport = Some(transport::classify_nvme(&dir.join("device")));
        rec
    }

    /// SCSI hosts in host number order.
    pub fn list_hosts(&self, filter: &AddrFilter) -> Vec<TopologyRecord> {
        let root = self.sysfs.path("class/scsi_host");
        if !sysfs::is_dir(&root) {
            debug!("no SCSI hosts, {} missing", root.display());
            return Vec::new();
        }
        let mut hosts: Vec<(i32, DirEntryInfo)> = sysfs::list_dir(&root)
            .into_iter()
            .filter_map(|e| numbered(&e.name, "host").map(|h| (h, e)))
            .filter(|(h, _)| filter.matches_host(*h))
            .collect();
        hosts.sort_by_key(|(h, _)| *h);
        hosts
            .into_iter()
            .map(|(h, e)| self.host_record(h, &e.name, e.path))
            .collect()
    }

    fn host_record(&self, host: i32, name: &str, dir: PathBuf) -> TopologyRecord {
        let addr = Address::scsi(host, 0, 0, 0);
        let mut rec = TopologyRecord::new(RecordKind::ScsiHost, name, addr, dir);
        let dir = rec.sysfs_path.clone();
        rec.device_dir = sysfs::canonical(dir.join("device"));
        let driver = non_null(sysfs::attr(&dir, "proc_name")).or_else(|| {
            let drv = sysfs::canonical(dir.join("device").join("..").join("driver"))?;
            sysfs::base_name(drv)
        });
        if let Some(driver) = driver {
            rec.attributes.push("driver", driver);
        }
        rec.attributes.extend_from_dir(&dir, SCSI_HOST_ATTRS);
        rec.transport = Some(transport::classify_host(&self.sysfs, name));
        rec
    }

    /// NVMe controllers in controller number order.
    pub fn list_controllers(&self, filter: &AddrFilter) -> Vec<TopologyRecord> {
        self.nvme_controllers(filter)
            .into_iter()
            .map(|(minor, e)| self.controller_record(minor, &e.name, e.path))
            .collect()
    }

    fn controller_record(&self, minor: i32, name: &str, dir: PathBuf) -> TopologyRecord {
        let cntlid = sysfs::attr_int(&dir, "cntlid")
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(0);
        let addr = Address::nvme(minor, cntlid, 0);
        let mut rec = TopologyRecord::new(RecordKind::NvmeController, name, addr, dir);
        let dir = rec.sysfs_path.clone();
        rec.device_dir = sysfs::canonical(dir.join("device"));
        rec.kernel_name = Some(name.to_string());
        rec.device_node = self.nodes.resolve_sysfs(&dir, NodeKind::Char).map(Path::to_path_buf);
        let major = sysfs::name_eq_value(&dir, "uevent", "MAJOR");
        let minor_s = sysfs::name_eq_value(&dir, "uevent", "MINOR");
        rec.major_minor = match (major, minor_s) {
            (Some(ma), Some(mi)) => Some(format!("{}:{}", ma, mi)),
            _ => None,
        };
        for attr in NVME_CTL_ATTRS {
            let key = attr.rsplit('/').next().unwrap_or(attr);
            let value = match *attr {
                "model" | "serial" | "firmware_rev" => {
                    non_null(sysfs::attr(&dir, attr)).map(|v| v.trim().to_string())
                }
                _ => sysfs::attr(&dir, attr),
            };
            if let Some(v) = value {
                rec.attributes.push(key, v);
            }
        }
        rec.wwn = rec.attributes.get("subsysnqn").map(str::to_string);
        rec.transport = Some(transport::classify_nvme(&dir));
        rec
    }
}
