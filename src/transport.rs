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

//! Transport classification for SCSI hosts, SCSI devices and NVMe
//! controllers.
//!
//! Each check looks for the sysfs class directory a transport driver
//! registers. The first check that matches decides the transport; check
//! order matters because some hosts show up under several classes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::address::Address;
use crate::sysfs::{self, AttrList, Sysfs};
use crate::vpd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Spi,
    Fc,
    Fcoe,
    Sas,
    SasClass,
    Sbp,
    Iscsi,
    Srp,
    Usb,
    Ata,
    Sata,
    Pcie,
    Unknown,
}

impl TransportKind {
    /// Name shown on `transport=` lines.
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Spi => "spi",
            TransportKind::Fc => "fc",
            TransportKind::Fcoe => "fcoe",
            TransportKind::Sas | TransportKind::SasClass => "sas",
            TransportKind::Sbp => "sbp",
            TransportKind::Iscsi => "iSCSI",
            TransportKind::Srp => "srp",
            TransportKind::Usb => "usb",
            TransportKind::Ata => "ata",
            TransportKind::Sata => "sata",
            TransportKind::Pcie => "pcie",
            TransportKind::Unknown => "unknown",
        }
    }
}

/// Result of a classification: the kind, a one-line summary such as
/// `sas:0x5000c500a1b2c3d4`, and the detail attributes for long output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportInfo {
    pub kind: TransportKind,
    pub summary: String,
    pub attributes: AttrList,
}

impl TransportInfo {
    pub fn unknown() -> Self {
        Self::new(TransportKind::Unknown, String::new())
    }

    fn new(kind: TransportKind, summary: String) -> Self {
        Self { kind, summary, attributes: AttrList::new() }
    }

    pub fn is_known(&self) -> bool {
        self.kind != TransportKind::Unknown
    }
}

const FC_HOST_ATTRS: &[&str] = &[
    "active_fc4s",
    "supported_fc4s",
    "fabric_name",
    "maxframe_size",
    "max_npiv_vports",
    "npiv_vports_inuse",
    "node_name",
    "port_name",
    "port_id",
    "port_state",
    "port_type",
    "speed",
    "supported_speeds",
    "supported_classes",
    "tgtid_bind_type",
];

const SAS_PHY_LINK_ATTRS: &[&str] = &[
    "device_type",
    "initiator_port_protocols",
    "invalid_dword_count",
    "loss_of_dword_sync_count",
    "minimum_linkrate",
    "minimum_linkrate_hw",
    "maximum_linkrate",
    "maximum_linkrate_hw",
    "negotiated_linkrate",
    "phy_identifier",
    "phy_reset_problem_count",
    "running_disparity_error_count",
    "sas_address",
    "target_port_protocols",
];

const SAS_PHY_BRIEF_ATTRS: &[&str] = &[
    "sas_address",
    "phy_identifier",
    "minimum_linkrate",
    "minimum_linkrate_hw",
    "maximum_linkrate",
    "maximum_linkrate_hw",
    "negotiated_linkrate",
];

const SAS_HA_PHY_ATTRS: &[&str] = &[
    "class", "enabled", "id", "iproto", "linkrate", "oob_mode", "role", "sas_addr", "tproto",
    "type",
];

const SPI_TARGET_ATTRS: &[&str] =
    &["dt", "max_offset", "max_width", "min_period", "offset", "period", "width"];

const FC_RPORT_ATTRS: &[&str] = &[
    "node_name",
    "port_name",
    "port_id",
    "port_state",
    "roles",
    "scsi_target_id",
    "supported_classes",
    "fast_io_fail_tmo",
    "dev_loss_tmo",
];

const SAS_DEVICE_ATTRS: &[&str] = &[
    "bay_identifier",
    "enclosure_identifier",
    "initiator_port_protocols",
    "phy_identifier",
    "sas_address",
    "scsi_target_id",
    "target_port_protocols",
];

const SAS_END_DEVICE_ATTRS: &[&str] = &[
    "initiator_response_timeout",
    "I_T_nexus_loss_timeout",
    "ready_led_meaning",
    "tlr_enabled",
    "tlr_supported",
];

const SAS_CLASS_DEVICE_ATTRS: &[&str] = &[
    "device_name",
    "dev_type",
    "iproto",
    "iresp_timeout",
    "itnl_timeout",
    "linkrate",
    "max_linkrate",
    "max_pathways",
    "min_linkrate",
    "pathways",
    "ready_led_meaning",
    "rl_wlun",
    "sas_addr",
    "tproto",
    "transport_layer_retries",
];

const ISCSI_SESSION_ATTRS: &[&str] = &[
    "targetname",
    "tpgt",
    "data_pdu_in_order",
    "data_seq_in_order",
    "erl",
    "first_burst_len",
    "initial_r2t",
    "max_burst_len",
    "max_outstanding_r2t",
    "recovery_tmo",
];

fn host_number(host_name: &str) -> Option<i32> {
    host_name
        .strip_prefix("host")
        .and_then(sysfs::leading_int)
        .and_then(|n| i32::try_from(n).ok())
}

/// `fc:` or `fcoe:` depending on the host's symbolic name.
fn fc_kind(fc_host_dir: &Path) -> TransportKind {
    match sysfs::attr(fc_host_dir, "symbolic_name") {
        Some(name) if name.contains(" over ") => TransportKind::Fcoe,
        _ => TransportKind::Fc,
    }
}

fn fc_summary(kind: TransportKind, port_dir: &Path) -> String {
    let port_name = sysfs::attr(port_dir, "port_name");
    let port_id = sysfs::attr(port_dir, "port_id");
    match (port_name, port_id) {
        (Some(name), Some(id)) => format!("{}:{},{}", kind.name(), name, id),
        _ => {
            debug!("no FC port name/id under {}", port_dir.display());
            String::new()
        }
    }
}

/// Strip the 20-character subnet prefix (`fe80:0000:0000:0000:`) from an
/// InfiniBand GID.
fn strip_gid_prefix(gid: &str) -> Option<String> {
    gid.get(20..).filter(|rest| !rest.is_empty()).map(str::to_string)
}

fn local_srp_gid(sysfs: &Sysfs, h: i32) -> Option<String> {
    let host_dir = sysfs.class_entry("scsi_host", &format!("host{}", h));
    let port = sysfs::attr_int(&host_dir, "local_ib_port")?;
    let device = sysfs::attr(&host_dir, "local_ib_device")?;
    let gids = sysfs
        .path("class/infiniband")
        .join(device)
        .join("ports")
        .join(port.to_string())
        .join("gids");
    strip_gid_prefix(&sysfs::attr(gids, "0")?)
}

fn srp_remote_gids(sysfs: &Sysfs, h: i32, attrs: &mut AttrList) {
    let host_dir = sysfs.class_entry("scsi_host", &format!("host{}", h));
    for name in ["orig_dgid", "dgid"] {
        if let Some(gid) = sysfs::attr(&host_dir, name).and_then(|g| strip_gid_prefix(&g)) {
            attrs.push(name, gid);
        }
    }
}

fn phy_number(name: &str) -> Option<i64> {
    name.rsplit_once(':').and_then(|(_, n)| sysfs::leading_int(n))
}

/// `phy*` entries of `dir` with the lowest numbered one first.
fn sas_phys(dir: &Path) -> Vec<String> {
    let mut phys: Vec<String> = sysfs::list_dir(dir)
        .into_iter()
        .filter(|e| e.is_dir_or_link() && e.name.starts_with("phy"))
        .map(|e| e.name)
        .collect();
    if let Some(low) = phys
        .iter()
        .enumerate()
        .filter_map(|(i, p)| phy_number(p).map(|n| (n, i)))
        .min()
        .map(|(_, i)| i)
    {
        phys.swap(0, low);
    }
    phys
}

/// Name of the USB interface above a SCSI host, taken from the canonical
/// path of `dir`: the path segment just before `/host<n>`.
fn usb_device_name(dir: &Path) -> Option<String> {
    let canon = sysfs::canonical(dir)?;
    let path = canon.to_str()?;
    if !path.contains("usb") {
        return None;
    }
    let name = path
        .find("/host")
        .and_then(|end| path[..end].rsplit_once('/').map(|(_, seg)| seg.to_string()))
        .unwrap_or_default();
    Some(name)
}

fn ata_kind(sysfs: &Sysfs, host_name: &str) -> Option<TransportKind> {
    let proc_name = sysfs::attr(sysfs.class_entry("scsi_host", host_name), "proc_name")?;
    if proc_name == "ahci" || proc_name.starts_with("sata") {
        Some(TransportKind::Sata)
    } else if proc_name.contains("ata") {
        Some(TransportKind::Ata)
    } else {
        None
    }
}

/// FireWire host GUID for a SCSI host whose device link runs through a
/// `fw-host` node.
fn sbp_host_guid(sysfs: &Sysfs, host_name: &str) -> Option<Option<String>> {
    let host_dir = sysfs.class_entry("scsi_host", host_name);
    let target = fs::read_link(host_dir.join("device")).ok()?;
    let target = target.to_str()?;
    let start = target.find("/fw-host")?;
    let Some(end) = target[start + 1..].find('/').map(|e| start + 1 + e) else {
        return Some(None);
    };
    let fw_host = host_dir.join(&target[..end]);
    let guid = sysfs::attr(fw_host, "host_id/guid").filter(|g| g.len() == 18);
    Some(guid.and_then(|g| g.get(2..).map(str::to_string)))
}

/// Classify the SCSI host `host_name` (e.g. `host3`).
pub fn classify_host(sysfs: &Sysfs, host_name: &str) -> TransportInfo {
    let host_dir = sysfs.class_entry("scsi_host", host_name);

    let spi = sysfs.class_entry("spi_host", host_name);
    if sysfs::is_dir(&spi) {
        let mut info = TransportInfo::new(TransportKind::Spi, "spi:".into());
        info.attributes.extend_from_dir(&spi, &["signalling"]);
        return info;
    }

    let fc = sysfs.class_entry("fc_host", host_name);
    if sysfs::is_dir(&fc) {
        let kind = fc_kind(&fc);
        let mut info = TransportInfo::new(kind, fc_summary(kind, &fc));
        let detail = host_dir.join("device").join("fc_host").join(host_name);
        info.attributes.extend_from_dir(&detail, FC_HOST_ATTRS);
        return info;
    }

    if sysfs::is_dir(sysfs.class_entry("srp_host", host_name)) {
        let mut summary = String::from("srp:");
        let mut info = TransportInfo::new(TransportKind::Srp, String::new());
        if let Some(h) = host_number(host_name) {
            if let Some(gid) = local_srp_gid(sysfs, h) {
                summary.push_str(&gid);
            }
            srp_remote_gids(sysfs, h, &mut info.attributes);
        }
        info.summary = summary;
        return info;
    }

    let sas = sysfs.class_entry("sas_host", host_name);
    if sysfs::is_dir_or_link(&sas) {
        return classify_sas_host(sysfs, &sas, &host_dir);
    }

    let ha = host_dir.join("device").join("sas").join("ha");
    if sysfs::is_dir(&ha) {
        let summary = match sysfs::attr(&ha, "device_name") {
            Some(name) => format!("sas:{}", name),
            None => String::new(),
        };
        let mut info = TransportInfo::new(TransportKind::SasClass, summary);
        info.attributes
            .extend_from_dir(&ha, &["device_name", "ha_name", "version_descriptor"]);
        let phy0 = ha.join("phys").join("0");
        for name in SAS_HA_PHY_ATTRS {
            if let Some(v) = sysfs::attr(&phy0, name) {
                info.attributes.push(format!("phy0.{}", name), v);
            }
        }
        return info;
    }

    if let Some(guid) = sbp_host_guid(sysfs, host_name) {
        let summary = guid.map(|g| format!("sbp:{}", g)).unwrap_or_default();
        return TransportInfo::new(TransportKind::Sbp, summary);
    }

    if sysfs::is_dir(sysfs.class_entry("iscsi_host", host_name)) {
        return TransportInfo::new(TransportKind::Iscsi, "iscsi:".into());
    }

    if let Some(name) = usb_device_name(&host_dir) {
        let mut info = TransportInfo::new(TransportKind::Usb, format!("usb:{}", name));
        info.attributes.push("device_name", name);
        return info;
    }

    if let Some(kind) = ata_kind(sysfs, host_name) {
        return TransportInfo::new(kind, format!("{}:", kind.name()));
    }

    debug!("no transport found for {}", host_name);
    TransportInfo::unknown()
}

fn classify_sas_host(sysfs: &Sysfs, sas_host_dir: &Path, host_dir: &Path) -> TransportInfo {
    let phys = sas_phys(&sas_host_dir.join("device"));
    let summary = match phys.first() {
        Some(low) => match sysfs::attr(sysfs.class_entry("sas_phy", low), "sas_address") {
            Some(addr) => format!("sas:{}", addr),
            None => {
                debug!("no sas_address for {}", low);
                String::new()
            }
        },
        None => String::new(),
    };
    let mut info = TransportInfo::new(TransportKind::Sas, summary);

    let device = host_dir.join("device");
    let ports: Vec<String> = sysfs::list_dir(&device)
        .into_iter()
        .filter(|e| e.is_dir_or_link() && e.name.starts_with("port-"))
        .map(|e| e.name)
        .collect();

    if ports.is_empty() {
        // no configured ports: report every phy the host has
        for phy in sas_phys(&device) {
            let phy_dir = sysfs.class_entry("sas_phy", &phy);
            for name in SAS_PHY_BRIEF_ATTRS {
                if let Some(v) = sysfs::attr(&phy_dir, name) {
                    info.attributes.push(format!("{}.{}", phy, name), v);
                }
            }
        }
        return info;
    }

    for port in ports {
        let phys = sas_phys(&device.join(&port));
        let Some(low) = phys.first() else {
            debug!("{}: phy list not available", port);
            continue;
        };
        if let Some(n) = sysfs::attr(sysfs.class_entry("sas_port", &port), "num_phys") {
            info.attributes.push(format!("{}.num_phys", port), n);
            info.attributes.push(format!("{}.phys", port), phys.join(" "));
        }
        let phy_dir = sysfs.class_entry("sas_phy", low);
        for name in SAS_PHY_LINK_ATTRS {
            if let Some(v) = sysfs::attr(&phy_dir, name) {
                info.attributes.push(format!("{}.{}", port, name), v);
            }
        }
    }
    info
}

/// Grandparent of the canonical `class/scsi_device/<hctl>/device`
/// directory; the SAS end device or FC remote port above the LU.
fn transport_ancestor(sysfs: &Sysfs, hctl: &str) -> Option<PathBuf> {
    let dev = sysfs::canonical(sysfs.class_entry("scsi_device", hctl).join("device"))?;
    dev.parent()?.parent().map(Path::to_path_buf)
}

fn iscsi_session(sysfs: &Sysfs, addr: &Address) -> Option<Option<PathBuf>> {
    let dir = sysfs.class_entry("iscsi_host", &format!("host{}", addr.a)).join("device");
    if !sysfs::is_dir(&dir) {
        return None;
    }
    let target = format!("target{}:{}:{}", addr.a, addr.b, addr.c);
    let sessions: Vec<String> = sysfs::list_dir(&dir)
        .into_iter()
        .filter(|e| e.is_dir_or_link() && e.name.starts_with("session"))
        .filter(|e| sysfs::is_dir(e.path.join(&target)))
        .map(|e| e.name)
        .collect();
    if sessions.len() != 1 {
        debug!("{} iSCSI sessions hold {}", sessions.len(), target);
        return Some(None);
    }
    Some(Some(sysfs.class_entry("iscsi_session", &sessions[0])))
}

/// Enclosure slot an SES driver linked into a logical unit directory, from
/// an `enclosure_device:<slot>` entry.
fn enclosure_device(lu_dir: &Path) -> Option<String> {
    let ent = sysfs::list_dir(lu_dir)
        .into_iter()
        .find(|e| e.is_dir_or_link() && e.name.starts_with("enclosure_device"))?;
    Some(match ent.name.split_once(':') {
        Some((_, slot)) => slot.to_string(),
        None => ent.name,
    })
}

/// Classify the transport of the SCSI device at `addr`.
pub fn classify_device(sysfs: &Sysfs, addr: &Address) -> TransportInfo {
    let hctl = addr.to_string();
    let host_name = format!("host{}", addr.a);
    let lu_dir = sysfs.class_entry("scsi_device", &hctl).join("device");

    if sysfs::is_dir_or_link(sysfs.class_entry("sas_host", &host_name)) {
        let Some(end_dev) = transport_ancestor(sysfs, &hctl) else {
            debug!("cannot resolve SAS end device for {}", hctl);
            return TransportInfo::new(TransportKind::Sas, String::new());
        };
        let end_name = sysfs::base_name(&end_dev).unwrap_or_default();
        let sas_dev = sysfs.class_entry("sas_device", &end_name);
        let addr_s = sysfs::attr(&sas_dev, "sas_address")
            .unwrap_or_else(|| "0x0000000000000000".into());
        let mut info = TransportInfo::new(TransportKind::Sas, format!("sas:{}", addr_s));
        info.attributes.extend_from_dir(&sas_dev, SAS_DEVICE_ATTRS);
        info.attributes.extend_from_dir(&lu_dir, &["vendor", "model"]);
        info.attributes
            .extend_from_dir(&sysfs.class_entry("sas_end_device", &end_name), SAS_END_DEVICE_ATTRS);
        if let Some(slot) = enclosure_device(&lu_dir) {
            info.attributes.push("enclosure_device", slot);
        }
        return info;
    }

    let target = format!("target{}:{}:{}", addr.a, addr.b, addr.c);

    if sysfs::is_dir(sysfs.class_entry("spi_host", &host_name)) {
        let mut info = TransportInfo::new(TransportKind::Spi, format!("spi:{}", addr.c));
        info.attributes
            .extend_from_dir(&sysfs.class_entry("spi_transport", &target), SPI_TARGET_ATTRS);
        return info;
    }

    let fc = sysfs.class_entry("fc_host", &host_name);
    if sysfs::is_dir(&fc) {
        let kind = fc_kind(&fc);
        let summary = fc_summary(kind, &sysfs.class_entry("fc_transport", &target));
        let mut info = TransportInfo::new(kind, summary);
        info.attributes.extend_from_dir(&lu_dir, &["vendor", "model"]);
        if let Some(rport) = transport_ancestor(sysfs, &hctl) {
            let rport_name = sysfs::base_name(&rport).unwrap_or_default();
            let legacy = rport.join("fc_remote_ports").join(&rport_name);
            let rport_dir = if sysfs::is_dir(&legacy) {
                legacy
            } else {
                sysfs.class_entry("fc_remote_ports", &rport_name)
            };
            info.attributes.extend_from_dir(&rport_dir, FC_RPORT_ATTRS);
        }
        return info;
    }

    if sysfs::is_dir(sysfs.class_entry("srp_host", &host_name)) {
        let gid = local_srp_gid(sysfs, addr.a).unwrap_or_default();
        let mut info = TransportInfo::new(TransportKind::Srp, format!("srp:{}", gid));
        srp_remote_gids(sysfs, addr.a, &mut info.attributes);
        return info;
    }

    let bus_dev = sysfs.path("bus/scsi/devices").join(&hctl);
    let sas_class = bus_dev.join("sas_device");
    if sysfs::is_dir(&sas_class) {
        if let Some(sas_addr) = sysfs::attr(&sas_class, "sas_addr") {
            let mut info = TransportInfo::new(TransportKind::SasClass, format!("sas:{}", sas_addr));
            info.attributes.extend_from_dir(&sas_class, SAS_CLASS_DEVICE_ATTRS);
            return info;
        }
        debug!("no sas_addr under {}", sas_class.display());
    } else if let Some(id) = sysfs::attr(&bus_dev, "ieee1394_id") {
        let mut info = TransportInfo::new(TransportKind::Sbp, format!("sbp:{}", id));
        info.attributes.push("ieee1394_id", id);
        return info;
    }

    if let Some(session) = iscsi_session(sysfs, addr) {
        let Some(session) = session else {
            return TransportInfo::unknown();
        };
        let name = sysfs::attr(&session, "targetname");
        let tpgt = sysfs::attr(&session, "tpgt").and_then(|t| sysfs::leading_int(&t));
        let (Some(name), Some(tpgt)) = (name, tpgt) else {
            return TransportInfo::unknown();
        };
        let mut info =
            TransportInfo::new(TransportKind::Iscsi, format!("{},t,0x{:x}", name, tpgt as u32));
        info.attributes.extend_from_dir(&session, ISCSI_SESSION_ATTRS);
        return info;
    }

    if let Some(name) = usb_device_name(&sysfs.class_entry("scsi_device", &hctl)) {
        let mut info = TransportInfo::new(TransportKind::Usb, format!("usb:{}", name));
        info.attributes.push("device_name", name);
        return info;
    }

    if let Some(kind) = ata_kind(sysfs, &host_name) {
        let wwn = vpd::lu_name(sysfs, &hctl, false)
            .map(|id| id.to_string())
            .unwrap_or_default();
        let mut info = TransportInfo::new(kind, format!("{}:{}", kind.name(), wwn));
        if !wwn.is_empty() {
            info.attributes.push("wwn", wwn);
        }
        return info;
    }

    debug!("no transport found for {}", hctl);
    TransportInfo::unknown()
}

/// Classify an NVMe controller. `ctl_dir` is the controller's directory,
/// e.g. `class/nvme/nvme0` or a namespace's `device` link.
pub fn classify_nvme(ctl_dir: &Path) -> TransportInfo {
    let Some(transport) = sysfs::attr(ctl_dir, "transport") else {
        return TransportInfo::new(TransportKind::Unknown, "transport?".into());
    };
    if transport != "pcie" {
        let mut info = TransportInfo::new(TransportKind::Unknown, transport.clone());
        info.attributes.push("transport", transport);
        return info;
    }
    let pci = ctl_dir.join("device");
    let vendor = sysfs::attr(&pci, "subsystem_vendor");
    let device = sysfs::attr(&pci, "subsystem_device");
    let summary = match (&vendor, &device) {
        (Some(v), Some(d)) => format!("pcie {}:{}", v, d),
        _ => "pcie ?:?".to_string(),
    };
    let mut info = TransportInfo::new(TransportKind::Pcie, summary);
    if let (Some(v), Some(d)) = (vendor, device) {
        info.attributes.push("subsystem_vendor", v);
        info.attributes.push("subsystem_device", d);
    }
    info
}
