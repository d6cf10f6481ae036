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

//! Text and JSON rendering of topology records.
//!
//! The text layout follows the long-standing lsscsi columns so that
//! scripts parsing that output keep working.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::address::{AddrFilter, Fields, FormatMode, LunFormat};
use crate::error::Result;
use crate::sysfs;
use crate::topology::{DiskSize, Protection, RecordKind, Topology, TopologyRecord};
use crate::transport::TransportKind;

pub const SCSI_DEVICES_KEY: &str = "attached_scsi_device_list";
pub const NVME_DEVICES_KEY: &str = "attached_nvme_device_list";
pub const SCSI_HOSTS_KEY: &str = "attached_scsi_host_list";
pub const NVME_HOSTS_KEY: &str = "attached_nvme_host_list";

/// Longest tuple string ever rendered.
const ADDR_MAX: usize = 64;

/// Width of the disk WWN column.
const WWN_WIDTH: usize = 35;

const PDT_SHORT_NAMES: [&str; 32] = [
    "disk   ", "tape   ", "printer", "process", "worm   ", "cd/dvd ", "scanner", "optical",
    "mediumx", "comms  ", "(0xa)  ", "(0xb)  ", "storage", "enclosu", "sim dsk", "opti rd",
    "bridge ", "osd    ", "adi    ", "sec man", "zbc    ", "(0x15) ", "(0x16) ", "(0x17) ",
    "(0x18) ", "(0x19) ", "(0x1a) ", "(0x1b) ", "(0x1c) ", "(0x1d) ", "wlun   ", "no dev ",
];

const SCSI_LONG_ATTRS: &[&str] = &[
    "device_blocked",
    "iocounterbits",
    "iodone_cnt",
    "ioerr_cnt",
    "iorequest_cnt",
    "queue_depth",
    "queue_type",
    "scsi_level",
    "state",
    "timeout",
    "type",
];

const HOST_LONG_ATTRS: &[&str] = &[
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

/// Seven character name of a peripheral device type, space padded.
pub fn pdt_short_name(pdt: u8) -> &'static str {
    PDT_SHORT_NAMES.get(usize::from(pdt)).copied().unwrap_or("type???")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnits {
    /// Powers of 1000 (kB, MB, ...).
    Decimal,
    /// Powers of 1024 (KiB, MiB, ...).
    Binary,
}

/// Render `bytes` to three significant figures, e.g. `1.00TB` or `500GB`.
pub fn size_to_string(bytes: u64, units: SizeUnits) -> String {
    const UNITS_10: [&str; 9] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    const UNITS_2: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    let (divisor, names) = match units {
        SizeUnits::Decimal => (1000u64, &UNITS_10),
        SizeUnits::Binary => (1024u64, &UNITS_2),
    };

    let mut size = bytes;
    let mut remainder = 0u64;
    let mut i = 0;
    let mut fraction = String::new();
    if size >= divisor {
        while size >= divisor && i + 1 < names.len() {
            remainder = size % divisor;
            size /= divisor;
            i += 1;
        }
        let mut sf_cap = size;
        let mut digits = 0;
        while sf_cap * 10 < 1000 {
            sf_cap *= 10;
            digits += 1;
        }
        if digits > 0 {
            let frac = format!(".{:03}", remainder * 1000 / divisor);
            fraction = frac[..digits + 1].to_string();
        }
    }
    format!("{}{}{}", size, fraction, names[i])
}

/// Column and detail switches for text output.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub brief: bool,
    pub pdt: bool,
    pub long: u8,
    pub lunhex: u8,
    pub transport: bool,
    pub unit: u8,
    pub wwn: bool,
    pub generic: bool,
    pub dev_maj_min: bool,
    pub scsi_id: bool,
    pub size: u8,
    pub verbose: u8,
    pub kname: bool,
    /// Target protection type and initiator integrity columns.
    pub protection: bool,
    /// Negotiated protection mode column.
    pub protmode: bool,
    /// Directory prefixed to kernel names when `kname` is set.
    pub dev_root: PathBuf,
}

fn push_padded(line: &mut String, s: &str, width: usize) {
    line.push_str(&format!("{:<width$}", s, width = width));
}

/// `[tuple]` column: width 13, or 28 with hex LUNs. Longer values get a
/// single trailing blank instead.
fn push_tuple(line: &mut String, rec: &TopologyRecord, opts: &OutputOptions) {
    let (tuple, width) = if opts.lunhex > 0 {
        let mode = FormatMode::full(LunFormat::from_count(opts.lunhex));
        (rec.address.format_bounded(mode, ADDR_MAX), 28)
    } else if rec.kind == RecordKind::ScsiDevice {
        (rec.name.clone(), 13)
    } else {
        (rec.address.format_bounded(FormatMode::default(), ADDR_MAX), 13)
    };
    let col = format!("[{}]", tuple);
    if col.len() >= width {
        line.push_str(&col);
        line.push(' ');
    } else {
        push_padded(line, &col, width);
    }
}

fn node_name(rec_node: Option<&PathBuf>, kernel: Option<&str>, opts: &OutputOptions, missing: &str) -> String {
    if opts.kname {
        if let Some(k) = kernel {
            return opts.dev_root.join(k).display().to_string();
        }
    }
    rec_node
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| missing.to_string())
}

fn size_column(size: Option<&DiskSize>, ssize: u8) -> String {
    let Some(sz) = size else {
        return format!("  {:>6}", "-");
    };
    if ssize > 2 {
        let blocks = sz.blocks_512;
        return match sz.logical_block_size {
            Some(lbs) if lbs < 1 => format!("  {:>12},[lbs<1 ?]", blocks),
            Some(512) => format!("  {:>12}{}", blocks, if ssize > 3 { ",512" } else { "" }),
            Some(lbs) => {
                let count = sz.bytes() / lbs as u64;
                if ssize > 3 {
                    format!("  {:>12},{}", count, lbs)
                } else {
                    format!("  {:>12}", count)
                }
            }
            None => format!("  {:>12},512", blocks),
        };
    }
    let units = if ssize & 1 == 1 {
        SizeUnits::Decimal
    } else {
        SizeUnits::Binary
    };
    if sz.bytes() > 0 {
        format!("  {:>6}", size_to_string(sz.bytes(), units))
    } else {
        format!("  {:>6}", "-")
    }
}

/// LU name column for `--unit`. One `-u` cuts long names at 32 characters,
/// two keep the last 32, three or more show everything.
fn unit_column(value: &str, unit: u8) -> String {
    let n = value.chars().count();
    if n < 1 {
        return format!("{:<32}  ", "none");
    }
    if n < 33 || unit >= 3 {
        return if unit >= 3 {
            format!("{}  ", value)
        } else {
            format!("{:<32}  ", value)
        };
    }
    if unit == 1 {
        let head: String = value.chars().take(32).collect();
        return format!("{}_ ", head);
    }
    let tail: String = value.chars().skip(n - 32).skip(1).collect();
    format!("_{}  ", tail)
}

fn attr_or<'a>(rec: &'a TopologyRecord, key: &str, missing: &'a str) -> &'a str {
    rec.attributes.get(key).unwrap_or(missing)
}

fn transport_lines(rec: &TopologyRecord, out: &mut String) {
    let Some(t) = &rec.transport else {
        return;
    };
    out.push_str(&format!("  transport={}\n", t.kind.name()));
    for (k, v) in t.attributes.iter() {
        out.push_str(&format!("  {}={}\n", k, v));
    }
}

fn one_per_line(rec: &TopologyRecord, keys: &[&str], verbose: u8, out: &mut String) {
    for key in keys {
        match rec.attributes.get(key) {
            Some(v) => out.push_str(&format!("  {}={}\n", key, v)),
            None if verbose > 0 => out.push_str(&format!("  {}=?\n", key)),
            None => {}
        }
    }
}

fn scsi_long(rec: &TopologyRecord, opts: &OutputOptions, out: &mut String) {
    if opts.transport {
        transport_lines(rec, out);
        return;
    }
    if opts.long >= 3 {
        one_per_line(rec, SCSI_LONG_ATTRS, opts.verbose, out);
        return;
    }
    let first = ["state", "queue_depth", "scsi_level", "type", "device_blocked", "timeout"];
    let mut line = String::from(" ");
    for key in first {
        line.push_str(&format!(" {}={}", key, attr_or(rec, key, "?")));
    }
    out.push_str(&line);
    out.push('\n');
    if opts.long == 2 {
        let second = ["iocounterbits", "iodone_cnt", "ioerr_cnt", "iorequest_cnt", "queue_type"];
        let mut line = String::from(" ");
        for key in second {
            line.push_str(&format!(" {}={}", key, attr_or(rec, key, "?")));
        }
        out.push_str(&line);
        out.push('\n');
    }
}

fn dir_line(rec: &TopologyRecord, out: &mut String) {
    let canon = rec
        .canonical_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "?".into());
    out.push_str(&format!("  dir: {}  [{}]\n", rec.sysfs_path.display(), canon));
}

/// One SCSI logical unit, plus any `--long` and `--verbose` lines.
pub fn render_scsi_device(rec: &TopologyRecord, opts: &OutputOptions) -> String {
    let mut line = String::new();
    push_tuple(&mut line, rec, opts);

    let ty = rec.attributes.get("type");
    if opts.pdt {
        let e = rec.pdt.map(|p| format!("0x{:x}", p)).unwrap_or_else(|| "-1".into());
        push_padded(&mut line, &e, 8);
    } else if !opts.brief {
        match ty.map(sysfs::leading_int) {
            None => line.push_str("type?   "),
            Some(None) => line.push_str("type??  "),
            Some(Some(p)) if !(0..32).contains(&p) => line.push_str("type??? "),
            Some(Some(p)) => {
                line.push_str(pdt_short_name(p as u8));
                line.push(' ');
            }
        }
    }

    if opts.transport {
        let summary = rec.transport.as_ref().map(|t| t.summary.as_str()).unwrap_or("");
        line.push_str(&format!("{:<30}  ", summary));
    } else if opts.unit > 0 {
        let value = rec
            .identity
            .as_ref()
            .map(|id| if opts.unit > 3 { id.to_string() } else { id.value.clone() })
            .unwrap_or_default();
        line.push_str(&unit_column(&value, opts.unit));
    } else if !opts.brief {
        match rec.attributes.get("vendor") {
            Some(v) => line.push_str(&format!("{:<8} ", v)),
            None => line.push_str("vendor?  "),
        }
        match rec.attributes.get("model") {
            Some(v) => line.push_str(&format!("{:<16} ", v)),
            None => line.push_str("model?           "),
        }
        match rec.attributes.get("rev") {
            Some(v) => line.push_str(&format!("{:<4}  ", v)),
            None => line.push_str("rev?  "),
        }
    }

    if rec.kernel_name.is_some() {
        if opts.wwn {
            match &rec.wwn {
                Some(w) => line.push_str(&format!("{:<w$}  ", w, w = WWN_WIDTH)),
                None => line.push_str(&" ".repeat(32)),
            }
        }
        let node = node_name(rec.device_node.as_ref(), rec.kernel_name.as_deref(), opts, "-       ");
        push_padded(&mut line, &node, 9);
        if opts.dev_maj_min {
            match &rec.major_minor {
                Some(mm) => line.push_str(&format!("[{}]", mm)),
                None => line.push_str("[dev?]"),
            }
        }
        if opts.scsi_id {
            line.push_str(&format!("  {}", rec.scsi_id.as_deref().unwrap_or("-")));
        }
    } else {
        if opts.wwn {
            line.push_str(&" ".repeat(32));
        }
        if opts.scsi_id {
            line.push_str(&format!("{:<9}  -", "-"));
        } else {
            push_padded(&mut line, "-", 9);
        }
    }

    if opts.generic {
        if rec.generic_kernel_name.is_some() {
            let node = node_name(rec.generic_node.as_ref(), rec.generic_kernel_name.as_deref(), opts, "-");
            line.push_str(&format!("  {:<9}", node));
            if opts.dev_maj_min {
                match &rec.generic_major_minor {
                    Some(mm) => line.push_str(&format!("[{}]", mm)),
                    None => line.push_str("[dev?]"),
                }
            }
        } else {
            line.push_str(&format!("  {:<9}", "-"));
        }
    }

    if opts.protection || opts.protmode {
        push_protection(&mut line, rec.protection.as_ref(), opts);
    }

    if opts.size > 0 {
        line.push_str(&size_column(rec.size.as_ref(), opts.size));
    }

    line.push('\n');
    if opts.long > 0 {
        scsi_long(rec, opts, &mut line);
    }
    if opts.verbose > 0 {
        dir_line(rec, &mut line);
    }
    line
}

/// `DIF/Type<n>` and integrity profile columns, then the protection mode.
/// Type `0` and mode `none` print as `-`.
fn push_protection(line: &mut String, prot: Option<&Protection>, opts: &OutputOptions) {
    let prot = prot.cloned().unwrap_or_default();
    if opts.protection {
        match prot.protection_type.as_deref() {
            Some(t) if !t.starts_with('0') => line.push_str(&format!("  DIF/Type{}", t)),
            _ => line.push_str(&format!("  {:<9}", "-")),
        }
        let format = prot.integrity_format.as_deref().unwrap_or("-");
        line.push_str(&format!("  {:<16}", format));
    }
    if opts.protmode {
        let mode = prot.protection_mode.as_deref().filter(|m| *m != "none").unwrap_or("-");
        line.push_str(&format!("  {:<4}", mode));
    }
}

fn nvme_transport_column(rec: &TopologyRecord) -> String {
    match &rec.transport {
        Some(t) if t.kind == TransportKind::Pcie && t.attributes.is_empty() => "transport?".into(),
        Some(t) => t.summary.clone(),
        None => "transport?".into(),
    }
}

/// Controller model with `__<nsid>` appended, kept within 41 characters.
fn model_nsid(model: Option<&str>, nsid: u64) -> String {
    let mut model = model.unwrap_or("-").trim().to_string();
    let suffix = format!("__{}", nsid);
    let room = 41usize.saturating_sub(suffix.len());
    if model.len() > room {
        crate::address::truncate_bounded(&mut model, room);
    }
    model.push_str(&suffix);
    model
}

fn nvme_long(rec: &TopologyRecord, opts: &OutputOptions, out: &mut String) {
    let single = opts.long > 2;
    let sep = if single { "\n" } else { "" };
    let push = |out: &mut String, key: &str| {
        out.push_str(&format!("  {}={}{}", key, attr_or(rec, key, "?"), sep));
    };
    for key in ["capability", "ext_range", "hidden", "nsid", "range", "removable"] {
        push(&mut *out, key);
    }
    if opts.long > 1 {
        if !single {
            out.push('\n');
        }
        for key in ["nr_requests", "read_ahead_kb", "write_cache"] {
            push(&mut *out, key);
        }
        if !single {
            out.push('\n');
        }
        for key in ["logical_block_size", "physical_block_size"] {
            push(&mut *out, key);
        }
    }
    if !single {
        out.push('\n');
    }
}

/// One NVMe namespace, plus any `--long` and `--verbose` lines.
pub fn render_nvme_namespace(rec: &TopologyRecord, opts: &OutputOptions) -> String {
    let mut line = String::new();
    push_tuple(&mut line, rec, opts);

    if opts.pdt {
        push_padded(&mut line, "0x0", 8);
    } else if !opts.brief {
        line.push_str(if opts.verbose > 0 { "dsk/nvm " } else { "disk    " });
    }

    if opts.transport {
        line.push_str(&format!("{:<41}  ", nvme_transport_column(rec)));
    } else if opts.unit > 0 {
        let value = match rec.wwn.as_deref() {
            Some(w) if opts.unit < 4 => w.strip_prefix("eui.").unwrap_or(w),
            Some(w) => w,
            None => "wwid?",
        };
        line.push_str(&format!("{:<41}  ", value));
    } else if !opts.brief {
        let model = model_nsid(rec.attributes.get("model"), rec.address.unit);
        line.push_str(&format!("{:<41}  ", model));
    }

    if opts.wwn {
        line.push_str(&format!("{:<41}  ", rec.wwn.as_deref().unwrap_or("wwid?")));
    }

    let node = node_name(rec.device_node.as_ref(), rec.kernel_name.as_deref(), opts, "-       ");
    push_padded(&mut line, &node, 9);
    if opts.dev_maj_min {
        match &rec.major_minor {
            Some(mm) => line.push_str(&format!(" [{}]", mm)),
            None => line.push_str(" [dev?]"),
        }
    }
    if opts.generic {
        line.push_str(&format!("  {:<9}", "-"));
    }
    if opts.size > 0 {
        line.push_str(&size_column(rec.size.as_ref(), opts.size));
    }

    line.push('\n');
    if opts.long > 0 {
        nvme_long(rec, opts, &mut line);
    }
    if opts.verbose > 0 {
        dir_line(rec, &mut line);
    }
    line
}

fn device_dir_lines(rec: &TopologyRecord, out: &mut String) {
    let dev = rec
        .device_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    out.push_str(&format!("  dir: {}\n  device dir: {}\n", rec.sysfs_path.display(), dev));
}

/// One SCSI host.
pub fn render_scsi_host(rec: &TopologyRecord, opts: &OutputOptions) -> String {
    let mut line = format!("[{}]  ", rec.address.a);
    match rec.attributes.get("driver") {
        Some(d) => line.push_str(&format!("  {:<12}  ", d)),
        None => line.push_str("  proc_name=????  "),
    }
    if opts.transport {
        if let Some(t) = &rec.transport {
            line.push_str(&t.summary);
        }
    }
    line.push('\n');

    if opts.long > 0 {
        if opts.transport {
            transport_lines(rec, &mut line);
        } else if opts.long >= 3 {
            one_per_line(rec, HOST_LONG_ATTRS, opts.verbose, &mut line);
        } else {
            let mut l = String::from(" ");
            for key in ["cmd_per_lun", "host_busy", "sg_tablesize", "active_mode"] {
                if let Some(v) = rec.attributes.get(key) {
                    l.push_str(&format!(" {}={:<4}", key, v));
                } else if opts.verbose > 0 {
                    l.push_str(&format!(" {}=????", key));
                }
            }
            line.push_str(&l);
            line.push('\n');
            if opts.long == 2 {
                let mut l = String::new();
                for (key, w) in [("can_queue", 4), ("state", 8), ("unique_id", 8), ("use_blk_mq", 8)] {
                    if let Some(v) = rec.attributes.get(key) {
                        l.push_str(&format!("  {}={:<w$}", key, v, w = w));
                    }
                }
                line.push_str(&l);
                line.push('\n');
            }
        }
    }
    if opts.verbose > 0 {
        device_dir_lines(rec, &mut line);
    }
    line
}

/// Model, serial and firmware columns of a controller line, cut to fit.
fn controller_field(rec: &TopologyRecord, key: &str, width: usize) -> String {
    let mut v = rec.attributes.get(key).unwrap_or("<NULL>").to_string();
    crate::address::truncate_bounded(&mut v, width);
    v
}

/// One NVMe controller.
pub fn render_nvme_controller(rec: &TopologyRecord, opts: &OutputOptions) -> String {
    let fields = FormatMode { fields: Fields::HostChannel, lun: LunFormat::Decimal };
    let mut line = format!("[{}]  ", rec.address.format(fields));
    let node = node_name(rec.device_node.as_ref(), rec.kernel_name.as_deref(), opts, "-       ");
    push_padded(&mut line, &node, 9);
    if opts.dev_maj_min {
        match &rec.major_minor {
            Some(mm) => line.push_str(&format!(" [{}]", mm)),
            None => line.push_str(" [dev?]"),
        }
    }
    let label = |name: &str| if opts.verbose > 0 { format!("{}=", name) } else { String::new() };

    if opts.transport {
        line.push_str("    ");
        match &rec.transport {
            Some(t) if t.kind == TransportKind::Pcie => line.push_str(&t.summary),
            Some(t) if t.summary != "transport?" => {
                line.push_str(&format!("{}{}", label("transport"), t.summary));
            }
            _ if opts.verbose > 0 => line.push_str("transport=?"),
            _ => {}
        }
        line.push('\n');
    } else if opts.wwn {
        match &rec.wwn {
            Some(nqn) => line.push_str(&format!("   {}{}", label("subsysnqn"), nqn)),
            None if opts.verbose > 0 => line.push_str("   subsysnqn=?"),
            None => {}
        }
        line.push('\n');
    } else if opts.unit > 0 {
        let attrs = rec.transport.as_ref().map(|t| &t.attributes);
        match attrs.and_then(|a| a.get("subsystem_vendor")) {
            Some(vin) => {
                let dev = attrs.and_then(|a| a.get("subsystem_device")).unwrap_or("??");
                line.push_str(&format!("   {}{}:{}", label("vin"), vin, dev));
            }
            None if opts.verbose > 0 => line.push_str("   subsystem_vendor=?"),
            None => {}
        }
        line.push('\n');
    } else if opts.long > 0 {
        let single = opts.long > 2;
        let sep = if single { "\n" } else { "" };
        if !single {
            line.push('\n');
        }
        let mut first = true;
        let mut push = |line: &mut String, key: &str| {
            let lead = if first { sep } else { "" };
            first = false;
            match rec.attributes.get(key) {
                Some(v) => line.push_str(&format!("{}  {}={}{}", lead, key, v, sep)),
                None if opts.verbose > 0 => line.push_str(&format!("{}  {}=?{}", lead, key, sep)),
                None => line.push_str(lead),
            }
        };
        for key in ["cntlid", "state", "current_link_width", "firmware_rev"] {
            push(&mut line, key);
        }
        if !single {
            line.push('\n');
        }
        if opts.long > 1 {
            for key in ["current_link_speed", "model", "serial"] {
                push(&mut line, key);
            }
            if !single {
                line.push('\n');
            }
        }
    } else if !opts.brief {
        line.push_str(&format!("  {:<32} ", controller_field(rec, "model", 32)));
        line.push_str(&format!(" {:<18} ", controller_field(rec, "serial", 18)));
        line.push_str(&format!(" {:<8}\n", controller_field(rec, "firmware_rev", 8)));
    } else {
        line.push('\n');
    }

    if opts.verbose > 0 {
        device_dir_lines(rec, &mut line);
    }
    line
}

pub fn render(rec: &TopologyRecord, opts: &OutputOptions) -> String {
    match rec.kind {
        RecordKind::ScsiDevice => render_scsi_device(rec, opts),
        RecordKind::NvmeNamespace => render_nvme_namespace(rec, opts),
        RecordKind::ScsiHost => render_scsi_host(rec, opts),
        RecordKind::NvmeController => render_nvme_controller(rec, opts),
    }
}

/// The listings of one run, in print order: SCSI hosts then NVMe
/// controllers with `hosts`, otherwise SCSI devices then NVMe namespaces.
pub fn collect_sections(
    topo: &Topology,
    filter: &AddrFilter,
    hosts: bool,
    no_nvme: bool,
) -> Vec<(&'static str, Vec<TopologyRecord>)> {
    let mut sections = Vec::with_capacity(2);
    if hosts {
        sections.push((SCSI_HOSTS_KEY, topo.list_hosts(filter)));
        if !no_nvme {
            sections.push((NVME_HOSTS_KEY, topo.list_controllers(filter)));
        }
    } else {
        sections.push((SCSI_DEVICES_KEY, topo.list_scsi(filter)));
        if !no_nvme {
            sections.push((NVME_DEVICES_KEY, topo.list_nvme(filter)));
        }
    }
    sections
}

pub fn write_text<W: Write>(w: &mut W, records: &[TopologyRecord], opts: &OutputOptions) -> Result<()> {
    for rec in records {
        w.write_all(render(rec, opts).as_bytes())?;
    }
    Ok(())
}

/// Pretty printed JSON object holding one array per listing.
pub fn write_json<W: Write>(w: &mut W, sections: &[(&str, &[TopologyRecord])]) -> Result<()> {
    let mut doc = Map::new();
    for (key, records) in sections {
        doc.insert((*key).to_string(), serde_json::to_value(records)?);
    }
    serde_json::to_writer_pretty(&mut *w, &Value::Object(doc))?;
    writeln!(w)?;
    Ok(())
}

/// [`write_json`] into a newly created (or truncated) file.
pub fn write_json_file(path: &Path, sections: &[(&str, &[TopologyRecord])]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_json(&mut w, sections)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::sysfs::AttrList;
    use crate::transport::TransportInfo;
    use crate::vpd::identity_from_wwid;

    fn create_test_record(kind: RecordKind, name: &str, address: Address) -> TopologyRecord {
        TopologyRecord {
            kind,
            name: name.to_string(),
            address,
            sysfs_path: PathBuf::from(format!("/sys/bus/scsi/devices/{}", name)),
            canonical_path: None,
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

    fn create_test_disk() -> TopologyRecord {
        let mut rec = create_test_record(RecordKind::ScsiDevice, "2:0:0:0", Address::scsi(2, 0, 0, 0));
        rec.attributes.push("vendor", "ATA     ");
        rec.attributes.push("model", "Samsung SSD 860 ");
        rec.attributes.push("rev", "4B6Q");
        rec.attributes.push("type", "0");
        rec.attributes.push("state", "running");
        rec.pdt = Some(0);
        rec.kernel_name = Some("sda".into());
        rec.device_node = Some(PathBuf::from("/dev/sda"));
        rec.major_minor = Some("8:0".into());
        rec.size = Some(DiskSize {
            blocks_512: 1953525168,
            logical_block_size: Some(512),
            physical_block_size: Some(4096),
        });
        rec
    }

    #[test]
    fn test_size_to_string() {
        assert_eq!(size_to_string(1_000_204_886_016, SizeUnits::Decimal), "1.00TB");
        assert_eq!(size_to_string(500_107_862_016, SizeUnits::Decimal), "500GB");
        assert_eq!(size_to_string(512, SizeUnits::Decimal), "512B");
        assert_eq!(size_to_string(1536, SizeUnits::Binary), "1.50KiB");
        assert_eq!(size_to_string(32 * 1024 * 1024 * 1024, SizeUnits::Binary), "32.0GiB");
    }

    #[test]
    fn test_pdt_short_name() {
        assert_eq!(pdt_short_name(0), "disk   ");
        assert_eq!(pdt_short_name(0xd), "enclosu");
        assert_eq!(pdt_short_name(0x1f), "no dev ");
    }

    #[test]
    fn test_scsi_default_line() {
        let line = render_scsi_device(&create_test_disk(), &OutputOptions::default());
        assert_eq!(
            line,
            "[2:0:0:0]    disk    ATA      Samsung SSD 860  4B6Q  /dev/sda \n"
        );
    }

    #[test]
    fn test_scsi_missing_values() {
        let mut rec = create_test_record(RecordKind::ScsiDevice, "0:0:0:0", Address::scsi(0, 0, 0, 0));
        let line = render_scsi_device(&rec, &OutputOptions::default());
        assert_eq!(line, "[0:0:0:0]    type?   vendor?  model?           rev?  -        \n");

        rec.attributes.push("type", "x");
        assert!(render_scsi_device(&rec, &OutputOptions::default()).contains("type??  "));

        let mut rec = create_test_record(RecordKind::ScsiDevice, "0:0:0:0", Address::scsi(0, 0, 0, 0));
        rec.attributes.push("type", "40");
        assert!(render_scsi_device(&rec, &OutputOptions::default()).contains("type??? "));
    }

    #[test]
    fn test_scsi_size_columns() {
        let rec = create_test_disk();
        let opts = OutputOptions { brief: true, size: 1, ..OutputOptions::default() };
        assert_eq!(render_scsi_device(&rec, &opts), "[2:0:0:0]    /dev/sda   1.00TB\n");

        let opts = OutputOptions { brief: true, size: 4, ..OutputOptions::default() };
        assert!(render_scsi_device(&rec, &opts).ends_with("    1953525168,512\n"));

        let mut rec4k = rec.clone();
        rec4k.size = Some(DiskSize { blocks_512: 8000, logical_block_size: Some(4096), physical_block_size: None });
        assert!(render_scsi_device(&rec4k, &opts).ends_with("          1000,4096\n"));
    }

    #[test]
    fn test_scsi_unit_column() {
        let mut rec = create_test_disk();
        rec.identity = Some(identity_from_wwid("naa.5000c500a1b2c3d4"));
        let opts = OutputOptions { brief: true, unit: 1, ..OutputOptions::default() };
        assert!(render_scsi_device(&rec, &opts).starts_with("[2:0:0:0]    5000c500a1b2c3d4                  /dev/sda"));

        let opts = OutputOptions { brief: true, unit: 4, ..OutputOptions::default() };
        assert!(render_scsi_device(&rec, &opts).contains("naa.5000c500a1b2c3d4  "));

        rec.identity = None;
        let opts = OutputOptions { brief: true, unit: 1, ..OutputOptions::default() };
        assert!(render_scsi_device(&rec, &opts).contains(&format!("{:<32}  ", "none")));
    }

    #[test]
    fn test_unit_column_long_names() {
        let long = "0123456789abcdef0123456789abcdef0123";
        assert_eq!(unit_column(long, 1), "0123456789abcdef0123456789abcdef_ ");
        assert_eq!(unit_column(long, 2), "_56789abcdef0123456789abcdef0123  ");
        assert_eq!(unit_column(long, 3), format!("{}  ", long));
    }

    #[test]
    fn test_scsi_lunhex_and_generic() {
        let mut rec = create_test_disk();
        rec.generic_kernel_name = Some("sg0".into());
        rec.generic_node = Some(PathBuf::from("/dev/sg0"));
        let opts = OutputOptions { brief: true, lunhex: 1, generic: true, ..OutputOptions::default() };
        assert_eq!(
            render_scsi_device(&rec, &opts),
            format!("{:<28}/dev/sda   /dev/sg0 \n", "[2:0:0:0x0000]")
        );
    }

    #[test]
    fn test_scsi_long_lines() {
        let rec = create_test_disk();
        let opts = OutputOptions { brief: true, long: 1, ..OutputOptions::default() };
        let out = render_scsi_device(&rec, &opts);
        let second = out.lines().nth(1).unwrap();
        assert_eq!(
            second,
            "  state=running queue_depth=? scsi_level=? type=0 device_blocked=? timeout=?"
        );

        let opts = OutputOptions { brief: true, long: 3, ..OutputOptions::default() };
        let out = render_scsi_device(&rec, &opts);
        assert!(out.contains("\n  state=running\n  type=0\n"));
    }

    #[test]
    fn test_scsi_protection_columns() {
        let mut rec = create_test_disk();
        let opts = OutputOptions { brief: true, protection: true, protmode: true, ..OutputOptions::default() };
        assert_eq!(
            render_scsi_device(&rec, &opts),
            format!("[2:0:0:0]    /dev/sda   {:<9}  {:<16}  -   \n", "-", "-")
        );

        rec.protection = Some(Protection {
            protection_type: Some("1".into()),
            protection_mode: Some("dif1".into()),
            integrity_format: Some("T10-DIF-TYPE1-CRC".into()),
        });
        assert_eq!(
            render_scsi_device(&rec, &opts),
            "[2:0:0:0]    /dev/sda   DIF/Type1  T10-DIF-TYPE1-CRC  dif1\n"
        );

        rec.protection = Some(Protection { protection_type: Some("0".into()), ..Protection::default() });
        let opts = OutputOptions { brief: true, protection: true, ..OutputOptions::default() };
        assert!(render_scsi_device(&rec, &opts).starts_with(&format!("[2:0:0:0]    /dev/sda   {:<9}  -", "-")));
    }

    #[test]
    fn test_scsi_transport_column() {
        let mut rec = create_test_disk();
        let mut t = TransportInfo::unknown();
        t.summary = "sas:0x5000c500a1b2c3d5".into();
        rec.transport = Some(t);
        let opts = OutputOptions { transport: true, ..OutputOptions::default() };
        let line = render_scsi_device(&rec, &opts);
        assert!(line.contains(&format!("{:<30}  /dev/sda", "sas:0x5000c500a1b2c3d5")));
    }

    fn create_test_namespace() -> TopologyRecord {
        let mut rec = create_test_record(RecordKind::NvmeNamespace, "nvme0n1", Address::nvme(0, 1, 1));
        rec.attributes.push("model", "Samsung SSD 970 EVO Plus 1TB");
        rec.kernel_name = Some("nvme0n1".into());
        rec.device_node = Some(PathBuf::from("/dev/nvme0n1"));
        rec.major_minor = Some("259:0".into());
        rec.wwn = Some("eui.0025388b91b24c31".into());
        rec
    }

    #[test]
    fn test_nvme_namespace_line() {
        let rec = create_test_namespace();
        let line = render_nvme_namespace(&rec, &OutputOptions::default());
        assert_eq!(
            line,
            format!(
                "{:<13}disk    {:<41}  /dev/nvme0n1\n",
                "[N:0:1:1]", "Samsung SSD 970 EVO Plus 1TB__1"
            )
        );

        let opts = OutputOptions { unit: 1, dev_maj_min: true, ..OutputOptions::default() };
        let line = render_nvme_namespace(&rec, &opts);
        assert!(line.contains(&format!("{:<41}  /dev/nvme0n1 [259:0]", "0025388b91b24c31")));
    }

    #[test]
    fn test_model_nsid_fits() {
        let model = "M".repeat(50);
        let s = model_nsid(Some(&model), 7);
        assert_eq!(s.len(), 41);
        assert!(s.ends_with("M__7"));
        assert_eq!(model_nsid(None, 1), "-__1");
    }

    #[test]
    fn test_host_line() {
        let mut rec = create_test_record(RecordKind::ScsiHost, "host2", Address::scsi(2, 0, 0, 0));
        rec.attributes.push("driver", "ahci");
        rec.attributes.push("cmd_per_lun", "1");
        let line = render_scsi_host(&rec, &OutputOptions::default());
        assert_eq!(line, "[2]    ahci          \n");

        let rec = create_test_record(RecordKind::ScsiHost, "host3", Address::scsi(3, 0, 0, 0));
        assert_eq!(render_scsi_host(&rec, &OutputOptions::default()), "[3]    proc_name=????  \n");
    }

    #[test]
    fn test_controller_line() {
        let mut rec = create_test_record(RecordKind::NvmeController, "nvme0", Address::nvme(0, 4, 0));
        rec.kernel_name = Some("nvme0".into());
        rec.device_node = Some(PathBuf::from("/dev/nvme0"));
        rec.attributes.push("model", "Samsung SSD 970 EVO Plus 1TB");
        rec.attributes.push("serial", "S4EWNX0N123456");
        let line = render_nvme_controller(&rec, &OutputOptions::default());
        assert_eq!(
            line,
            format!(
                "[N:0]  /dev/nvme0  {:<32}  {:<18}  {:<8}\n",
                "Samsung SSD 970 EVO Plus 1TB", "S4EWNX0N123456", "<NULL>"
            )
        );
    }

    #[test]
    fn test_write_json_sections() {
        let recs = vec![create_test_disk()];
        let none: Vec<TopologyRecord> = Vec::new();
        let mut buf = Vec::new();
        write_json(&mut buf, &[(SCSI_DEVICES_KEY, recs.as_slice()), (NVME_DEVICES_KEY, none.as_slice())]).unwrap();
        let v: Value = serde_json::from_slice(&buf).unwrap();
        let list = v[SCSI_DEVICES_KEY].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["name"], "2:0:0:0");
        assert_eq!(list[0]["kernel_name"], "sda");
        assert_eq!(list[0]["attributes"]["rev"], "4B6Q");
        assert_eq!(list[0]["size"]["blocks_512"], 1953525168u64);
        assert!(v[NVME_DEVICES_KEY].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_write_json_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("listing.json");
        std::fs::write(&path, "stale contents that are longer than nothing").unwrap();
        let none: Vec<TopologyRecord> = Vec::new();
        write_json_file(&path, &[(SCSI_HOSTS_KEY, none.as_slice())]).unwrap();
        let v: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(v[SCSI_HOSTS_KEY].as_array().unwrap().is_empty());

        let missing = tmp.path().join("no/such/dir/listing.json");
        let err = write_json_file(&missing, &[(SCSI_HOSTS_KEY, none.as_slice())]).unwrap_err();
        assert!(matches!(err, crate::error::LsstorError::Io(_)));
    }
}
