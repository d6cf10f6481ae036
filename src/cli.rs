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

//! Command Line Interface
//!
//! Option letters follow lsscsi so existing habits carry over.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use crate::address::AddrFilter;
use crate::config::{Overrides, Settings};
use crate::error::{LsstorError, Result};
use crate::output::OutputOptions;
use crate::topology::EnrichOptions;

#[derive(Parser, Debug)]
#[command(name = "lsstor")]
#[command(version)]
#[command(about = "List SCSI and NVMe devices and hosts, with their attributes")]
#[command(long_about = "lsstor - list SCSI and NVMe storage on Linux

Walks sysfs and prints one line per SCSI logical unit or NVMe namespace
(or per SCSI host and NVMe controller with --hosts). Optional filter
arguments restrict the listing by address.

FILTER:
    H:C:T:L              e.g. 2:0:0:0, 2:*:*:*, 2, or N:0:1:1 for NVMe
    H C T L              the same fields as separate arguments
    '-', '*' or '?'      match any value in that field

EXAMPLES:
    lsstor                          List SCSI devices and NVMe namespaces
    lsstor -s                       Add a size column
    lsstor -t                       Show transport information
    lsstor -u                       Show logical unit names
    lsstor -H                       List SCSI hosts and NVMe controllers
    lsstor -p -P                    Show protection information
    lsstor -L 2                     Everything known about devices on host 2
    lsstor -j                       JSON output
    lsstor -J out.json              JSON output written to out.json

ENVIRONMENT VARIABLES:
    LSSCSI_LUNHEX_OPT    Default --lunhex count (0, 1 or 2)
    LSSTOR_LOG           Log filter (trace, debug, info, warn, error)

FILES:
    ~/.config/lsstor/config.json    sysfs_root, dev_root and lunhex defaults")]
pub struct Cli {
    // ========================================================================
    // Columns
    // ========================================================================
    /// Tuple and device name only
    #[arg(short = 'b', long)]
    pub brief: bool,

    /// Alternate output like /proc/scsi/scsi (not supported)
    #[arg(short = 'c', long)]
    pub classic: bool,

    /// Show device node major and minor numbers
    #[arg(short = 'd', long)]
    pub device: bool,

    /// Show target protection type and initiator integrity profile
    #[arg(short = 'p', long)]
    pub protection: bool,

    /// Show the negotiated protection mode
    #[arg(short = 'P', long, alias = "prot-mode")]
    pub protmode: bool,

    /// Show the SCSI generic device name
    #[arg(short = 'g', long)]
    pub generic: bool,

    /// Show the kernel name instead of the device node name
    #[arg(short = 'k', long)]
    pub kname: bool,

    /// Show the peripheral device type in hex
    #[arg(short = 'D', long)]
    pub pdt: bool,

    /// Show the udev SCSI id (twice: drop the designator type digit)
    #[arg(short = 'i', long = "scsi_id", action = ArgAction::Count)]
    pub scsi_id: u8,

    /// Show disk capacity (twice: binary units, three times: blocks)
    #[arg(short = 's', long, action = ArgAction::Count)]
    pub size: u8,

    /// Show capacity as a block count with logical block size
    #[arg(short = 'S', long = "sz-lbs")]
    pub sz_lbs: bool,

    /// Show transport information
    #[arg(short = 't', long)]
    pub transport: bool,

    /// Show the logical unit name (more: longer forms)
    #[arg(short = 'u', long, action = ArgAction::Count)]
    pub unit: u8,

    /// Show the complete logical unit name with its prefix
    #[arg(short = 'U', long = "long-unit")]
    pub long_unit: bool,

    /// Show the disk WWN (twice: from the wwn- links)
    #[arg(short = 'w', long, action = ArgAction::Count)]
    pub wwn: u8,

    /// Show the LUN in hex (twice: all 16 digits)
    #[arg(short = 'x', long, action = ArgAction::Count)]
    pub lunhex: u8,

    // ========================================================================
    // Detail
    // ========================================================================
    /// Extra attribute lines (repeat for more)
    #[arg(short = 'l', long, action = ArgAction::Count)]
    pub long: u8,

    /// Every attribute, one per line
    #[arg(short = 'L', long)]
    pub list: bool,

    /// Add sysfs directories (repeat to raise log level)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Output JSON instead of text
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Write the JSON output to this file ('-' for stdout); implies --json
    #[arg(short = 'J', long = "js-file", alias = "js_file", value_name = "FILE")]
    pub js_file: Option<PathBuf>,

    // ========================================================================
    // Selection
    // ========================================================================
    /// List hosts and controllers instead of devices
    #[arg(short = 'H', long, visible_alias = "controllers", visible_short_alias = 'C')]
    pub hosts: bool,

    /// Leave out NVMe devices and controllers
    #[arg(short = 'N', long = "no-nvme")]
    pub no_nvme: bool,

    /// Read sysfs from this directory instead of /sys
    #[arg(short = 'y', long = "sysfsroot", value_name = "PATH")]
    pub sysfs_root: Option<PathBuf>,

    /// Look for device nodes here instead of /dev
    #[arg(long = "devroot", value_name = "PATH")]
    pub dev_root: Option<PathBuf>,

    /// Address filter, see FILTER above
    #[arg(value_name = "FILTER")]
    pub filter: Vec<String>,
}

impl Cli {
    /// `-l` counts once each; `-L` is worth three.
    pub fn long_level(&self) -> u8 {
        self.long.saturating_add(if self.list { 3 } else { 0 })
    }

    pub fn size_level(&self) -> u8 {
        self.size.saturating_add(if self.sz_lbs { 3 } else { 0 })
    }

    pub fn unit_level(&self) -> u8 {
        self.unit.saturating_add(if self.long_unit { 3 } else { 0 })
    }

    /// Reject option combinations that make no sense. Returns warnings for
    /// options that are accepted but ignored.
    pub fn validate(&self) -> Result<Vec<&'static str>> {
        if self.classic {
            return Err(LsstorError::Usage("--classic output is not supported".into()));
        }
        let long = self.long_level();
        let unit = self.unit_level();
        if self.transport && unit > 0 {
            return Err(LsstorError::Usage("use '--transport' or '--unit' but not both".into()));
        }
        if self.transport && (1..=2).contains(&long) {
            return Err(LsstorError::Usage(
                "please use '--list' (rather than '--long') with --transport".into(),
            ));
        }
        if unit > 0 && (1..=2).contains(&long) {
            return Err(LsstorError::Usage(
                "please use '--list' (rather than '--long') with --unit".into(),
            ));
        }
        let mut warnings = Vec::new();
        if unit > 0 && self.hosts {
            warnings.push("--unit ignored when --hosts given");
        }
        Ok(warnings)
    }

    pub fn json_output(&self) -> bool {
        self.json || self.js_file.is_some()
    }

    /// File named by `--js-file`, unless it names stdout.
    pub fn json_file(&self) -> Option<&Path> {
        self.js_file.as_deref().filter(|p| *p != Path::new("-"))
    }

    /// Address filter from the positional arguments.
    pub fn address_filter(&self) -> Result<AddrFilter> {
        Ok(AddrFilter::parse(&self.filter)?)
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            sysfs_root: self.sysfs_root.clone(),
            dev_root: self.dev_root.clone(),
            lunhex: self.lunhex,
        }
    }

    pub fn enrich_options(&self) -> EnrichOptions {
        EnrichOptions {
            wwn: self.wwn > 0,
            wwn_twice: self.wwn > 1,
            scsi_id: self.scsi_id > 0,
            scsi_id_strip: self.scsi_id > 1,
        }
    }

    pub fn output_options(&self, settings: &Settings) -> OutputOptions {
        OutputOptions {
            brief: self.brief,
            pdt: self.pdt,
            long: self.long_level(),
            lunhex: settings.lunhex,
            transport: self.transport,
            unit: if self.hosts { 0 } else { self.unit_level() },
            wwn: self.wwn > 0,
            generic: self.generic,
            dev_maj_min: self.device,
            scsi_id: self.scsi_id > 0,
            size: self.size_level(),
            verbose: self.verbose,
            kname: self.kname,
            protection: self.protection,
            protmode: self.protmode,
            dev_root: settings.dev_root.clone(),
        }
    }
}
