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

//! Address tuples (`h:c:t:l`) for SCSI logical units and NVMe namespaces.
//!
//! A SCSI LUN exists in two forms. The kernel names devices with the
//! "Linux LUN", a 64-bit integer whose low 16 bits are the first 2-byte
//! level of the T10 LUN. SAM-5 describes the 8-byte big-endian T10 array
//! itself, which is hierarchical. Both are kept in [`Address`] so that
//! either can be rendered.
//!
//! NVMe devices reuse the same shape with a host number that no SCSI host
//! can have, so one ordering covers both classes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ParseError;
use crate::sysfs::{leading_int, leading_u64};

/// Pseudo host number carried by every NVMe tuple; rendered as `N`.
pub const NVME_HOST_NUM: i32 = 0x7fff;

/// Linux LUN value meaning "not specified".
pub const LUN_UNSPECIFIED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrClass {
    Scsi,
    Nvme,
}

/// Reverse the order of the four 16-bit words of `v`.
///
/// Converts between the Linux LUN and the T10 LUN read as a big-endian
/// integer; applying it twice is the identity.
pub fn lun_word_flip(v: u64) -> u64 {
    let mut input = v;
    let mut res = 0u64;
    for k in 0..4 {
        res |= input & 0xffff;
        if k == 3 {
            break;
        }
        res <<= 16;
        input >>= 16;
    }
    res
}

/// SAM-5 addressing method of one LUN level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LunMethod {
    Peripheral,
    Flat,
    LogicalUnit,
    Extended,
    NotSpecified,
}

/// One decoded level of a hierarchical LUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunLevel {
    pub method: LunMethod,
    /// Index of the first byte of this level in the 8-byte LUN.
    pub offset: usize,
    pub byte_count: usize,
    /// Set when this level says another level follows.
    pub is_continuation: bool,
}

/// Split an 8-byte T10 LUN into its addressing levels.
///
/// Decoding stops at the first level that does not announce a following
/// level, or after four levels.
pub fn decode_lun_levels(lun: &[u8; 8]) -> Vec<LunLevel> {
    if lun[0] == 0xff && lun[1] == 0xff {
        return vec![LunLevel {
            method: LunMethod::NotSpecified,
            offset: 0,
            byte_count: 2,
            is_continuation: false,
        }];
    }
    let mut levels = Vec::with_capacity(4);
    for k in 0..4 {
        let offset = 2 * k;
        let b0 = lun[offset];
        let (method, len, next) = match b0 >> 6 {
            0 => (LunMethod::Peripheral, 2, (b0 & 0x3f) != 0),
            1 => (LunMethod::Flat, 2, false),
            2 => (LunMethod::LogicalUnit, 2, false),
            _ => {
                let len_fld = (b0 & 0x30) >> 4;
                let eam = b0 & 0xf;
                match (len_fld, eam) {
                    (3, 0xf) => (LunMethod::NotSpecified, 2, false),
                    (0, 1) => (LunMethod::Extended, 2, false),
                    (1, 2) => (LunMethod::Extended, 4, false),
                    (2, 2) => (LunMethod::Extended, 6, false),
                    (0..=1, _) => (LunMethod::Extended, 4, false),
                    (2, _) => (LunMethod::Extended, 6, false),
                    _ => (LunMethod::Extended, 8, false),
                }
            }
        };
        levels.push(LunLevel {
            method,
            offset,
            byte_count: len.min(8 - offset),
            is_continuation: next,
        });
        if !next {
            break;
        }
    }
    levels
}

/// Rebuild an 8-byte LUN from the bytes covered by `levels`; everything
/// outside the decoded extent is zero.
pub fn encode_lun_levels(lun: &[u8; 8], levels: &[LunLevel]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for lvl in levels {
        let end = (lvl.offset + lvl.byte_count).min(8);
        out[lvl.offset..end].copy_from_slice(&lun[lvl.offset..end]);
    }
    out
}

/// Which leading fields of the tuple to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fields {
    Host,
    HostChannel,
    HostChannelTarget,
    #[default]
    Full,
}

/// Rendering of the LUN (or NVMe namespace id) field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LunFormat {
    #[default]
    Decimal,
    /// T10 levels in hex with `_` between levels (`--lunhex`).
    T10Hex,
    /// All 16 hex digits of the T10 LUN (`--lunhex` twice).
    FullHex,
}

impl LunFormat {
    /// Map a repeat count of the lunhex option to a format.
    pub fn from_count(n: u8) -> Self {
        match n {
            0 => LunFormat::Decimal,
            1 => LunFormat::T10Hex,
            _ => LunFormat::FullHex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatMode {
    pub fields: Fields,
    pub lun: LunFormat,
}

impl FormatMode {
    pub fn full(lun: LunFormat) -> Self {
        Self { fields: Fields::Full, lun }
    }
}

/// Address of a SCSI logical unit or NVMe namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    pub class: AddrClass,
    /// SCSI host number, or [`NVME_HOST_NUM`].
    pub a: i32,
    /// SCSI channel, or NVMe controller character device minor.
    pub b: i32,
    /// SCSI target id, or NVMe controller id.
    pub c: i32,
    /// Linux LUN, or NVMe namespace id.
    pub unit: u64,
    /// T10 LUN (big endian), or the namespace id little endian.
    pub unit_bytes: [u8; 8],
}

impl Address {
    pub fn scsi(h: i32, c: i32, t: i32, lun: u64) -> Self {
        Self {
            class: AddrClass::Scsi,
            a: h,
            b: c,
            c: t,
            unit: lun,
            unit_bytes: lun_word_flip(lun).to_be_bytes(),
        }
    }

    /// Build a SCSI address from the 8-byte T10 LUN.
    pub fn scsi_t10(h: i32, c: i32, t: i32, t10: [u8; 8]) -> Self {
        Self::scsi(h, c, t, lun_word_flip(u64::from_be_bytes(t10)))
    }

    pub fn nvme(cdev_minor: i32, cntlid: i32, nsid: u32) -> Self {
        let mut unit_bytes = [0u8; 8];
        unit_bytes[..4].copy_from_slice(&nsid.to_le_bytes());
        Self {
            class: AddrClass::Nvme,
            a: NVME_HOST_NUM,
            b: cdev_minor,
            c: cntlid,
            unit: u64::from(nsid),
            unit_bytes,
        }
    }

    pub fn is_nvme(&self) -> bool {
        self.class == AddrClass::Nvme
    }

    pub fn lun_levels(&self) -> Vec<LunLevel> {
        decode_lun_levels(&self.unit_bytes)
    }

    /// Parse `h:c:t:l`, `nvme<m>[c<id>][n<nsid>][p<part>]` or
    /// `N:<m>:<id>:<nsid>`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::Malformed(text.to_string());
        let first = text.chars().next().ok_or_else(malformed)?;
        if first.eq_ignore_ascii_case(&'n') {
            if let Some(rest) = text.strip_prefix("nvme") {
                return parse_nvme_name(rest).ok_or_else(malformed);
            }
            return parse_nvme_colon(text).ok_or_else(malformed);
        }
        let parts: Vec<&str> = text.splitn(4, ':').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }
        let field = |s: &str| s.trim().parse::<i32>().ok();
        let (h, c, t) = match (field(parts[0]), field(parts[1]), field(parts[2])) {
            (Some(h), Some(c), Some(t)) => (h, c, t),
            _ => return Err(malformed()),
        };
        let lun = parts[3].trim();
        if let Some(hex) = strip_hex_prefix(lun) {
            let t10 = parse_t10_hex(hex).ok_or_else(malformed)?;
            return Ok(Self::scsi_t10(h, c, t, t10));
        }
        let l = if lun == "-1" {
            LUN_UNSPECIFIED
        } else {
            lun.parse::<u64>().map_err(|_| malformed())?
        };
        Ok(Self::scsi(h, c, t, l))
    }

    /// Render the tuple; see [`FormatMode`].
    pub fn format(&self, mode: FormatMode) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4);
        parts.push(if self.is_nvme() {
            "N".to_string()
        } else {
            self.a.to_string()
        });
        let count = match mode.fields {
            Fields::Host => 1,
            Fields::HostChannel => 2,
            Fields::HostChannelTarget => 3,
            Fields::Full => 4,
        };
        if count > 1 {
            parts.push(self.b.to_string());
        }
        if count > 2 {
            parts.push(self.c.to_string());
        }
        if count > 3 {
            parts.push(self.format_unit(mode.lun));
        }
        parts.join(":")
    }

    /// [`Address::format`] limited to `capacity` bytes.
    pub fn format_bounded(&self, mode: FormatMode, capacity: usize) -> String {
        let mut s = self.format(mode);
        truncate_bounded(&mut s, capacity);
        s
    }

    fn format_unit(&self, lun: LunFormat) -> String {
        if self.is_nvme() {
            let nsid = self.unit as u32;
            return match lun {
                LunFormat::T10Hex => format!("0x{:04x}", nsid),
                LunFormat::FullHex => format!("0x{:08x}", nsid),
                LunFormat::Decimal if nsid == u32::MAX => "-1".to_string(),
                LunFormat::Decimal => nsid.to_string(),
            };
        }
        match lun {
            LunFormat::T10Hex => {
                let mut s = String::from("0x");
                for (i, lvl) in self.lun_levels().iter().enumerate() {
                    if i > 0 {
                        s.push('_');
                    }
                    for b in &self.unit_bytes[lvl.offset..lvl.offset + lvl.byte_count] {
                        s.push_str(&format!("{:02x}", b));
                    }
                }
                s
            }
            LunFormat::FullHex => format!("0x{:016x}", lun_word_flip(self.unit)),
            LunFormat::Decimal if self.unit == LUN_UNSPECIFIED => "-1".to_string(),
            LunFormat::Decimal => self.unit.to_string(),
        }
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

/// Decode a T10 hex LUN (`_` separators allowed, trailing zero bytes may be
/// omitted) into the 8-byte array.
fn parse_t10_hex(hex: &str) -> Option<[u8; 8]> {
    let digits: String = hex.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || digits.len() > 16 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let padded = format!("{:0<16}", digits);
    u64::from_str_radix(&padded, 16).ok().map(u64::to_be_bytes)
}

fn parse_nvme_name(rest: &str) -> Option<Address> {
    let (minor, mut rest) = leading_u64(rest)?;
    let mut cntlid = 0u64;
    let mut nsid = 0u64;
    while let Some(tag) = rest.chars().next() {
        let Some((val, tail)) = leading_u64(&rest[tag.len_utf8()..]) else {
            break;
        };
        match tag {
            // hidden multipath names count controllers from zero
            'c' => cntlid = val + 1,
            'n' => nsid = val,
            'p' => {}
            _ => break,
        }
        rest = tail;
    }
    Some(Address::nvme(
        i32::try_from(minor).ok()?,
        i32::try_from(cntlid).ok()?,
        u32::try_from(nsid).ok()?,
    ))
}

fn parse_nvme_colon(text: &str) -> Option<Address> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 4 || !parts[0].eq_ignore_ascii_case("n") {
        return None;
    }
    let minor = parts[1].trim().parse::<i32>().ok()?;
    let cntlid = parts[2].trim().parse::<i32>().ok()?;
    let nsid_s = parts[3].trim();
    let nsid = if let Some(hex) = strip_hex_prefix(nsid_s) {
        u32::from_str_radix(hex, 16).ok()?
    } else if nsid_s == "-1" {
        u32::MAX
    } else {
        nsid_s.parse::<u32>().ok()?
    };
    Some(Address::nvme(minor, cntlid, nsid))
}

/// Cut `s` to at most `capacity` bytes on a character boundary.
pub fn truncate_bounded(s: &mut String, capacity: usize) {
    if s.len() <= capacity {
        return;
    }
    let mut end = capacity;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.a, self.b, self.c, self.unit, self.class)
            .cmp(&(other.a, other.b, other.c, other.unit, other.class))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(FormatMode::default()))
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

/// Address filter given on the command line, e.g. `2:0:*:-` or `N:1`.
///
/// `None` fields match anything; set fields must match exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddrFilter {
    pub host: Option<i32>,
    pub channel: Option<i32>,
    pub target: Option<i32>,
    pub lun: Option<u64>,
}

impl AddrFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn host_only(h: i32) -> Self {
        Self { host: Some(h), ..Self::default() }
    }

    /// Decode up to four filter arguments.
    ///
    /// `host<n>` selects a single host. When several arguments are given and
    /// the first holds no colon they are joined with `:`.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ParseError> {
        if args.len() > 4 {
            return Err(ParseError::TooManyArguments(args.len()));
        }
        let Some(first) = args.first().map(|a| a.as_ref()) else {
            return Ok(Self::any());
        };
        if let Some(rest) = first.strip_prefix("host") {
            if let Some(n) = leading_int(rest).filter(|n| *n >= 0) {
                let h = i32::try_from(n).map_err(|_| ParseError::Malformed(first.to_string()))?;
                return Ok(Self::host_only(h));
            }
        }
        if args.len() == 1 || first.contains(':') {
            return parse_filter_components(first);
        }
        let joined = args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(":");
        parse_filter_components(&joined)
    }

    pub fn is_active(&self) -> bool {
        self.host.is_some() || self.channel.is_some() || self.target.is_some() || self.lun.is_some()
    }

    pub fn matches(&self, addr: &Address) -> bool {
        self.host.map_or(true, |h| h == addr.a)
            && self.channel.map_or(true, |c| c == addr.b)
            && self.target.map_or(true, |t| t == addr.c)
            && self.lun.map_or(true, |l| l == addr.unit)
    }

    /// Host check used at host/controller granularity.
    pub fn matches_host(&self, h: i32) -> bool {
        self.host.map_or(true, |fh| fh == h)
    }
}

fn parse_filter_components(arg: &str) -> Result<AddrFilter, ParseError> {
    let s = arg.trim_start_matches([' ', '\t', '[']);
    let mut filter = AddrFilter::any();
    if s.is_empty() {
        return Ok(filter);
    }
    let s = s.strip_suffix(':').unwrap_or(s);
    let comps: Vec<&str> = s.split(':').collect();
    if comps.len() > 4 {
        return Err(ParseError::TooManyComponents(arg.to_string()));
    }
    for (k, comp) in comps.iter().enumerate() {
        if comp.is_empty() || comp.starts_with(['-', '*', '?']) {
            continue;
        }
        let bad = || ParseError::NotAnInteger {
            input: arg.to_string(),
            component: comp.to_string(),
        };
        if k == 3 {
            let lun = match strip_hex_prefix(comp) {
                Some(hex) => {
                    let end = hex.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(hex.len());
                    u64::from_str_radix(&hex[..end], 16).ok()
                }
                None => leading_u64(comp).map(|(v, _)| v),
            };
            match lun {
                Some(v) => filter.lun = Some(v),
                None if comp.contains(']') => {}
                None => return Err(bad()),
            }
            continue;
        }
        let val = match leading_int(comp) {
            Some(v) => Some(i32::try_from(v).map_err(|_| bad())?),
            None if k == 0 && comp.eq_ignore_ascii_case("n") => Some(NVME_HOST_NUM),
            None if comp.contains(']') => None,
            None => return Err(bad()),
        };
        let val = val.filter(|v| *v != -1);
        match k {
            0 => filter.host = val,
            1 => filter.channel = val,
            _ => filter.target = val,
        }
    }
    Ok(filter)
}
