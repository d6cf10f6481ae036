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

//! Device Identification VPD page (0x83) decoding.
//!
//! The kernel exports the page verbatim as `vpd_pg83`. The page is a 4-byte
//! header followed by designation descriptors, each with a 4-byte header of
//! its own:
//!
//! ```text
//! byte 0: protocol identifier (7:4) | code set (3:0)
//! byte 1: PIV (7) | association (5:4) | designator type (3:0)
//! byte 3: designator length
//! ```

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::address::truncate_bounded;
use crate::error::{self, VpdError};
use crate::sysfs::{self, Sysfs};

pub const VPD_DEVICE_ID: u8 = 0x83;

/// Largest page read from sysfs.
pub const VPD_PAGE_MAX: usize = 512;

const TPROTO_ISCSI: u8 = 5;

pub const CODE_SET_BINARY: u8 = 1;
pub const CODE_SET_ASCII: u8 = 2;
pub const CODE_SET_UTF8: u8 = 3;

pub const DESIG_T10_VENDOR: u8 = 0x1;
pub const DESIG_EUI64: u8 = 0x2;
pub const DESIG_NAA: u8 = 0x3;
pub const DESIG_SCSI_NAME: u8 = 0x8;
pub const DESIG_UUID: u8 = 0xa;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Association {
    LogicalUnit,
    TargetPort,
    TargetDevice,
    Reserved,
}

impl From<u8> for Association {
    fn from(v: u8) -> Self {
        match v & 0x3 {
            0 => Association::LogicalUnit,
            1 => Association::TargetPort,
            2 => Association::TargetDevice,
            _ => Association::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesignationDescriptor<'a> {
    pub protocol_id: u8,
    pub code_set: u8,
    pub piv: bool,
    pub association: Association,
    pub designator_type: u8,
    /// Designator body, without the 4-byte descriptor header.
    pub bytes: &'a [u8],
}

/// Match criteria for [`DeviceIdPage::designators`]; `None` matches
/// anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescFilter {
    pub association: Option<Association>,
    pub designator_type: Option<u8>,
    pub code_set: Option<u8>,
}

impl DescFilter {
    pub fn new(association: Association, designator_type: u8, code_set: Option<u8>) -> Self {
        Self {
            association: Some(association),
            designator_type: Some(designator_type),
            code_set,
        }
    }

    fn accepts(&self, d: &DesignationDescriptor<'_>) -> bool {
        self.code_set.map_or(true, |c| c == d.code_set)
            && self.association.map_or(true, |a| a == d.association)
            && self.designator_type.map_or(true, |t| t == d.designator_type)
    }
}

/// How a descriptor walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterEnd {
    /// The last descriptor ended exactly at the end of the page.
    Exhausted,
    /// A descriptor header or body ran past the end of the page.
    Truncated,
}

/// A validated Device Identification page.
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdPage<'a> {
    descriptors: &'a [u8],
}

impl<'a> DeviceIdPage<'a> {
    /// Check the page code and length fields of `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, VpdError> {
        if bytes.len() <= 8 {
            return Err(VpdError::TooShort(bytes.len()));
        }
        if bytes[1] != VPD_DEVICE_ID {
            return Err(VpdError::WrongPage(bytes[1]));
        }
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if declared + 4 != bytes.len() {
            return Err(VpdError::LengthMismatch {
                declared: declared + 4,
                actual: bytes.len(),
            });
        }
        Ok(Self { descriptors: &bytes[4..] })
    }

    pub fn designators(&self, filter: DescFilter) -> DesignatorIter<'a> {
        DesignatorIter {
            buf: self.descriptors,
            pos: None,
            filter,
            end: None,
        }
    }

    /// First descriptor matching `filter`.
    pub fn find(&self, filter: DescFilter) -> Option<DesignationDescriptor<'a>> {
        let mut it = self.designators(filter);
        let found = it.next();
        if found.is_none() && it.termination() == Some(IterEnd::Truncated) {
            debug!("designation descriptor list truncated");
        }
        found
    }
}

/// Lazy walk over the designation descriptors of a page.
#[derive(Debug, Clone)]
pub struct DesignatorIter<'a> {
    buf: &'a [u8],
    pos: Option<usize>,
    filter: DescFilter,
    end: Option<IterEnd>,
}

impl<'a> DesignatorIter<'a> {
    /// How the walk ended, once it has.
    pub fn termination(&self) -> Option<IterEnd> {
        self.end
    }
}

impl<'a> Iterator for DesignatorIter<'a> {
    type Item = DesignationDescriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        let len = self.buf.len();
        loop {
            let k = match self.pos {
                None => 0,
                Some(k) => k + self.buf[k + 3] as usize + 4,
            };
            if k + 4 > len {
                self.end = Some(if k == len { IterEnd::Exhausted } else { IterEnd::Truncated });
                return None;
            }
            self.pos = Some(k);
            let dlen = self.buf[k + 3] as usize;
            if k + 4 + dlen > len {
                self.end = Some(IterEnd::Truncated);
                return None;
            }
            let d = DesignationDescriptor {
                protocol_id: self.buf[k] >> 4,
                code_set: self.buf[k] & 0xf,
                piv: self.buf[k + 1] & 0x80 != 0,
                association: Association::from(self.buf[k + 1] >> 4),
                designator_type: self.buf[k + 1] & 0xf,
                bytes: &self.buf[k + 4..k + 4 + dlen],
            };
            if self.filter.accepts(&d) {
                return Some(d);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Naa,
    Eui64,
    ScsiName,
    T10Vendor,
    Uuid,
    None,
}

/// Logical unit name chosen from a Device Identification page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalUnitIdentity {
    pub kind: IdentityKind,
    pub prefix: Option<&'static str>,
    pub value: String,
}

impl LogicalUnitIdentity {
    pub fn none() -> Self {
        Self { kind: IdentityKind::None, prefix: None, value: String::new() }
    }

    fn new(kind: IdentityKind, prefix: Option<&'static str>, value: String) -> Self {
        Self { kind, prefix, value }
    }

    pub fn is_none(&self) -> bool {
        self.kind == IdentityKind::None
    }

    /// Rendered form limited to `capacity` bytes.
    pub fn render_bounded(&self, capacity: usize) -> String {
        let mut s = self.to_string();
        truncate_bounded(&mut s, capacity);
        s
    }
}

impl fmt::Display for LogicalUnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = self.prefix {
            f.write_str(p)?;
        }
        f.write_str(&self.value)
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Text of a name string designator, up to the first NUL.
fn name_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn uuid_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(36);
    for (k, b) in bytes.iter().take(16).enumerate() {
        if matches!(k, 4 | 6 | 8 | 10) {
            s.push('-');
        }
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Pick the logical unit name from a raw Device Identification page.
///
/// Order: iSCSI name string, NAA, EUI-64, UUID, other SCSI name string, T10
/// vendor id. A malformed page gives [`IdentityKind::None`].
pub fn resolve_identity(page_bytes: &[u8], want_prefix: bool) -> LogicalUnitIdentity {
    let page = match DeviceIdPage::parse(page_bytes) {
        Ok(p) => p,
        Err(e) => {
            debug!("ignoring device identification page: {}", e);
            return LogicalUnitIdentity::none();
        }
    };
    let prefix = |p: &'static str| want_prefix.then_some(p);
    let lu = Association::LogicalUnit;

    let lu_sns = page
        .find(DescFilter::new(lu, DESIG_SCSI_NAME, Some(CODE_SET_UTF8)))
        .map(|d| name_string(d.bytes));
    if let Some(name) = &lu_sns {
        let tport = page.find(DescFilter::new(
            Association::TargetPort,
            DESIG_SCSI_NAME,
            Some(CODE_SET_UTF8),
        ));
        if let Some(tp) = tport {
            if tp.piv && tp.protocol_id == TPROTO_ISCSI {
                return LogicalUnitIdentity::new(IdentityKind::ScsiName, None, name.clone());
            }
        }
    }

    if let Some(d) = page.find(DescFilter::new(lu, DESIG_NAA, Some(CODE_SET_BINARY))) {
        if !matches!(d.bytes.len(), 8 | 16) {
            return LogicalUnitIdentity::none();
        }
        return LogicalUnitIdentity::new(IdentityKind::Naa, prefix("naa."), hex_string(d.bytes));
    }
    if let Some(d) = page.find(DescFilter::new(lu, DESIG_EUI64, Some(CODE_SET_BINARY))) {
        if !matches!(d.bytes.len(), 8 | 12 | 16) {
            return LogicalUnitIdentity::none();
        }
        return LogicalUnitIdentity::new(IdentityKind::Eui64, prefix("eui."), hex_string(d.bytes));
    }
    if let Some(d) = page.find(DescFilter::new(lu, DESIG_UUID, Some(CODE_SET_BINARY))) {
        if d.bytes.len() != 18 || (d.bytes[0] >> 4) != 1 {
            return LogicalUnitIdentity::new(IdentityKind::Uuid, None, "??".to_string());
        }
        return LogicalUnitIdentity::new(
            IdentityKind::Uuid,
            prefix("uuid."),
            uuid_string(&d.bytes[2..]),
        );
    }
    if let Some(name) = lu_sns {
        return LogicalUnitIdentity::new(IdentityKind::ScsiName, None, name);
    }
    if let Some(d) = page.find(DescFilter::new(lu, DESIG_T10_VENDOR, None)) {
        if d.code_set > CODE_SET_BINARY && d.bytes.len() >= 8 {
            return LogicalUnitIdentity::new(
                IdentityKind::T10Vendor,
                prefix("t10."),
                name_string(d.bytes),
            );
        }
    }
    LogicalUnitIdentity::none()
}

/// Read `vpd_pg83` from a device directory, checking its header.
pub fn read_device_id_page(dir: &Path) -> error::Result<Vec<u8>> {
    let bytes = sysfs::read_bytes(&dir.join("vpd_pg83"), VPD_PAGE_MAX)?;
    DeviceIdPage::parse(&bytes)?;
    Ok(bytes)
}

/// Read `vpd_pg83` from a device directory and resolve it.
pub fn identity_from_dir(dir: &Path, want_prefix: bool) -> Option<LogicalUnitIdentity> {
    let bytes = match read_device_id_page(dir) {
        Ok(b) => b,
        Err(e) => {
            debug!("no logical unit name: {}", e);
            return None;
        }
    };
    let id = resolve_identity(&bytes, want_prefix);
    (!id.is_none()).then_some(id)
}

/// Logical unit name of the SCSI device `hctl` (e.g. `2:0:1:0`).
pub fn lu_name(sysfs: &Sysfs, hctl: &str, want_prefix: bool) -> Option<LogicalUnitIdentity> {
    let dir = sysfs.class_entry("scsi_device", hctl).join("device");
    identity_from_dir(&dir, want_prefix)
}

/// Identity of an NVMe namespace from its `wwid` attribute, which the
/// kernel already renders with a designator prefix.
pub fn identity_from_wwid(wwid: &str) -> LogicalUnitIdentity {
    const PREFIXES: [(&str, IdentityKind); 5] = [
        ("eui.", IdentityKind::Eui64),
        ("naa.", IdentityKind::Naa),
        ("uuid.", IdentityKind::Uuid),
        ("t10.", IdentityKind::T10Vendor),
        ("nvme.", IdentityKind::T10Vendor),
    ];
    let wwid = wwid.trim();
    if wwid.is_empty() {
        return LogicalUnitIdentity::none();
    }
    for (prefix, kind) in PREFIXES {
        if let Some(rest) = wwid.strip_prefix(prefix) {
            return LogicalUnitIdentity::new(kind, Some(prefix), rest.to_string());
        }
    }
    LogicalUnitIdentity::new(IdentityKind::T10Vendor, None, wwid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LsstorError;

    fn desc(proto: u8, code_set: u8, piv: bool, assoc: u8, dtype: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![
            (proto << 4) | code_set,
            (if piv { 0x80 } else { 0 }) | (assoc << 4) | dtype,
            0,
            body.len() as u8,
        ];
        v.extend_from_slice(body);
        v
    }

    fn create_test_page(descs: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = descs.concat();
        let mut page = vec![0x00, VPD_DEVICE_ID];
        page.extend_from_slice(&(body.len() as u16).to_be_bytes());
        page.extend(body);
        page
    }

    fn naa16() -> Vec<u8> {
        desc(0, CODE_SET_BINARY, false, 0, DESIG_NAA, &[
            0x60, 0x00, 0xc2, 0x91, 0x23, 0x45, 0x67, 0x89,
            0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89,
        ])
    }

    #[test]
    fn test_parse_rejects_bad_pages() {
        assert_eq!(DeviceIdPage::parse(&[0, 0x83, 0, 0]).unwrap_err(), VpdError::TooShort(4));
        let mut page = create_test_page(&[naa16()]);
        page[1] = 0x80;
        assert_eq!(DeviceIdPage::parse(&page).unwrap_err(), VpdError::WrongPage(0x80));
        let mut page = create_test_page(&[naa16()]);
        page.push(0);
        assert!(matches!(
            DeviceIdPage::parse(&page),
            Err(VpdError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_iterator_exhausts_normally() {
        let page = create_test_page(&[
            naa16(),
            desc(0, CODE_SET_ASCII, false, 0, DESIG_T10_VENDOR, b"ATA     ST1000"),
        ]);
        let p = DeviceIdPage::parse(&page).unwrap();
        let mut it = p.designators(DescFilter::default());
        assert_eq!(it.next().unwrap().designator_type, DESIG_NAA);
        assert_eq!(it.next().unwrap().designator_type, DESIG_T10_VENDOR);
        assert!(it.next().is_none());
        assert_eq!(it.termination(), Some(IterEnd::Exhausted));
        // not restartable
        assert!(it.next().is_none());
    }

    #[test]
    fn test_iterator_filters() {
        let page = create_test_page(&[
            naa16(),
            desc(0, CODE_SET_ASCII, false, 0, DESIG_T10_VENDOR, b"ATA     ST1000"),
        ]);
        let p = DeviceIdPage::parse(&page).unwrap();
        let found: Vec<_> = p
            .designators(DescFilter::new(Association::LogicalUnit, DESIG_T10_VENDOR, None))
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code_set, CODE_SET_ASCII);
    }

    #[test]
    fn test_iterator_flags_truncation() {
        // last descriptor claims 32 bytes but only 4 follow
        let mut body = naa16();
        body.extend_from_slice(&[0x01, 0x03, 0x00, 32, 1, 2, 3, 4]);
        let page = create_test_page(&[body]);
        let p = DeviceIdPage::parse(&page).unwrap();
        let mut it = p.designators(DescFilter::default());
        assert!(it.next().is_some());
        assert!(it.next().is_none());
        assert_eq!(it.termination(), Some(IterEnd::Truncated));
    }

    #[test]
    fn test_naa16_with_prefix() {
        let page = create_test_page(&[naa16()]);
        let id = resolve_identity(&page, true);
        assert_eq!(id.kind, IdentityKind::Naa);
        let s = id.to_string();
        assert!(s.starts_with("naa."));
        let hex = &s[4..];
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(resolve_identity(&page, false).to_string(), hex);
    }

    #[test]
    fn test_iscsi_name_overrides_naa() {
        let iqn = b"iqn.2003-01.org.linux-iscsi.host:disk1\0\0";
        let page = create_test_page(&[
            naa16(),
            desc(0, CODE_SET_UTF8, false, 0, DESIG_SCSI_NAME, iqn),
            desc(TPROTO_ISCSI, CODE_SET_UTF8, true, 1, DESIG_SCSI_NAME, b"iqn.2003-01.org.tgt,t,0x1\0\0\0"),
        ]);
        let id = resolve_identity(&page, true);
        assert_eq!(id.kind, IdentityKind::ScsiName);
        assert_eq!(id.to_string(), "iqn.2003-01.org.linux-iscsi.host:disk1");
    }

    #[test]
    fn test_name_string_without_iscsi_marker_loses_to_naa() {
        let page = create_test_page(&[
            desc(0, CODE_SET_UTF8, false, 0, DESIG_SCSI_NAME, b"naa.600a0b80\0\0\0\0"),
            desc(TPROTO_ISCSI, CODE_SET_UTF8, false, 1, DESIG_SCSI_NAME, b"tport\0\0\0"),
            naa16(),
        ]);
        assert_eq!(resolve_identity(&page, false).kind, IdentityKind::Naa);
    }

    #[test]
    fn test_name_string_fallback() {
        let page = create_test_page(&[desc(0, CODE_SET_UTF8, false, 0, DESIG_SCSI_NAME, b"eui.0011\0\0\0\0")]);
        let id = resolve_identity(&page, true);
        assert_eq!(id.kind, IdentityKind::ScsiName);
        assert_eq!(id.to_string(), "eui.0011");
    }

    #[test]
    fn test_naa_bad_length_gives_none() {
        let page = create_test_page(&[desc(0, CODE_SET_BINARY, false, 0, DESIG_NAA, &[0x50, 1, 2, 3])]);
        assert!(resolve_identity(&page, true).is_none());
    }

    #[test]
    fn test_eui64() {
        let page = create_test_page(&[desc(0, CODE_SET_BINARY, false, 0, DESIG_EUI64, &[0, 1, 2, 3, 4, 5, 6, 7])]);
        assert_eq!(resolve_identity(&page, true).to_string(), "eui.0001020304050607");
    }

    #[test]
    fn test_uuid_rendering() {
        let mut body = vec![0x10, 0x00];
        body.extend((0u8..16).collect::<Vec<u8>>());
        let page = create_test_page(&[desc(0, CODE_SET_BINARY, false, 0, DESIG_UUID, &body)]);
        assert_eq!(
            resolve_identity(&page, true).to_string(),
            "uuid.00010203-0405-0607-0809-0a0b0c0d0e0f"
        );

        body[0] = 0x20;
        let page = create_test_page(&[desc(0, CODE_SET_BINARY, false, 0, DESIG_UUID, &body)]);
        let id = resolve_identity(&page, true);
        assert_eq!(id.kind, IdentityKind::Uuid);
        assert_eq!(id.to_string(), "??");
    }

    #[test]
    fn test_t10_vendor_id() {
        let page = create_test_page(&[desc(0, CODE_SET_ASCII, false, 0, DESIG_T10_VENDOR, b"ATA     WDC WD10")]);
        assert_eq!(resolve_identity(&page, true).to_string(), "t10.ATA     WDC WD10");

        let short = create_test_page(&[desc(0, CODE_SET_ASCII, false, 0, DESIG_T10_VENDOR, b"ATA")]);
        assert!(resolve_identity(&short, true).is_none());

        let binary = create_test_page(&[desc(0, CODE_SET_BINARY, false, 0, DESIG_T10_VENDOR, b"ATA     WDC WD10")]);
        assert!(resolve_identity(&binary, true).is_none());
    }

    #[test]
    fn test_render_bounded() {
        let page = create_test_page(&[naa16()]);
        let id = resolve_identity(&page, true);
        assert_eq!(id.render_bounded(6), "naa.60");
        assert_eq!(id.render_bounded(1000), id.to_string());
    }

    #[test]
    fn test_identity_from_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("vpd_pg83"), create_test_page(&[naa16()])).unwrap();
        let id = identity_from_dir(tmp.path(), false).unwrap();
        assert_eq!(id.kind, IdentityKind::Naa);
        assert!(identity_from_dir(&tmp.path().join("missing"), false).is_none());
    }

    #[test]
    fn test_read_device_id_page_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = read_device_id_page(tmp.path()).unwrap_err();
        assert!(matches!(missing, LsstorError::FileRead { .. }));

        let mut page = create_test_page(&[naa16()]);
        page[1] = 0x80;
        std::fs::write(tmp.path().join("vpd_pg83"), &page).unwrap();
        let wrong = read_device_id_page(tmp.path()).unwrap_err();
        assert!(matches!(wrong, LsstorError::Vpd(VpdError::WrongPage(0x80))));
        assert!(identity_from_dir(tmp.path(), true).is_none());
    }

    #[test]
    fn test_identity_from_wwid() {
        let id = identity_from_wwid("eui.0025388b91b24c31\n");
        assert_eq!(id.kind, IdentityKind::Eui64);
        assert_eq!(id.value, "0025388b91b24c31");
        assert_eq!(id.to_string(), "eui.0025388b91b24c31");

        let id = identity_from_wwid("nvme.8086-50484b53-494e54454c-00000001");
        assert_eq!(id.kind, IdentityKind::T10Vendor);
        assert_eq!(id.prefix, Some("nvme."));

        assert!(identity_from_wwid("  ").is_none());
        assert_eq!(identity_from_wwid("opaque").to_string(), "opaque");
    }
}
