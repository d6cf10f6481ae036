/*
 * Integration tests for lsstor
 *
 * These tests build a fake sysfs tree and drive the enumerator and the
 * renderers together, the way the binary does.
 */

use std::env;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use lsstor::address::{AddrFilter, Address};
use lsstor::config::{Overrides, Settings, LUNHEX_ENV};
use lsstor::devnode::{DeviceNodeEntry, DeviceNodeIndex, NodeKind};
use lsstor::error::ParseError;
use lsstor::output::{self, OutputOptions, NVME_DEVICES_KEY, SCSI_DEVICES_KEY};
use lsstor::topology::{RecordKind, Topology, TopologyRecord};
use lsstor::transport::TransportKind;
use lsstor::vpd::IdentityKind;
use serial_test::serial;
use tempfile::TempDir;

// Test utilities
fn create_test_attr(dir: &Path, name: &str, value: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, value).unwrap();
}

fn create_test_disk(root: &Path, hctl: &str, block: &str, dev: &str) -> PathBuf {
    let dir = root.join("bus/scsi/devices").join(hctl);
    create_test_attr(&dir, "vendor", "LIO-ORG \n");
    create_test_attr(&dir, "model", "disk1           \n");
    create_test_attr(&dir, "rev", "4.0 \n");
    create_test_attr(&dir, "type", "0\n");
    let bdir = dir.join("block").join(block);
    create_test_attr(&bdir, "dev", dev);
    create_test_attr(&bdir, "size", "2097152\n");
    create_test_attr(&bdir, "queue/logical_block_size", "512\n");
    let sd = root.join("class/scsi_device").join(hctl);
    fs::create_dir_all(&sd).unwrap();
    symlink(&dir, sd.join("device")).unwrap();
    dir
}

fn create_test_nvme(root: &Path) {
    let ctl = root.join("class/nvme/nvme0");
    create_test_attr(&ctl, "cntlid", "1\n");
    create_test_attr(&ctl, "model", "WDC PC SN730 SDBQNTY-512G-1001\n");
    create_test_attr(&ctl, "serial", "20176R802345\n");
    create_test_attr(&ctl, "firmware_rev", "11170101\n");
    create_test_attr(&ctl, "transport", "pcie\n");
    create_test_attr(&ctl, "uevent", "MAJOR=243\nMINOR=0\nDEVNAME=nvme0\n");
    create_test_attr(&ctl.join("device"), "subsystem_vendor", "0x15b7\n");
    create_test_attr(&ctl.join("device"), "subsystem_device", "0x5006\n");
    let ns = ctl.join("nvme0n1");
    create_test_attr(&ns, "dev", "259:0\n");
    create_test_attr(&ns, "size", "1000215216\n");
    create_test_attr(&ns, "wwid", "eui.e8238fa6bf530001001b448b4a1b2c3d\n");
    symlink(&ctl, ns.join("device")).unwrap();
}

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
    let mut page = vec![0x00, 0x83];
    page.extend_from_slice(&(body.len() as u16).to_be_bytes());
    page.extend(body);
    page
}

fn naa16_desc() -> Vec<u8> {
    desc(0, 1, false, 0, 3, &[
        0x60, 0x01, 0x40, 0x5a, 0x8f, 0x6e, 0x4b, 0x2c,
        0x9d, 0x31, 0x77, 0x0a, 0xbc, 0xde, 0xf0, 0x12,
    ])
}

fn create_test_topology(settings: &Settings) -> Topology {
    let entry = |path: &str, major, minor, kind| DeviceNodeEntry {
        major,
        minor,
        kind,
        path: PathBuf::from(path),
        modified: UNIX_EPOCH,
    };
    Topology::new(settings).with_nodes(DeviceNodeIndex::from_entries(vec![
        entry("/dev/sda", 8, 0, NodeKind::Block),
        entry("/dev/sdb", 8, 16, NodeKind::Block),
        entry("/dev/sdc", 8, 32, NodeKind::Block),
        entry("/dev/nvme0n1", 259, 0, NodeKind::Block),
        entry("/dev/nvme0", 243, 0, NodeKind::Char),
    ]))
}

fn create_test_settings(tmp: &TempDir) -> Settings {
    Settings::with_roots(tmp.path(), tmp.path().join("dev"))
}

fn render_all(sections: &[(&str, Vec<TopologyRecord>)], opts: &OutputOptions) -> String {
    let mut buf = Vec::new();
    for (_, recs) in sections {
        output::write_text(&mut buf, recs, opts).unwrap();
    }
    String::from_utf8(buf).unwrap()
}

#[test]
fn test_host_filter_selects_one_host() {
    let tmp = TempDir::new().unwrap();
    create_test_disk(tmp.path(), "1:0:0:0", "sda", "8:0\n");
    create_test_disk(tmp.path(), "2:0:1:0", "sdc", "8:32\n");
    create_test_disk(tmp.path(), "2:0:0:0", "sdb", "8:16\n");
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    let filter = AddrFilter::parse(&["2"]).unwrap();
    let recs = topo.list_scsi(&filter);
    let names: Vec<&str> = recs.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["2:0:0:0", "2:0:1:0"]);

    let filter = AddrFilter::parse(&["2:0:1:0"]).unwrap();
    let recs = topo.list_scsi(&filter);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].device_node.as_deref(), Some(Path::new("/dev/sdc")));

    let filter = AddrFilter::parse(&["2", "-", "1"]).unwrap();
    assert_eq!(topo.list_scsi(&filter).len(), 1);
}

#[test]
fn test_nvme_listed_after_scsi() {
    let tmp = TempDir::new().unwrap();
    create_test_disk(tmp.path(), "2:0:0:0", "sda", "8:0\n");
    create_test_nvme(tmp.path());
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    let sections = output::collect_sections(&topo, &AddrFilter::any(), false, false);
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].0, SCSI_DEVICES_KEY);
    assert_eq!(sections[1].0, NVME_DEVICES_KEY);
    assert_eq!(sections[1].1[0].kind, RecordKind::NvmeNamespace);
    assert!(sections[0].1[0].address < sections[1].1[0].address);

    let text = render_all(&sections, &OutputOptions::default());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[2:0:0:0]    disk    LIO-ORG  disk1            4.0   /dev/sda"));
    assert!(lines[1].starts_with("[N:0:1:1]    disk    WDC PC SN730 SDBQNTY-512G-1001__1"));
    assert!(lines[1].ends_with("/dev/nvme0n1"));

    let no_nvme = output::collect_sections(&topo, &AddrFilter::any(), false, true);
    assert_eq!(no_nvme.len(), 1);
}

#[test]
fn test_hosts_listing_includes_controllers() {
    let tmp = TempDir::new().unwrap();
    let host = tmp.path().join("class/scsi_host/host2");
    create_test_attr(&host, "proc_name", "ahci\n");
    create_test_nvme(tmp.path());
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    let sections = output::collect_sections(&topo, &AddrFilter::any(), true, false);
    let text = render_all(&sections, &OutputOptions::default());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[2]    ahci"));
    assert!(lines[1].starts_with("[N:0]  /dev/nvme0  WDC PC SN730 SDBQNTY-512G-1001"));
    assert!(lines[1].contains("20176R802345"));

    let opts = OutputOptions { transport: true, ..OutputOptions::default() };
    let text = render_all(&sections, &opts);
    assert!(text.contains("pcie 0x15b7:0x5006"));
    assert!(text.lines().next().unwrap().contains("sata:"));
}

#[test]
fn test_missing_root_gives_empty_lists() {
    let tmp = TempDir::new().unwrap();
    let settings = Settings::with_roots(tmp.path().join("nonexistent"), tmp.path().join("dev"));
    let topo = Topology::new(&settings);

    for hosts in [false, true] {
        let sections = output::collect_sections(&topo, &AddrFilter::any(), hosts, false);
        assert!(sections.iter().all(|(_, recs)| recs.is_empty()));
    }

    let sections = output::collect_sections(&topo, &AddrFilter::any(), false, false);
    let borrowed: Vec<(&str, &[TopologyRecord])> =
        sections.iter().map(|(k, v)| (*k, v.as_slice())).collect();
    let mut buf = Vec::new();
    output::write_json(&mut buf, &borrowed).unwrap();
    let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
    assert_eq!(v[SCSI_DEVICES_KEY], serde_json::json!([]));
    assert_eq!(v[NVME_DEVICES_KEY], serde_json::json!([]));
}

#[test]
fn test_iscsi_device_identity_and_transport() {
    let tmp = TempDir::new().unwrap();
    let dir = create_test_disk(tmp.path(), "5:0:0:1", "sda", "8:0\n");
    let page = create_test_page(&[
        naa16_desc(),
        desc(0, 3, false, 0, 8, b"iqn.2003-01.org.linux-iscsi.tgt:sn.1\0\0\0\0"),
        desc(5, 3, true, 1, 8, b"iqn.2003-01.org.linux-iscsi.tgt:sn.1,t,0x1a\0"),
    ]);
    fs::write(dir.join("vpd_pg83"), &page).unwrap();

    let sess_dev = tmp.path().join("class/iscsi_host/host5/device/session3/target5:0:0");
    fs::create_dir_all(sess_dev).unwrap();
    let sess = tmp.path().join("class/iscsi_session/session3");
    create_test_attr(&sess, "targetname", "iqn.2003-01.org.linux-iscsi.tgt:sn.1\n");
    create_test_attr(&sess, "tpgt", "26\n");

    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);
    let recs = topo.list_scsi(&AddrFilter::any());
    assert_eq!(recs.len(), 1);
    let rec = &recs[0];

    let id = rec.identity.as_ref().unwrap();
    assert_eq!(id.kind, IdentityKind::ScsiName);
    assert_eq!(id.to_string(), "iqn.2003-01.org.linux-iscsi.tgt:sn.1");

    let t = rec.transport.as_ref().unwrap();
    assert_eq!(t.kind, TransportKind::Iscsi);
    assert_eq!(t.summary, "iqn.2003-01.org.linux-iscsi.tgt:sn.1,t,0x1a");

    let opts = OutputOptions { unit: 3, ..OutputOptions::default() };
    let line = output::render(rec, &opts);
    assert!(line.starts_with("[5:0:0:1]    disk    iqn.2003-01.org.linux-iscsi.tgt:sn.1  /dev/sda"));
}

#[test]
fn test_naa_identity_rendered_with_prefix() {
    let tmp = TempDir::new().unwrap();
    let dir = create_test_disk(tmp.path(), "3:0:0:0", "sda", "8:0\n");
    fs::write(dir.join("vpd_pg83"), create_test_page(&[naa16_desc()])).unwrap();
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    let rec = &topo.list_scsi(&AddrFilter::any())[0];
    let id = rec.identity.as_ref().unwrap();
    assert_eq!(id.kind, IdentityKind::Naa);
    assert_eq!(id.to_string(), "naa.6001405a8f6e4b2c9d31770abcdef012");

    let short = output::render(rec, &OutputOptions { unit: 1, brief: true, ..OutputOptions::default() });
    assert!(short.contains("6001405a8f6e4b2c9d31770abcdef012"));
    assert!(!short.contains("naa."));
    let long = output::render(rec, &OutputOptions { unit: 4, brief: true, ..OutputOptions::default() });
    assert!(long.contains("naa.6001405a8f6e4b2c9d31770abcdef012"));
}

#[test]
#[serial]
fn test_lunhex_from_environment() {
    let tmp = TempDir::new().unwrap();
    create_test_disk(tmp.path(), "2:0:0:0", "sda", "8:0\n");
    env::set_var(LUNHEX_ENV, "2");
    let overrides = Overrides {
        sysfs_root: Some(tmp.path().to_path_buf()),
        dev_root: Some(tmp.path().join("dev")),
        lunhex: 0,
    };
    let settings = Settings::resolve(None, &overrides);
    env::remove_var(LUNHEX_ENV);
    assert_eq!(settings.lunhex, 2);

    let topo = create_test_topology(&settings);
    let recs = topo.list_scsi(&AddrFilter::any());
    let opts = OutputOptions { brief: true, lunhex: settings.lunhex, ..OutputOptions::default() };
    let line = output::render(&recs[0], &opts);
    assert!(line.starts_with(&format!("{:<28}/dev/sda", "[2:0:0:0x0000000000000000]")));
}

#[test]
fn test_bad_filter_is_rejected() {
    assert!(matches!(AddrFilter::parse(&["2:x"]), Err(ParseError::NotAnInteger { .. })));
    assert!(matches!(
        AddrFilter::parse(&["1", "2", "3", "4", "5"]),
        Err(ParseError::TooManyArguments(5))
    ));
    let parsed: Address = "N:0:1:1".parse().unwrap();
    assert!(parsed.is_nvme());
}

#[test]
fn test_protection_columns_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let dir = create_test_disk(tmp.path(), "2:0:0:0", "sda", "8:0\n");
    create_test_attr(&dir.join("scsi_disk/2:0:0:0"), "protection_type", "2\n");
    create_test_attr(&dir.join("scsi_disk/2:0:0:0"), "protection_mode", "dix2\n");
    create_test_disk(tmp.path(), "2:0:1:0", "sdb", "8:16\n");
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    let sections = output::collect_sections(&topo, &AddrFilter::any(), false, true);
    let opts = OutputOptions { brief: true, protection: true, protmode: true, ..OutputOptions::default() };
    let text = render_all(&sections, &opts);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], format!("[2:0:0:0]    /dev/sda   DIF/Type2  {:<16}  dix2", "-"));
    assert_eq!(lines[1], format!("[2:0:1:0]    /dev/sdb   {:<9}  {:<16}  -   ", "-", "-"));
}

#[test]
fn test_printed_nvme_tuple_selects_namespace() {
    let tmp = TempDir::new().unwrap();
    create_test_nvme(tmp.path());
    let settings = create_test_settings(&tmp);
    let topo = create_test_topology(&settings);

    for lunhex in 0..=2 {
        let opts = OutputOptions { brief: true, lunhex, ..OutputOptions::default() };
        let sections = output::collect_sections(&topo, &AddrFilter::any(), false, false);
        let text = render_all(&sections, &opts);
        let tuple = text.trim_start_matches('[').split(']').next().unwrap().to_string();
        let filter = AddrFilter::parse(&[tuple.as_str()]).unwrap();
        let recs = topo.list_nvme(&filter);
        assert_eq!(recs.len(), 1, "filter from {}", tuple);
        assert_eq!(recs[0].name, "nvme0n1");
    }
}
