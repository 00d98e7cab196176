//! clear-holders (§4.7): given a block device, discovers its holder tree by
//! walking sysfs, plans a deepest-first shutdown, executes the matching
//! primitive for each node type, and waits for sysfs removal.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Error};
use curtin_api::{
    constants::{REMOVAL_POLL_COUNT, REMOVAL_POLL_INTERVAL_MS},
    error::TimeoutError,
};
use log::{debug, info};

use crate::{dependencies::Dependency, exe::RunAndCheck, mdadm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderType {
    Disk,
    Partition,
    Raid,
    Lvm,
    Crypt,
    Bcache,
    Extended,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HolderNode {
    pub syspath: PathBuf,
    pub kname: String,
    pub dev_type: HolderType,
    pub holders: Vec<HolderNode>,
}

/// Builds the holder tree for `device_path` by recursively walking
/// `/sys/class/block/<kname>/holders`.
pub fn build_holder_tree(device_path: impl AsRef<Path>) -> Result<HolderNode, Error> {
    let kname = kernel_name(device_path.as_ref())?;
    build_holder_tree_for_kname(&kname)
}

fn build_holder_tree_for_kname(kname: &str) -> Result<HolderNode, Error> {
    let syspath = PathBuf::from("/sys/class/block").join(kname);
    let dev_type = classify(&syspath, kname);

    let holders_dir = syspath.join("holders");
    let mut holders = Vec::new();

    if holders_dir.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(&holders_dir)
            .with_context(|| format!("Failed to read '{}'", holders_dir.display()))?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        for holder_kname in entries {
            holders.push(build_holder_tree_for_kname(&holder_kname)?);
        }
    }

    Ok(HolderNode {
        syspath,
        kname: kname.to_string(),
        dev_type,
        holders,
    })
}

fn kernel_name(device_path: &Path) -> Result<String, Error> {
    let resolved = device_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve '{}'", device_path.display()))?;
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Device path has no file name component")
}

/// Classifies a block device node by its sysfs shape: a `dm/uuid` prefix of
/// `LVM-`/`CRYPT-` distinguishes LVM and dm-crypt mapped devices; `md*`
/// names are raid; `bcache*` is bcache; a `partition` sysfs attribute marks
/// a partition (the parent disk has no such attribute).
fn classify(syspath: &Path, kname: &str) -> HolderType {
    let dm_uuid_path = syspath.join("dm/uuid");
    if let Ok(uuid) = fs::read_to_string(&dm_uuid_path) {
        if uuid.starts_with("LVM-") {
            return HolderType::Lvm;
        }
        if uuid.starts_with("CRYPT-") {
            return HolderType::Crypt;
        }
    }

    if kname.starts_with("md") {
        return HolderType::Raid;
    }
    if kname.starts_with("bcache") {
        return HolderType::Bcache;
    }
    if syspath.join("partition").is_file() {
        return HolderType::Partition;
    }
    if syspath.join("ext_range").is_file() {
        return HolderType::Extended;
    }
    if syspath.join("device").exists() || syspath.join("size").is_file() {
        return HolderType::Disk;
    }

    HolderType::Unknown
}

/// Flattens a holder tree into a deepest-first shutdown plan: children
/// before parents, stable order within a level.
pub fn plan(tree: &HolderNode) -> Vec<HolderNode> {
    let mut plan = Vec::new();
    plan_recursive(tree, &mut plan);
    plan
}

fn plan_recursive(node: &HolderNode, out: &mut Vec<HolderNode>) {
    for child in &node.holders {
        plan_recursive(child, out);
    }
    out.push(node.clone());
}

/// Runs `modprobe bcache` and `mdadm --assemble --scan`, tolerating
/// failures, so dependent devices are visible in sysfs before planning.
pub fn start_dependencies() {
    if let Err(e) = std::process::Command::new("modprobe")
        .arg("bcache")
        .run_and_check()
    {
        debug!("modprobe bcache failed (tolerated): {e}");
    }

    if let Err(e) = Dependency::Mdadm
        .cmd()
        .arg("--assemble")
        .arg("--scan")
        .run_and_check()
    {
        debug!("mdadm --assemble --scan failed (tolerated): {e}");
    }
}

/// Executes the shutdown primitive for a single holder node.
fn execute_node(node: &HolderNode) -> Result<(), Error> {
    match node.dev_type {
        HolderType::Bcache => shutdown_bcache(node),
        HolderType::Lvm => shutdown_lvm(node),
        HolderType::Crypt => shutdown_crypt(node),
        HolderType::Raid => shutdown_raid(node),
        HolderType::Partition | HolderType::Extended => shutdown_partition(node),
        HolderType::Disk | HolderType::Unknown => Ok(()),
    }
}

fn shutdown_bcache(node: &HolderNode) -> Result<(), Error> {
    let cache_link = node.syspath.join("bcache/cache");
    if let Ok(cset) = fs::canonicalize(&cache_link) {
        let stop_path = cset.join("stop");
        if stop_path.exists() {
            fs::write(&stop_path, b"1").context("Failed to stop bcache cache set")?;
            wait_for_removal(&cset, &format!("bcache cache set for {}", node.kname))?;
        }
    }

    let backing_stop = node.syspath.join("bcache/stop");
    if node.syspath.exists() && backing_stop.exists() {
        fs::write(&backing_stop, b"1").context("Failed to stop bcache backing device")?;
        wait_for_removal(&node.syspath, &node.kname)?;
    }

    Ok(())
}

fn shutdown_lvm(node: &HolderNode) -> Result<(), Error> {
    let (vg, lv) = lvm_vg_lv(&node.kname)?;

    let result = std::process::Command::new("lvremove")
        .arg("--force")
        .arg("--force")
        .arg(format!("{vg}/{lv}"))
        .status()
        .context("Failed to spawn lvremove")?;
    if !matches!(result.code(), Some(0) | Some(5)) {
        bail!("lvremove {vg}/{lv} exited with status {:?}", result.code());
    }

    let remaining = std::process::Command::new("lvs")
        .arg("--noheadings")
        .arg("-o")
        .arg("lv_name")
        .arg(&vg)
        .output_and_check()
        .unwrap_or_default();
    if remaining.trim().is_empty() {
        let result = std::process::Command::new("vgremove")
            .arg("--force")
            .arg("--force")
            .arg(&vg)
            .status()
            .context("Failed to spawn vgremove")?;
        if !matches!(result.code(), Some(0) | Some(5)) {
            bail!("vgremove {vg} exited with status {:?}", result.code());
        }
    }

    Ok(())
}

fn lvm_vg_lv(dm_name: &str) -> Result<(String, String), Error> {
    let mapping = std::process::Command::new("dmsetup")
        .arg("info")
        .arg("-c")
        .arg("--noheadings")
        .arg("-o")
        .arg("vg_name,lv_name")
        .arg(dm_name)
        .output_and_check()
        .context("Failed to resolve dm device to vg/lv")?;

    let mut fields = mapping.trim().split(':');
    let vg = fields.next().context("missing vg_name")?.to_string();
    let lv = fields.next().context("missing lv_name")?.to_string();
    Ok((vg, lv))
}

fn shutdown_crypt(node: &HolderNode) -> Result<(), Error> {
    Dependency::Cryptsetup
        .cmd()
        .arg("remove")
        .arg(format!("/dev/{}", node.kname))
        .run_and_check()
        .context(format!("Failed to remove crypt device '{}'", node.kname))
}

fn shutdown_raid(node: &HolderNode) -> Result<(), Error> {
    let devpath = PathBuf::from("/dev").join(&node.kname);
    match mdadm::stop(&node.kname) {
        Ok(()) => {}
        Err(e) => {
            let mdstat = fs::read_to_string("/proc/mdstat").unwrap_or_default();
            if mdstat.contains(&node.kname) {
                return Err(e).context(format!("Failed to stop raid array '{}'", node.kname));
            }
        }
    }
    wait_for_removal(&devpath, &node.kname)
}

fn shutdown_partition(node: &HolderNode) -> Result<(), Error> {
    let devpath = PathBuf::from("/dev").join(&node.kname);
    crate::wipefs::wipe(&devpath, crate::wipefs::WipeMode::Superblock)
        .context(format!("Failed to wipe partition '{}'", node.kname))
}

/// Polls for up to [`REMOVAL_POLL_COUNT`] * [`REMOVAL_POLL_INTERVAL_MS`]
/// for `path` to stop existing.
fn wait_for_removal(path: &Path, what: &str) -> Result<(), Error> {
    for _ in 0..REMOVAL_POLL_COUNT {
        if !path.exists() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(REMOVAL_POLL_INTERVAL_MS));
    }

    Err(TimeoutError {
        what: what.to_string(),
        attempts: REMOVAL_POLL_COUNT,
    }
    .into())
}

/// Clears every holder of `device_path`: assembles dependencies, plans a
/// deepest-first shutdown, executes each step, and verifies only a bare
/// disk remains.
pub fn clear_holders(device_path: impl AsRef<Path>) -> Result<(), Error> {
    start_dependencies();

    let tree = build_holder_tree(device_path.as_ref())?;
    let steps = plan(&tree);

    for node in &steps {
        if node.dev_type == HolderType::Disk {
            continue;
        }
        info!("Clearing holder '{}' ({:?})", node.kname, node.dev_type);
        execute_node(node).with_context(|| format!("Failed to clear holder '{}'", node.kname))?;
    }

    assert_clear(device_path.as_ref())
}

/// Re-derives the holder tree and fails unless every remaining node is a
/// bare disk.
pub fn assert_clear(device_path: impl AsRef<Path>) -> Result<(), Error> {
    let tree = build_holder_tree(device_path.as_ref())?;
    for node in plan(&tree) {
        if node.kname != tree.kname && node.dev_type != HolderType::Disk {
            bail!(
                "device '{}' still has an unexpected holder '{}' of type {:?}",
                tree.kname,
                node.kname,
                node.dev_type
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_deepest_first() {
        let leaf = HolderNode {
            syspath: PathBuf::from("/sys/class/block/dm-1"),
            kname: "dm-1".into(),
            dev_type: HolderType::Lvm,
            holders: vec![],
        };
        let root = HolderNode {
            syspath: PathBuf::from("/sys/class/block/sda1"),
            kname: "sda1".into(),
            dev_type: HolderType::Partition,
            holders: vec![leaf],
        };

        let steps = plan(&root);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kname, "dm-1");
        assert_eq!(steps[1].kname, "sda1");
    }
}
