//! Install source extraction, run as part of the `extract` stage (§6
//! `sources:`). Archive sources (`tgz`/`tbz`/`txz`) are unpacked onto the
//! target filesystem tree with the external `tar` binary; `dd-*` sources
//! are streamed directly onto the target block device. `fsimage`/
//! `fsimage-layered` sources are mounted read-only and copied across,
//! mirroring how the archive sources are handled rather than reimplementing
//! squashfs.

use std::path::Path;

use anyhow::{bail, Context, Error};
use curtin_api::config::{HostConfiguration, Source, SourceType};
use log::info;
use osutils::{dependencies::Dependency, exe::RunAndCheck};

/// Extracts every declared source onto `target`, in a stable (sorted by id)
/// order so a multi-source install is reproducible.
pub fn run(config: &HostConfiguration, target: &Path) -> Result<(), Error> {
    let mut ids: Vec<&String> = config.sources.keys().collect();
    ids.sort();

    for id in ids {
        let source = &config.sources[id];
        extract_one(id, source, target)
            .with_context(|| format!("failed to extract install source '{id}'"))?;
    }

    Ok(())
}

fn extract_one(id: &str, source: &Source, target: &Path) -> Result<(), Error> {
    let (source_type, uri) = source
        .resolve()
        .map_err(|reason| anyhow::anyhow!("install source '{id}': {reason}"))?;

    let path = strip_file_scheme(&uri);

    info!("Extracting install source '{id}' ({source_type:?}) from '{path}'");

    match source_type {
        SourceType::Tgz => tar_extract(path, target, "-xzf"),
        SourceType::Tbz => tar_extract(path, target, "-xjf"),
        SourceType::Txz => tar_extract(path, target, "-xJf"),
        SourceType::DdTgz | SourceType::DdTbz | SourceType::DdTxz | SourceType::DdTar
        | SourceType::DdRaw | SourceType::DdBz2 | SourceType::DdGz | SourceType::DdXz => {
            dd_extract(path, target)
        }
        SourceType::FsImage | SourceType::FsImageLayered => fsimage_extract(path, target),
    }
}

fn strip_file_scheme(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

fn tar_extract(source: &str, target: &Path, flag: &str) -> Result<(), Error> {
    std::fs::create_dir_all(target)
        .with_context(|| format!("failed to create target '{}'", target.display()))?;

    let mut cmd = Dependency::Tar.cmd();
    cmd.arg(flag).arg(source).arg("-C").arg(target);
    cmd.run_and_check()
        .with_context(|| format!("tar failed to extract '{source}' onto '{}'", target.display()))
}

/// `dd-*` sources are written directly to the target device, bypassing the
/// mounted filesystem tree entirely: `target` must itself be a block device
/// path when any `dd-*` source is configured (§6).
fn dd_extract(source: &str, target: &Path) -> Result<(), Error> {
    if !target.exists() {
        bail!(
            "dd install source requires 'install.target' to name an existing block device, got '{}'",
            target.display()
        );
    }

    let mut cmd = Dependency::Dd.cmd();
    cmd.arg(format!("if={source}"))
        .arg(format!("of={}", target.display()))
        .arg("bs=4M")
        .arg("conv=fsync");
    cmd.run_and_check()
        .with_context(|| format!("dd failed to write '{source}' onto '{}'", target.display()))
}

fn fsimage_extract(source: &str, target: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(target)
        .with_context(|| format!("failed to create target '{}'", target.display()))?;

    let mountpoint = tempfile::Builder::new()
        .prefix("curtin-fsimage-")
        .tempdir()
        .context("failed to create fsimage mount point")?;

    osutils::mount::mount(
        Path::new(source),
        mountpoint.path(),
        osutils::filesystems::MountFileSystemType::Squashfs,
        &["ro".to_string()],
    )
    .with_context(|| format!("failed to mount fsimage '{source}'"))?;

    let result = (|| -> Result<(), Error> {
        let mut cmd = std::process::Command::new("cp");
        cmd.arg("-a")
            .arg(format!("{}/.", mountpoint.path().display()))
            .arg(target);
        cmd.run_and_check()
            .with_context(|| format!("failed to copy fsimage contents onto '{}'", target.display()))
    })();

    if let Err(e) = osutils::mount::umount(mountpoint.path(), true) {
        log::warn!("failed to unmount fsimage mountpoint: {e}");
    }

    result
}
