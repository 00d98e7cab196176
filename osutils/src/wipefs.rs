//! Device wiping (§4.8): clearing filesystem/RAID/LVM signatures before
//! building a new one, or overwriting a disk's contents outright.
//!
//! Every mode here first opens the device `O_EXCL` to fail fast with a
//! [`ResourceBusyError`]-shaped error if the kernel or another process still
//! holds it open, rather than silently racing a mount or an in-flight mdadm
//! assembly.
//!
//! `superblock`/`superblock-recursive` zero the first and last MiB of the
//! target rather than shelling out to `wipefs`: the offsets are the ones
//! curtin's original implementation uses, and zeroing a fixed extent is also
//! what makes `wipe_extent` usable on a not-yet-partitioned disk, where there
//! is no partition device node for a signature-scanning tool to target.

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    os::unix::fs::OpenOptionsExt,
    path::Path,
    process::Command,
};

use anyhow::{Context, Error};
use nix::libc::O_EXCL;
use rand::RngCore;

use crate::exe::RunAndCheck;

/// How a `disk`/`partition` action's `wipe` field clears existing content
/// before the device is reused (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMode {
    /// Overwrite the first and last 1 MiB with zeros, clearing the
    /// filesystem/RAID/LVM/partition-table signatures known to live there.
    Superblock,
    /// Same as `Superblock`, but also wipes the start and end of any nested
    /// partitions first, so a previously partitioned disk can become a
    /// single filesystem.
    SuperblockRecursive,
    /// Overwrite the whole device with zero bytes.
    Zero,
    /// Overwrite the whole device with data from the system RNG.
    Random,
}

const CHUNK_SIZE: usize = 1024 * 1024;
const SUPERBLOCK_EXTENT: u64 = 1024 * 1024;

/// Wipes the whole device per `mode`.
pub fn wipe(device: impl AsRef<Path>, mode: WipeMode) -> Result<(), Error> {
    match mode {
        WipeMode::Superblock => wipe_superblock(device),
        WipeMode::SuperblockRecursive => wipe_superblock_recursive(device),
        WipeMode::Zero => wipe_zero(device),
        WipeMode::Random => wipe_random(device),
    }
}

/// Zeros the first and last 1 MiB of the whole device.
pub fn wipe_superblock(device: impl AsRef<Path>) -> Result<(), Error> {
    let mut file = exclusive_open(device.as_ref())?;
    let size = device_size(&file, device.as_ref())?;
    zero_head_and_tail(&mut file, 0, size, device.as_ref())
}

/// Zeros the first and last 1 MiB of the device and, first, of every
/// partition nested inside it.
pub fn wipe_superblock_recursive(device: impl AsRef<Path>) -> Result<(), Error> {
    if let Ok(Some(parent)) = crate::lsblk::try_get(device.as_ref()) {
        for child in &parent.children {
            let child_path = Path::new("/dev").join(&child.name);
            if child_path.exists() {
                wipe_superblock(&child_path).with_context(|| {
                    format!("failed to wipe nested partition '{}'", child_path.display())
                })?;
            }
        }
    }
    wipe_superblock(device)
}

/// Overwrites the device with zero bytes (`Zero` mode).
pub fn wipe_zero(device: impl AsRef<Path>) -> Result<(), Error> {
    let mut file = exclusive_open(device.as_ref())?;
    let size = device_size(&file, device.as_ref())?;
    overwrite_range(&mut file, 0, size, |buf| buf.iter_mut().for_each(|b| *b = 0))
}

/// Overwrites the device with random data (`Random` mode).
pub fn wipe_random(device: impl AsRef<Path>) -> Result<(), Error> {
    let mut file = exclusive_open(device.as_ref())?;
    let size = device_size(&file, device.as_ref())?;
    overwrite_range(&mut file, 0, size, |buf| rand::thread_rng().fill_bytes(buf))
}

/// Wipes a `[offset, offset+size)` extent on `device` per `mode`, without
/// requiring a device node to exist for the extent itself. Used by the
/// storage executor to clear a partition's future location on the parent
/// disk before `parted`/`sfdisk` creates the partition (§4.10), preventing a
/// stale superblock from being auto-assembled the moment the kernel notices
/// the new partition.
pub fn wipe_extent(
    device: impl AsRef<Path>,
    offset: u64,
    size: u64,
    mode: WipeMode,
) -> Result<(), Error> {
    let mut file = exclusive_open(device.as_ref())?;
    match mode {
        WipeMode::Superblock | WipeMode::SuperblockRecursive => {
            zero_head_and_tail(&mut file, offset, size, device.as_ref())
        }
        WipeMode::Zero => {
            overwrite_range(&mut file, offset, size, |buf| buf.iter_mut().for_each(|b| *b = 0))
        }
        WipeMode::Random => {
            overwrite_range(&mut file, offset, size, |buf| rand::thread_rng().fill_bytes(buf))
        }
    }
}

fn device_size(file: &File, device: &Path) -> Result<u64, Error> {
    Ok(file
        .metadata()
        .with_context(|| format!("failed to stat '{}'", device.display()))?
        .len())
}

fn zero_head_and_tail(file: &mut File, offset: u64, size: u64, device: &Path) -> Result<(), Error> {
    let head_len = size.min(SUPERBLOCK_EXTENT);
    zero_range(file, offset, head_len, device)?;

    if size > SUPERBLOCK_EXTENT {
        let tail_start = offset + size - SUPERBLOCK_EXTENT;
        zero_range(file, tail_start, SUPERBLOCK_EXTENT, device)?;
    }

    file.flush().context("failed to flush wipe")
}

fn zero_range(file: &mut File, start: u64, len: u64, device: &Path) -> Result<(), Error> {
    overwrite_at(file, start, len, |buf| buf.iter_mut().for_each(|b| *b = 0))
        .with_context(|| format!("failed zeroing '{}' at offset {start}", device.display()))
}

fn overwrite_range(
    file: &mut File,
    start: u64,
    len: u64,
    fill: impl FnMut(&mut [u8]),
) -> Result<(), Error> {
    overwrite_at(file, start, len, fill)?;
    file.flush().context("failed to flush wipe")
}

fn overwrite_at(
    file: &mut File,
    start: u64,
    len: u64,
    mut fill: impl FnMut(&mut [u8]),
) -> Result<(), Error> {
    file.seek(SeekFrom::Start(start))
        .with_context(|| format!("failed to seek to offset {start}"))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    while written < len {
        let remaining = (len - written).min(CHUNK_SIZE as u64) as usize;
        fill(&mut buf[..remaining]);
        file.write_all(&buf[..remaining])
            .with_context(|| format!("failed writing at offset {}", start + written))?;
        written += remaining as u64;
    }
    Ok(())
}

/// Opens the device exclusively, translating `EBUSY` into a message callers
/// can map onto a `ResourceBusyError` alongside a holder-tree dump.
fn exclusive_open(device: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .write(true)
        .custom_flags(O_EXCL)
        .open(device)
        .with_context(|| {
            format!(
                "device '{}' is busy or otherwise could not be opened exclusively",
                device.display()
            )
        })
}

/// Strips recognized signatures with `wipefs --all`, kept for callers that
/// want the tool-based pass in addition to the literal byte-range wipe
/// (e.g. clearing a filesystem `wipefs` still recognizes after a 1 MiB zero
/// due to a backup superblock further into the device).
pub fn wipefs_all(device: impl AsRef<Path>) -> Result<(), Error> {
    Command::new("wipefs")
        .arg("--all")
        .arg(device.as_ref())
        .run_and_check()
        .with_context(|| format!("failed to wipe signatures on '{}'", device.as_ref().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_wipe_zero_overwrites_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xffu8; 4096]).unwrap();
        tmp.flush().unwrap();

        wipe_zero(tmp.path()).unwrap();

        let mut file = std::fs::File::open(tmp.path()).unwrap();
        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_superblock_only_touches_head_and_tail() {
        let size = 4 * 1024 * 1024u64;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0xaau8; size as usize]).unwrap();
        tmp.flush().unwrap();

        wipe_superblock(tmp.path()).unwrap();

        let mut file = std::fs::File::open(tmp.path()).unwrap();
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).unwrap();

        assert!(buf[..SUPERBLOCK_EXTENT as usize].iter().all(|&b| b == 0));
        assert!(buf[(size - SUPERBLOCK_EXTENT) as usize..]
            .iter()
            .all(|&b| b == 0));
        assert!(buf[SUPERBLOCK_EXTENT as usize..(size - SUPERBLOCK_EXTENT) as usize]
            .iter()
            .all(|&b| b == 0xaa));
    }

    #[test]
    fn test_wipe_extent_offset_within_larger_file() {
        let size = 8 * 1024 * 1024u64;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0xbbu8; size as usize]).unwrap();
        tmp.flush().unwrap();

        let extent_offset = 2 * 1024 * 1024u64;
        let extent_size = 3 * 1024 * 1024u64;
        wipe_extent(tmp.path(), extent_offset, extent_size, WipeMode::Superblock).unwrap();

        let mut file = std::fs::File::open(tmp.path()).unwrap();
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).unwrap();

        // Untouched before the extent.
        assert!(buf[..extent_offset as usize].iter().all(|&b| b == 0xbb));
        // Head of the extent zeroed.
        let head_start = extent_offset as usize;
        assert!(buf[head_start..head_start + SUPERBLOCK_EXTENT as usize]
            .iter()
            .all(|&b| b == 0));
        // Tail of the extent zeroed.
        let tail_start = (extent_offset + extent_size - SUPERBLOCK_EXTENT) as usize;
        assert!(buf[tail_start..(extent_offset + extent_size) as usize]
            .iter()
            .all(|&b| b == 0));
        // Untouched after the extent.
        assert!(buf[(extent_offset + extent_size) as usize..]
            .iter()
            .all(|&b| b == 0xbb));
    }
}
