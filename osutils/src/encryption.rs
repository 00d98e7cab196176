use std::{
    io::Write,
    path::Path,
    process::Stdio,
};

use anyhow::{Context, Error};
use uuid::Uuid;

use crate::{
    dependencies::Dependency,
    exe::{OutputChecker, RunAndCheck},
    lsblk::BlockDevice,
};

/// Cipher specification string for the LUKS2 data segment.
pub const CIPHER: &str = "aes-xts-plain64";

/// Key size in bits, limited by the cipher specification.
pub const KEY_SIZE: &str = "512";

/// A `dm_crypt` action carries either an inline `key` or a `keyfile` path
/// (§3); this is the resolved form passed to cryptsetup.
pub enum CryptKey<'a> {
    Inline(&'a str),
    File(&'a Path),
}

impl<'a> CryptKey<'a> {
    /// Runs `cryptsetup` with `--key-file -`, piping the inline key on
    /// stdin when one was given, or `--key-file <path>` otherwise.
    fn apply(&self, cmd: &mut std::process::Command) -> Option<&'a str> {
        match self {
            CryptKey::Inline(key) => {
                cmd.arg("--key-file").arg("-");
                Some(key)
            }
            CryptKey::File(path) => {
                cmd.arg("--key-file").arg(path.as_os_str());
                None
            }
        }
    }
}

fn run_with_key(mut cmd: std::process::Command, key: &CryptKey) -> Result<(), Error> {
    let stdin_key = key.apply(&mut cmd);

    if let Some(key) = stdin_key {
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().context("Failed to spawn cryptsetup")?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(key.as_bytes())
            .context("Failed to write inline key to cryptsetup stdin")?;
        child
            .wait_with_output()
            .context("Failed to wait for cryptsetup")?
            .check()
    } else {
        cmd.run_and_check()
    }
}

/// Runs `cryptsetup luksFormat` to initialize LUKS2 encryption on a device.
pub fn luks_format(device_path: impl AsRef<Path>, key: &CryptKey) -> Result<(), Error> {
    let mut cmd = Dependency::Cryptsetup.cmd();
    cmd.arg("luksFormat")
        .arg("--batch-mode")
        .arg("--type")
        .arg("luks2")
        .arg("--cipher")
        .arg(CIPHER)
        .arg("--key-size")
        .arg(KEY_SIZE);

    cmd.arg(device_path.as_ref().as_os_str());

    run_with_key(cmd, key).context(format!(
        "Failed to luksFormat underlying device '{}'",
        device_path.as_ref().display()
    ))
}

/// Runs `cryptsetup luksOpen` / `open` to open the given LUKS2 device with
/// the provided key, mapping it to `/dev/mapper/<device_name>`.
pub fn luks_open(
    device_path: impl AsRef<Path>,
    device_name: &str,
    key: &CryptKey,
) -> Result<(), Error> {
    let mut cmd = Dependency::Cryptsetup.cmd();
    cmd.arg("luksOpen");

    cmd.arg(device_path.as_ref().as_os_str()).arg(device_name);

    run_with_key(cmd, key).context(format!(
        "Failed to open underlying encrypted device '{}' as '{}'",
        device_path.as_ref().display(),
        device_name
    ))
}

/// Reads the LUKS header UUID of `device_path`, the identifier persisted
/// into the crypttab entry for this volume (§4.10, §8 scenario S4).
pub fn luks_uuid(device_path: impl AsRef<Path>) -> Result<Uuid, Error> {
    let output = Dependency::Cryptsetup
        .cmd()
        .arg("luksUUID")
        .arg(device_path.as_ref().as_os_str())
        .output_and_check()
        .with_context(|| format!("Failed to read luksUUID for '{}'", device_path.as_ref().display()))?;

    Uuid::parse_str(output.trim())
        .with_context(|| format!("cryptsetup returned an invalid UUID: '{}'", output.trim()))
}

/// Runs `cryptsetup luksClose` to close the given LUKS2 device.
pub fn luks_close(crypt_block_device: &BlockDevice) -> Result<(), Error> {
    Dependency::Cryptsetup
        .cmd()
        .arg("luksClose")
        .arg(crypt_block_device.name.as_str())
        .run_and_check()
        .context(format!(
            "Failed to close pre-existing encrypted volume '{}'",
            crypt_block_device.name
        ))
}
