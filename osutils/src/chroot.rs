//! Scoped acquisition of a target root (§4.2): bind-mounts `/dev`, `/proc`,
//! `/run`, `/sys` into the target, swaps in the host's `resolv.conf`,
//! installs a `policy-rc.d` that inhibits daemon starts, and guarantees
//! teardown in a fixed order on every exit path: `policy-rc.d` removal,
//! then unmounts (LIFO, udev-settled before `/dev`), then `resolv.conf`
//! restoration last.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use curtin_api::constants::DEFAULT_CHROOT_MOUNTS;
use log::{info, warn};

use crate::{files, mount, udevadm};

const POLICY_RC_D: &str = r#"#!/bin/sh
# Installed by curtin's ChrootableTarget to inhibit package postinst scripts
# from starting daemons inside the target during an install.
exit 101
"#;

/// Saved state needed to restore the target's own `resolv.conf`.
struct SavedResolvConf {
    target: PathBuf,
    saved: PathBuf,
}

/// A scoped, bind-mounted view of `target` suitable for `chroot`ing into.
/// Build with [`ChrootableTarget::new`], call [`ChrootableTarget::enter`],
/// and always call [`ChrootableTarget::exit`] — on every path, including
/// error — to reverse every acquisition.
///
/// Teardown runs in a fixed order rather than strict LIFO: `policy-rc.d`
/// is removed first (so a daemon started mid-teardown can't race the
/// unmounts), then each bind mount is unmounted (LIFO among themselves,
/// settling udev before `/dev`), and `resolv.conf` is restored last, since
/// later stages may still need host DNS while mounts are being torn down.
pub struct ChrootableTarget {
    target: PathBuf,
    allow_daemons: bool,
    sys_resolvconf: bool,
    mounts: Vec<PathBuf>,
    mounted: Vec<PathBuf>,
    policy_rc_d: Option<PathBuf>,
    resolv_conf: Option<SavedResolvConf>,
}

impl ChrootableTarget {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            allow_daemons: false,
            sys_resolvconf: true,
            mounts: DEFAULT_CHROOT_MOUNTS.iter().map(|s| PathBuf::from(*s)).collect(),
            mounted: Vec::new(),
            policy_rc_d: None,
            resolv_conf: None,
        }
    }

    pub fn allow_daemons(mut self, allow: bool) -> Self {
        self.allow_daemons = allow;
        self
    }

    pub fn sys_resolvconf(mut self, enabled: bool) -> Self {
        self.sys_resolvconf = enabled;
        self
    }

    pub fn mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Bind-mounts every configured path, installs `policy-rc.d` unless
    /// daemons are explicitly allowed, and swaps in the host's resolv.conf.
    pub fn enter(&mut self) -> Result<(), Error> {
        for relative in self.mounts.clone() {
            let source = Path::new("/").join(&relative);
            let dest = self.target.join(
                relative
                    .strip_prefix("/")
                    .unwrap_or(relative.as_path()),
            );

            if crate::mountpoint::check_is_mountpoint(&dest).unwrap_or(false) {
                continue;
            }

            files::create_dirs(&dest)?;
            mount::private_rbind_mount(&source, &dest).with_context(|| {
                format!(
                    "Failed to bind-mount '{}' into target",
                    source.display()
                )
            })?;
            self.mounted.push(dest);
        }

        if !self.allow_daemons {
            let policy_path = self.target.join("usr/sbin/policy-rc.d");
            if !policy_path.exists() {
                files::create_file_mode(&policy_path, 0o755)
                    .context("Failed to create policy-rc.d")?;
                fs::write(&policy_path, POLICY_RC_D).context("Failed to write policy-rc.d")?;
                self.policy_rc_d = Some(policy_path);
            }
        }

        if self.sys_resolvconf && self.target != Path::new("/") && self.target.join("etc").is_dir()
        {
            let target_resolv = self.target.join("etc/resolv.conf");
            let saved = self.target.join("etc/resolv.conf.curtin-saved");

            if target_resolv.exists() {
                fs::rename(&target_resolv, &saved).context("Failed to move aside resolv.conf")?;
            }

            if let Ok(host_resolv) = fs::read("/etc/resolv.conf") {
                fs::write(&target_resolv, host_resolv)
                    .context("Failed to copy host resolv.conf into target")?;
            }

            self.resolv_conf = Some(SavedResolvConf {
                target: target_resolv,
                saved,
            });
        }

        Ok(())
    }

    /// Reverses every acquisition: `policy-rc.d` first, then each bind
    /// mount in LIFO order (settling udev before `/dev`), then
    /// `resolv.conf` last. Failures are logged and swallowed so they
    /// never mask the caller's original error.
    pub fn exit(&mut self) {
        if let Some(path) = self.policy_rc_d.take() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove policy-rc.d at '{}': {e}", path.display());
            }
        }

        while let Some(path) = self.mounted.pop() {
            if path.ends_with("dev") {
                if let Err(e) = udevadm::settle() {
                    warn!("udevadm settle before unmounting /dev failed: {e}");
                }
            }
            if let Err(e) = mount::umount(&path, true) {
                warn!("Failed to unmount '{}': {e}", path.display());
            }
        }

        if let Some(SavedResolvConf { target, saved }) = self.resolv_conf.take() {
            let _ = fs::remove_file(&target);
            if saved.exists() {
                if let Err(e) = fs::rename(&saved, &target) {
                    warn!("Failed to restore resolv.conf: {e}");
                }
            }
        }

        info!("Exited chrootable target '{}'", self.target.display());
    }
}

impl Drop for ChrootableTarget {
    fn drop(&mut self) {
        if !self.mounted.is_empty() || self.policy_rc_d.is_some() || self.resolv_conf.is_some() {
            self.exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_standard_mounts() {
        let target = ChrootableTarget::new("/mnt/target");
        assert_eq!(
            target.mounts,
            vec![
                PathBuf::from("/dev"),
                PathBuf::from("/proc"),
                PathBuf::from("/run"),
                PathBuf::from("/sys"),
            ]
        );
        assert!(!target.allow_daemons);
    }
}
