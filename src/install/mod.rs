//! The install pipeline (§4.12): owns a [`WorkingDirectory`], runs each
//! configured stage's commands in order under the environment-variable
//! contract of §6, and tears down the chroot and working directory on every
//! exit path.

mod extract;
mod working_directory;

pub use working_directory::WorkingDirectory;

use std::path::Path;

use anyhow::{Context, Error};
use curtin_api::{
    config::{HostConfiguration, StageCommand},
    constants::{CURTIN_CONFIGS_DIR, INSTALL_CFG_FILENAME},
    error::UsageError,
};
use log::{info, warn};
use osutils::{chroot::ChrootableTarget, dependencies::Dependency, exe::RunAndCheck, scripts, storage_executor};

/// Runs the full install pipeline against `config`, whose `install.target`
/// (or the `target` override) names the root to provision.
pub fn run(config: &HostConfiguration, target_override: Option<&Path>) -> Result<(), Error> {
    let target = target_override
        .map(Path::to_path_buf)
        .or_else(|| config.install.target.clone())
        .ok_or(UsageError::NoTarget)?;

    let working_dir = WorkingDirectory::create(&target)?;
    working_dir.write_config(config)?;

    let mut chroot = ChrootableTarget::new(working_dir.target());
    let result = chroot
        .enter()
        .context("failed to acquire chroot bind-mounts on target")
        .and_then(|()| run_stages(config, &working_dir));

    if let Err(e) = &result {
        if let Some(tarfile) = &config.install.error_tarfile {
            if let Err(tar_err) = write_error_tarfile(tarfile, &working_dir) {
                warn!("failed to write error_tarfile '{}': {tar_err}", tarfile.display());
            }
        }
        warn!("install pipeline failed: {e}");
    } else {
        if config.install.save_install_config {
            if let Err(e) = save_install_config(config, working_dir.target()) {
                warn!("failed to save effective install config into target: {e}");
            }
        }
        if let Err(e) = collect_post_files(config, working_dir.target()) {
            warn!("failed to collect post_files into target: {e}");
        }
    }

    if config.install.unmount {
        teardown(&mut chroot, &working_dir);
    } else {
        info!(
            "install.unmount is disabled; leaving '{}' mounted",
            working_dir.target().display()
        );
    }

    result
}

fn configs_dir(target: &Path) -> std::path::PathBuf {
    target.join(CURTIN_CONFIGS_DIR)
}

/// Writes the effective, merged configuration into the target so it's
/// available for diagnosis after unmount (§6 `install.save_install_config`).
fn save_install_config(config: &HostConfiguration, target: &Path) -> Result<(), Error> {
    let dir = configs_dir(target);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create '{}'", dir.display()))?;
    let text = curtin_api::config::loader::dump_config(config)?;
    std::fs::write(dir.join(INSTALL_CFG_FILENAME), text)
        .with_context(|| format!("failed to write '{}'", dir.join(INSTALL_CFG_FILENAME).display()))
}

/// Copies each `install.post_files` entry from the target into
/// `/curtin/configs/` before unmount, so they survive for later log
/// collection (§3, §6 persisted state). Paths are resolved relative to the
/// target root; a missing file is a warning, not a pipeline failure.
fn collect_post_files(config: &HostConfiguration, target: &Path) -> Result<(), Error> {
    if config.install.post_files.is_empty() {
        return Ok(());
    }

    let dir = configs_dir(target);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create '{}'", dir.display()))?;

    for relative in &config.install.post_files {
        let source = target.join(relative.strip_prefix("/").unwrap_or(relative));
        if !source.exists() {
            warn!("post_files entry '{}' does not exist in target; skipping", relative.display());
            continue;
        }
        let Some(name) = source.file_name() else { continue };
        std::fs::copy(&source, dir.join(name))
            .with_context(|| format!("failed to copy '{}' into '{}'", source.display(), dir.display()))?;
    }

    Ok(())
}

/// Bundles `/var/log` and the working directory into a tarball at
/// `install.error_tarfile` when a stage fails, for post-mortem inspection
/// (§6 `install.error_tarfile`).
fn write_error_tarfile(tarfile: &Path, working_dir: &WorkingDirectory) -> Result<(), Error> {
    let mut cmd = Dependency::Tar.cmd();
    cmd.arg("-czf").arg(tarfile).arg("/var/log").arg(working_dir.root());
    cmd.run_and_check()
        .with_context(|| format!("tar failed to write error_tarfile '{}'", tarfile.display()))
}

fn run_stages(config: &HostConfiguration, working_dir: &WorkingDirectory) -> Result<(), Error> {
    for stage in config.effective_stages() {
        info!("Running install stage '{stage}'");

        if stage == "partitioning" {
            run_partitioning_stage(config, working_dir)?;
        }

        if stage == "extract" && !config.sources.is_empty() {
            extract::run(config, working_dir.target()).context("failed to extract install sources")?;
        }

        if let Some(commands) = config.stage_commands.get(&format!("{stage}_commands")) {
            let mut names: Vec<&String> = commands.keys().collect();
            names.sort();

            for name in names {
                let command = &commands[name];
                info!("Running command '{name}' in stage '{stage}'");
                run_command(command, working_dir)
                    .with_context(|| format!("command '{name}' in stage '{stage}' failed"))?;
            }
        }

        if stage == "final" {
            apply_kernel_crash_dumps(config, working_dir);
        }
    }

    Ok(())
}

/// Handles `kernel-crash-dumps` (§6): `enabled`/`disabled` run a manual
/// `systemctl` toggle inside the target chroot; `unset` runs the distro's
/// own detection script if one exists. Run through the §4.1 process runner
/// rather than `run_command` since this is a curtin-internal behavior, not
/// a user-declared stage command; failures are logged, not fatal, since a
/// target without kdump tooling is a normal case, not an install error.
fn apply_kernel_crash_dumps(config: &HostConfiguration, working_dir: &WorkingDirectory) {
    use curtin_api::config::host::KernelCrashDumps;
    use osutils::process::{self, Options};

    let Some(mode) = config.kernel_crash_dumps else {
        return;
    };

    let (argv, allowed_exit_codes): (&[&str], Vec<i32>) = match mode {
        KernelCrashDumps::Enabled => (&["systemctl", "enable", "kdump.service"], vec![0]),
        KernelCrashDumps::Disabled => (&["systemctl", "disable", "kdump.service"], vec![0]),
        // The detection script may not exist on every target; a missing
        // script (exit 127 from `sh -c`) is not an install failure.
        KernelCrashDumps::Unset => (
            &["sh", "-c", "command -v curtin-detect-kernel-crash-dumps && curtin-detect-kernel-crash-dumps"],
            vec![0, 1, 127],
        ),
    };

    let options = Options {
        allowed_exit_codes,
        ..Options::new().with_target(working_dir.target())
    };

    if let Err(e) = process::run(argv, &options) {
        warn!("kernel-crash-dumps handling failed: {e}");
    }
}

/// Applies the storage DAG and persists the resulting fstab/crypttab/mdadm
/// conf/dname rules into the target before any stage script expects them on
/// disk (§4.10, §6 persisted state).
fn run_partitioning_stage(config: &HostConfiguration, working_dir: &WorkingDirectory) -> Result<(), Error> {
    let actions = config.storage.linearize().context("storage configuration failed to validate")?;
    let result = storage_executor::apply(&actions).context("failed to apply storage configuration")?;

    working_dir.write_fstab(&result.fstab.render())?;
    storage_executor::persist(&result, working_dir.target())
        .context("failed to persist storage artifacts into target")?;

    Ok(())
}

fn run_command(command: &StageCommand, working_dir: &WorkingDirectory) -> Result<(), Error> {
    match command {
        StageCommand::Shell(script) => scripts::run_bash_script(&with_env_prelude(script, working_dir)),
        StageCommand::Argv(argv) => {
            if argv.is_empty() {
                return Ok(());
            }
            let mut cmd = std::process::Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            for (key, value) in working_dir.environment() {
                cmd.env(key, value);
            }
            cmd.run_and_check().with_context(|| format!("command '{}' failed", argv.join(" ")))
        }
    }
}

fn with_env_prelude(script: &str, working_dir: &WorkingDirectory) -> String {
    let mut prelude = String::new();
    for (key, value) in working_dir.environment() {
        prelude.push_str(&format!("export {key}={}\n", shell_quote(&value)));
    }
    prelude.push_str(script);
    prelude
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Tears down the chroot target (unmounting `/sys`, `/dev`, `/proc`, `/run`
/// in that order per the LIFO teardown of §4.2) and removes the working
/// directory. Errors are logged, not propagated, so they never mask the
/// pipeline's real failure.
fn teardown(chroot: &mut ChrootableTarget, working_dir: &WorkingDirectory) {
    chroot.exit();

    if let Err(e) = working_dir.destroy() {
        warn!("Failed to remove working directory '{}': {e}", working_dir.root().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use curtin_api::config::InstallSettings;

    #[test]
    fn test_save_install_config_writes_yaml_under_curtin_configs() {
        let target = tempfile::tempdir().unwrap();
        let config = HostConfiguration::default();

        save_install_config(&config, target.path()).unwrap();

        let written = target.path().join(CURTIN_CONFIGS_DIR).join(INSTALL_CFG_FILENAME);
        let text = std::fs::read_to_string(written).unwrap();
        let roundtripped: HostConfiguration = serde_yaml::from_str(&text).unwrap();
        assert_eq!(roundtripped, config);
    }

    #[test]
    fn test_collect_post_files_copies_existing_and_skips_missing() {
        let target = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(target.path().join("etc")).unwrap();
        std::fs::write(target.path().join("etc/hostname"), b"myhost\n").unwrap();

        let config = HostConfiguration {
            install: InstallSettings {
                post_files: vec![PathBuf::from("etc/hostname"), PathBuf::from("etc/missing")],
                ..Default::default()
            },
            ..Default::default()
        };

        collect_post_files(&config, target.path()).unwrap();

        let copied = target.path().join(CURTIN_CONFIGS_DIR).join("hostname");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "myhost\n");
        assert!(!target.path().join(CURTIN_CONFIGS_DIR).join("missing").exists());
    }

    #[test]
    fn test_collect_post_files_noop_when_empty() {
        let target = tempfile::tempdir().unwrap();
        let config = HostConfiguration::default();

        collect_post_files(&config, target.path()).unwrap();

        assert!(!target.path().join(CURTIN_CONFIGS_DIR).exists());
    }

    #[test]
    fn test_apply_kernel_crash_dumps_noop_when_unset_field_absent() {
        let working_dir = WorkingDirectory::create(Path::new("/")).unwrap();
        let config = HostConfiguration::default();
        // No kernel_crash_dumps configured: must not attempt any process run.
        apply_kernel_crash_dumps(&config, &working_dir);
        working_dir.destroy().unwrap();
    }
}
