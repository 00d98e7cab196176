//! The pack runner (§4.11): builds a self-extracting archive containing
//! curtin's own binary plus any declared extra files, fronted by a POSIX
//! shell launcher, and can later extract such an archive and hand control
//! to that launcher. Used to re-execute curtin inside an ephemeral
//! environment (e.g. a ramdisk with no package manager of its own).

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::info;

use crate::{
    dependencies::{is_available, Dependency},
    exe::RunAndCheck,
    files,
};

const LAUNCHER_RELATIVE_PATH: &str = "bin/curtin";

/// Builds the launcher script content: a POSIX shell wrapper that re-execs
/// the packed binary with `command` as its argv, from whatever directory
/// the archive was unpacked into (`$0`'s directory).
fn launcher_script(command: &[String]) -> String {
    let quoted_extra: String = command
        .iter()
        .map(|arg| format!(" '{}'", arg.replace('\'', r"'\''")))
        .collect();

    format!(
        "#!/bin/sh\n\
         # Generated by curtin's pack runner; re-execs the packed binary.\n\
         set -e\n\
         here=$(cd \"$(dirname \"$0\")\" && pwd)\n\
         exec \"$here/bin/curtin.bin\"{quoted_extra} \"$@\"\n"
    )
}

/// Materializes the pack's temporary tree: the running binary renamed to
/// `bin/curtin.bin`, the generated launcher at `bin/curtin`, and every
/// declared extra file copied in at its basename under the tree root.
fn materialize_tree(dir: &Path, extra_files: &[PathBuf], reexec_command: &[String]) -> Result<(), Error> {
    let bin_dir = dir.join("bin");
    fs::create_dir_all(&bin_dir).context("failed to create pack bin directory")?;

    let self_exe = std::env::current_exe().context("failed to locate curtin's own executable")?;
    fs::copy(&self_exe, bin_dir.join("curtin.bin"))
        .with_context(|| format!("failed to copy '{}' into pack", self_exe.display()))?;

    let launcher_path = dir.join(LAUNCHER_RELATIVE_PATH);
    fs::write(&launcher_path, launcher_script(reexec_command))
        .context("failed to write pack launcher")?;
    let mut perms = fs::metadata(&launcher_path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&launcher_path, perms)?;

    for extra in extra_files {
        let name = extra
            .file_name()
            .with_context(|| format!("'{}' has no file name", extra.display()))?;
        fs::copy(extra, dir.join(name))
            .with_context(|| format!("failed to copy extra file '{}' into pack", extra.display()))?;
    }

    Ok(())
}

/// Builds a self-extracting archive at `output` containing curtin's own
/// binary plus `extra_files`, which re-execs as `reexec_command` once
/// unpacked (§4.11).
pub fn pack(output: &Path, extra_files: &[PathBuf], reexec_command: &[String]) -> Result<(), Error> {
    if !is_available(Dependency::ShellArchive) {
        bail!(
            "required command '{}' was not found on PATH",
            Dependency::ShellArchive.name()
        );
    }

    let staging = tempfile::Builder::new()
        .prefix("curtin-pack-")
        .tempdir()
        .context("failed to create pack staging directory")?;

    materialize_tree(staging.path(), extra_files, reexec_command)?;

    files::create_dirs(output.parent().unwrap_or_else(|| Path::new(".")))?;

    let mut cmd = Dependency::ShellArchive.cmd();
    cmd.arg("--entry-point")
        .arg(LAUNCHER_RELATIVE_PATH)
        .arg(staging.path())
        .arg(output);
    cmd.run_and_check().context("shell-archive helper failed to build pack")?;

    info!("Wrote pack archive to '{}'", output.display());
    Ok(())
}

/// Extracts `archive` (built by [`pack`]) into `directory` and invokes its
/// launcher, blocking until it exits and propagating its exit status.
pub fn unpack_and_run(archive: &Path, directory: &Path) -> Result<(), Error> {
    fs::create_dir_all(directory)
        .with_context(|| format!("failed to create unpack directory '{}'", directory.display()))?;

    let mut perms = fs::metadata(archive)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(archive, perms)?;

    std::process::Command::new(archive)
        .arg("--")
        .arg(directory)
        .status()
        .with_context(|| format!("failed to run self-extracting archive '{}'", archive.display()))?;

    let launcher = directory.join(LAUNCHER_RELATIVE_PATH);
    let status = std::process::Command::new(&launcher)
        .status()
        .with_context(|| format!("failed to run unpacked launcher '{}'", launcher.display()))?;

    if !status.success() {
        bail!(
            "unpacked launcher '{}' exited with status {:?}",
            launcher.display(),
            status.code()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_script_quotes_reexec_args() {
        let script = launcher_script(&["install".to_string(), "it's a path".to_string()]);
        assert!(script.contains("'install'"));
        assert!(script.contains(r"'it'\''s a path'"));
        assert!(script.starts_with("#!/bin/sh\n"));
    }

    #[test]
    fn test_materialize_tree_copies_binary_and_extras() {
        let dir = tempfile::tempdir().unwrap();
        let extra = tempfile::NamedTempFile::new().unwrap();
        fs::write(extra.path(), b"hello").unwrap();

        materialize_tree(dir.path(), &[extra.path().to_path_buf()], &["install".to_string()]).unwrap();

        assert!(dir.path().join("bin/curtin.bin").exists());
        assert!(dir.path().join("bin/curtin").exists());
        let name = extra.path().file_name().unwrap();
        assert!(dir.path().join(name).exists());
    }
}
