use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Returns true if `path` is currently a mount point, using `mountpoint -q`.
/// Exit status 0 means it is a mount point, 1 means it is not; any other
/// outcome (missing path, missing binary) is surfaced as an error.
pub fn check_is_mountpoint(path: impl AsRef<Path>) -> Result<bool, Error> {
    let status = Dependency::Mountpoint
        .cmd()
        .arg("-q")
        .arg(path.as_ref())
        .status()
        .with_context(|| format!("Failed to run mountpoint on '{}'", path.as_ref().display()))?;

    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(anyhow::anyhow!(
            "mountpoint exited unexpectedly for '{}': {}",
            path.as_ref().display(),
            status
        )),
    }
}

#[cfg(feature = "functional-test")]
#[cfg_attr(not(test), allow(unused_imports, dead_code))]
mod functional_test {
    use super::*;

    use pytest_gen::functional_test;

    #[functional_test(feature = "helpers")]
    fn test_check_is_mountpoint() {
        assert!(!super::check_is_mountpoint(Path::new("/dev/sda1")).unwrap());

        assert!(super::check_is_mountpoint(Path::new("/")).unwrap());

        assert!(!super::check_is_mountpoint(Path::new("/etc")).unwrap());
    }
}
