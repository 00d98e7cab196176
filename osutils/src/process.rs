//! The process runner (§4.1): a single seam through which every external
//! command is shelled out, with optional chroot prefixing, PID-namespace
//! unshare, retry/backoff, and output decoding. [`crate::exe::RunAndCheck`]
//! remains the low-level primitive this builds on for the common
//! fire-and-check case; `run` is for callers that need the fuller option
//! matrix (chroot targets, retries, non-utf8 output).

use std::{
    collections::HashMap,
    io::Write,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use curtin_api::error::ProcessExecutionError;
use log::debug;

use crate::dependencies::{is_available, Dependency};

/// How captured bytes are turned into a `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decode {
    /// Don't decode at all; [`RunOutput::stdout`]/`stderr` are empty and
    /// callers must use [`run_bytes`] to get the captured bytes verbatim.
    Off,
    /// Fail the whole call if either stream is not valid UTF-8.
    Strict,
    #[default]
    /// Replace invalid sequences with U+FFFD, matching
    /// `String::from_utf8_lossy`.
    Replace,
    /// Drop invalid bytes silently.
    Ignore,
}

/// Tri-state control over whether commands run in a fresh PID namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsharePid {
    Always,
    Never,
    #[default]
    /// Unshare iff euid is 0, target is not `/`, and `unshare` is on PATH.
    Auto,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Bytes written to the child's stdin.
    pub input_data: Option<Vec<u8>>,
    /// Exit codes that count as success. Defaults to `{0}`.
    pub allowed_exit_codes: Vec<i32>,
    /// Extra environment variables, added on top of the current process's.
    pub env: HashMap<String, String>,
    /// Capture stdout/stderr at all. When false, streams inherit the
    /// parent's (useful for long interactive tools).
    pub capture: bool,
    /// Merge stderr into the stdout stream before returning.
    pub combine_capture: bool,
    /// Debug-log captured output even on success.
    pub log_captured: bool,
    /// Run the command through `sh -c` instead of executing it directly.
    pub shell: bool,
    pub decode: Decode,
    /// Sleep durations between retries; the command runs up to
    /// `retries.len() + 1` times.
    pub retries: Vec<Duration>,
    /// Chroot root. `None`, `Some("/")`, or `Some("")` all disable chroot.
    pub target: Option<PathBuf>,
    pub unshare_pid: UnsharePid,
}

impl Options {
    pub fn new() -> Self {
        Self {
            allowed_exit_codes: vec![0],
            capture: true,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_retries(mut self, retries: Vec<Duration>) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn chroot_target(&self) -> Option<&Path> {
        self.target
            .as_deref()
            .filter(|t| !t.as_os_str().is_empty() && *t != Path::new("/"))
    }
}

pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Raw, undecoded capture of a command's output, returned by [`run_bytes`].
pub struct RunBytesOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs `args[0] args[1..]` per the option matrix in §4.1 and returns
/// decoded stdout/stderr.
pub fn run(args: &[impl AsRef<str>], options: &Options) -> Result<RunOutput, ProcessExecutionError> {
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    with_retries(&args, options, |args, options| {
        let raw = run_once_raw(args, options)?;
        let (stdout, stderr) = decode_output(&raw.stdout, &raw.stderr, options);
        if options.log_captured {
            debug!("command succeeded. stdout:\n{stdout}\nstderr:\n{stderr}");
        }
        Ok(RunOutput { stdout, stderr })
    })
}

/// Runs `args[0] args[1..]` per the option matrix in §4.1 and returns the
/// captured stdout/stderr verbatim, bypassing [`Options::decode`]. Use this
/// when the command's output isn't necessarily text, e.g. reading a raw
/// superblock or binary image through a pipe.
pub fn run_bytes(args: &[impl AsRef<str>], options: &Options) -> Result<RunBytesOutput, ProcessExecutionError> {
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    with_retries(&args, options, |args, options| run_once_raw(args, options))
}

fn with_retries<T>(
    args: &[String],
    options: &Options,
    mut attempt_fn: impl FnMut(&[String], &Options) -> Result<T, ProcessExecutionError>,
) -> Result<T, ProcessExecutionError> {
    let mut attempt = 0usize;

    loop {
        match attempt_fn(args, options) {
            Ok(output) => return Ok(output),
            Err(err) => {
                if attempt >= options.retries.len() {
                    return Err(err);
                }
                let sleep = options.retries[attempt];
                debug!(
                    "command '{}' failed (attempt {}), retrying in {:?}: {}",
                    args.join(" "),
                    attempt + 1,
                    sleep,
                    err
                );
                thread::sleep(sleep);
                attempt += 1;
            }
        }
    }
}

/// Spawns, writes stdin, waits, and checks the exit status against
/// `options.allowed_exit_codes`, returning the raw captured bytes on
/// success. This is the single point every `run*` entry point funnels
/// through.
fn run_once_raw(args: &[String], options: &Options) -> Result<RunBytesOutput, ProcessExecutionError> {
    let full_args = prefixed_args(args, options);
    let cmd_str = full_args.join(" ");

    let mut command = if options.shell {
        let mut c = Command::new("sh");
        c.arg("-c").arg(full_args.join(" "));
        c
    } else {
        let mut c = Command::new(&full_args[0]);
        c.args(&full_args[1..]);
        c
    };

    for (key, value) in &options.env {
        command.env(key, value);
    }

    if options.capture {
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
    }
    command.stdin(Stdio::piped());

    let mut child = command.spawn().map_err(|e| ProcessExecutionError {
        cmd: cmd_str.clone(),
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        reason: format!("failed to spawn: {e}"),
    })?;

    if let Some(data) = &options.input_data {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(data);
        }
    } else {
        drop(child.stdin.take());
    }

    let output = child.wait_with_output().map_err(|e| ProcessExecutionError {
        cmd: cmd_str.clone(),
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        reason: format!("failed to wait: {e}"),
    })?;

    let allowed = if options.allowed_exit_codes.is_empty() {
        &[0][..]
    } else {
        &options.allowed_exit_codes[..]
    };

    let code = output.status.code();
    let success = code.map(|c| allowed.contains(&c)).unwrap_or(false);

    if !success {
        let (stdout, stderr) = decode_output(&output.stdout, &output.stderr, options);
        return Err(ProcessExecutionError {
            cmd: cmd_str,
            exit_code: code,
            stdout,
            stderr,
            reason: match code {
                Some(c) => format!("exited with status {c}, not in allowed set {allowed:?}"),
                None => format!(
                    "terminated by signal {}",
                    output.status.signal().unwrap_or(-1)
                ),
            },
        });
    }

    Ok(RunBytesOutput {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

fn decode_output(stdout: &[u8], stderr: &[u8], options: &Options) -> (String, String) {
    if options.combine_capture {
        let mut combined = Vec::with_capacity(stdout.len() + stderr.len());
        combined.extend_from_slice(stdout);
        combined.extend_from_slice(stderr);
        let decoded = decode(&combined, options.decode);
        return (decoded, String::new());
    }

    (decode(stdout, options.decode), decode(stderr, options.decode))
}

fn decode(bytes: &[u8], mode: Decode) -> String {
    match mode {
        Decode::Off => String::new(),
        Decode::Strict => String::from_utf8(bytes.to_vec()).unwrap_or_default(),
        Decode::Replace => String::from_utf8_lossy(bytes).into_owned(),
        Decode::Ignore => bytes
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect(),
    }
}

/// Builds the final argv, prefixing with `chroot <target>` and/or
/// `unshare --fork --pid` per §4.1.
fn prefixed_args(args: &[String], options: &Options) -> Vec<String> {
    let mut full: Vec<String> = Vec::new();

    let chroot_target = options.chroot_target();

    let should_unshare = match options.unshare_pid {
        UnsharePid::Always => true,
        UnsharePid::Never => false,
        UnsharePid::Auto => {
            chroot_target.is_some()
                && nix::unistd::geteuid().is_root()
                && is_available(Dependency::Unshare)
        }
    };

    if should_unshare {
        full.push("unshare".into());
        full.push("--fork".into());
        full.push("--pid".into());
    }

    if let Some(target) = chroot_target {
        full.push("chroot".into());
        full.push(target.to_string_lossy().into_owned());
    }

    full.extend(args.iter().cloned());
    full
}

/// Convenience wrapper mirroring `run` but taking owned `&str` args, for
/// call sites that don't already have a `Vec<String>`.
pub fn run_str(args: &[&str], options: &Options) -> Result<RunOutput, ProcessExecutionError> {
    run(args, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let opts = Options::new();
        let out = run(&["echo", "hello"], &opts).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_bytes_returns_raw_output() {
        let opts = Options::new();
        let out = run_bytes(&["printf", "hi"], &opts).unwrap();
        assert_eq!(out.stdout, b"hi");
    }

    #[test]
    fn test_run_decode_off_returns_empty_strings() {
        let mut opts = Options::new();
        opts.decode = Decode::Off;
        let out = run(&["echo", "hello"], &opts).unwrap();
        assert_eq!(out.stdout, "");
    }

    #[test]
    fn test_run_failure_carries_context() {
        let opts = Options::new();
        let err = run(&["false"], &opts).unwrap_err();
        assert_eq!(err.exit_code, Some(1));
    }

    #[test]
    fn test_run_allowed_exit_codes() {
        let mut opts = Options::new();
        opts.allowed_exit_codes = vec![0, 5];
        let out = run(&["sh", "-c", "exit 5"], &opts);
        assert!(out.is_ok());
    }

    #[test]
    fn test_run_retries_exhausted() {
        let mut opts = Options::new();
        opts.retries = vec![Duration::from_millis(1), Duration::from_millis(1)];
        let err = run(&["false"], &opts).unwrap_err();
        assert_eq!(err.exit_code, Some(1));
    }

    #[test]
    fn test_prefixed_args_no_chroot() {
        let opts = Options::new();
        let args = vec!["echo".to_string(), "hi".to_string()];
        assert_eq!(prefixed_args(&args, &opts), args);
    }

    #[test]
    fn test_prefixed_args_with_chroot() {
        let mut opts = Options::new();
        opts.target = Some(PathBuf::from("/mnt/target"));
        opts.unshare_pid = UnsharePid::Never;
        let args = vec!["echo".to_string(), "hi".to_string()];
        let full = prefixed_args(&args, &opts);
        assert_eq!(full, vec!["chroot", "/mnt/target", "echo", "hi"]);
    }
}
