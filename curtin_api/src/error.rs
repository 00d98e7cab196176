//! Error taxonomy shared across the storage engine and the install driver.
//!
//! Every variant here is serializable so that it can be attached to a
//! reporter event or echoed back through the CLI's structured-log output,
//! mirroring how the host configuration validation errors are represented in
//! [`crate::config::host::error`].

use serde::{Deserialize, Serialize};

/// Missing target, invalid CLI combination, or any other environment problem
/// detected before any work starts. Maps to process exit code 2.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UsageError {
    #[error("no target specified; pass --target or set TARGET_MOUNT_POINT")]
    NoTarget,

    #[error("no install sources provided")]
    NoSources,

    #[error("invalid cmdarg override '{arg}': {reason}")]
    InvalidCmdArg { arg: String, reason: String },

    #[error("unknown source type '{0}'")]
    UnknownSourceType(String),

    #[error("required command '{0}' was not found on PATH")]
    MissingCommand(String),
}

/// Storage schema violation, duplicate id, unresolved reference, or illegal
/// dependency. The storage DAG aborts validation before any side effect runs
/// (§8 property 2 of the design doc).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationError {
    #[error("duplicate storage action id '{0}'")]
    DuplicateId(String),

    #[error("storage action '{item}' references unknown id '{reference}'")]
    UnresolvedReference { item: String, reference: String },

    #[error(
        "storage action '{item}' of type '{item_type}' may not depend on '{reference}' of type '{reference_type}'"
    )]
    DisallowedDependency {
        item: String,
        item_type: String,
        reference: String,
        reference_type: String,
    },

    #[error("storage action '{item}' field '{field}' is invalid: {reason}")]
    InvalidField {
        item: String,
        field: String,
        reason: String,
    },

    #[error("storage action '{0}' is missing required field '{1}'")]
    MissingField(String, String),

    #[error("storage configuration contains a dependency cycle")]
    DependencyCycle,

    #[error(
        "filesystem label '{label}' exceeds the {limit} character limit for fstype '{fstype}'"
    )]
    LabelTooLong {
        label: String,
        fstype: String,
        limit: usize,
    },
}

/// A sub-process returned an exit code outside its allowed set.
///
/// Carries enough context to reproduce and diagnose the failure; formatted
/// for human logs with indented stream contents.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error(
    "command '{cmd}' failed: {reason}\nexit code: {exit_code:?}\nstdout:\n{stdout}\nstderr:\n{stderr}"
)]
pub struct ProcessExecutionError {
    pub cmd: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub reason: String,
}

/// Exclusive (`O_EXCL`) open of a block device failed because something else
/// still holds it open; the holder list is attached for diagnosis.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("device '{device}' is busy, held by: {holders:?}")]
pub struct ResourceBusyError {
    pub device: String,
    pub holders: Vec<String>,
}

/// A wait-for-removal loop exceeded its retry schedule.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("timed out waiting for '{what}' after {attempts} attempts")]
pub struct TimeoutError {
    pub what: String,
    pub attempts: u32,
}

/// An invariant that the validator should have already ruled out was
/// violated at runtime. Seeing this means the validator has a gap.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("internal invariant violated: {0}")]
pub struct InternalError(pub String);

/// Top-level error returned by the engine's public operations; each stage of
/// the pipeline maps its own failures into one of these before propagating.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CurtinError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    ProcessExecution(#[from] ProcessExecutionError),

    #[error(transparent)]
    ResourceBusy(#[from] ResourceBusyError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CurtinError {
    /// Process exit code this error should produce (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            CurtinError::Usage(_) => 2,
            CurtinError::ProcessExecution(e) => e.exit_code.unwrap_or(3),
            _ => 3,
        }
    }
}
