use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::CURTIN_VERSION;

/// The CLI surface (§6): one subcommand per installable operation.
/// Subcommands that require a target read it from `--target` or
/// `TARGET_MOUNT_POINT`; absence of both is a usage error (exit 2).
#[derive(Parser, Debug)]
#[clap(version = CURTIN_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]. Overridden
    /// by `CURTIN_VERBOSITY` when it's set.
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Print a full backtrace on fatal errors instead of a one-line
    /// message. Overridden by `CURTIN_STACKTRACE` when it's set.
    #[arg(global = true, long)]
    pub showtrace: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full install pipeline against a configuration (§4.12).
    Install {
        /// A plain YAML document or a `#curtin-config-archive`.
        #[clap(index = 1)]
        config: PathBuf,

        /// Root to provision. Overrides `install.target` and
        /// `TARGET_MOUNT_POINT`.
        #[clap(long)]
        target: Option<PathBuf>,

        /// Dotted-key overrides, e.g. `install.unmount=false`.
        #[clap(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Apply only the storage stage of a configuration: clear-holders,
    /// partition, format, and mount, without running any other stage.
    #[clap(name = "block-meta")]
    BlockMeta {
        #[clap(index = 1)]
        config: PathBuf,

        #[clap(long)]
        target: Option<PathBuf>,
    },

    /// Validate a configuration's storage DAG without touching disk
    /// (§4.4, §4.5, §8 properties 1-2).
    Validate {
        #[clap(index = 1)]
        config: PathBuf,
    },

    /// Build a self-extracting archive of curtin plus any extra files
    /// (§4.11).
    Pack {
        /// Where to write the resulting archive.
        #[clap(long)]
        output: PathBuf,

        /// Extra files to copy into the pack's root before archiving.
        #[clap(long = "add-file", value_name = "PATH")]
        add_files: Vec<PathBuf>,

        /// Command the pack re-executes once unpacked, e.g. `install config.yaml`.
        #[clap(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Extract a pack built by `pack` into a directory and hand control to
    /// its launcher (§4.11).
    Unpack {
        #[clap(index = 1)]
        archive: PathBuf,

        #[clap(long)]
        directory: Option<PathBuf>,
    },

    /// Print the fixed capability enumeration callers use to detect what
    /// this build supports (§6).
    Features,

    /// Print the curtin version.
    Version,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Install { .. } => "install",
            Commands::BlockMeta { .. } => "block-meta",
            Commands::Validate { .. } => "validate",
            Commands::Pack { .. } => "pack",
            Commands::Unpack { .. } => "unpack",
            Commands::Features => "features",
            Commands::Version => "version",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}
