use std::{fs::File, path::PathBuf, process::ExitCode};

use clap::Parser;
use curtin::{
    cli::{Cli, Commands},
    install, CURTIN_VERSION,
};
use curtin_api::config::{loader, HostConfigurationValidationError};
use curtin_api::error::{CurtinError, UsageError};
use log::error;
use osutils::{pack, storage_executor};

/// Capabilities this build supports; printed one per line, sorted, by
/// `curtin features` so callers can probe for them (§6).
const FEATURES: &[&str] = &[
    "APT_CONFIG_V1",
    "CENTOS_APPLY_NETWORK_CONFIG",
    "HAS_VERSION_MODULE",
    "NETWORK_CONFIG_V1",
    "STORAGE_CONFIG_V1",
    "STORAGE_CONFIG_V1_DD",
];

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbosity = std::env::var("CURTIN_VERBOSITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(cli.verbosity);

    // An `install` run may declare `install.log_file` (§6); loading the
    // config this early, before `dispatch`, means the logger can tee into
    // it for the life of the whole run rather than only once inside the
    // pipeline.
    let preloaded = match &cli.command {
        Commands::Install { config, set, .. } => load_with_overrides(config, set).ok(),
        _ => None,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(verbosity);
    if let Some(config) = &preloaded {
        if let Some(log_file) = &config.install.log_file {
            match File::options().create(true).append(true).open(log_file) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => eprintln!("warning: failed to open install.log_file '{}': {e}", log_file.display()),
            }
        }
    }
    builder.init();

    let showtrace = std::env::var("CURTIN_STACKTRACE")
        .map(|v| v != "0")
        .unwrap_or(cli.showtrace);

    match dispatch(&cli.command, preloaded) {
        Ok(code) => code,
        Err(e) => {
            if showtrace {
                error!("{e:?}");
            } else {
                error!("{e}");
            }
            let exit_code = match e.downcast_ref::<UsageError>() {
                Some(usage) => CurtinError::from(usage.clone()).exit_code(),
                None => 3,
            };
            ExitCode::from(exit_code as u8)
        }
    }
}

fn dispatch(
    command: &Commands,
    preloaded: Option<curtin_api::config::HostConfiguration>,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Install { config, target, set } => {
            let config = match preloaded {
                Some(config) => config,
                None => load_with_overrides(config, set)?,
            };
            install::run(&config, target.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::BlockMeta { config, target } => {
            let config = loader::load_config(config)?;
            let target = target
                .clone()
                .or_else(|| config.install.target.clone())
                .ok_or(UsageError::NoTarget)?;

            let actions = config.storage.linearize()?;
            let result = storage_executor::apply(&actions)?;
            storage_executor::persist(&result, &target)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { config } => {
            let config = loader::load_config(config)?;
            match config.validate() {
                Ok(()) => {
                    println!("configuration is valid");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    let code = match &e {
                        HostConfigurationValidationError::Storage(_) => 3,
                    };
                    eprintln!("{e}");
                    Ok(ExitCode::from(code))
                }
            }
        }

        Commands::Pack { output, add_files, command } => {
            pack::pack(output, add_files, command)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Unpack { archive, directory } => {
            let directory = directory.clone().unwrap_or_else(default_unpack_directory);
            pack::unpack_and_run(archive, &directory)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Features => {
            println!("{}", FEATURES.join("\n"));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Version => {
            println!("{CURTIN_VERSION}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_with_overrides(
    config: &PathBuf,
    set: &[String],
) -> anyhow::Result<curtin_api::config::HostConfiguration> {
    if set.is_empty() {
        return Ok(loader::load_config(config)?);
    }

    let base = loader::load_config_value(config)?;
    let merged = loader::migrate_legacy_proxy(loader::merge_cmdarg(base, set)?);
    Ok(serde_yaml::from_value(merged)?)
}

fn default_unpack_directory() -> PathBuf {
    std::env::temp_dir().join(format!("curtin-unpack-{}", std::process::id()))
}
