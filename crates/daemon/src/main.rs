//! usb-bridged
//!
//! Daemon that bridges locally attached USB devices to network clients.
//! Runs under systemd as a notify service or in the foreground, and can
//! install and remove its own service registration.

mod admin;
mod config;
mod entry;
mod event_loop;
mod listener;
mod network;
mod platform;
mod relay;
mod service;
mod usb;

#[cfg(test)]
mod testing;

use admin::{InstallOptions, PollPolicy, SystemdRegistry, install, uninstall};
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use common::setup_logging;
use config::DaemonConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "usb-bridged")]
#[command(
    author,
    version,
    about = "usb-bridged - Bridge USB devices to network clients"
)]
#[command(long_about = "
Bridges locally attached USB devices to network clients.

Without options the daemon runs as a systemd service, or in the foreground
when it was not started by systemd.

EXAMPLES:
    # Register as a service and start it
    usb-bridged --install --log-to-file

    # Run in the foreground with debug logging
    usb-bridged --console --debug

    # Validate the configuration file
    usb-bridged --check-config

CONFIGURATION:
    The daemon reads a TOML file next to its executable, named after it
    with the extension 'toml', unless --config is given.
")]
struct Args {
    /// Check config file for errors
    #[arg(long)]
    check_config: bool,

    /// Register as a service and start it
    #[arg(long, conflicts_with = "uninstall")]
    install: bool,

    /// Stop service and unregister it
    #[arg(long)]
    uninstall: bool,

    /// Force start as console application
    #[arg(long)]
    console: bool,

    /// Write log messages to file
    #[arg(long)]
    log_to_file: bool,

    /// Set all log levels to debug
    #[arg(long)]
    debug: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the requested operation succeeded
fn run(args: Args) -> Result<bool> {
    let config_path = args
        .config
        .as_deref()
        .map(DaemonConfig::expand_path)
        .unwrap_or_else(DaemonConfig::default_path);

    if args.check_config {
        return Ok(check_config(&config_path));
    }

    if args.install {
        let options = InstallOptions {
            executable: std::env::current_exe().context("Could not get executable path")?,
            log_to_file: args.log_to_file,
            debug: args.debug,
        };
        install(&mut SystemdRegistry::new(), &options, &mut std::io::stdout())?;
        return Ok(true);
    }

    if args.uninstall {
        uninstall(
            &mut SystemdRegistry::new(),
            PollPolicy::default(),
            &mut std::io::stdout(),
        )?;
        return Ok(true);
    }

    let loaded = DaemonConfig::load(&config_path);

    let log_file = if args.log_to_file {
        Some(log_file_path()?)
    } else {
        None
    };
    setup_logging(&loaded.config.log_settings(args.debug, log_file))
        .context("Failed to setup logging")?;

    let outcome = if args.console {
        entry::run_as_console(&loaded)?
    } else {
        entry::run_as_service(&loaded)?
    };

    Ok(outcome.is_success())
}

/// Log file next to the executable
fn log_file_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not get executable path")?;
    Ok(exe.with_extension("log"))
}

fn check_config(path: &Path) -> bool {
    println!("Checking config file: {}", path.display());

    let loaded = DaemonConfig::load(path);
    if loaded.has_error() {
        for error in &loaded.errors {
            eprintln!("  {}", error);
        }
        eprintln!("Errors found in config file");
        false
    } else {
        println!("No errors found");
        true
    }
}
