//! Service installation and removal
//!
//! Both operations report to the operator directly: progress goes to the
//! given writer, failures come back as [`AdminError`] for the caller to
//! print. Nothing is logged and nothing is rolled back.

pub mod systemd;

use crate::service::ServiceState;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use systemd::SystemdRegistry;

pub const SERVICE_NAME: &str = "usb-bridged";
pub const SERVICE_DESCRIPTION: &str = "Bridges locally attached USB devices to network clients";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Could not {action} '{name}' service: {source}")]
    Registry {
        action: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("'{0}' service is not installed")]
    NotInstalled(String),

    #[error("Could not stop '{name}' service after {seconds} seconds")]
    StopTimeout { name: String, seconds: u64 },

    #[error("Could not write to console: {0}")]
    Output(#[source] io::Error),
}

/// Everything a registry needs to create a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// OS service registry
pub trait ServiceRegistry {
    fn exists(&self, name: &str) -> io::Result<bool>;

    /// Register a service; an existing registration is left untouched
    fn create(&mut self, definition: &ServiceDefinition) -> io::Result<CreateOutcome>;

    fn set_description(&mut self, name: &str, description: &str) -> io::Result<()>;

    /// Point an existing registration at the definition's executable and arguments
    fn set_command(&mut self, definition: &ServiceDefinition) -> io::Result<()>;

    fn start(&mut self, name: &str) -> io::Result<StartOutcome>;

    fn query(&self, name: &str) -> io::Result<ServiceState>;

    /// Ask the service to stop without waiting for it
    fn stop(&mut self, name: &str) -> io::Result<()>;

    fn delete(&mut self, name: &str) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub executable: PathBuf,
    pub log_to_file: bool,
    pub debug: bool,
}

impl InstallOptions {
    /// Arguments the service is started with
    pub fn start_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.log_to_file {
            args.push("--log-to-file".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }

    fn describe(&self) -> &'static str {
        match (self.log_to_file, self.debug) {
            (true, true) => " with --log-to-file and --debug option",
            (true, false) => " with --log-to-file option",
            (false, true) => " with --debug option",
            (false, false) => "",
        }
    }
}

/// How long uninstall waits for a running service to stop
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_millis(500),
        }
    }
}

impl PollPolicy {
    fn budget_secs(&self) -> u64 {
        (self.interval * self.attempts).as_secs()
    }
}

fn registry_error(action: &'static str) -> impl FnOnce(io::Error) -> AdminError {
    move |source| AdminError::Registry {
        action,
        name: SERVICE_NAME.to_string(),
        source,
    }
}

/// Register the service and start it
///
/// Running this against an installed service adopts the existing
/// registration, refreshes its description and start arguments and makes
/// sure it is running.
pub fn install<R, W>(registry: &mut R, options: &InstallOptions, out: &mut W) -> Result<(), AdminError>
where
    R: ServiceRegistry + ?Sized,
    W: Write,
{
    let definition = ServiceDefinition {
        name: SERVICE_NAME.to_string(),
        description: SERVICE_DESCRIPTION.to_string(),
        executable: options.executable.clone(),
        args: options.start_args(),
    };

    let written = match registry.create(&definition).map_err(registry_error("install"))? {
        CreateOutcome::Created => writeln!(out, "Installed '{}' service", SERVICE_NAME),
        CreateOutcome::AlreadyExists => {
            writeln!(out, "'{}' service is already installed", SERVICE_NAME)
        }
    };
    written.map_err(AdminError::Output)?;

    registry
        .set_description(SERVICE_NAME, SERVICE_DESCRIPTION)
        .map_err(registry_error("update description of"))?;
    registry
        .set_command(&definition)
        .map_err(registry_error("update start arguments of"))?;

    let written = match registry.start(SERVICE_NAME).map_err(registry_error("start"))? {
        StartOutcome::Started => writeln!(
            out,
            "Started '{}' service{}",
            SERVICE_NAME,
            options.describe()
        ),
        StartOutcome::AlreadyRunning => {
            writeln!(out, "'{}' service is already running", SERVICE_NAME)
        }
    };
    written.map_err(AdminError::Output)
}

/// Stop the service if needed and remove its registration
pub fn uninstall<R, W>(registry: &mut R, policy: PollPolicy, out: &mut W) -> Result<(), AdminError>
where
    R: ServiceRegistry + ?Sized,
    W: Write,
{
    if !registry
        .exists(SERVICE_NAME)
        .map_err(registry_error("open"))?
    {
        return Err(AdminError::NotInstalled(SERVICE_NAME.to_string()));
    }

    let mut state = registry
        .query(SERVICE_NAME)
        .map_err(registry_error("query status of"))?;

    if state != ServiceState::Stopped {
        registry
            .stop(SERVICE_NAME)
            .map_err(registry_error("send stop control code to"))?;

        let mut tries = 0;
        while state != ServiceState::Stopped && tries < policy.attempts {
            std::thread::sleep(policy.interval);
            tries += 1;
            state = registry
                .query(SERVICE_NAME)
                .map_err(registry_error("query status of"))?;
        }

        if state != ServiceState::Stopped {
            return Err(AdminError::StopTimeout {
                name: SERVICE_NAME.to_string(),
                seconds: policy.budget_secs(),
            });
        }

        writeln!(out, "Stopped '{}' service", SERVICE_NAME).map_err(AdminError::Output)?;
    }

    registry
        .delete(SERVICE_NAME)
        .map_err(registry_error("uninstall"))?;
    writeln!(out, "Uninstalled '{}' service", SERVICE_NAME).map_err(AdminError::Output)
}
