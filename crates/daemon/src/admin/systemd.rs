//! systemd unit registry

use super::{CreateOutcome, ServiceDefinition, ServiceRegistry, StartOutcome};
use crate::service::ServiceState;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const UNIT_DIR: &str = "/etc/systemd/system";

/// Registry backed by unit files and `systemctl`
#[derive(Debug, Clone)]
pub struct SystemdRegistry {
    unit_dir: PathBuf,
    systemctl: PathBuf,
}

impl Default for SystemdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdRegistry {
    pub fn new() -> Self {
        Self::with_paths(UNIT_DIR, "systemctl")
    }

    pub fn with_paths(unit_dir: impl Into<PathBuf>, systemctl: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            systemctl: systemctl.into(),
        }
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    fn rewrite(&self, name: &str, key: &str, value: &str) -> io::Result<()> {
        let path = self.unit_path(name);
        let unit = fs::read_to_string(&path)?;
        fs::write(&path, replace_entry(&unit, key, value))?;
        self.run_checked(&["daemon-reload"])?;
        Ok(())
    }

    fn run(&self, args: &[&str]) -> io::Result<Output> {
        Command::new(&self.systemctl).args(args).output()
    }

    /// Run systemctl and fail on a non-zero exit status
    fn run_checked(&self, args: &[&str]) -> io::Result<Output> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(io::Error::other(format!(
                "{} {} failed: {}",
                self.systemctl.display(),
                args.join(" "),
                stderr.trim()
            )))
        }
    }
}

fn exec_start(definition: &ServiceDefinition) -> String {
    let mut exec_start = quote(definition.executable.as_os_str());
    for arg in &definition.args {
        exec_start.push(' ');
        exec_start.push_str(&quote(OsStr::new(arg)));
    }
    exec_start
}

/// Render a `Type=notify` unit for the daemon
pub fn render_unit(definition: &ServiceDefinition) -> String {
    format!(
        "[Unit]\n\
         Description={}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=notify\n\
         ExecStart={}\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        definition.description,
        exec_start(definition)
    )
}

/// Escape a word for an `ExecStart=` line
///
/// `%` starts a unit specifier and `$` an environment substitution, so both
/// are doubled. Words with whitespace, quotes or backslashes are wrapped in
/// double quotes with C-style escapes.
fn quote(value: &OsStr) -> String {
    let value = value
        .to_string_lossy()
        .replace('%', "%%")
        .replace('$', "$$");
    let needs_quotes = value.is_empty()
        || value.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\' || c == '\'');
    if !needs_quotes {
        return value;
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Replace the value of every `key=` line in a unit
fn replace_entry(unit: &str, key: &str, value: &str) -> String {
    let mut replaced = String::with_capacity(unit.len());
    for line in unit.lines() {
        match line.strip_prefix(key) {
            Some(rest) if rest.starts_with('=') => {
                replaced.push_str(key);
                replaced.push('=');
                replaced.push_str(value);
            }
            _ => replaced.push_str(line),
        }
        replaced.push('\n');
    }
    replaced
}

fn write_new(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())
}

impl ServiceRegistry for SystemdRegistry {
    fn exists(&self, name: &str) -> io::Result<bool> {
        self.unit_path(name).try_exists()
    }

    fn create(&mut self, definition: &ServiceDefinition) -> io::Result<CreateOutcome> {
        let path = self.unit_path(&definition.name);

        let outcome = match write_new(&path, &render_unit(definition)) {
            Ok(()) => CreateOutcome::Created,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => CreateOutcome::AlreadyExists,
            Err(e) => return Err(e),
        };

        // Also run for an existing unit, which may have been written by a run
        // that failed before enabling it
        self.run_checked(&["daemon-reload"])?;
        self.run_checked(&["enable", definition.name.as_str()])?;
        Ok(outcome)
    }

    fn set_description(&mut self, name: &str, description: &str) -> io::Result<()> {
        self.rewrite(name, "Description", description)
    }

    fn set_command(&mut self, definition: &ServiceDefinition) -> io::Result<()> {
        self.rewrite(&definition.name, "ExecStart", &exec_start(definition))
    }

    fn start(&mut self, name: &str) -> io::Result<StartOutcome> {
        if self.query(name)? == ServiceState::Running {
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.run_checked(&["start", name])?;
        Ok(StartOutcome::Started)
    }

    fn query(&self, name: &str) -> io::Result<ServiceState> {
        // is-active exits non-zero for anything but active, so only stdout counts
        let output = self.run(&["is-active", name])?;
        let state = match String::from_utf8_lossy(&output.stdout).trim() {
            "active" => ServiceState::Running,
            "activating" | "reloading" => ServiceState::StartPending,
            "deactivating" => ServiceState::StopPending,
            _ => ServiceState::Stopped,
        };
        Ok(state)
    }

    fn stop(&mut self, name: &str) -> io::Result<()> {
        self.run_checked(&["stop", "--no-block", name])?;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> io::Result<()> {
        self.run_checked(&["disable", name])?;
        fs::remove_file(self.unit_path(name))?;
        self.run_checked(&["daemon-reload"])?;
        Ok(())
    }
}
