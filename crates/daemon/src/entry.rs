//! Service and console entry points
//!
//! Both modes share one bring-up routine and differ only in where control
//! requests and device events come from.

use crate::config::LoadedConfig;
use crate::listener::HotplugReceiver;
use crate::network::TcpNetwork;
use crate::platform::signals::{
    CONSOLE_SIGNALS, SERVICE_SIGNALS, console_control_code, service_control_code,
};
use crate::platform::{HotplugNotifier, SignalDispatcher, SystemdReporter, is_systemd};
use crate::service::{
    ConsoleReporter, DeviceEventSource, ListenerSource, RunOutcome, ServiceController,
    ServiceManagerSource, Subsystems,
};
use crate::usb::RusbSubsystem;
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, info, warn};

pub const DAEMON_NAME: &str = "usb-bridged";

/// Run under the service manager, or as a console application when started
/// from a shell
pub fn run_as_service(loaded: &LoadedConfig) -> Result<RunOutcome> {
    if !is_systemd() {
        info!("Not started by a service manager, running as console application");
        return run_as_console(loaded);
    }

    let controller = ServiceController::new(Box::new(SystemdReporter::from_env()));
    let control = controller.handle();

    let _dispatcher =
        match SignalDispatcher::start(&SERVICE_SIGNALS, control.clone(), service_control_code) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                controller.abandon();
                return Err(e).context("Could not register service control handler");
            }
        };

    let source = ServiceManagerSource::new(control, Box::new(HotplugNotifier));
    Ok(generic_main(&controller, loaded, Box::new(source), true))
}

/// Run in the foreground until interrupted
pub fn run_as_console(loaded: &LoadedConfig) -> Result<RunOutcome> {
    let controller = ServiceController::new(Box::new(ConsoleReporter));

    let dispatcher = match SignalDispatcher::start(
        &CONSOLE_SIGNALS,
        controller.handle(),
        console_control_code,
    ) {
        Ok(dispatcher) => Some(dispatcher),
        Err(e) => {
            warn!("Could not set console signal handler: {}", e);
            None
        }
    };

    let source = ListenerSource::<HotplugReceiver, _>::new(HotplugReceiver::create);
    let outcome = generic_main(&controller, loaded, Box::new(source), false);

    drop(dispatcher);
    Ok(outcome)
}

fn generic_main(
    controller: &ServiceController,
    loaded: &LoadedConfig,
    source: Box<dyn DeviceEventSource>,
    as_service: bool,
) -> RunOutcome {
    let config = &loaded.config;

    info!(
        "{} {} started{}",
        DAEMON_NAME,
        env!("CARGO_PKG_VERSION"),
        if as_service { " (as service)" } else { "" }
    );

    if loaded.has_error() {
        warn!(
            "Errors found in config file '{}', run with --check-config option for details",
            loaded.path.display()
        );
    }

    let subsystems = Subsystems {
        usb: Rc::new(RefCell::new(RusbSubsystem::new(config.usb.filters.clone()))),
        network: Box::new(TcpNetwork::new(config.network.bind_addr())),
        source,
    };

    let outcome = controller.run(subsystems);
    if let RunOutcome::Failed(e) = &outcome {
        error!("{}", e);
    }

    info!("{} {} stopped", DAEMON_NAME, env!("CARGO_PKG_VERSION"));
    outcome
}
