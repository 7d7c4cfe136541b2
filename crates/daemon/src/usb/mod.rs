//! USB subsystem
//!
//! The daemon only needs three entry points from the USB side: bring the
//! subsystem up, rescan the bus when a hotplug notification arrives, and
//! shut it down. Rescans are idempotent, so they can be triggered as often
//! as notifications come in.

use rusb::{Context, UsbContext};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info};

pub const LOG_TARGET: &str = module_path!();

/// Linux Foundation root hubs are never bridged
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

#[derive(Debug, Error)]
pub enum UsbError {
    #[error("USB subsystem is not initialized")]
    NotInitialized,

    #[error("USB error: {0}")]
    Rusb(#[from] rusb::Error),
}

pub trait UsbSubsystem {
    fn init(&mut self) -> Result<(), UsbError>;

    /// Re-enumerate devices after a hotplug notification
    fn rescan(&mut self) -> Result<(), UsbError>;

    fn exit(&mut self);
}

/// USB subsystem shared between bring-up and the event loop callbacks
pub type SharedUsb = Rc<RefCell<dyn UsbSubsystem>>;

/// Identity of an enumerated device, ordered for stable log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DeviceKey {
    bus: u8,
    address: u8,
    vendor_id: u16,
    product_id: u16,
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at bus {:03} address {:03}",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// libusb-backed USB subsystem
pub struct RusbSubsystem {
    context: Option<Context>,
    filters: Vec<String>,
    known: BTreeSet<DeviceKey>,
}

impl RusbSubsystem {
    pub fn new(filters: Vec<String>) -> Self {
        Self {
            context: None,
            filters,
            known: BTreeSet::new(),
        }
    }

    /// Enumerate currently connected devices that pass the filters
    fn enumerate(&self, context: &Context) -> Result<BTreeSet<DeviceKey>, UsbError> {
        let mut found = BTreeSet::new();

        for device in context.devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };

            if desc.vendor_id() == ROOT_HUB_VENDOR_ID && desc.class_code() == HUB_CLASS {
                continue;
            }

            if !check_filter(desc.vendor_id(), desc.product_id(), &self.filters) {
                continue;
            }

            found.insert(DeviceKey {
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
            });
        }

        Ok(found)
    }
}

impl UsbSubsystem for RusbSubsystem {
    fn init(&mut self) -> Result<(), UsbError> {
        let context = Context::new()?;
        self.known = self.enumerate(&context)?;
        self.context = Some(context);

        info!("USB subsystem initialized with {} devices", self.known.len());
        Ok(())
    }

    fn rescan(&mut self) -> Result<(), UsbError> {
        let context = self.context.as_ref().ok_or(UsbError::NotInitialized)?;
        let found = self.enumerate(context)?;

        for added in found.difference(&self.known) {
            info!("Added USB device {}", added);
        }
        for removed in self.known.difference(&found) {
            info!("Removed USB device {}", removed);
        }

        debug!("Rescanned USB bus, {} devices", found.len());
        self.known = found;
        Ok(())
    }

    fn exit(&mut self) {
        self.known.clear();
        if self.context.take().is_some() {
            debug!("USB subsystem shut down");
        }
    }
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: "0xVID:0xPID", "0xVID:*", "*:0xPID" or "*:*". An empty
/// filter list allows everything.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    let matches = |pattern: &str, value: u16| {
        pattern == "*"
            || u16::from_str_radix(pattern.trim_start_matches("0x").trim_start_matches("0X"), 16)
                .map(|v| v == value)
                .unwrap_or(false)
    };

    filters.iter().any(|filter| match filter.split_once(':') {
        Some((filter_vid, filter_pid)) => matches(filter_vid, vid) && matches(filter_pid, pid),
        None => false,
    })
}
