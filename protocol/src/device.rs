//! Logical devices on the bus.
//!
//! Provides a [`Device`] trait implemented by everything that decodes replies,
//! such as the [`charger::Charger`]. Devices are registered under a bus address
//! with a [`Registry`], which the [`Engine`](crate::Engine) uses to dispatch
//! received frames.
//!
//! Devices never access the bus directly. They append commands to the
//! [`CommandQueue`] during [`Device::update`], and the engine decides when
//! those commands are transmitted.

pub mod charger;

use crate::{CommandQueue, Fault};
use alloc::{boxed::Box, vec::Vec};
use log::{debug, warn};

/// Trait implemented by all logical devices.
///
/// # Examples
///
/// ```
/// use emh1::{CommandQueue, Fault, device::{Device, Registry}};
///
/// struct ModeLogger;
///
/// impl Device for ModeLogger {
///     fn on_frame(&mut self, function: u8, payload: &[u8]) -> Result<(), Fault> {
///         match function {
///             2 => {
///                 println!("Mode: {}", payload.escape_ascii());
///
///                 Ok(())
///             }
///             _ => Err(Fault::UnknownFunction(function)),
///         }
///     }
///
///     fn update(&mut self, queue: &mut CommandQueue) {
///         queue.request_mode();
///     }
/// }
///
/// let mut devices = Registry::new();
///
/// devices.register(1, ModeLogger);
///
/// assert_eq!(devices.dispatch(1, 2, b"0002"), Ok(1));
/// ```
pub trait Device {
    /// Handles a frame received from the device's address.
    ///
    /// # Errors
    ///
    /// - [`Fault::UnknownFunction`] if the device does not handle the function code.
    fn on_frame(&mut self, function: u8, payload: &[u8]) -> Result<(), Fault>;

    /// Runs one polling cycle, queueing the commands the device needs.
    fn update(&mut self, queue: &mut CommandQueue);
}

impl<T: Device + ?Sized> Device for Box<T> {
    fn on_frame(&mut self, function: u8, payload: &[u8]) -> Result<(), Fault> {
        (**self).on_frame(function, payload)
    }

    fn update(&mut self, queue: &mut CommandQueue) {
        (**self).update(queue);
    }
}

impl<T: Device + ?Sized> Device for &mut T {
    fn on_frame(&mut self, function: u8, payload: &[u8]) -> Result<(), Fault> {
        (**self).on_frame(function, payload)
    }

    fn update(&mut self, queue: &mut CommandQueue) {
        (**self).update(queue);
    }
}

/// Handle identifying a registered device.
///
/// Handles stay valid until the device is deregistered.
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub struct DeviceHandle(usize);

#[derive(Debug)]
struct Entry<D> {
    address: u8,
    device: D,
}

/// Registry mapping bus addresses to devices.
///
/// Several devices may share an address, in which case all of them receive its frames.
/// Use `Registry<Box<dyn Device>>` to register devices of different types.
#[derive(Debug)]
pub struct Registry<D> {
    entries: Vec<Option<Entry<D>>>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D: Device> Registry<D> {
    /// Constructs an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device under a bus address.
    pub fn register(&mut self, address: u8, device: D) -> DeviceHandle {
        debug!("Registering device at address {address}");

        let entry = Some(Entry { address, device });

        // Reuse slots of deregistered devices
        if let Some(idx) = self.entries.iter().position(Option::is_none) {
            self.entries[idx] = entry;

            DeviceHandle(idx)
        } else {
            self.entries.push(entry);

            DeviceHandle(self.entries.len() - 1)
        }
    }

    /// Removes a device, handing it back to the caller.
    pub fn deregister(&mut self, handle: DeviceHandle) -> Option<D> {
        let entry = self.entries.get_mut(handle.0)?.take()?;

        debug!("Deregistered device at address {}", entry.address);

        Some(entry.device)
    }

    /// Returns a reference to a registered device.
    #[must_use]
    pub fn get(&self, handle: DeviceHandle) -> Option<&D> {
        self.entries
            .get(handle.0)?
            .as_ref()
            .map(|entry| &entry.device)
    }

    /// Returns a mutable reference to a registered device.
    pub fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut D> {
        self.entries
            .get_mut(handle.0)?
            .as_mut()
            .map(|entry| &mut entry.device)
    }

    /// Returns the address a device is registered under.
    #[must_use]
    pub fn address(&self, handle: DeviceHandle) -> Option<u8> {
        self.entries.get(handle.0)?.as_ref().map(|entry| entry.address)
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Returns `true` if no devices are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forwards a frame to every device registered under `address`.
    ///
    /// Faults reported by individual devices are logged.
    /// Returns the number of devices the frame was forwarded to.
    ///
    /// # Errors
    ///
    /// - [`Fault::UnknownDevice`] if no device is registered under `address`.
    pub fn dispatch(&mut self, address: u8, function: u8, payload: &[u8]) -> Result<usize, Fault> {
        let mut count = 0;

        for entry in self
            .entries
            .iter_mut()
            .flatten()
            .filter(|entry| entry.address == address)
        {
            if let Err(fault) = entry.device.on_frame(function, payload) {
                warn!("Device at address {address}: {fault}");
            }

            count += 1;
        }

        match count {
            0 => Err(Fault::UnknownDevice(address)),
            count => Ok(count),
        }
    }

    /// Runs one polling cycle of every registered device.
    pub fn update_all(&mut self, queue: &mut CommandQueue) {
        for entry in self.entries.iter_mut().flatten() {
            entry.device.update(queue);
        }
    }
}
