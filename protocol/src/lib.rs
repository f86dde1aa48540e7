//! Poll and control ABL eMH1 charging stations via their proprietary RS485 protocol.
//!
//! # Overview
//!
//! The `emh1` crate implements the master side of the ASCII command/response
//! protocol spoken by the eMH1 charging-station controller.
//! It offers a non-blocking, platform-agnostic API that is driven
//! by periodically calling a tick function from the application's main loop.
//!
//! Depending on your needs, you can:
//!
//! - Use the [`Engine`] to frame, queue and transmit commands over a half-duplex bus.
//! - Register devices (e.g. a [`device::charger::Charger`]) with a [`device::Registry`]
//!   to have replies decoded and published.
//! - Work directly with the wire format in the [`frame`] module.
//!
//! # Getting started
//!
//! The controller is attached to an RS485 bus, configured as follows:
//!
//! - **Baud rate:** 38400
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! The bus is half-duplex: every byte sent by the master is reflected back
//! on the receive line. The [`Engine`] discards this echo automatically.
//!
//! If you enable the `native-serial` feature, you can obtain a compatible
//! serial port instance using `serial::open`.
//!
//! # Examples
//!
//! ```no_run
//! use core::time::Duration;
//! use emh1::{
//!     Engine, NoFlowControl,
//!     device::{Registry, charger::{Channel, Charger}},
//! };
//!
//! # fn example<P>(port: P, now: Duration) -> emh1::Result<(), P::Error>
//! # where
//! #     P: emh1::embedded_io::Read + emh1::embedded_io::ReadReady + emh1::embedded_io::Write,
//! # {
//! let mut engine = Engine::new(port, NoFlowControl);
//! let mut devices = Registry::new();
//!
//! let readings: Vec<(Channel, f32)> = Vec::new();
//!
//! devices.register(1, Charger::new(readings));
//!
//! // Every few seconds
//! devices.update_all(engine.queue());
//!
//! // Every few milliseconds
//! engine.tick(now, &mut devices)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol details
//!
//! Frames are plain ASCII lines terminated by `CR LF`.
//! Frames sent by the master start with `!`, replies from the controller start with `>`:
//!
//! ```text
//! !0 02\r\n          master: query mode of module 0
//! >1 02 0002\r\n     client: device 1 reports mode 2
//! ```
//!
//! Only one command may be outstanding at a time. A command that is not
//! answered within the reply timeout is abandoned.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod command;
pub mod device;
pub mod engine;
pub mod frame;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use command::{Command, CommandQueue, Function};
pub use embedded_hal;
pub use embedded_io;
pub use engine::{Engine, EngineConfig, NoFlowControl, State};

use core::fmt::{Display, Formatter};

/// Baud rate used on the RS485 bus.
pub const BAUD_RATE: u32 = 38400;

/// Address of the module all outbound commands are sent to.
pub const MODULE_ADDRESS: u8 = 0;

/// A specialized [`Result`] type for [`Engine`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Engine`] operations.
///
/// Protocol anomalies are never returned as errors, see [`Fault`] instead.
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Non-fatal protocol anomaly.
///
/// Faults are logged where they occur and degrade to "no data this cycle".
/// They never interrupt the polling loop.
#[non_exhaustive]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Fault {
    /// A frame had an unrecognized start marker or a truncated structure.
    MalformedFrame,
    /// A valid frame was received from an address without a registered device.
    UnknownDevice(u8),
    /// A valid frame carried a function code the device does not handle.
    UnknownFunction(u8),
    /// No valid reply arrived before the reply timeout elapsed.
    ReplyTimeout,
    /// The device stopped answering and is considered offline.
    DeviceOffline,
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::MalformedFrame => write!(f, "malformed frame"),
            Self::UnknownDevice(addr) => write!(f, "frame from unknown device address {addr}"),
            Self::UnknownFunction(code) => write!(f, "unhandled function code {code:02}"),
            Self::ReplyTimeout => write!(f, "reply timeout"),
            Self::DeviceOffline => write!(f, "device offline"),
        }
    }
}

impl core::error::Error for Fault {}
