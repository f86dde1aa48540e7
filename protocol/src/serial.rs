//! Native serial port support for the [`Engine`](crate::Engine).
//!
//! Uses the [`serial2`](https://crates.io/crates/serial2) crate.

extern crate std;

use crate::{BAUD_RATE, Error};
use core::time::Duration;
use embedded_io::{ErrorType, Read, ReadReady, Write};
use serial2::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};
use std::io::ErrorKind;

/// Time to wait for a byte when polling for readiness.
///
/// Zero makes [`ReadReady::read_ready`] return immediately.
const POLL_TIMEOUT: Duration = Duration::ZERO;

/// Serial port implementing [`Read`], [`ReadReady`] and [`Write`].
///
/// Readiness is determined by reading ahead a single byte,
/// which is returned by the next read.
#[derive(Debug)]
pub struct Port {
    inner: SerialPort,
    peeked: Option<u8>,
}

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
pub type PortError = <Port as ErrorType>::Error;

impl ErrorType for Port {
    type Error = std::io::Error;
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(byte) = self.peeked.take() {
            buf[0] = byte;

            return Ok(1);
        }

        loop {
            match self.inner.read(buf) {
                Err(err) if is_timeout(&err) => {}
                res => return res,
            }
        }
    }
}

impl ReadReady for Port {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        if self.peeked.is_some() {
            return Ok(true);
        }

        let mut byte = [0];

        match self.inner.read(&mut byte) {
            Ok(0) => Ok(false),
            Ok(_) => {
                self.peeked = Some(byte[0]);

                Ok(true)
            }
            Err(err) if is_timeout(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Write for Port {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush()
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Opens a native serial port at the given path.
///
/// The port is configured for the eMH1 bus (38400 baud, 8N1, no flow control).
/// Returns a [`Port`] that can be passed to [`Engine::new`](crate::Engine::new).
pub fn open(path: &str) -> Result<Port, Error<std::io::Error>> {
    let mut port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(BAUD_RATE)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::One);
        settings.set_parity(Parity::None);
        settings.set_flow_control(FlowControl::None);

        Ok(settings)
    })?;

    port.set_read_timeout(POLL_TIMEOUT)?;
    port.discard_buffers()?;

    Ok(Port {
        inner: port,
        peeked: None,
    })
}
