//! Protocol engine for the half-duplex RS485 bus.
//!
//! The [`Engine`] owns the port, the flow-control pin and the [`CommandQueue`].
//! It is driven by calling [`Engine::tick`] at a short, fixed interval.
//! Each tick performs the following steps without blocking:
//!
//! 1. Abandon the command in flight if its reply timeout has elapsed.
//! 2. Drain all available bytes, discarding the echo of the last transmission
//!    and dispatching complete client frames to the registered devices.
//! 3. Discard a partial frame if no byte arrived within the idle gap.
//! 4. Transmit the next queued command if no command is in flight.

use crate::{
    Command, CommandQueue, Fault, Result,
    device::{Device, Registry},
    frame::{FrameParser, FrameResult},
};
use core::{convert::Infallible, time::Duration};
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use log::{debug, trace, warn};

/// Time to wait for a reply before abandoning a command.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// Silence after which a partially received frame is discarded.
pub const IDLE_GAP: Duration = Duration::from_millis(50);

/// Maximum length of a received frame in bytes.
pub const MAX_FRAME_LEN: usize = 100;

/// State of the [`Engine`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum State {
    /// No command is in flight, the next queued command may be sent.
    Idle,
    /// A command was sent and its reply is awaited.
    WaitingForReply,
}

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use emh1::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_reply_timeout(Duration::from_millis(200))
///     .with_idle_gap(None);
///
/// assert_eq!(config.reply_timeout, Duration::from_millis(200));
/// ```
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct EngineConfig {
    /// Time to wait for a reply before abandoning a command.
    pub reply_timeout: Duration,
    /// Silence after which a partially received frame is discarded.
    ///
    /// Must be longer than the tick interval. `None` disables the reset.
    pub idle_gap: Option<Duration>,
    /// Maximum length of a received frame in bytes.
    pub max_frame_len: usize,
    /// Whether transmitted bytes are reflected back on the receive line.
    pub suppress_echo: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout: REPLY_TIMEOUT,
            idle_gap: Some(IDLE_GAP),
            max_frame_len: MAX_FRAME_LEN,
            suppress_echo: true,
        }
    }
}

impl EngineConfig {
    /// Sets the reply timeout.
    #[must_use]
    pub fn with_reply_timeout(self, reply_timeout: Duration) -> Self {
        Self {
            reply_timeout,
            ..self
        }
    }

    /// Sets the idle gap, or disables it with `None`.
    #[must_use]
    pub fn with_idle_gap(self, idle_gap: Option<Duration>) -> Self {
        Self { idle_gap, ..self }
    }

    /// Sets the maximum frame length.
    #[must_use]
    pub fn with_max_frame_len(self, max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            ..self
        }
    }

    /// Enables or disables echo suppression.
    ///
    /// Disable it for full-duplex adapters that do not reflect transmitted bytes.
    #[must_use]
    pub fn with_echo_suppression(self, suppress_echo: bool) -> Self {
        Self {
            suppress_echo,
            ..self
        }
    }
}

/// Flow-control pin for transceivers with automatic direction control.
#[derive(Default, Copy, Clone, Debug)]
pub struct NoFlowControl;

impl PinErrorType for NoFlowControl {
    type Error = Infallible;
}

impl OutputPin for NoFlowControl {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }
}

/// Command awaiting its reply.
#[derive(Debug)]
struct InFlight {
    cmd: Command,
    sent_at: Duration,
}

/// Master-side protocol engine.
///
/// Requires a port that implements [`Read`], [`ReadReady`] and [`Write`],
/// and a flow-control pin that is driven high while transmitting.
/// At most one command is in flight at any time.
///
/// # Examples
///
/// ```no_run
/// use core::time::Duration;
/// use emh1::{Engine, NoFlowControl, device::{Registry, charger::{Channel, Charger}}};
///
/// # fn example<P>(port: P, now: Duration) -> emh1::Result<(), P::Error>
/// # where
/// #     P: emh1::embedded_io::Read + emh1::embedded_io::ReadReady + emh1::embedded_io::Write,
/// # {
/// let mut engine = Engine::new(port, NoFlowControl);
/// let mut devices: Registry<Charger<Vec<(Channel, f32)>>> = Registry::new();
///
/// engine.queue().set_current(16.0);
/// engine.tick(now, &mut devices)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine<P, F = NoFlowControl> {
    port: P,
    flow_control: F,
    config: EngineConfig,
    parser: FrameParser,
    queue: CommandQueue,
    in_flight: Option<InFlight>,
    echo_remaining: usize,
    last_rx: Duration,
}

impl<P: Read + ReadReady + Write, F: OutputPin> Engine<P, F> {
    /// Constructs a new engine with the default configuration.
    pub fn new(port: P, flow_control: F) -> Self {
        Self::with_config(port, flow_control, EngineConfig::default())
    }

    /// Constructs a new engine.
    pub fn with_config(port: P, flow_control: F, config: EngineConfig) -> Self {
        Self {
            port,
            flow_control,
            config,
            parser: FrameParser::new(config.max_frame_len),
            queue: CommandQueue::new(),
            in_flight: None,
            echo_remaining: 0,
            last_rx: Duration::ZERO,
        }
    }

    /// Returns the queue of commands awaiting transmission.
    pub fn queue(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> State {
        match self.in_flight {
            Some(_) => State::WaitingForReply,
            None => State::Idle,
        }
    }

    /// Returns the command in flight, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<&Command> {
        self.in_flight.as_ref().map(|pending| &pending.cmd)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Consumes the engine, returning the port and the flow-control pin.
    pub fn release(self) -> (P, F) {
        (self.port, self.flow_control)
    }

    /// Services the bus once.
    ///
    /// `now` is a monotonic timestamp, e.g. the time since boot.
    /// Replies are dispatched to `devices`.
    ///
    /// Protocol anomalies are logged and never returned.
    /// An error is only returned if the port fails,
    /// in which case a command being transmitted is dropped.
    pub fn tick<D: Device>(
        &mut self,
        now: Duration,
        devices: &mut Registry<D>,
    ) -> Result<(), P::Error> {
        self.check_reply_timeout(now);
        self.receive(now, devices)?;
        self.check_idle_gap(now);

        if self.in_flight.is_none() {
            if let Some(cmd) = self.queue.pop() {
                self.transmit(cmd, now)?;
            }
        }

        Ok(())
    }

    fn check_reply_timeout(&mut self, now: Duration) {
        let Some(pending) = &self.in_flight else {
            return;
        };

        if now.saturating_sub(pending.sent_at) > self.config.reply_timeout {
            warn!("{}, abandoning '{}'", Fault::ReplyTimeout, pending.cmd);

            self.in_flight = None;
            self.echo_remaining = 0;
            self.parser.clear();
        }
    }

    /// Must run after the port has been drained.
    fn check_idle_gap(&mut self, now: Duration) {
        let Some(gap) = self.config.idle_gap else {
            return;
        };

        if !self.parser.is_empty() && now.saturating_sub(self.last_rx) > gap {
            debug!("Discarding stale partial frame of {} bytes", self.parser.len());

            self.parser.clear();
        }
    }

    /// Drains all available bytes from the port.
    fn receive<D: Device>(
        &mut self,
        now: Duration,
        devices: &mut Registry<D>,
    ) -> Result<(), P::Error> {
        while self.port.read_ready()? {
            let mut buf = [0x00];

            if self.port.read(&mut buf)? == 0 {
                break;
            }

            let byte = buf[0];

            self.last_rx = now;

            if self.echo_remaining > 0 {
                trace!("Discard echo: {:?}", char::from(byte));
                self.echo_remaining -= 1;

                continue;
            }

            let replied = match self.parser.feed(byte) {
                FrameResult::Incomplete => continue,
                FrameResult::ClientFrame(frame) => {
                    debug!(
                        "RX <- device {}, function {:02}, payload '{}'",
                        frame.address,
                        frame.function,
                        frame.payload.escape_ascii()
                    );

                    if let Err(fault) = devices.dispatch(frame.address, frame.function, frame.payload)
                    {
                        warn!("{fault}");
                    }

                    true
                }
                FrameResult::MasterFrame => {
                    debug!("Ignoring master transmission");

                    false
                }
                FrameResult::Invalid => {
                    warn!("{}", Fault::MalformedFrame);

                    false
                }
            };

            self.parser.clear();

            // Replies are not matched against the command in flight
            if replied {
                if let Some(pending) = self.in_flight.take() {
                    debug!("Reply received for '{}'", pending.cmd);
                }
            }
        }

        Ok(())
    }

    /// Sends a command, framed by the flow-control pin.
    fn transmit(&mut self, cmd: Command, now: Duration) -> Result<(), P::Error> {
        let data = cmd.to_bytes();

        debug!("TX -> '{cmd}'");
        trace!("Write to port: {:02x?}", data);

        self.drive_flow_control(true);

        let res = self
            .port
            .write_all(&data)
            .and_then(|()| self.port.flush());

        self.drive_flow_control(false);
        res?;

        if self.config.suppress_echo {
            self.echo_remaining = data.len();
        }

        self.in_flight = Some(InFlight { cmd, sent_at: now });

        Ok(())
    }

    fn drive_flow_control(&mut self, transmit: bool) {
        let res = if transmit {
            self.flow_control.set_high()
        } else {
            self.flow_control.set_low()
        };

        if let Err(err) = res {
            warn!("Failed to drive flow control pin: {err:?}");
        }
    }
}
