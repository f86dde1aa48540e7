//! Outbound commands and the queue feeding the [`Engine`](crate::Engine).

use crate::{
    MODULE_ADDRESS,
    frame::{self, NUMBER_WIDTH},
};
use alloc::{collections::vec_deque::VecDeque, vec::Vec};
use core::fmt::{Display, Formatter};
use log::{debug, error};
use strum::FromRepr;

/// PWM value signalling that charging is not permitted.
pub const PWM_NO_CURRENT: u16 = 999;

/// Smallest PWM value the charger accepts (10 % duty cycle, 6 A).
pub const PWM_MIN: u16 = 100;

/// Function code of a command or reply.
///
/// On the wire, function codes are encoded as two ASCII digits.
#[derive(FromRepr, strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "title_case")]
#[repr(u8)]
pub enum Function {
    /// Query the operating mode.
    Mode = 2,
    /// Query the present charging current limit.
    Current = 11,
    /// Set the charging current limit.
    SetCurrent = 12,
    /// Query the device address, also used as discovery broadcast.
    Address = 23,
    /// Stop charging.
    StopCharging = 25,
    /// Query the maximum charging current.
    MaxCurrent = 26,
    /// Disable charging (sets the break-charge flag).
    DisableCharging = 27,
    /// Enable charging (clears the break-charge flag).
    EnableCharging = 28,
    /// Query whether charging is enabled.
    ChargingEnabled = 29,
    /// Jump to state A' (vehicle not detected).
    JumpToStateA = 30,
    /// Restart the controller.
    Restart = 31,
}

impl Function {
    /// Returns the function code as two ASCII digits.
    #[must_use]
    pub fn to_ascii(self) -> [u8; 2] {
        let code = self as u8;

        [b'0' + code / 10, b'0' + code % 10]
    }
}

/// A pending outbound request.
///
/// Commands are immutable once constructed.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Command {
    address: u8,
    function: [u8; 2],
    payload: Vec<u8>,
}

impl Command {
    /// Constructs a new command.
    ///
    /// Returns `None` if `address` is not a single digit
    /// or the payload contains non-digit characters.
    #[must_use]
    pub fn new(address: u8, function: Function, payload: &[u8]) -> Option<Self> {
        if address > 9 || !payload.iter().all(u8::is_ascii_digit) {
            return None;
        }

        Some(Self::unchecked(address, function, payload))
    }

    fn unchecked(address: u8, function: Function, payload: &[u8]) -> Self {
        let cmd = Self {
            address,
            function: function.to_ascii(),
            payload: payload.to_vec(),
        };

        debug!("New command: {function} {cmd:?}");

        cmd
    }

    /// Returns the destination address.
    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Returns the two ASCII digits of the function code.
    #[must_use]
    pub fn function(&self) -> [u8; 2] {
        self.function
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Renders the command as a master frame.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        frame::serialize(self.address, self.function, &self.payload)
    }
}

impl Display for Command {
    /// Formats the command as its frame without the terminator, e.g. `!0 12 0160`.
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "{}", self.to_bytes().trim_ascii_end().escape_ascii())
    }
}

/// Converts a charging current in amperes into a PWM value.
///
/// The PWM value is the duty cycle in tenths of a percent, where 1 % corresponds to 0.6 A.
/// Currents below the charger's minimum yield [`PWM_NO_CURRENT`].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pwm_from_amps(amps: f32) -> u16 {
    let pwm = amps * 100.0 / 6.0 + 0.5;

    if pwm.is_nan() || pwm < f32::from(PWM_MIN) {
        PWM_NO_CURRENT
    } else {
        // Saturates above u16::MAX, which cannot be rendered anyway
        pwm as u16
    }
}

/// Converts a PWM value into a charging current in amperes.
///
/// [`PWM_NO_CURRENT`] yields `0.0`.
#[must_use]
pub fn amps_from_pwm(pwm: u16) -> f32 {
    match pwm {
        PWM_NO_CURRENT => 0.0,
        pwm => f32::from(pwm) * 6.0 / 100.0,
    }
}

/// FIFO queue of commands awaiting transmission.
///
/// The queue is owned by the [`Engine`](crate::Engine), which transmits
/// one command at a time. Producers may only append.
///
/// All convenience methods address the module at [`MODULE_ADDRESS`].
#[derive(Default, Debug)]
pub struct CommandQueue(VecDeque<Command>);

impl CommandQueue {
    /// Constructs an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command.
    pub fn push(&mut self, cmd: Command) {
        self.0.push_back(cmd);
    }

    /// Returns the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no commands are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the queued commands, front first.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.0.iter()
    }

    pub(crate) fn pop(&mut self) -> Option<Command> {
        self.0.pop_front()
    }

    fn push_module(&mut self, function: Function, payload: &[u8]) {
        self.push(Command::unchecked(MODULE_ADDRESS, function, payload));
    }

    /// Queries the operating mode.
    pub fn request_mode(&mut self) {
        self.push_module(Function::Mode, b"");
    }

    /// Queries the present charging current limit.
    pub fn request_current(&mut self) {
        self.push_module(Function::Current, b"");
    }

    /// Sets the charging current limit.
    ///
    /// Currents below 6 A are sent as "no current permitted".
    /// Currents too large to be encoded are logged and discarded.
    pub fn set_current(&mut self, amps: f32) {
        let pwm = pwm_from_amps(amps);

        match frame::encode_number(pwm) {
            Some(payload) => self.push_module(Function::SetCurrent, &payload),
            None => error!(
                "Failed to render PWM value {pwm} for {amps} A in {NUMBER_WIDTH} digits"
            ),
        }
    }

    /// Queries the device address.
    ///
    /// Unconfigured devices answer this broadcast, which is used for (re)discovery.
    pub fn request_address(&mut self) {
        self.push_module(Function::Address, b"");
    }

    /// Stops charging.
    pub fn stop_charging(&mut self) {
        self.push_module(Function::StopCharging, b"");
    }

    /// Queries the maximum charging current.
    pub fn request_max_current(&mut self) {
        self.push_module(Function::MaxCurrent, b"");
    }

    /// Enables or disables charging.
    pub fn set_charging_enabled(&mut self, enable: bool) {
        if enable {
            self.push_module(Function::EnableCharging, b"");
        } else {
            self.push_module(Function::DisableCharging, b"");
        }
    }

    /// Queries whether charging is enabled.
    pub fn request_charging_enabled(&mut self) {
        self.push_module(Function::ChargingEnabled, b"");
    }

    /// Forces the controller into state A' (vehicle not detected).
    pub fn jump_to_state_a(&mut self) {
        self.push_module(Function::JumpToStateA, b"");
    }

    /// Restarts the controller.
    pub fn restart(&mut self) {
        self.push_module(Function::Restart, b"");
    }
}
