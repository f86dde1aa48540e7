//! Device support for ABL eMH1 charging stations.
//!
//! The [`Charger`] decodes replies into readings, which are published to a [`Sink`],
//! and queues the periodic data poll. It also tracks unanswered poll cycles
//! to detect a charger that went offline and to trigger its rediscovery.

use crate::{
    CommandQueue, Fault, Function,
    command::amps_from_pwm,
    device::Device,
    frame::{self, NUMBER_WIDTH},
};
use alloc::vec::Vec;
use log::{debug, info, warn};

/// Number of unanswered poll cycles after which the charger is considered offline.
pub const REDISCOVERY_THRESHOLD: u8 = 5;

/// Number of poll cycles between two address requests.
pub const ADDRESS_REFRESH_INTERVAL: u16 = 10;

/// Mode published while the charger is offline.
pub const MODE_OFFLINE: f32 = -1.0;

/// Output channel of a charger reading.
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Hash, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    /// Operating mode.
    Mode,
    /// Present charging current limit in `A`.
    Current,
    /// Maximum charging current in `A`.
    MaxCurrent,
    /// Whether charging is enabled (`1.0`) or disabled (`0.0`).
    ChargingEnabled,
}

/// Receiver of charger readings.
///
/// Unknown values are published as NaN, except the mode, which is published as [`MODE_OFFLINE`].
pub trait Sink {
    /// Publishes a reading.
    fn publish(&mut self, channel: Channel, value: f32);
}

impl Sink for Vec<(Channel, f32)> {
    fn publish(&mut self, channel: Channel, value: f32) {
        self.push((channel, value));
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn publish(&mut self, channel: Channel, value: f32) {
        (**self).publish(channel, value);
    }
}

/// Charger configuration.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ChargerConfig {
    /// Number of unanswered poll cycles after which the charger is considered offline.
    pub rediscovery_threshold: u8,
    /// Number of poll cycles between two address requests.
    pub address_refresh_interval: u16,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            rediscovery_threshold: REDISCOVERY_THRESHOLD,
            address_refresh_interval: ADDRESS_REFRESH_INTERVAL,
        }
    }
}

impl ChargerConfig {
    /// Sets the rediscovery threshold.
    #[must_use]
    pub fn with_rediscovery_threshold(self, rediscovery_threshold: u8) -> Self {
        Self {
            rediscovery_threshold,
            ..self
        }
    }

    /// Sets the address refresh interval.
    #[must_use]
    pub fn with_address_refresh_interval(self, address_refresh_interval: u16) -> Self {
        Self {
            address_refresh_interval,
            ..self
        }
    }
}

/// Charging station device implementation.
///
/// A new charger starts out unconfirmed: its first update requests the address,
/// the second one publishes offline readings and broadcasts a discovery request.
/// Regular data polls follow from the third update onwards.
///
/// # Examples
///
/// ```
/// use emh1::device::{Device, charger::{Channel, Charger}};
///
/// let mut charger = Charger::new(Vec::new());
///
/// charger.on_frame(11, b"0160").unwrap();
///
/// assert_eq!(charger.sink(), &[(Channel::Current, 9.6)]);
/// ```
#[derive(Debug)]
pub struct Charger<S> {
    sink: S,
    config: ChargerConfig,
    no_reply_count: u8,
    config_age: u16,
}

impl<S: Sink> Charger<S> {
    /// Constructs a new charger with the default configuration.
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, ChargerConfig::default())
    }

    /// Constructs a new charger.
    pub fn with_config(sink: S, config: ChargerConfig) -> Self {
        Self {
            sink,
            config,
            no_reply_count: config.rediscovery_threshold,
            config_age: config.address_refresh_interval,
        }
    }

    /// Returns a reference to the sink.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns a mutable reference to the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Returns the number of consecutive poll cycles without a recognized reply.
    #[must_use]
    pub fn no_reply_count(&self) -> u8 {
        self.no_reply_count
    }

    /// Returns `true` if enough poll cycles went unanswered to consider the charger offline.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.no_reply_count >= self.config.rediscovery_threshold
    }

    fn publish_offline(&mut self) {
        self.sink.publish(Channel::Mode, MODE_OFFLINE);
        self.sink.publish(Channel::Current, f32::NAN);
        self.sink.publish(Channel::MaxCurrent, f32::NAN);
        self.sink.publish(Channel::ChargingEnabled, f32::NAN);
    }
}

/// Decodes a four-digit numeric field.
fn decode_field(payload: &[u8]) -> u16 {
    // Four digits always fit
    u16::try_from(frame::decode_number(payload, NUMBER_WIDTH)).unwrap_or(u16::MAX)
}

fn bool_value(val: bool) -> f32 {
    f32::from(u8::from(val))
}

impl<S: Sink> Device for Charger<S> {
    fn on_frame(&mut self, function: u8, payload: &[u8]) -> Result<(), Fault> {
        let Some(function) = Function::from_repr(function) else {
            return Err(Fault::UnknownFunction(function));
        };

        match function {
            Function::Mode => {
                let mode = decode_field(payload);

                info!("Mode is {mode}");
                self.sink.publish(Channel::Mode, f32::from(mode));
            }
            Function::Current => {
                let amps = amps_from_pwm(decode_field(payload));

                info!("Current is {amps} A");
                self.sink.publish(Channel::Current, amps);
            }
            Function::MaxCurrent => {
                let amps = amps_from_pwm(decode_field(payload));

                info!("Max current is {amps} A");
                self.sink.publish(Channel::MaxCurrent, amps);
            }
            Function::ChargingEnabled => {
                let enabled = decode_field(payload) != 0;

                info!("Charging enabled: {enabled}");
                self.sink.publish(Channel::ChargingEnabled, bool_value(enabled));
            }
            Function::DisableCharging => {
                info!("Confirmed: charging disabled");
                self.sink.publish(Channel::ChargingEnabled, bool_value(false));
            }
            Function::EnableCharging => {
                info!("Confirmed: charging enabled");
                self.sink.publish(Channel::ChargingEnabled, bool_value(true));
            }
            Function::Address => info!("Address is {}", decode_field(payload)),
            Function::SetCurrent => info!("Confirmed: current set"),
            Function::StopCharging => info!("Confirmed: charging stopped"),
            Function::JumpToStateA => info!("Confirmed: jump to state A'"),
            Function::Restart => info!("Confirmed: restart"),
        }

        self.no_reply_count = 0;

        Ok(())
    }

    fn update(&mut self, queue: &mut CommandQueue) {
        // Address refresh takes priority over data polling
        if self.config_age >= self.config.address_refresh_interval {
            debug!("Requesting device address");
            queue.request_address();
            self.config_age = 0;

            return;
        }

        self.config_age = self.config_age.saturating_add(1);

        if self.is_offline() {
            // Configured devices ignore the discovery broadcast,
            // so live data is polled again on the next update.
            warn!("{}, broadcasting discovery", Fault::DeviceOffline);
            self.publish_offline();
            queue.request_address();
            self.no_reply_count = 0;
        } else {
            debug!("Requesting data");
            queue.request_mode();
            queue.request_current();
            queue.request_max_current();
            queue.request_charging_enabled();
            self.no_reply_count = self.no_reply_count.saturating_add(1);
        }
    }
}
