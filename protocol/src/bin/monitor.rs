use clap::Parser;
use emh1::{
    Engine, EngineConfig, NoFlowControl,
    device::{
        Registry,
        charger::{Channel, Charger, ChargerConfig, Sink},
    },
};
use std::{
    error::Error,
    thread,
    time::{Duration, Instant},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Bus address of the charger
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=9))]
    address: u8,

    /// Interval between polling cycles in milliseconds
    #[arg(long, default_value_t = 5000)]
    poll_interval: u64,

    /// Interval between engine ticks in milliseconds
    #[arg(long, default_value_t = 10)]
    tick_interval: u64,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    reply_timeout: u64,

    /// Charging current limit to set on startup in amperes
    #[arg(short, long)]
    current: Option<f32>,

    /// Enable charging on startup
    #[arg(long, conflicts_with = "disable")]
    enable: bool,

    /// Disable charging on startup
    #[arg(long)]
    disable: bool,
}

/// Prints readings to standard output.
struct Printer;

impl Sink for Printer {
    fn publish(&mut self, channel: Channel, value: f32) {
        println!("{channel}: {value}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let config =
        EngineConfig::default().with_reply_timeout(Duration::from_millis(args.reply_timeout));
    let port = emh1::serial::open(&args.port)?;
    let mut engine = Engine::with_config(port, NoFlowControl, config);
    let mut devices = Registry::new();

    devices.register(
        args.address,
        Charger::with_config(Printer, ChargerConfig::default()),
    );

    if let Some(amps) = args.current {
        engine.queue().set_current(amps);
    }

    if args.enable || args.disable {
        engine.queue().set_charging_enabled(args.enable);
    }

    let start = Instant::now();
    let poll_interval = Duration::from_millis(args.poll_interval);
    let mut next_poll = Duration::ZERO;

    loop {
        let now = start.elapsed();

        if now >= next_poll {
            devices.update_all(engine.queue());
            next_poll = now + poll_interval;
        }

        engine.tick(now, &mut devices)?;
        thread::sleep(Duration::from_millis(args.tick_interval));
    }
}
