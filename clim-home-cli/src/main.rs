mod conversions;

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use clim_home::channel::{Field, HttpChannel};
use clim_home::climate::{Climate, ClimateState, Poller, UnitStatus};
use clim_home::config::{ChannelConfig, ClimateConfig, FieldMap, PollSchedule, ReadMode};
use clim_home::unit::{LoggingRelay, SimulatedSensor, UnitBridge, UnitConfig};
use eyre::{Result, WrapErr};
use structopt::StructOpt;
use tokio::sync::watch;
use tokio::{pin, select, signal};

#[derive(StructOpt, Debug)]
struct ChannelOpt {
    /// Channel to read from and write to
    #[structopt(long, env = "THINGSPEAK_CHANNEL_ID")]
    channel_id: u64,

    #[structopt(long, env = "THINGSPEAK_READ_API_KEY", hide_env_values = true)]
    read_key: String,

    #[structopt(long, env = "THINGSPEAK_WRITE_API_KEY", hide_env_values = true)]
    write_key: String,

    #[structopt(long, default_value = "https://api.thingspeak.com/")]
    base_url: String,

    /// Request timeout in seconds
    #[structopt(long, default_value = "10")]
    timeout: u64,
}

#[derive(StructOpt, Debug)]
struct FieldOpt {
    #[structopt(long, default_value = "1")]
    temperature_field: Field,

    #[structopt(long, default_value = "2")]
    humidity_field: Field,

    #[structopt(long, default_value = "3")]
    status_field: Field,

    #[structopt(long, default_value = "4")]
    target_field: Field,
}

#[derive(StructOpt, Debug)]
struct ClimateOpt {
    #[structopt(flatten)]
    fields: FieldOpt,

    /// How the channel is read, per-field or last-feed
    #[structopt(long, default_value = "per-field")]
    read_mode: ReadMode,

    /// Lowest allowed target temperature
    #[structopt(long)]
    min_target: Option<i32>,

    /// Highest allowed target temperature
    #[structopt(long)]
    max_target: Option<i32>,
}

#[derive(StructOpt, Debug)]
enum ClimateCommand {
    /// Print the climate state held by the channel
    Status,
    /// Print the climate state every time it changes
    Watch {
        /// Poll rate in seconds
        #[structopt(short, long, default_value = "60")]
        rate: u64,
    },
    /// Raise the target temperature by one degree
    Up,
    /// Lower the target temperature by one degree
    Down,
    /// Set the target temperature
    Set { target: i32 },
    Toggle,
    On,
    Off,
}

#[derive(StructOpt, Debug)]
enum Command {
    #[structopt(flatten)]
    Climate(ClimateCommand),
    /// Act as the unit: follow status and target, report simulated readings
    Unit {
        /// Simulated starting temperature
        #[structopt(long, default_value = "24")]
        temperature: f64,

        /// Simulated starting humidity
        #[structopt(long, default_value = "50")]
        humidity: f64,

        /// Seed for the simulated readings
        #[structopt(long)]
        seed: Option<u64>,

        /// Seconds between readings sent to the channel
        #[structopt(long, default_value = "5")]
        report_rate: u64,
    },
}

#[derive(StructOpt, Debug)]
#[structopt(name = "clim-home")]
struct Opt {
    #[structopt(flatten)]
    channel: ChannelOpt,

    #[structopt(flatten)]
    climate: ClimateOpt,

    #[structopt(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;

    let opts = Opt::from_args();

    debug!("opts: {:?}", opts);

    let channel_config =
        ChannelConfig::try_from(opts.channel).wrap_err("Invalid channel options")?;
    let climate_config =
        ClimateConfig::try_from(opts.climate).wrap_err("Invalid climate options")?;
    let channel = HttpChannel::new(channel_config).wrap_err("Could not build http client")?;

    match opts.command {
        Command::Unit {
            temperature,
            humidity,
            seed,
            report_rate,
        } => run_unit(channel, climate_config.fields, temperature, humidity, seed, report_rate).await,
        Command::Climate(command) => {
            let climate = Arc::new(Climate::new(channel, climate_config)?);
            run_climate(climate, command).await
        }
    }
}

async fn run_climate(climate: Arc<Climate<HttpChannel>>, command: ClimateCommand) -> Result<()> {
    if let ClimateCommand::Watch { rate } = command {
        return watch_climate(climate, rate).await;
    }

    climate
        .refresh()
        .await
        .wrap_err("Could not read climate state")?;

    match command {
        ClimateCommand::Status => println!("{}", climate.state()),
        ClimateCommand::Watch { .. } => {}
        ClimateCommand::Up => {
            let target = climate.increment().await?;
            println!("Target temperature raised to {} °C", target);
        }
        ClimateCommand::Down => {
            let target = climate.decrement().await?;
            println!("Target temperature lowered to {} °C", target);
        }
        ClimateCommand::Set { target } => {
            let target = climate.set_target(target).await?;
            println!("Target temperature set to {} °C", target);
        }
        ClimateCommand::Toggle => {
            let status = climate.toggle().await?;
            println!("Unit switched {}", status);
        }
        ClimateCommand::On => {
            climate.set_status(UnitStatus::On).await?;
            println!("Unit switched on");
        }
        ClimateCommand::Off => {
            climate.set_status(UnitStatus::Off).await?;
            println!("Unit switched off");
        }
    }

    Ok(())
}

/// Prints every state the poller brings in. The poller does the first read.
async fn watch_climate(climate: Arc<Climate<HttpChannel>>, rate: u64) -> Result<()> {
    let mut receiver = climate.subscribe();
    let poller = Poller::start(climate, PollSchedule::Every(Duration::from_secs(rate)));
    let ctrl_c = signal::ctrl_c();
    pin!(ctrl_c);
    let mut last: Option<ClimateState> = None;
    loop {
        select! {
            res = &mut ctrl_c => {
                res?;
                break;
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = receiver.borrow_and_update().clone();
                if last.as_ref() != Some(&state) {
                    println!("{}", state);
                    last = Some(state);
                }
            }
        }
    }
    poller.stop().await;

    Ok(())
}

async fn run_unit(
    channel: HttpChannel,
    fields: FieldMap,
    temperature: f64,
    humidity: f64,
    seed: Option<u64>,
    report_rate: u64,
) -> Result<()> {
    let sensor = match seed {
        Some(seed) => SimulatedSensor::seeded(seed, temperature, humidity),
        None => SimulatedSensor::new(temperature, humidity),
    };
    let config = UnitConfig {
        fields,
        report_rate: Duration::from_secs(report_rate),
        ..UnitConfig::default()
    };
    let mut bridge = UnitBridge::new(channel, config, sensor, LoggingRelay::new())?;

    let (stop_sender, stop_receiver) = watch::channel(false);
    let handle = tokio::spawn(async move {
        bridge.run(stop_receiver).await;
    });

    println!("Unit running, press ctrl-c to stop");
    signal::ctrl_c().await?;
    stop_sender.send_replace(true);
    handle.await?;
    println!("Unit stopped");

    Ok(())
}
