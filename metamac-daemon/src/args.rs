use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use twelf::config;

/// [`tracing::Level`] wrapper compatible with clap and twelf
#[derive(Copy, Clone, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Errors and warnings
    Warn,
    /// Normal operational logging
    Info,
    /// Verbose debugging
    Debug,
    /// Everything
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[config]
#[derive(Parser, Debug)]
#[command(
    about = "MetaMAC - online MAC protocol selection for wireless MAC processors",
    version,
    after_help = concat!(
        "EXAMPLES:\n",
        "    metamac suite.yaml\n",
        "    metamac --verbose --logfile run.csv suite.yaml\n",
        "    metamac --cycle --eta 0.5 suite.yaml\n",
    )
)]
pub struct Config {
    /// Protocol suite document (YAML format)
    #[clap(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Print the weight table to the console once per second
    #[clap(short, long)]
    pub verbose: bool,

    /// Append one CSV row per observed slot to this file
    #[clap(short, long, value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Observe and score, but never write device bytecode
    #[clap(short, long)]
    pub readonly: bool,

    /// Rotate through the protocols once per second instead of selecting
    /// the best-scoring one
    #[clap(short, long)]
    pub cycle: bool,

    /// Override the suite document's learning rate (must be > 0)
    #[clap(short, long, value_name = "VALUE")]
    pub eta: Option<f64>,

    /// Include the carrier-sense busy feedback when judging the channel
    #[clap(short = 'b', long = "usebusy")]
    pub use_busy: bool,

    /// Send one telemetry datagram per second to this address
    #[clap(short = 'm', long = "remotelogging", value_name = "IP")]
    pub remote_logging: Option<Ipv4Addr>,

    /// debugfs directory of the wireless MAC processor
    #[clap(long, default_value = "/sys/kernel/debug/b43/phy0", value_name = "DIR")]
    pub device_dir: PathBuf,

    /// Nominal slot duration in microseconds
    #[clap(long, default_value_t = metamac_core::DEFAULT_SLOT_TIME_US, value_name = "US")]
    pub slot_time: u32,

    /// Target interval between register polls in microseconds
    #[clap(long, default_value_t = metamac_core::DEFAULT_READ_INTERVAL_US, value_name = "US")]
    pub read_interval: u32,

    /// Logging verbosity level
    #[clap(long, value_enum, default_value_t = LogLevel::Info, value_name = "LEVEL")]
    pub log_level: LogLevel,
}
