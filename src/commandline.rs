use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::PathBuf;
use std::time::Duration;

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_temperature(s: &str) -> Result<f32, String> {
    let value = s
        .parse::<f32>()
        .map_err(|e| format!("Invalid temperature value format: {e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("Temperature must be a finite number, got {value}"))
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Query the oven state: alarm and note text, mode, condensation protection,
    /// door, temperature limit, temperature and setpoint.
    #[clap(verbatim_doc_comment)]
    Query,

    /// Set the oven to idle mode.
    Idle {
        /// Also enable condensation protection.
        #[arg(short, long)]
        dry: bool,
    },

    /// Set the temperature setpoint (°C) and activate the oven.
    /// The setpoint is always written before the mode is activated.
    #[clap(verbatim_doc_comment)]
    Set {
        /// Target temperature in °C, within the rated range (-40 to 180).
        #[arg(value_parser = parse_temperature, allow_negative_numbers = true)]
        temperature: f32,

        /// Ignore an open door or an active note. An alarm can never be overridden.
        #[arg(short, long)]
        force: bool,

        /// Enable condensation protection (only effective below 20 °C).
        #[arg(short, long)]
        dry: bool,

        /// Block until the oven has reached the setpoint.
        #[arg(short, long)]
        wait: bool,

        /// Like --wait, but also require stable readings.
        #[arg(short, long)]
        stable: bool,

        /// Tolerance in °C for --wait and --stable.
        #[arg(short, long, default_value_t = 1.0)]
        limit: f32,

        /// Time to acclimatise after reaching the setpoint, for --wait and --stable.
        /// Examples: "5min", "0s".
        #[arg(short, long, default_value = "5min", value_parser = humantime::parse_duration, verbatim_doc_comment)]
        acclimatise: Duration,

        /// Interval between temperature readings while waiting.
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        poll_interval: Duration,
    },

    /// Follow a rampspec, e.g. "Rr10,s85;Ht2;Wl1,z6;Rr10,s25".
    /// Actions: H hold, I idle, J jump, R ramp, W wait, X callback.
    /// Macros: "[3#Ht1;Ht1,s50;]" repeats its body three times.
    #[clap(verbatim_doc_comment)]
    Ramp {
        rampspec: String,

        /// Interval between interpreter ticks.
        #[arg(short, long, default_value = "3s", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Shell command run at every X action. A failing command takes the
        /// action's jump. Without it, X actions only log.
        #[arg(short = 'x', long, verbatim_doc_comment)]
        callback: Option<String>,
    },

    /// Read a raw register.
    Read {
        /// Register address, decimal or hexadecimal (e.g. "0x11a9").
        #[arg(value_parser = parse_register)]
        address: u16,

        /// Read two words and decode them as a float.
        #[arg(short, long)]
        float: bool,
    },

    /// Write a raw register.
    /// **Warning:** No safety interlock is applied to raw writes.
    #[clap(verbatim_doc_comment)]
    Write {
        /// Register address, decimal or hexadecimal (e.g. "0x1581").
        #[arg(value_parser = parse_register)]
        address: u16,

        /// Value to write: a 16-bit word (decimal or hexadecimal), or a float with --float.
        #[arg(allow_negative_numbers = true)]
        value: String,

        /// Encode the value as a float (two words).
        #[arg(short, long)]
        float: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Print a hex dump of a block of registers.
    Dump {
        /// First register address, decimal or hexadecimal.
        #[arg(value_parser = parse_register)]
        address: u16,

        /// Number of words to read.
        #[arg(value_parser = parse_register, default_value = "0x40")]
        length: u16,
    },
}

const fn about_text() -> &'static str {
    "BINDER oven controller - Control BINDER environmental test chambers over MODBus/TCP."
}

#[derive(Parser, Debug)]
#[command(name="ovenctl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Host name or IP address of the oven's serial-to-TCP adaptor.
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// TCP port of the adaptor. Overrides the config file.
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// YAML configuration file with connection, register and safety settings.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Timeout for each connection attempt. Overrides the config file.
    /// Examples: "2s 500ms", "5s".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Deadline for each read while waiting for a response. Overrides the config file.
    #[arg(global = true, long, value_parser = humantime::parse_duration)]
    pub read_timeout: Option<Duration>,

    /// Connection attempts made after the first one fails. Overrides the config file.
    #[arg(global = true, long)]
    pub retries: Option<u32>,

    #[command(subcommand)]
    pub command: CliCommands,
}
