//! BINDER oven controller CLI
//!
//! A command-line interface for BINDER environmental test chambers reached
//! through their serial-to-TCP adaptor (MODBus RTU frames tunnelled on TCP).
//!
//! This tool allows users to:
//! - Query the oven state (alarm, mode, door, temperature, setpoint).
//! - Set the oven idle, or set a setpoint and activate it, optionally waiting
//!   for the temperature to be reached and to stabilise.
//! - Follow a multi-step temperature profile written as a rampspec.
//! - Read, write and dump raw registers for diagnostics.
//!
//! Exit codes: 0 success, 1 communication or other failure, 2 usage error,
//! 3 connection timeout, 4 safety interlock, 5 wait premise no longer valid.

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use ovenctl_lib::{
    config::{ConfigError, OvenConfig},
    error::Error,
    oven::{AlarmState, Oven},
    ramp::RampCtl,
    rampspec::{ParseError, RampProgram},
    temp_wait::WaitOptions,
    transport::{TcpTransport, Transport},
};
use std::process::ExitCode;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::{panic, time::Duration};

mod commandline;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_TIMEOUT: u8 = 3;
const EXIT_SAFETY: u8 = 4;
const EXIT_STATUS: u8 = 5;

/// Words per line of a register dump.
const DUMP_WIDTH: usize = 8;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Maps the first classified error in the chain to the process exit code.
fn exit_code(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if cause.is::<UsageError>() || cause.is::<ParseError>() || cause.is::<ConfigError>() {
            return EXIT_USAGE;
        }
        if let Some(error) = cause.downcast_ref::<Error>() {
            return if error.is_safety() {
                EXIT_SAFETY
            } else if error.is_status() {
                EXIT_STATUS
            } else if error.is_timeout() {
                EXIT_TIMEOUT
            } else {
                EXIT_FAILURE
            };
        }
    }
    EXIT_FAILURE
}

fn load_config(args: &commandline::CliArgs) -> Result<OvenConfig> {
    let mut config = match &args.config {
        Some(path) => OvenConfig::load(path)
            .with_context(|| format!("Cannot load config file {}", path.display()))?,
        None => OvenConfig::default(),
    };
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(timeout) = args.timeout {
        config.connection.connect_timeout = timeout;
    }
    if let Some(read_timeout) = args.read_timeout {
        config.connection.read_timeout = Some(read_timeout);
    }
    if let Some(retries) = args.retries {
        config.connection.retries = retries;
    }
    trace!("Config: {config:?}");
    Ok(config)
}

/// Best-effort attempt to leave the oven idle after a failure; a failure to
/// idle is reported, not retried.
fn idle_after_error<T: Transport>(oven: &mut Oven<T>) {
    warn!("Setting mode back to idle");
    if let Err(error) = oven.set_mode_idle() {
        error!("Failed to set oven idle: {error}");
    }
}

fn handle_query<T: Transport>(oven: &mut Oven<T>) {
    match oven.get_alarm_state() {
        Ok(AlarmState { alarm, note }) if alarm || note => {
            let kind = if alarm { "ALARM" } else { "Note" };
            match oven.get_alarm_text() {
                Ok(text) => println!("{kind}: {}", text.unwrap_or_default()),
                Err(error) => println!("Failed to get {} text: {error}", kind.to_lowercase()),
            }
        }
        Ok(_) => {}
        Err(error) => println!("Failed to get alarm state: {error}"),
    }
    match oven.get_mode() {
        Ok(mode) => println!("Mode: {mode}"),
        Err(error) => println!("Failed to get oven mode: {error}"),
    }
    match oven.condensation_protection() {
        Ok(true) => println!("Condensation protection active"),
        Ok(false) => {}
        Err(error) => println!("Failed to get operation lines: {error}"),
    }
    match oven.get_door_state() {
        Ok(open) => println!("Door: {}", if open { "open" } else { "closed" }),
        Err(error) => println!("Failed to get door state: {error}"),
    }
    match oven.is_temperature_limit_exceeded() {
        Ok(true) => println!("Temperature limit exceeded"),
        Ok(false) => {}
        Err(error) => println!("Failed to get temperature limit state: {error}"),
    }
    match oven.get_temperature() {
        Ok(temperature) => println!("Temperature: {temperature:.2}"),
        Err(error) => println!("Failed to get oven temperature: {error}"),
    }
    match oven.get_setpoint() {
        Ok(setpoint) => println!("Target temperature: {setpoint:.2}"),
        Err(error) => println!("Failed to get oven setpoint: {error}"),
    }
}

fn handle_idle<T: Transport>(oven: &mut Oven<T>, dry: bool) -> Result<()> {
    info!("Executing: Idle");
    oven.set_mode_idle().context("Failed to set oven idle")?;
    if let Err(error) = oven.set_condensation_protection(dry) {
        warn!("Failed to set condensation protection: {error} (ignoring)");
    }
    Ok(())
}

fn handle_set<T: Transport>(
    oven: &mut Oven<T>,
    temperature: f32,
    force: bool,
    dry: bool,
    wait: Option<WaitOptions>,
    poll_interval: Duration,
) -> Result<()> {
    info!("Executing: Set setpoint to {temperature:.2}");
    oven.set_setpoint(temperature, force)
        .with_context(|| format!("Failed to set oven setpoint to {temperature:.2}"))?;
    if let Err(error) = oven.set_mode_active(force) {
        // the response may have been lost after the oven went active
        if !error.is_safety() {
            idle_after_error(oven);
        }
        return Err(error).context("Failed to set oven to active");
    }
    if let Err(error) = oven.set_condensation_protection(dry) {
        warn!("Failed to set condensation protection: {error} (ignoring)");
    }

    if let Some(options) = wait {
        if let Err(error) = oven.wait_for_temp(options, poll_interval) {
            if !error.is_status() {
                idle_after_error(oven);
            }
            return Err(error).context("Failed waiting for temperature");
        }
        println!("Temperature reached");
    }
    Ok(())
}

/// Runs `command` through the shell; a failing command requests the jump.
fn shell_callback(command: String) -> impl FnMut() -> bool {
    move || {
        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        info!("Running callback: {command}");
        match std::process::Command::new(shell).arg(flag).arg(&command).status() {
            Ok(status) if status.success() => false,
            Ok(status) => {
                warn!("Callback {command:?} failed: {status}");
                true
            }
            Err(error) => {
                warn!("Cannot run callback {command:?}: {error}");
                true
            }
        }
    }
}

fn handle_ramp<T: Transport>(
    oven: &mut Oven<T>,
    rampspec: &str,
    interval: Duration,
    callback: Option<String>,
) -> Result<()> {
    let program: RampProgram = rampspec
        .parse()
        .with_context(|| format!("Invalid rampspec {rampspec:?}"))?;
    info!("Executing: Ramp {program}");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        trace!("Received Ctrl-C")
    })
    .context("Error setting Ctrl-C handler")?;

    let mut ramp = match callback {
        Some(command) => RampCtl::new(program).with_callback(shell_callback(command)),
        None => RampCtl::new(program).with_callback(|| {
            info!("Callback point reached");
            false
        }),
    };
    while running.load(Ordering::SeqCst) {
        if ramp.is_new_action() {
            if let Some(action) = ramp.current() {
                println!("Started action: {action}");
            }
        }
        match ramp.tick(oven) {
            Ok(0) => {
                println!("Rampspec completed");
                return Ok(());
            }
            Ok(remaining) => debug!("{remaining} actions remaining"),
            Err(error) if error.is_io() => warn!("Tick failed, retrying: {error}"),
            Err(error) => {
                idle_after_error(oven);
                return Err(error).context("Ramp aborted");
            }
        }
        std::thread::sleep(interval);
    }
    idle_after_error(oven);
    bail!("Ramp interrupted");
}

fn handle_read<T: Transport>(oven: &mut Oven<T>, address: u16, float: bool) -> Result<()> {
    if float {
        let value = oven
            .read_float(address)
            .with_context(|| format!("Cannot read float at {address:04x}"))?;
        println!("{address:04x}: {value}");
    } else {
        let value = oven
            .read_int(address)
            .with_context(|| format!("Cannot read register {address:04x}"))?;
        println!("{address:04x}: {value:04x} ({value})");
    }
    Ok(())
}

fn handle_write<T: Transport>(
    oven: &mut Oven<T>,
    address: u16,
    value: &str,
    float: bool,
    yes: bool,
) -> Result<()> {
    enum Value {
        Word(u16),
        Float(f32),
    }
    let parsed = if float {
        Value::Float(
            value
                .parse()
                .map_err(|e| UsageError(format!("Invalid float value {value:?}: {e}")))?,
        )
    } else {
        Value::Word(
            clap_num::maybe_hex::<u16>(value)
                .map_err(|e| UsageError(format!("Invalid word value {value:?}: {e}")))?,
        )
    };

    println!("WARNING: Raw register writes bypass every safety interlock.");
    if !yes
        && !Confirm::new()
            .with_prompt(format!("Write {value} to register {address:04x}?"))
            .default(false)
            .show_default(true)
            .interact()
            .context("Failed to get user confirmation.")?
    {
        info!("Write aborted by user.");
        return Ok(());
    }
    let written = match parsed {
        Value::Word(word) => oven.write_int(address, word),
        Value::Float(float) => oven.write_float(address, float),
    };
    written.with_context(|| format!("Cannot write register {address:04x}"))?;
    println!("Written.");
    Ok(())
}

fn handle_dump<T: Transport>(oven: &mut Oven<T>, address: u16, length: u16) -> Result<()> {
    let words = oven
        .dump(address, length)
        .with_context(|| format!("Cannot read {length} words at {address:04x}"))?;
    for (row, chunk) in words.chunks(DUMP_WIDTH).enumerate() {
        let line: Vec<String> = chunk.iter().map(|word| format!("{word:04x}")).collect();
        let start = address.wrapping_add((row * DUMP_WIDTH) as u16);
        println!("{start:04x}: {}", line.join(" "));
    }
    Ok(())
}

fn run(args: commandline::CliArgs) -> Result<()> {
    let config = load_config(&args)?;
    let Some(host) = args.host else {
        return Err(UsageError("-H/--host is required".to_string()).into());
    };
    info!("Using oven at {host}:{}", config.connection.port);
    let transport = TcpTransport::new(host, config.connection.clone());
    let mut oven = Oven::with_config(transport, config);

    match args.command {
        commandline::CliCommands::Query => {
            handle_query(&mut oven);
            Ok(())
        }
        commandline::CliCommands::Idle { dry } => handle_idle(&mut oven, dry),
        commandline::CliCommands::Set {
            temperature,
            force,
            dry,
            wait,
            stable,
            limit,
            acclimatise,
            poll_interval,
        } => {
            let wait = (wait || stable).then(|| {
                WaitOptions::new(limit)
                    .stabilise(stable)
                    .acclimatise(acclimatise)
            });
            handle_set(&mut oven, temperature, force, dry, wait, poll_interval)
        }
        commandline::CliCommands::Ramp {
            rampspec,
            interval,
            callback,
        } => handle_ramp(&mut oven, &rampspec, interval, callback),
        commandline::CliCommands::Read { address, float } => {
            handle_read(&mut oven, address, float)
        }
        commandline::CliCommands::Write {
            address,
            value,
            float,
            yes,
        } => handle_write(&mut oven, address, &value, float, yes),
        commandline::CliCommands::Dump { address, length } => {
            handle_dump(&mut oven, address, length)
        }
    }
}

fn main() -> ExitCode {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "ovenctl started. Log level: {}",
        args.verbose.log_level_filter()
    );

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR: {error:#}");
            ExitCode::from(exit_code(&error))
        }
    }
}
