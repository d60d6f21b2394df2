//! A library for controlling BINDER environmental test chambers (ovens) over
//! MODBus RTU frames tunnelled on TCP, and for running temperature profiles.
//!
//! The crate is layered bottom-up:
//!
//! 1.  **Protocol**: CRC16, float/word codec, request builders and response
//!     parsers for the three MODBus functions the controller speaks. See
//!     [`protocol`].
//! 2.  **Transport**: the [`transport::Transport`] trait and its TCP
//!     implementation, which opens one connection per exchange, retries
//!     connecting with exponential backoff and accumulates partial responses.
//! 3.  **Oven**: [`oven::Oven`] offers typed access to temperature, setpoint,
//!     mode, door and alarm state, and gates every setpoint or mode change
//!     behind a safety interlock.
//! 4.  **Profiles**: [`rampspec`] parses the compact rampspec language and
//!     [`ramp::RampCtl`] executes a parsed program one tick at a time.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ovenctl_lib::{
//!     config::OvenConfig,
//!     oven::Oven,
//!     temp_wait::WaitOptions,
//!     transport::TcpTransport,
//! };
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OvenConfig::default();
//!     let transport = TcpTransport::new("192.168.1.100", config.connection.clone());
//!     let mut oven = Oven::with_config(transport, config);
//!
//!     // Always set the setpoint before activating the oven
//!     oven.set_setpoint(60.0, false)?;
//!     oven.set_mode_active(false)?;
//!     oven.wait_for_temp(WaitOptions::new(1.0).stabilise(true), Duration::from_secs(10))?;
//!     println!("Temperature: {:.2}", oven.get_temperature()?);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod oven;
pub mod protocol;
pub mod ramp;
pub mod rampspec;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod temp_wait;
pub mod transport;
