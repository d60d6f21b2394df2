//! High-level control of a single BINDER oven.
//!
//! [`Oven`] wraps a [`Transport`] and provides typed register access plus the
//! oven-level operations: reading temperature, setpoint, mode, door and alarm
//! state, and changing setpoint, mode and operation lines behind the safety
//! interlock.
//!
//! **Pitfall:** never call [`Oven::set_mode_active`] before [`Oven::set_setpoint`].
//! The controller may otherwise start driving the wrong output (the cooler when
//! you wanted the heater) for its internal lag period, which can be several
//! minutes.
//!
//! ## Example
//!
//! ```no_run
//! use ovenctl_lib::{config::OvenConfig, oven::Oven, transport::TcpTransport};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OvenConfig::default();
//!     let transport = TcpTransport::new("oven.lab", config.connection.clone());
//!     let mut oven = Oven::with_config(transport, config);
//!
//!     oven.set_setpoint(85.0, false)?;
//!     oven.set_mode_active(false)?;
//!     println!("Temperature: {:.2}", oven.get_temperature()?);
//!     Ok(())
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::OvenConfig;
use crate::error::{Error, Result, SafetyError};
use crate::protocol::{self as proto, OperatingMode, OperationLines};
use crate::temp_wait::{TempWait, WaitOptions};
use crate::transport::Transport;
use log::*;
use std::time::Duration;

fn short_read(address: u16, count: u16, got: usize) -> Error {
    Error::ResponseMismatch(format!(
        "asked for {count} words at {address:04x}, got {got}"
    ))
}

/// Alarm and note flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmState {
    pub alarm: bool,
    pub note: bool,
}

/// Everything the safety interlock looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SafetyState {
    pub alarm_active: bool,
    pub note_active: bool,
    pub door_open: bool,
    /// Text of the displayed alarm or note, if any.
    pub text: Option<String>,
}

pub struct Oven<T> {
    transport: T,
    config: OvenConfig,
}

impl<T: Transport> Oven<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, OvenConfig::default())
    }

    pub fn with_config(transport: T, config: OvenConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &OvenConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn read_float(&mut self, address: u16) -> Result<f32> {
        match self.transport.read_words(address, 2)?.as_slice() {
            &[high, low] => Ok(proto::decode_float([high, low])),
            words => Err(short_read(address, 2, words.len())),
        }
    }

    pub fn write_float(&mut self, address: u16, value: f32) -> Result<()> {
        self.transport
            .write_words(address, &proto::encode_float(value))
    }

    pub fn read_int(&mut self, address: u16) -> Result<u16> {
        match self.transport.read_words(address, 1)?.as_slice() {
            &[word] => Ok(word),
            words => Err(short_read(address, 1, words.len())),
        }
    }

    pub fn write_int(&mut self, address: u16, value: u16) -> Result<()> {
        self.transport.write_word(address, value)
    }

    /// Reads `length` words starting at `address`, splitting the read into
    /// requests of at most [`proto::MAX_READ_WORDS`] words.
    pub fn dump(&mut self, address: u16, length: u16) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(length as usize);
        let mut offset = 0;
        while offset < length {
            let count = (length - offset).min(proto::MAX_READ_WORDS);
            words.extend(
                self.transport
                    .read_words(address.wrapping_add(offset), count)?,
            );
            offset += count;
        }
        Ok(words)
    }

    /// Current chamber temperature in °C.
    pub fn get_temperature(&mut self) -> Result<f32> {
        self.read_float(self.config.registers.current_temperature)
    }

    /// The setpoint the controller is currently regulating towards, in °C.
    pub fn get_setpoint(&mut self) -> Result<f32> {
        self.read_float(self.config.registers.setpoint)
    }

    pub fn get_mode(&mut self) -> Result<OperatingMode> {
        Ok(OperatingMode::from_bits(
            self.read_int(self.config.registers.mode)?,
        ))
    }

    /// Returns `true` if the door is open.
    pub fn get_door_state(&mut self) -> Result<bool> {
        Ok(self.read_int(self.config.registers.door)? != 0)
    }

    pub fn get_alarm_state(&mut self) -> Result<AlarmState> {
        let alarm = self.read_int(self.config.registers.alarm)? != 0;
        let note = self.read_int(self.config.registers.note)? != 0;
        Ok(AlarmState { alarm, note })
    }

    /// Text of the displayed alarm or note; `None` when the text block is blank.
    pub fn get_alarm_text(&mut self) -> Result<Option<String>> {
        let words = self
            .transport
            .read_words(self.config.registers.alarm_text, proto::ALARM_TEXT_WORDS)?;
        Ok(proto::decode_alarm_text(&words))
    }

    /// Whether the over-temperature safety device has tripped.
    pub fn is_temperature_limit_exceeded(&mut self) -> Result<bool> {
        Ok(self.read_int(self.config.registers.temperature_limit)? != 0)
    }

    pub fn get_safety_state(&mut self) -> Result<SafetyState> {
        let AlarmState { alarm, note } = self.get_alarm_state()?;
        let door_open = self.get_door_state()?;
        let text = if alarm || note {
            self.get_alarm_text()?
        } else {
            None
        };
        Ok(SafetyState {
            alarm_active: alarm,
            note_active: note,
            door_open,
            text,
        })
    }

    /// Checks that the oven is in a safe state to be operated.
    ///
    /// An active alarm always fails. Unless `force` is set, an open door or an
    /// active note fails too.
    pub fn check_safety(&mut self, force: bool) -> Result<()> {
        let AlarmState { alarm, note } = self.get_alarm_state()?;
        if alarm {
            return Err(SafetyError::Alarm(self.get_alarm_text()?).into());
        }
        if !force {
            if self.get_door_state()? {
                return Err(SafetyError::DoorOpen.into());
            }
            if note {
                return Err(SafetyError::Note(self.get_alarm_text()?).into());
            }
        }
        Ok(())
    }

    /// Sets the temperature setpoint.
    ///
    /// Both the manual and the basic setpoint registers are written, as the
    /// controller consults one or the other depending on its control mode.
    /// Nothing is written if the safety check fails or `setpoint` lies outside
    /// the rated range.
    pub fn set_setpoint(&mut self, setpoint: f32, force: bool) -> Result<()> {
        self.check_safety(force)?;
        let limits = self.config.safety;
        if setpoint.is_nan() || setpoint < limits.min_setpoint {
            return Err(SafetyError::Range {
                setpoint,
                limit: limits.min_setpoint,
                over: false,
            }
            .into());
        }
        if setpoint > limits.max_setpoint {
            return Err(SafetyError::Range {
                setpoint,
                limit: limits.max_setpoint,
                over: true,
            }
            .into());
        }
        debug!("Setting setpoint to {setpoint:.2}");
        self.write_float(self.config.registers.manual_setpoint, setpoint)?;
        self.write_float(self.config.registers.basic_setpoint, setpoint)
    }

    /// Sets the oven to idle mode. Never blocked by the safety interlock.
    pub fn set_mode_idle(&mut self) -> Result<()> {
        debug!("Setting mode idle");
        self.write_int(self.config.registers.mode, 0)
    }

    /// Activates the oven in manual mode. Call [`Oven::set_setpoint`] first.
    pub fn set_mode_active(&mut self, force: bool) -> Result<()> {
        self.check_safety(force)?;
        debug!("Setting mode manual");
        self.write_int(self.config.registers.mode, OperatingMode::MANUAL.bits())
    }

    pub fn get_operation_lines(&mut self) -> Result<OperationLines> {
        Ok(OperationLines::from_bits(
            self.read_int(self.config.registers.operation_lines)?,
        ))
    }

    /// Sets the lines in `set` and clears those in `clear`; returns the new value.
    ///
    /// The register is only written when its value changes.
    pub fn set_operation_lines(&mut self, set: u16, clear: u16) -> Result<OperationLines> {
        let current = self.get_operation_lines()?;
        let lines = current.apply(set, clear);
        if lines != current {
            self.write_int(self.config.registers.operation_lines, lines.bits())?;
        }
        Ok(lines)
    }

    /// Whether condensation (bedew) protection is active.
    pub fn condensation_protection(&mut self) -> Result<bool> {
        Ok(self.get_operation_lines()?.condensation_protection())
    }

    pub fn set_condensation_protection(&mut self, active: bool) -> Result<()> {
        let current = self.get_operation_lines()?;
        let mut lines = current;
        lines.set_condensation_protection(active);
        if lines != current {
            debug!("Condensation protection {}", if active { "on" } else { "off" });
            self.write_int(self.config.registers.operation_lines, lines.bits())?;
        }
        Ok(())
    }

    /// Captures the live setpoint and creates a wait for the oven to reach it.
    pub fn temp_ready_tester(&mut self, options: WaitOptions) -> Result<TempWait> {
        let setpoint = self.get_setpoint()?;
        Ok(TempWait::new(
            setpoint,
            options,
            self.config.stable_readings,
        ))
    }

    /// Blocks until the oven temperature has reached its setpoint, polling
    /// every `poll_interval`.
    pub fn wait_for_temp(&mut self, options: WaitOptions, poll_interval: Duration) -> Result<()> {
        let clock = SystemClock::default();
        let mut wait = self.temp_ready_tester(options)?;
        info!("Waiting for {:.2}", wait.setpoint());
        while !wait.poll(self, &clock)? {
            std::thread::sleep(poll_interval);
        }
        info!("Reached {:.2} at {:?}", wait.setpoint(), clock.now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedOven;
    use assert_matches::assert_matches;

    fn oven() -> Oven<SimulatedOven> {
        Oven::new(SimulatedOven::default())
    }

    #[test]
    fn typed_accessors() {
        let mut oven = oven();
        oven.write_float(0x2000, -12.5).unwrap();
        assert_eq!(oven.read_float(0x2000).unwrap(), -12.5);
        // the float goes out word-swapped
        assert_eq!(oven.transport().writes()[0], (0x2000, vec![0x0000, 0xC148]));
        oven.write_int(0x2004, 0xBEEF).unwrap();
        assert_eq!(oven.read_int(0x2004).unwrap(), 0xBEEF);
    }

    #[test]
    fn mode_door_and_alarm() {
        let mut oven = oven();
        assert!(oven.get_mode().unwrap().is_idle());
        oven.transport_mut().set_word(0x1a22, 0x0800);
        assert_eq!(oven.get_mode().unwrap().names(), vec!["manual"]);

        assert!(!oven.get_door_state().unwrap());
        oven.transport_mut().set_door_open(true);
        assert!(oven.get_door_state().unwrap());

        assert_eq!(oven.get_alarm_state().unwrap(), AlarmState::default());
        assert_eq!(oven.get_alarm_text().unwrap(), None);
        oven.transport_mut().set_note(Some("Service due"));
        assert_eq!(
            oven.get_alarm_state().unwrap(),
            AlarmState {
                alarm: false,
                note: true
            }
        );
        assert_eq!(oven.get_alarm_text().unwrap().as_deref(), Some("Service due"));
        let state = oven.get_safety_state().unwrap();
        assert!(state.note_active && state.door_open && !state.alarm_active);
    }

    #[test]
    fn setpoint_writes_both_registers() {
        let mut oven = oven();
        oven.set_setpoint(60.0, false).unwrap();
        let writes = oven.transport().writes();
        let words = proto::encode_float(60.0).to_vec();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (0x1581, words.clone()));
        assert_eq!(writes[1], (0x156f, words));
        assert_eq!(oven.get_setpoint().unwrap(), 60.0);
    }

    #[test]
    fn alarm_blocks_even_when_forced() {
        for force in [false, true] {
            let mut oven = oven();
            oven.transport_mut().set_alarm(Some("Temp. limit"));
            assert_matches!(
                oven.set_setpoint(50.0, force),
                Err(Error::Safety(SafetyError::Alarm(Some(ref text)))) if text == "Temp. limit"
            );
            assert_matches!(
                oven.set_mode_active(force),
                Err(Error::Safety(SafetyError::Alarm(..)))
            );
            assert!(oven.transport().writes().is_empty());
        }
    }

    #[test]
    fn door_and_note_block_unless_forced() {
        let mut oven = oven();
        oven.transport_mut().set_door_open(true);
        assert_matches!(
            oven.set_setpoint(50.0, false),
            Err(Error::Safety(SafetyError::DoorOpen))
        );
        assert!(oven.transport().writes().is_empty());
        oven.set_setpoint(50.0, true).unwrap();

        let mut oven = self::oven();
        oven.transport_mut().set_note(Some("Water tank empty"));
        assert_matches!(
            oven.set_mode_active(false),
            Err(Error::Safety(SafetyError::Note(_)))
        );
        assert!(oven.transport().writes().is_empty());
        oven.set_mode_active(true).unwrap();
        assert!(oven.transport().mode().is_manual());
    }

    #[test]
    fn setpoint_range_is_inclusive() {
        let mut oven = oven();
        assert_matches!(
            oven.set_setpoint(-41.0, true),
            Err(Error::Safety(SafetyError::Range { over: false, .. }))
        );
        assert_matches!(
            oven.set_setpoint(181.0, true),
            Err(Error::Safety(SafetyError::Range { over: true, .. }))
        );
        assert_matches!(
            oven.set_setpoint(f32::NAN, true),
            Err(Error::Safety(SafetyError::Range { .. }))
        );
        assert!(oven.transport().writes().is_empty());
        oven.set_setpoint(-40.0, false).unwrap();
        oven.set_setpoint(180.0, false).unwrap();
        assert_eq!(oven.transport().writes().len(), 4);
    }

    #[test]
    fn idle_bypasses_interlock() {
        let mut oven = oven();
        oven.transport_mut().set_word(0x1a22, 0x0800);
        oven.transport_mut().set_alarm(Some("Fire"));
        oven.set_mode_idle().unwrap();
        assert!(oven.get_mode().unwrap().is_idle());
    }

    #[test]
    fn operation_lines_read_modify_write() {
        let mut oven = oven();
        oven.transport_mut().set_word(0x158b, 0b0110);
        assert_eq!(oven.set_operation_lines(0b1001, 0b0100).unwrap().bits(), 0b1011);
        assert!(oven.condensation_protection().unwrap());
        oven.set_condensation_protection(false).unwrap();
        assert_eq!(oven.transport().word(0x158b), 0b1010);
        assert!(!oven.condensation_protection().unwrap());

        oven.transport_mut().clear_writes();
        oven.set_condensation_protection(false).unwrap();
        oven.set_operation_lines(0b0010, 0).unwrap();
        assert!(oven.transport().writes().is_empty());
    }

    #[test]
    fn dump_splits_large_reads() {
        let mut oven = oven();
        for offset in 0..300u16 {
            oven.transport_mut().set_word(0x1000 + offset, offset);
        }
        let words = oven.dump(0x1000, 300).unwrap();
        assert_eq!(words.len(), 300);
        assert_eq!(words[299], 299);
        assert_eq!(words[proto::MAX_READ_WORDS as usize], proto::MAX_READ_WORDS);
    }

    /// Answers every read with a single word.
    struct OneWordReads;

    impl Transport for OneWordReads {
        fn read_words(&mut self, _address: u16, _count: u16) -> Result<Vec<u16>> {
            Ok(vec![0x4248])
        }

        fn write_word(&mut self, _address: u16, _value: u16) -> Result<()> {
            Ok(())
        }

        fn write_words(&mut self, _address: u16, _words: &[u16]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn wrong_word_count_is_reported() {
        let mut oven = Oven::new(OneWordReads);
        assert_eq!(oven.read_int(0x1a22).unwrap(), 0x4248);
        assert_matches!(
            oven.read_float(0x11a9),
            Err(Error::ResponseMismatch(msg)) if msg.contains("got 1")
        );
        assert_matches!(oven.get_temperature(), Err(Error::ResponseMismatch(_)));
    }

    #[test]
    fn wait_for_temp_returns_when_reached() {
        let mut oven = Oven::new(SimulatedOven::instant());
        oven.set_setpoint(40.0, false).unwrap();
        oven.set_mode_active(false).unwrap();
        oven.wait_for_temp(WaitOptions::new(0.5), Duration::ZERO)
            .unwrap();
    }
}
