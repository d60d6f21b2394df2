//! A register-level stand-in for the oven.
//!
//! [`SimulatedOven`] keeps the register file in memory, mirrors the controller's
//! setpoint/mode coupling closely enough for the interlock, wait and ramp logic,
//! and records every write so tests can assert exactly what reached the device.

use crate::config::RegisterMap;
use crate::error::{Error, Result};
use crate::protocol::{self as proto, DeviceErrorCode, OperatingMode};
use crate::transport::Transport;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SimulatedOven {
    registers: RegisterMap,
    memory: HashMap<u16, u16>,
    writes: Vec<(u16, Vec<u16>)>,
    /// When set, the chamber temperature jumps to the setpoint whenever the
    /// oven is active.
    pub instant_response: bool,
}

impl Default for SimulatedOven {
    fn default() -> Self {
        Self::new(RegisterMap::default())
    }
}

impl SimulatedOven {
    pub fn new(registers: RegisterMap) -> Self {
        let mut oven = Self {
            registers,
            memory: HashMap::new(),
            writes: Vec::new(),
            instant_response: false,
        };
        oven.set_float(registers.current_temperature, 25.0);
        oven.set_float(registers.setpoint, 25.0);
        oven.set_float(registers.manual_setpoint, 25.0);
        oven.set_float(registers.basic_setpoint, 25.0);
        for offset in 0..proto::ALARM_TEXT_WORDS {
            oven.memory.insert(registers.alarm_text + offset, 0x20);
        }
        oven
    }

    pub fn instant() -> Self {
        Self {
            instant_response: true,
            ..Self::default()
        }
    }

    pub fn word(&self, address: u16) -> u16 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    pub fn set_word(&mut self, address: u16, value: u16) {
        self.memory.insert(address, value);
    }

    pub fn float(&self, address: u16) -> f32 {
        proto::decode_float([self.word(address), self.word(address + 1)])
    }

    pub fn set_float(&mut self, address: u16, value: f32) {
        let [first, second] = proto::encode_float(value);
        self.memory.insert(address, first);
        self.memory.insert(address + 1, second);
    }

    pub fn temperature(&self) -> f32 {
        self.float(self.registers.current_temperature)
    }

    pub fn set_temperature(&mut self, value: f32) {
        self.set_float(self.registers.current_temperature, value);
    }

    pub fn setpoint(&self) -> f32 {
        self.float(self.registers.setpoint)
    }

    /// Changes the live setpoint behind the controller's back, as the front
    /// panel or another client would.
    pub fn set_setpoint(&mut self, value: f32) {
        self.set_float(self.registers.setpoint, value);
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_bits(self.word(self.registers.mode))
    }

    pub fn set_alarm(&mut self, text: Option<&str>) {
        self.set_word(self.registers.alarm, text.is_some() as u16);
        self.set_text(text);
    }

    pub fn set_note(&mut self, text: Option<&str>) {
        self.set_word(self.registers.note, text.is_some() as u16);
        self.set_text(text);
    }

    pub fn set_door_open(&mut self, open: bool) {
        self.set_word(self.registers.door, open as u16);
    }

    fn set_text(&mut self, text: Option<&str>) {
        let bytes = text.unwrap_or("").as_bytes();
        for offset in 0..proto::ALARM_TEXT_WORDS {
            let word = bytes.get(offset as usize).copied().unwrap_or(b' ');
            self.memory
                .insert(self.registers.alarm_text + offset, word as u16);
        }
    }

    /// Every write that reached the oven, in order.
    pub fn writes(&self) -> &[(u16, Vec<u16>)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Writes to registers other than the operation lines.
    pub fn control_writes(&self) -> Vec<&(u16, Vec<u16>)> {
        self.writes
            .iter()
            .filter(|(address, _)| *address != self.registers.operation_lines)
            .collect()
    }

    fn settle(&mut self) {
        if self.instant_response && !self.mode().is_idle() {
            let setpoint = self.setpoint();
            self.set_temperature(setpoint);
        }
    }

    fn store(&mut self, address: u16, words: &[u16]) -> Result<()> {
        if address == self.registers.setpoint || address == self.registers.current_temperature {
            return Err(Error::Device(DeviceErrorCode::AccessDenied));
        }
        self.writes.push((address, words.to_vec()));
        for (offset, word) in words.iter().enumerate() {
            self.memory.insert(address + offset as u16, *word);
        }
        if address == self.registers.manual_setpoint && words.len() == 2 {
            self.memory.insert(self.registers.setpoint, words[0]);
            self.memory.insert(self.registers.setpoint + 1, words[1]);
        }
        self.settle();
        Ok(())
    }
}

impl Transport for SimulatedOven {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        Ok((0..count).map(|offset| self.word(address + offset)).collect())
    }

    fn write_word(&mut self, address: u16, value: u16) -> Result<()> {
        self.store(address, &[value])
    }

    fn write_words(&mut self, address: u16, words: &[u16]) -> Result<()> {
        self.store(address, words)
    }
}
