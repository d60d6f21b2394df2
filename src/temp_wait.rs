//! Polling predicate for "has the oven reached its setpoint".
//!
//! A [`TempWait`] captures the live setpoint when it is created and is then
//! polled by the caller at whatever cadence suits it. Each poll reads mode,
//! setpoint and temperature from the oven and advances a small state machine:
//!
//! ```text
//! Waiting ──in tolerance──▶ Stabilising ──N readings──▶ Acclimatising ──hold──▶ Done
//!    ▲                          │                            │
//!    └──────out of tolerance────┴────────────────────────────┘
//! ```
//!
//! Stabilising is skipped unless requested, and so is Acclimatising when no
//! hold time is given. The wait fails with [`StatusError::Idle`] when the oven
//! is idle and with [`StatusError::SetpointChanged`] when someone else changes
//! the setpoint.

use crate::clock::Clock;
use crate::error::{Result, StatusError};
use crate::oven::Oven;
use crate::protocol::OperatingMode;
use crate::transport::Transport;
use log::*;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOptions {
    /// Maximum deviation from the setpoint, in °C, that counts as reached.
    pub tolerance: f32,
    /// Require several consecutive in-tolerance readings.
    pub stabilise: bool,
    /// Hold time after the temperature has been reached (and stabilised).
    pub acclimatise: Duration,
}

impl WaitOptions {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            stabilise: false,
            acclimatise: Duration::ZERO,
        }
    }

    pub fn stabilise(mut self, stabilise: bool) -> Self {
        self.stabilise = stabilise;
        self
    }

    pub fn acclimatise(mut self, acclimatise: Duration) -> Self {
        self.acclimatise = acclimatise;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempWaitState {
    #[default]
    Waiting,
    Stabilising {
        stable: u32,
    },
    Acclimatising {
        since: Duration,
    },
    Done,
}

/// One poll's worth of oven state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub mode: OperatingMode,
    pub setpoint: f32,
    pub temperature: f32,
    pub now: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempWait {
    setpoint: f32,
    options: WaitOptions,
    required: u32,
    state: TempWaitState,
}

impl TempWait {
    /// `stable_readings` is the number of consecutive in-tolerance readings
    /// required when `options.stabilise` is set.
    pub fn new(setpoint: f32, options: WaitOptions, stable_readings: u32) -> Self {
        Self {
            setpoint,
            options,
            required: if options.stabilise { stable_readings } else { 0 },
            state: TempWaitState::Waiting,
        }
    }

    /// The setpoint captured at creation.
    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn state(&self) -> TempWaitState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == TempWaitState::Done
    }

    /// Advances the state machine by one reading.
    pub fn step(&mut self, reading: &Reading) -> std::result::Result<TempWaitState, StatusError> {
        if self.state == TempWaitState::Done {
            return Ok(self.state);
        }
        if reading.mode.is_idle() {
            return Err(StatusError::Idle);
        }
        if reading.setpoint != self.setpoint {
            return Err(StatusError::SetpointChanged {
                old: self.setpoint,
                new: reading.setpoint,
            });
        }

        let deviation = (reading.temperature - self.setpoint).abs();
        self.state = if deviation.is_nan() || deviation > self.options.tolerance {
            TempWaitState::Waiting
        } else {
            let stable = match self.state {
                TempWaitState::Stabilising { stable } => stable + 1,
                TempWaitState::Waiting => 1,
                // already stable, stays stable while in tolerance
                _ => self.required,
            };
            if stable < self.required {
                TempWaitState::Stabilising { stable }
            } else if self.options.acclimatise.is_zero() {
                TempWaitState::Done
            } else {
                let since = match self.state {
                    TempWaitState::Acclimatising { since } => since,
                    _ => reading.now,
                };
                if reading.now.saturating_sub(since) >= self.options.acclimatise {
                    TempWaitState::Done
                } else {
                    TempWaitState::Acclimatising { since }
                }
            }
        };
        Ok(self.state)
    }

    /// Reads the oven and advances the state machine; returns `true` once done.
    pub fn poll<T: Transport, C: Clock>(&mut self, oven: &mut Oven<T>, clock: &C) -> Result<bool> {
        if self.is_done() {
            return Ok(true);
        }
        let mode = oven.get_mode()?;
        let setpoint = oven.get_setpoint()?;
        let temperature = oven.get_temperature()?;
        let state = self.step(&Reading {
            mode,
            setpoint,
            temperature,
            now: clock.now(),
        })?;
        match state {
            TempWaitState::Waiting => info!("Temperature: {temperature:.2} - waiting..."),
            TempWaitState::Stabilising { stable } => {
                info!("Temperature: {temperature:.2} - stabilising ({stable}/{})...", self.required)
            }
            TempWaitState::Acclimatising { .. } => {
                info!("Temperature: {temperature:.2} - acclimatising...")
            }
            TempWaitState::Done => info!("Temperature: {temperature:.2}"),
        }
        Ok(state == TempWaitState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::sim::SimulatedOven;
    use assert_matches::assert_matches;

    fn reading(temperature: f32, secs: u64) -> Reading {
        Reading {
            mode: OperatingMode::MANUAL,
            setpoint: 50.0,
            temperature,
            now: Duration::from_secs(secs),
        }
    }

    #[test]
    fn first_reading_in_tolerance_is_done() {
        let mut wait = TempWait::new(50.0, WaitOptions::new(1.0), 6);
        assert_eq!(wait.step(&reading(45.0, 0)), Ok(TempWaitState::Waiting));
        assert_eq!(wait.step(&reading(49.0, 10)), Ok(TempWaitState::Done));
        assert!(wait.is_done());
    }

    #[test]
    fn stabilising_needs_consecutive_readings() {
        let mut wait = TempWait::new(50.0, WaitOptions::new(0.5).stabilise(true), 3);
        assert_eq!(
            wait.step(&reading(50.2, 0)),
            Ok(TempWaitState::Stabilising { stable: 1 })
        );
        assert_eq!(
            wait.step(&reading(49.8, 10)),
            Ok(TempWaitState::Stabilising { stable: 2 })
        );
        // one excursion resets the count
        assert_eq!(wait.step(&reading(51.0, 20)), Ok(TempWaitState::Waiting));
        for (i, secs) in [30, 40].into_iter().enumerate() {
            assert_eq!(
                wait.step(&reading(50.0, secs)),
                Ok(TempWaitState::Stabilising {
                    stable: i as u32 + 1
                })
            );
        }
        assert_eq!(wait.step(&reading(50.0, 50)), Ok(TempWaitState::Done));
    }

    #[test]
    fn acclimatise_holds_after_reaching() {
        let options = WaitOptions::new(1.0).acclimatise(Duration::from_secs(60));
        let mut wait = TempWait::new(50.0, options, 6);
        assert_eq!(
            wait.step(&reading(50.0, 100)),
            Ok(TempWaitState::Acclimatising {
                since: Duration::from_secs(100)
            })
        );
        assert_matches!(
            wait.step(&reading(50.5, 150)),
            Ok(TempWaitState::Acclimatising { .. })
        );
        // leaving tolerance restarts the hold
        assert_eq!(wait.step(&reading(52.0, 155)), Ok(TempWaitState::Waiting));
        assert_matches!(
            wait.step(&reading(50.0, 160)),
            Ok(TempWaitState::Acclimatising { since }) if since == Duration::from_secs(160)
        );
        assert_matches!(
            wait.step(&reading(50.0, 210)),
            Ok(TempWaitState::Acclimatising { .. })
        );
        assert_eq!(wait.step(&reading(50.0, 220)), Ok(TempWaitState::Done));
    }

    #[test]
    fn stale_premise_fails() {
        let mut wait = TempWait::new(50.0, WaitOptions::new(1.0), 6);
        let idle = Reading {
            mode: OperatingMode::IDLE,
            ..reading(50.0, 0)
        };
        assert_eq!(wait.step(&idle), Err(StatusError::Idle));
        let changed = Reading {
            setpoint: 60.0,
            ..reading(50.0, 0)
        };
        assert_eq!(
            wait.step(&changed),
            Err(StatusError::SetpointChanged {
                old: 50.0,
                new: 60.0
            })
        );
    }

    #[test]
    fn poll_against_oven() {
        let clock = ManualClock::new();
        let mut oven = Oven::new(SimulatedOven::default());
        oven.set_setpoint(70.0, false).unwrap();
        oven.set_mode_active(false).unwrap();

        let mut wait = oven.temp_ready_tester(WaitOptions::new(2.0)).unwrap();
        assert_eq!(wait.setpoint(), 70.0);
        assert!(!wait.poll(&mut oven, &clock).unwrap());
        oven.transport_mut().set_temperature(68.5);
        assert!(wait.poll(&mut oven, &clock).unwrap());

        let mut wait = oven.temp_ready_tester(WaitOptions::new(2.0)).unwrap();
        oven.transport_mut().set_setpoint(40.0);
        assert_matches!(
            wait.poll(&mut oven, &clock),
            Err(Error::Status(StatusError::SetpointChanged { .. }))
        );

        let mut wait = oven.temp_ready_tester(WaitOptions::new(2.0)).unwrap();
        oven.set_mode_idle().unwrap();
        assert_matches!(
            wait.poll(&mut oven, &clock),
            Err(Error::Status(StatusError::Idle))
        );
    }
}
