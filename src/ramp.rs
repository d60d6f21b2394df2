//! Time-driven interpreter for [`RampProgram`]s.
//!
//! [`RampCtl`] owns the remaining action queue and executes exactly one tick of
//! the head action per call to [`RampCtl::tick`]. The caller owns the cadence:
//!
//! ```no_run
//! use ovenctl_lib::{oven::Oven, ramp::RampCtl, transport::TcpTransport};
//! use ovenctl_lib::config::ConnectionConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut oven = Oven::new(TcpTransport::new("oven.lab", ConnectionConfig::default()));
//!     let mut ramp = RampCtl::new("Rr10,s85;Ht2;Rr10,s25".parse()?);
//!     while ramp.tick(&mut oven)? > 0 {
//!         std::thread::sleep(std::time::Duration::from_secs(3));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Every write made by the interpreter is forced past the door and note
//! interlocks. An active alarm still stops it.

use crate::clock::{hours, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::oven::Oven;
use crate::rampspec::{ActionSpec, RampAction, RampProgram, Target};
use crate::transport::Transport;
use log::*;
use std::collections::VecDeque;
use std::time::Duration;

/// Hook run by `X` actions. Returning `true` requests a jump to the action's
/// `j` label.
pub trait RampCallback {
    fn call(&mut self) -> bool;
}

impl<F: FnMut() -> bool> RampCallback for F {
    fn call(&mut self) -> bool {
        self()
    }
}

/// Threads an opaque value through successive callback invocations.
///
/// The function receives the current value and returns whether to jump along
/// with the value for the next invocation.
pub struct CarryCallback<C, F> {
    carry: Option<C>,
    f: F,
}

impl<C, F: FnMut(C) -> (bool, C)> CarryCallback<C, F> {
    pub fn new(carry: C, f: F) -> Self {
        Self {
            carry: Some(carry),
            f,
        }
    }

    pub fn carry(&self) -> Option<&C> {
        self.carry.as_ref()
    }

    pub fn into_carry(self) -> Option<C> {
        self.carry
    }
}

impl<C, F: FnMut(C) -> (bool, C)> RampCallback for CarryCallback<C, F> {
    fn call(&mut self) -> bool {
        let Some(carry) = self.carry.take() else {
            return false;
        };
        let (jump, carry) = (self.f)(carry);
        self.carry = Some(carry);
        jump
    }
}

/// Setpoint `elapsed` hours into a ramp from `start` to `end`, and whether the
/// ramp has completed.
///
/// With a rate, the effective rate is the lesser of `rate` and the rate implied
/// by a non-zero `duration`; the ramp completes once the target is reached or
/// crossed. Without a rate the setpoint is interpolated linearly over
/// `duration`. The returned setpoint is snapped to `end` on completion.
pub fn ramp_position(start: f64, end: f64, elapsed: f64, rate: Option<f64>, duration: f64) -> (f64, bool) {
    let delta = end - start;
    if delta == 0.0 {
        return (end, true);
    }
    match rate {
        Some(rate) => {
            let rate = if duration > 0.0 {
                (delta / duration).abs().min(rate.abs())
            } else {
                rate.abs()
            };
            let position = start + elapsed * rate.copysign(delta);
            let reached = if delta > 0.0 {
                position >= end
            } else {
                position <= end
            };
            if reached {
                (end, true)
            } else {
                (position, false)
            }
        }
        None if duration > 0.0 && elapsed < duration => {
            (start + delta * (elapsed / duration), false)
        }
        None => (end, true),
    }
}

pub struct RampCtl<K = SystemClock> {
    actions: VecDeque<RampAction>,
    clock: K,
    action_start: Duration,
    carried_setpoint: Option<f64>,
    new_action: bool,
    /// The current action's target has been resolved into `carried_setpoint`.
    resolved: bool,
    /// Outcome of the current `X` action's callback, kept until the action
    /// advances so a failed tick does not run it twice.
    callback_jump: Option<bool>,
    last_temperature: Option<f64>,
    stable: i64,
    callback: Option<Box<dyn RampCallback>>,
}

impl RampCtl<SystemClock> {
    pub fn new(program: RampProgram) -> Self {
        Self::with_clock(program, SystemClock::default())
    }
}

impl<K: Clock> RampCtl<K> {
    pub fn with_clock(program: RampProgram, clock: K) -> Self {
        let actions: VecDeque<_> = program.into_iter().collect();
        Self {
            new_action: !actions.is_empty(),
            actions,
            action_start: clock.now(),
            clock,
            carried_setpoint: None,
            resolved: false,
            callback_jump: None,
            last_temperature: None,
            stable: 0,
            callback: None,
        }
    }

    /// Installs the hook run by `X` actions.
    pub fn with_callback(mut self, callback: impl RampCallback + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The action the next tick will execute.
    pub fn current(&self) -> Option<&RampAction> {
        self.actions.front()
    }

    /// Whether the next tick is the first one of the current action.
    pub fn is_new_action(&self) -> bool {
        self.new_action
    }

    pub fn remaining(&self) -> usize {
        self.actions.len()
    }

    /// The setpoint handed from one action to the next.
    pub fn carried_setpoint(&self) -> Option<f64> {
        self.carried_setpoint
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    fn base_setpoint<T: Transport>(&self, oven: &mut Oven<T>) -> Result<f64> {
        match self.carried_setpoint {
            Some(setpoint) => Ok(setpoint),
            None => Ok(oven.get_setpoint()? as f64),
        }
    }

    fn resolve<T: Transport>(&self, target: Target, oven: &mut Oven<T>) -> Result<f64> {
        match target {
            Target::Absolute(setpoint) => Ok(setpoint),
            target => Ok(target.resolve(self.base_setpoint(oven)?)),
        }
    }

    /// Resolves the current action's target once. A tick that fails after
    /// this point only re-applies the resolved value when retried.
    fn resolve_once<T: Transport>(&mut self, target: Target, oven: &mut Oven<T>) -> Result<f64> {
        if !self.resolved {
            self.carried_setpoint = Some(self.resolve(target, oven)?);
            self.resolved = true;
        }
        self.base_setpoint(oven)
    }

    fn apply<T: Transport>(oven: &mut Oven<T>, setpoint: f64) -> Result<()> {
        oven.set_setpoint(setpoint as f32, true)?;
        oven.set_mode_active(true)
    }

    /// Executes one tick of the current action and returns the number of
    /// actions left; zero means the program has completed.
    pub fn tick<T: Transport>(&mut self, oven: &mut Oven<T>) -> Result<usize> {
        let Some(action) = self.actions.front().copied() else {
            return Ok(0);
        };
        if self.new_action {
            info!("Started action: {action}");
        }
        let elapsed = hours(self.clock.now().saturating_sub(self.action_start));
        let duration = action.spec.duration();
        let mut finished = elapsed >= duration;
        let mut jump_to = None;

        match action.spec {
            ActionSpec::Hold { target, .. } => {
                let setpoint = self.resolve_once(target, oven)?;
                Self::apply(oven, setpoint)?;
            }
            ActionSpec::Idle { .. } => {
                if self.new_action {
                    oven.set_mode_idle()?;
                }
                if finished {
                    self.carried_setpoint = Some(oven.get_temperature()? as f64);
                }
            }
            ActionSpec::Jump { label } => {
                jump_to = Some(label);
                finished = true;
            }
            ActionSpec::Ramp { target, rate, .. } => {
                let start = self.resolve_once(Target::Keep, oven)?;
                let end = target.resolve(start);
                let (setpoint, done) = ramp_position(start, end, elapsed, rate, duration);
                debug!("Ramp {start:.2} -> {end:.2}: {setpoint:.2}");
                Self::apply(oven, setpoint)?;
                if done {
                    self.carried_setpoint = Some(end);
                }
                finished = done;
            }
            ActionSpec::Wait {
                target,
                tolerance,
                stability,
                ..
            } => {
                if !self.resolved {
                    self.last_temperature = None;
                    self.stable = 0;
                }
                let setpoint = self.resolve_once(target, oven)?;
                Self::apply(oven, setpoint)?;
                let temperature = oven.get_temperature()? as f64;
                let near = match (tolerance, self.last_temperature) {
                    (Some(tolerance), _) if tolerance > 0.0 => {
                        (setpoint - temperature).abs() < tolerance
                    }
                    // the temperature crossed the setpoint since the last reading
                    (_, Some(last)) => (setpoint < last) != (setpoint < temperature),
                    _ => false,
                };
                let settled = match stability {
                    Some(required) if required > 0 => {
                        self.stable = if near { self.stable + 1 } else { 0 };
                        self.stable >= required
                    }
                    _ => near,
                };
                debug!("Wait for {setpoint:.2}: {temperature:.2}, near {near}, stable {}", self.stable);
                self.last_temperature = Some(temperature);
                // `t` does not end a wait; only reaching the setpoint does
                finished = settled;
            }
            ActionSpec::Callback { jump } => {
                let requested = match self.callback_jump {
                    Some(requested) => requested,
                    None => {
                        let callback = self.callback.as_mut().ok_or(Error::NoCallback)?;
                        let requested = callback.call();
                        self.callback_jump = Some(requested);
                        requested
                    }
                };
                if requested {
                    jump_to = jump;
                }
                finished = true;
            }
        }

        let dry = action.spec.dry()
            && oven.get_setpoint()? < oven.config().safety.condensation_threshold;
        oven.set_condensation_protection(dry)?;
        self.new_action = false;

        if finished {
            self.advance();
        }
        if let Some(label) = jump_to {
            debug!("Jumping to label {label}");
            while let Some(head) = self.actions.front() {
                if head.label == Some(label) {
                    break;
                }
                self.advance();
            }
        }
        Ok(self.actions.len())
    }

    fn advance(&mut self) {
        if let Some(action) = self.actions.pop_front() {
            debug!("Finished action: {action}");
        }
        self.new_action = true;
        self.resolved = false;
        self.callback_jump = None;
        self.action_start = self.clock.now();
    }
}
