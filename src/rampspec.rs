//! Parser for rampspecs, the compact language describing temperature profiles.
//!
//! A rampspec is a `;`-separated list of actions. Each action is an optional
//! integer label followed by `:`, one action letter and a `,`-separated list of
//! arguments, each an argument letter immediately followed by its value.
//!
//! | Action | Meaning               | Arguments          |
//! |--------|-----------------------|--------------------|
//! | `H`    | hold a setpoint       | `c d s t`          |
//! | `I`    | idle the oven         | `t`                |
//! | `J`    | jump to a label       | `j`                |
//! | `R`    | ramp to a setpoint    | `c d r s t`        |
//! | `W`    | wait for temperature  | `c d l s t z`      |
//! | `X`    | call back the caller  | `j`                |
//!
//! | Argument | Type  | Meaning                                      |
//! |----------|-------|----------------------------------------------|
//! | `c`      | float | setpoint relative to the previous one (°C)   |
//! | `d`      | flag  | dry: condensation protection below 20 °C     |
//! | `j`      | int   | label to jump to                             |
//! | `l`      | float | tolerance (°C)                               |
//! | `r`      | float | ramp rate (°C/h)                             |
//! | `s`      | float | absolute setpoint (°C)                       |
//! | `t`      | float | duration (hours)                             |
//! | `z`      | int   | consecutive near readings required           |
//!
//! Before splitting into actions, macros are expanded. `[n#body]` repeats
//! `body` `n` times; macros nest and are expanded innermost first.
//!
//! ```
//! use ovenctl_lib::rampspec::{RampProgram, macro_expand};
//!
//! assert_eq!(macro_expand("[3#Ht1.0;]").unwrap(), "Ht1.0;Ht1.0;Ht1.0;");
//! let program: RampProgram = "Rr10,s85;Ht2;Wl0.5,z3;1:I".parse().unwrap();
//! assert_eq!(program.len(), 4);
//! ```

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Unmatched ']'")]
    UnmatchedClose,
    #[error("Unmatched '['")]
    UnmatchedOpen,
    #[error("No recognisable macro call in [{0}]")]
    MissingMacroCall(String),
    #[error("Invalid repeat count {0:?}")]
    InvalidRepeatCount(String),
    #[error("Invalid label {0:?}")]
    InvalidLabel(String),
    #[error("Empty action after label")]
    EmptyAction,
    #[error("No such action {0:?}")]
    UnknownAction(char),
    #[error("No such argument {0:?}")]
    UnknownArgument(char),
    #[error("Argument {0:?} specified twice")]
    DuplicateArgument(char),
    #[error("Invalid argument {argument:?} for action {action:?}")]
    ArgumentNotAllowed { action: char, argument: char },
    #[error("Invalid value {value:?} for argument {argument:?}")]
    InvalidValue { argument: char, value: String },
    #[error("Action 'R' (ramp) must have at least one of r, t")]
    RampWithoutRateOrDuration,
    #[error("Action 'W' (wait) can't have z without l")]
    StabilityWithoutTolerance,
    #[error("Action 'J' (jump) must have j")]
    JumpWithoutTarget,
    #[error("Action {0:?} can't combine s, c")]
    AbsoluteAndRelative(char),
}

fn expand_macro(block: &str) -> Result<String, ParseError> {
    let (count, body) = block
        .split_once('#')
        .ok_or_else(|| ParseError::MissingMacroCall(block.to_string()))?;
    let count: usize = count
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidRepeatCount(count.to_string()))?;
    Ok(body.repeat(count))
}

/// Expands all `[n#body]` macros in `text`.
pub fn macro_expand(text: &str) -> Result<String, ParseError> {
    let mut stack = vec![String::new()];
    for c in text.chars() {
        match c {
            '[' => stack.push(String::new()),
            ']' => {
                if stack.len() < 2 {
                    return Err(ParseError::UnmatchedClose);
                }
                let block = stack.pop().unwrap_or_default();
                let expanded = expand_macro(&block)?;
                if let Some(top) = stack.last_mut() {
                    top.push_str(&expanded);
                }
            }
            c => {
                if let Some(top) = stack.last_mut() {
                    top.push(c);
                }
            }
        }
    }
    if stack.len() > 1 {
        return Err(ParseError::UnmatchedOpen);
    }
    Ok(stack.pop().unwrap_or_default())
}

/// The setpoint an action drives towards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Target {
    /// Keep the setpoint carried over from the previous action.
    #[default]
    Keep,
    Absolute(f64),
    Relative(f64),
}

impl Target {
    /// Resolves against the setpoint carried over from the previous action.
    pub fn resolve(&self, previous: f64) -> f64 {
        match *self {
            Target::Keep => previous,
            Target::Absolute(setpoint) => setpoint,
            Target::Relative(delta) => previous + delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionSpec {
    Hold {
        target: Target,
        duration: Option<f64>,
        dry: bool,
    },
    Idle {
        duration: Option<f64>,
    },
    Jump {
        label: i64,
    },
    Ramp {
        target: Target,
        duration: Option<f64>,
        rate: Option<f64>,
        dry: bool,
    },
    Wait {
        target: Target,
        duration: Option<f64>,
        tolerance: Option<f64>,
        stability: Option<i64>,
        dry: bool,
    },
    Callback {
        jump: Option<i64>,
    },
}

impl ActionSpec {
    pub fn letter(&self) -> char {
        match self {
            ActionSpec::Hold { .. } => 'H',
            ActionSpec::Idle { .. } => 'I',
            ActionSpec::Jump { .. } => 'J',
            ActionSpec::Ramp { .. } => 'R',
            ActionSpec::Wait { .. } => 'W',
            ActionSpec::Callback { .. } => 'X',
        }
    }

    /// Duration in hours; zero when not given.
    pub fn duration(&self) -> f64 {
        match *self {
            ActionSpec::Hold { duration, .. }
            | ActionSpec::Idle { duration }
            | ActionSpec::Ramp { duration, .. }
            | ActionSpec::Wait { duration, .. } => duration.unwrap_or(0.0),
            ActionSpec::Jump { .. } | ActionSpec::Callback { .. } => 0.0,
        }
    }

    pub fn dry(&self) -> bool {
        match *self {
            ActionSpec::Hold { dry, .. }
            | ActionSpec::Ramp { dry, .. }
            | ActionSpec::Wait { dry, .. } => dry,
            _ => false,
        }
    }

    pub fn target(&self) -> Target {
        match *self {
            ActionSpec::Hold { target, .. }
            | ActionSpec::Ramp { target, .. }
            | ActionSpec::Wait { target, .. } => target,
            _ => Target::Keep,
        }
    }
}

/// One step of a program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampAction {
    pub label: Option<i64>,
    pub spec: ActionSpec,
}

// (letter, allowed arguments)
const ALLOWED_ARGUMENTS: [(char, &str); 6] = [
    ('H', "cdst"),
    ('I', "t"),
    ('J', "j"),
    ('R', "cdrst"),
    ('W', "cdlstz"),
    ('X', "j"),
];

const KNOWN_ARGUMENTS: &str = "cdjlrstz";

#[derive(Debug, Default)]
struct Arguments {
    c: Option<f64>,
    d: bool,
    j: Option<i64>,
    l: Option<f64>,
    r: Option<f64>,
    s: Option<f64>,
    t: Option<f64>,
    z: Option<i64>,
}

fn parse_float(argument: char, value: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidValue {
            argument,
            value: value.to_string(),
        })
}

fn parse_int(argument: char, value: &str) -> Result<i64, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidValue {
        argument,
        value: value.to_string(),
    })
}

impl Arguments {
    fn set(&mut self, argument: char, value: &str) -> Result<(), ParseError> {
        match argument {
            'c' => self.c = Some(parse_float(argument, value)?),
            'd' => {
                if !value.is_empty() {
                    return Err(ParseError::InvalidValue {
                        argument,
                        value: value.to_string(),
                    });
                }
                self.d = true;
            }
            'j' => self.j = Some(parse_int(argument, value)?),
            'l' => self.l = Some(parse_float(argument, value)?),
            'r' => self.r = Some(parse_float(argument, value)?),
            's' => self.s = Some(parse_float(argument, value)?),
            't' => self.t = Some(parse_float(argument, value)?),
            'z' => self.z = Some(parse_int(argument, value)?),
            _ => return Err(ParseError::UnknownArgument(argument)),
        }
        Ok(())
    }

    fn target(&self) -> Target {
        match (self.s, self.c) {
            (Some(s), _) => Target::Absolute(s),
            (None, Some(c)) => Target::Relative(c),
            (None, None) => Target::Keep,
        }
    }
}

impl FromStr for RampAction {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (label, text) = match text.split_once(':') {
            Some((label, rest)) => (
                Some(
                    label
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ParseError::InvalidLabel(label.to_string()))?,
                ),
                rest.trim(),
            ),
            None => (None, text),
        };

        let mut chars = text.chars();
        let letter = chars.next().ok_or(ParseError::EmptyAction)?;
        let allowed = ALLOWED_ARGUMENTS
            .iter()
            .find(|(action, _)| *action == letter)
            .map(|(_, allowed)| *allowed)
            .ok_or(ParseError::UnknownAction(letter))?;

        let mut seen = String::new();
        let mut args = Arguments::default();
        let mut rest = chars.as_str();
        while let Some(argument) = rest.chars().next() {
            let tail = &rest[argument.len_utf8()..];
            let (value, tail) = tail.split_once(',').unwrap_or((tail, ""));
            rest = tail;
            if seen.contains(argument) {
                return Err(ParseError::DuplicateArgument(argument));
            }
            if !KNOWN_ARGUMENTS.contains(argument) {
                return Err(ParseError::UnknownArgument(argument));
            }
            if !allowed.contains(argument) {
                return Err(ParseError::ArgumentNotAllowed {
                    action: letter,
                    argument,
                });
            }
            seen.push(argument);
            args.set(argument, value.trim())?;
        }

        let spec = match letter {
            'H' => ActionSpec::Hold {
                target: args.target(),
                duration: args.t,
                dry: args.d,
            },
            'I' => ActionSpec::Idle { duration: args.t },
            'J' => ActionSpec::Jump {
                label: args.j.ok_or(ParseError::JumpWithoutTarget)?,
            },
            'R' => {
                if args.r.is_none() && args.t.is_none() {
                    return Err(ParseError::RampWithoutRateOrDuration);
                }
                ActionSpec::Ramp {
                    target: args.target(),
                    duration: args.t,
                    rate: args.r,
                    dry: args.d,
                }
            }
            'W' => {
                if args.z.is_some() && args.l.is_none() {
                    return Err(ParseError::StabilityWithoutTolerance);
                }
                ActionSpec::Wait {
                    target: args.target(),
                    duration: args.t,
                    tolerance: args.l,
                    stability: args.z,
                    dry: args.d,
                }
            }
            _ => ActionSpec::Callback { jump: args.j },
        };
        if args.s.is_some() && args.c.is_some() {
            return Err(ParseError::AbsoluteAndRelative(letter));
        }
        Ok(RampAction { label, spec })
    }
}

struct ArgumentList(Vec<String>);

impl ArgumentList {
    fn float(&mut self, letter: char, value: Option<f64>) {
        if let Some(value) = value {
            self.0.push(format!("{letter}{value}"));
        }
    }

    fn int(&mut self, letter: char, value: Option<i64>) {
        if let Some(value) = value {
            self.0.push(format!("{letter}{value}"));
        }
    }

    fn flag(&mut self, letter: char, value: bool) {
        if value {
            self.0.push(letter.to_string());
        }
    }

    fn target(&mut self, target: Target) {
        match target {
            Target::Keep => {}
            Target::Absolute(s) => self.float('s', Some(s)),
            Target::Relative(c) => self.float('c', Some(c)),
        }
    }
}

impl fmt::Display for RampAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = self.label {
            write!(f, "{label}:")?;
        }
        let mut args = ArgumentList(Vec::new());
        match self.spec {
            ActionSpec::Hold {
                target,
                duration,
                dry,
            } => {
                args.target(target);
                args.flag('d', dry);
                args.float('t', duration);
            }
            ActionSpec::Idle { duration } => args.float('t', duration),
            ActionSpec::Jump { label } => args.int('j', Some(label)),
            ActionSpec::Ramp {
                target,
                duration,
                rate,
                dry,
            } => {
                args.target(target);
                args.flag('d', dry);
                args.float('r', rate);
                args.float('t', duration);
            }
            ActionSpec::Wait {
                target,
                duration,
                tolerance,
                stability,
                dry,
            } => {
                args.target(target);
                args.flag('d', dry);
                args.float('l', tolerance);
                args.float('t', duration);
                args.int('z', stability);
            }
            ActionSpec::Callback { jump } => args.int('j', jump),
        }
        write!(f, "{}{}", self.spec.letter(), args.0.join(","))
    }
}

/// A parsed, macro-expanded rampspec.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RampProgram {
    actions: Vec<RampAction>,
}

impl RampProgram {
    pub fn new(actions: Vec<RampAction>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[RampAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl IntoIterator for RampProgram {
    type Item = RampAction;
    type IntoIter = std::vec::IntoIter<RampAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

impl FromStr for RampProgram {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let actions = macro_expand(text)?
            .split(';')
            .filter(|action| !action.trim().is_empty())
            .map(str::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { actions })
    }
}

impl fmt::Display for RampProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(text: &str) -> Result<RampProgram, ParseError> {
        text.parse()
    }

    #[test]
    fn macros() {
        assert_eq!(macro_expand("[3#Ht1.0;]").unwrap(), "Ht1.0;Ht1.0;Ht1.0;");
        assert_eq!(macro_expand("I;[2#a[3#b]]c").unwrap(), "I;abbbabbbc");
        assert_eq!(macro_expand("[0#Ht1;]I").unwrap(), "I");
        assert_eq!(macro_expand("no macros").unwrap(), "no macros");
        assert_eq!(macro_expand("Ht1]"), Err(ParseError::UnmatchedClose));
        assert_eq!(macro_expand("[2#[3#Ht1]"), Err(ParseError::UnmatchedOpen));
        assert_matches!(macro_expand("[Ht1]"), Err(ParseError::MissingMacroCall(_)));
        assert_matches!(macro_expand("[x#Ht1]"), Err(ParseError::InvalidRepeatCount(_)));
    }

    #[test]
    fn four_action_program() {
        let program = parse("Ht1.0;Rt2.0,s50;Wl1.0;X;").unwrap();
        let actions = program.actions();
        assert_eq!(actions.len(), 4);
        assert_eq!(
            actions[0].spec,
            ActionSpec::Hold {
                target: Target::Keep,
                duration: Some(1.0),
                dry: false
            }
        );
        assert_eq!(
            actions[1].spec,
            ActionSpec::Ramp {
                target: Target::Absolute(50.0),
                duration: Some(2.0),
                rate: None,
                dry: false
            }
        );
        assert_eq!(
            actions[2].spec,
            ActionSpec::Wait {
                target: Target::Keep,
                duration: None,
                tolerance: Some(1.0),
                stability: None,
                dry: false
            }
        );
        assert_eq!(actions[3].spec, ActionSpec::Callback { jump: None });
        assert!(actions.iter().all(|a| a.label.is_none()));
    }

    #[test]
    fn labels_flags_and_relative_targets() {
        let program = parse(" 3:Hc-5,d ; -1:Xj3 ;Jj3").unwrap();
        let actions = program.actions();
        assert_eq!(actions[0].label, Some(3));
        assert_eq!(actions[0].spec.target(), Target::Relative(-5.0));
        assert!(actions[0].spec.dry());
        assert_eq!(actions[1].label, Some(-1));
        assert_eq!(actions[1].spec, ActionSpec::Callback { jump: Some(3) });
        assert_eq!(actions[2].spec, ActionSpec::Jump { label: 3 });
        assert_eq!(actions[2].spec.duration(), 0.0);
    }

    #[test]
    fn argument_errors() {
        assert_eq!(parse("Ht1,t2"), Err(ParseError::DuplicateArgument('t')));
        assert_eq!(parse("Hq1"), Err(ParseError::UnknownArgument('q')));
        assert_eq!(parse("Ht1,,s2"), Err(ParseError::UnknownArgument(',')));
        assert_eq!(
            parse("Ir5"),
            Err(ParseError::ArgumentNotAllowed {
                action: 'I',
                argument: 'r'
            })
        );
        assert_eq!(parse("Q"), Err(ParseError::UnknownAction('Q')));
        assert_eq!(parse("7:"), Err(ParseError::EmptyAction));
        assert_eq!(parse("H t1"), Err(ParseError::UnknownArgument(' ')));
        assert_matches!(parse("x:H"), Err(ParseError::InvalidLabel(_)));
        assert_matches!(
            parse("Ht"),
            Err(ParseError::InvalidValue { argument: 't', .. })
        );
        assert_matches!(
            parse("Jj1.5"),
            Err(ParseError::InvalidValue { argument: 'j', .. })
        );
        assert_matches!(
            parse("Hdyes"),
            Err(ParseError::InvalidValue { argument: 'd', .. })
        );
        assert_matches!(
            parse("Hsinf"),
            Err(ParseError::InvalidValue { argument: 's', .. })
        );
    }

    #[test]
    fn cross_argument_validation() {
        assert_eq!(parse("Rs50"), Err(ParseError::RampWithoutRateOrDuration));
        assert!(parse("Rr10,s50").is_ok());
        assert_eq!(parse("Wz3"), Err(ParseError::StabilityWithoutTolerance));
        assert!(parse("Wl1,z3").is_ok());
        assert_eq!(parse("J"), Err(ParseError::JumpWithoutTarget));
        for text in ["Hs1,c1", "Rt1,s1,c1", "Wc1,s1"] {
            assert_matches!(parse(text), Err(ParseError::AbsoluteAndRelative(_)));
        }
    }

    #[test]
    fn errors_abort_whole_program() {
        assert_eq!(
            parse("Hs50;Ht1;Rs60"),
            Err(ParseError::RampWithoutRateOrDuration)
        );
    }

    #[test]
    fn display() {
        let text = "Hs85,t2;1:It0.5;Jj1;Rc-10,d,r5,t1.5;Wl0.25,t4,z6;2:Xj1";
        let program = parse(text).unwrap();
        assert_eq!(program.to_string(), text);
        assert_eq!(parse(&program.to_string()).unwrap(), program);
        assert_eq!(parse("[2#Ht1.0;]").unwrap().to_string(), "Ht1;Ht1");
    }
}
