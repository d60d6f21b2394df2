//! Error types for oven communication, safety interlocks and wait status.
use crate::protocol::{DeviceErrorCode, FrameError};

fn text_or_placeholder(text: &Option<String>) -> &str {
    text.as_deref().unwrap_or("<no text>")
}

fn over_or_under(over: &bool) -> &'static str {
    if *over { "over" } else { "under" }
}

/// The oven is in a state where operating it may be unsafe.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SafetyError {
    /// Alarm on the oven. Never overridable; the alarm must be reset on the
    /// front control panel.
    #[error("ALARM: {}", text_or_placeholder(.0))]
    Alarm(Option<String>),

    /// A note (minor alarm) is active.
    #[error("Note: {}", text_or_placeholder(.0))]
    Note(Option<String>),

    #[error("Door is open")]
    DoorOpen,

    /// The requested setpoint lies outside the rated range.
    #[error("Temperature {setpoint:.2} {} limit of {limit:.2}", over_or_under(.over))]
    Range { setpoint: f32, limit: f32, over: bool },
}

/// The oven's state makes waiting for the setpoint pointless.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatusError {
    #[error("Oven is idle, will never reach temp.")]
    Idle,
    #[error("The setpoint was changed from {old:.2} to {new:.2}")]
    SetpointChanged { old: f32, new: f32 },
}

/// Represents all possible errors of oven operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every connection attempt failed; holds the last failure.
    #[error("Cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The response was invalid (function code or checksum).
    #[error("Invalid MODBus message: {0}")]
    Frame(#[from] FrameError),

    /// The device answered with an error response.
    #[error("MODBus error: {0}")]
    Device(DeviceErrorCode),

    /// The response filled the expected length without ever becoming valid.
    #[error("Unparseable MODBus response: {0:02x?}")]
    BadResponse(Vec<u8>),

    /// The response was valid but does not answer the request that was sent.
    /// The oven may be in an unexpected state.
    #[error("MODBus response does not match request: {0}")]
    ResponseMismatch(String),

    #[error("Safety interlock: {0}")]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Callback action reached but no callback is installed")]
    NoCallback,
}

/// The result type for oven operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// A safety interlock blocked the operation.
    pub fn is_safety(&self) -> bool {
        matches!(self, Error::Safety(_))
    }

    /// A wait's premise is stale (oven idle or setpoint changed).
    pub fn is_status(&self) -> bool {
        matches!(self, Error::Status(_))
    }

    /// Talking to the device failed, as opposed to the device refusing the operation.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::Io(_)
                | Error::Frame(_)
                | Error::Device(_)
                | Error::BadResponse(_)
                | Error::ResponseMismatch(_)
        )
    }

    /// Socket-level failure (refused, reset, timed out), usually transient.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Io(_))
    }

    pub fn is_timeout(&self) -> bool {
        let kind = match self {
            Error::Connect { source, .. } => source.kind(),
            Error::Io(err) => err.kind(),
            _ => return false,
        };
        matches!(
            kind,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_messages() {
        assert_eq!(
            SafetyError::Alarm(Some("Temp. limit".into())).to_string(),
            "ALARM: Temp. limit"
        );
        assert_eq!(SafetyError::Note(None).to_string(), "Note: <no text>");
        assert_eq!(
            SafetyError::Range {
                setpoint: 181.0,
                limit: 180.0,
                over: true
            }
            .to_string(),
            "Temperature 181.00 over limit of 180.00"
        );
        assert_eq!(
            SafetyError::Range {
                setpoint: -41.0,
                limit: -40.0,
                over: false
            }
            .to_string(),
            "Temperature -41.00 under limit of -40.00"
        );
    }

    #[test]
    fn classification() {
        let safety = Error::from(SafetyError::DoorOpen);
        assert!(safety.is_safety() && !safety.is_communication());
        let status = Error::from(StatusError::Idle);
        assert!(status.is_status() && !status.is_communication());
        let frame = Error::from(FrameError::OddByteCount(1));
        assert!(frame.is_communication() && !frame.is_io());
        let timeout = Error::Connect {
            address: "oven:10001".into(),
            source: std::io::ErrorKind::TimedOut.into(),
        };
        assert!(timeout.is_timeout() && timeout.is_io());
        assert!(!Error::Device(DeviceErrorCode::AccessDenied).is_timeout());
    }
}
