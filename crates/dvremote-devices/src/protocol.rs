/*!
 * Wire protocol for the DVR remote-control service.
 *
 * Outbound commands are single text lines of the form `<VERB> <ARG>\r`.
 * Inbound lines are unsolicited status reports; only a small fixed set of
 * shapes carries meaning and everything else is ignored.
 */
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::device::SessionEvent;

/// Line terminator used in both directions
pub const LINE_TERMINATOR: char = '\r';

static CH_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CH_FAILED ([a-zA-Z_-]+)$").expect("CH_FAILED pattern compiles"));

static CH_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^CH_STATUS ([0-9]{1,4}) (?:([0-9]{1,4}) )?([a-zA-Z_-]+)$")
        .expect("CH_STATUS pattern compiles")
});

/// A command understood by the device
///
/// Arguments are forwarded verbatim. No escaping is done, so an argument
/// containing the line terminator produces a malformed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Press a remote-control button
    IrCode(String),
    /// Send a keyboard key
    Keyboard(String),
    /// Jump straight to a named UI location
    Teleport(String),
    /// Tune to a channel, refusing if a recording is in progress
    SetChannel(String),
    /// Tune to a channel, cancelling any recording in progress
    ForceChannel(String),
}

impl Command {
    /// Build a channel change, forced or not
    pub fn channel<S: Into<String>>(channel: S, forced: bool) -> Self {
        if forced {
            Command::ForceChannel(channel.into())
        } else {
            Command::SetChannel(channel.into())
        }
    }

    /// The protocol verb for this command
    pub fn verb(&self) -> &'static str {
        match self {
            Command::IrCode(_) => "IRCODE",
            Command::Keyboard(_) => "KEYBOARD",
            Command::Teleport(_) => "TELEPORT",
            Command::SetChannel(_) => "SETCH",
            Command::ForceChannel(_) => "FORCECH",
        }
    }

    /// The single argument of this command
    pub fn argument(&self) -> &str {
        match self {
            Command::IrCode(arg)
            | Command::Keyboard(arg)
            | Command::Teleport(arg)
            | Command::SetChannel(arg)
            | Command::ForceChannel(arg) => arg,
        }
    }

    /// Serialize to a terminated wire line
    pub fn encode(&self) -> String {
        format!("{}{}", self, LINE_TERMINATOR)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.argument())
    }
}

/// A decoded inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A teleport was requested without a destination
    MissingTeleportName,
    /// A channel change was refused
    ChannelFailed {
        /// Why the change failed, e.g. `recording`
        reason: String,
    },
    /// Live TV finished loading after a teleport
    LiveTvReady,
    /// The tuned channel changed
    ChannelStatus {
        /// Major channel number as sent by the device
        channel: String,
        /// Minor channel number, when the device reports one
        subchannel: Option<String>,
        /// What caused the change, e.g. `LOCAL` or `REMOTE`
        reason: String,
    },
    /// The device could not parse the last command
    InvalidCommand,
    /// Anything else
    Unrecognized,
}

impl Response {
    /// Classify one line.
    ///
    /// A single trailing carriage return is stripped first. Patterns are tried
    /// in a fixed order and the first match wins.
    pub fn parse(line: &str) -> Self {
        let line = line.strip_suffix(LINE_TERMINATOR).unwrap_or(line);

        if line == "MISSING_TELEPORT_NAME" {
            return Response::MissingTeleportName;
        }

        if let Some(caps) = CH_FAILED.captures(line) {
            return Response::ChannelFailed {
                reason: caps[1].to_string(),
            };
        }

        if line == "LIVETV_READY" {
            return Response::LiveTvReady;
        }

        if let Some(caps) = CH_STATUS.captures(line) {
            return Response::ChannelStatus {
                channel: caps[1].to_string(),
                subchannel: caps.get(2).map(|m| m.as_str().to_string()),
                reason: caps[3].to_string(),
            };
        }

        if line == "INVALID_COMMAND" {
            return Response::InvalidCommand;
        }

        Response::Unrecognized
    }

    /// Map the response to the event a session publishes, if any
    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Response::MissingTeleportName => Some(SessionEvent::Error {
                reason: "MISSING_TELEPORT_NAME".to_string(),
            }),
            Response::ChannelFailed { reason } => Some(SessionEvent::Error { reason }),
            Response::LiveTvReady => Some(SessionEvent::LiveTvReady { is_ready: true }),
            Response::ChannelStatus {
                channel,
                subchannel,
                reason,
            } => Some(SessionEvent::ChannelChange {
                success: true,
                channel,
                subchannel,
                reason,
            }),
            Response::InvalidCommand | Response::Unrecognized => None,
        }
    }
}
