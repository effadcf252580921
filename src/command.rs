use std::{fmt, str::FromStr};

use crate::error::{CommandError, LinkError};

pub const COMMAND_LEN: usize = 4;
pub const DEFAULT_ACK: &str = "ACK";

/// Preset maneuvers and continuous moves that take no argument.
const FIXED_CODES: [&str; 9] = [
    "FL00", "FR00", "BL00", "BR00", "FW--", "BW--", "TL--", "TR--", "STOP",
];

/// A 4-byte ASCII command as it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command([u8; COMMAND_LEN]);

impl Command {
    pub const STOP: Command = Command(*b"STOP");

    pub fn new(text: &str) -> Result<Self, CommandError> {
        if !text.is_ascii() {
            return Err(CommandError::NotAscii(text.to_string()));
        }
        let bytes: [u8; COMMAND_LEN] =
            text.as_bytes().try_into().map_err(|_| CommandError::BadLength {
                expected: COMMAND_LEN,
                got: text.len(),
                text: text.to_string(),
            })?;
        Ok(Command(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // ASCII-only by construction
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Whether this is one of the codes the motor controller understands.
    ///
    /// The link itself sends anything; this is for callers that want to
    /// catch typos before they reach the robot.
    pub fn is_known(&self) -> bool {
        let s = self.as_str();
        if FIXED_CODES.contains(&s) {
            return true;
        }
        match (s.get(..2), s.get(2..)) {
            (Some("FW" | "BW"), Some(dist)) => dist.bytes().all(|b| b.is_ascii_digit()),
            _ => false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::new(s)
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Command::new(s)
    }
}

/// Response text read back after a command, surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack(String);

impl Ack {
    pub fn decode(raw: &[u8]) -> Result<Self, LinkError> {
        let text = std::str::from_utf8(raw).map_err(|_| LinkError::Decode {
            bytes: raw.to_vec(),
        })?;
        Ok(Ack(text.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, token: &str) -> bool {
        self.0 == token
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for Ack {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
