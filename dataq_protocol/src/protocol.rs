use std::time::Duration;
use thiserror::Error;

/// Marker opening every client → device command frame
pub const DQ_COMMAND: u32 = 0x3141_5926;
/// Marker opening every device → client reply frame
pub const DQ_RESPONSE: u32 = 0x2171_2818;
/// Marker opening every streamed sample datagram
pub const DQ_ADCDATA: u32 = 0x1414_2135;

/// Session (group) identifier used when the caller does not pick one
pub const DEFAULT_SESSION_ID: u32 = 0x1234_5678;

/// UDP port the device listens on for commands
pub const DEFAULT_DEVICE_PORT: u16 = 51235;
/// Local UDP port the session socket binds to
pub const DEFAULT_LOCAL_PORT: u16 = 1234;

pub const COMMAND_HEADER_LEN: usize = 24;
pub const RESPONSE_HEADER_LEN: usize = 16;

/// Largest datagram we ever expect to read
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Fixed arguments of the start-sync command
pub const START_SYNC_ARGS: [u32; 3] = [1, 2, 3];

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No device answered discovery within {timeout:?}")]
    NotFound { timeout: Duration },

    #[error("No reply within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] FrameError),

    #[error("Command payload must be ASCII")]
    NonAsciiPayload,

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Transport is closed")]
    Closed,

    #[error("Read timeout must be greater than zero")]
    ZeroTimeout,
}

impl ProtocolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}

/// Reasons a received frame is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("payload is not ASCII")]
    NonAscii,
}

/// Command codes understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandCode {
    StartSync = 1,
    Connect = 10,
    Disconnect = 11,
    KeepAlive = 12,
    Configure = 13,
}

impl TryFrom<u32> for CommandCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CommandCode::StartSync),
            10 => Ok(CommandCode::Connect),
            11 => Ok(CommandCode::Disconnect),
            12 => Ok(CommandCode::KeepAlive),
            13 => Ok(CommandCode::Configure),
            other => Err(other),
        }
    }
}

/// A request frame: 24-byte header followed by the raw ASCII payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub session_id: u32,
    pub command: u32,
    pub args: [u32; 3],
    pub payload: String,
}

impl CommandMessage {
    pub fn new(session_id: u32, command: CommandCode, args: [u32; 3], payload: &str) -> Self {
        Self {
            session_id,
            command: command as u32,
            args,
            payload: payload.to_string(),
        }
    }

    /// Serialize to `[magic][session][command][arg0][arg1][arg2][payload...]`
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        if !self.payload.is_ascii() {
            return Err(ProtocolError::NonAsciiPayload);
        }

        let mut bytes = Vec::with_capacity(COMMAND_HEADER_LEN + self.payload.len());
        for field in [
            DQ_COMMAND,
            self.session_id,
            self.command,
            self.args[0],
            self.args[1],
            self.args[2],
        ] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(self.payload.as_bytes());

        Ok(bytes)
    }

    /// Parse a command frame; the payload length is implied by the datagram size
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut reader = bytes;
        let header = read_u32s::<6>(&mut reader)?;
        expect_magic(DQ_COMMAND, header[0])?;

        Ok(Self {
            session_id: header[1],
            command: header[2],
            args: [header[3], header[4], header[5]],
            payload: ascii_text(reader)?.to_string(),
        })
    }

    pub fn command_code(&self) -> Option<CommandCode> {
        CommandCode::try_from(self.command).ok()
    }
}

/// A reply frame: 16-byte header followed by `payload_len` ASCII bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub group_id: u32,
    pub order: u32,
    /// Reply text with surrounding whitespace trimmed
    pub payload: String,
}

impl ResponseMessage {
    pub fn new(group_id: u32, order: u32, payload: &str) -> Self {
        Self {
            group_id,
            order,
            payload: payload.to_string(),
        }
    }

    /// Device-side serialization, used by the simulator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RESPONSE_HEADER_LEN + self.payload.len());
        for field in [
            DQ_RESPONSE,
            self.group_id,
            self.order,
            self.payload.len() as u32,
        ] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(self.payload.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut reader = bytes;
        let header = read_u32s::<4>(&mut reader)?;
        expect_magic(DQ_RESPONSE, header[0])?;

        let payload_len = header[3] as usize;
        if reader.len() < payload_len {
            return Err(FrameError::Truncated {
                needed: RESPONSE_HEADER_LEN + payload_len,
                available: bytes.len(),
            });
        }

        Ok(Self {
            group_id: header[1],
            order: header[2],
            payload: ascii_text(&reader[..payload_len])?.trim().to_string(),
        })
    }
}

/// Peek at the leading marker without consuming anything
pub fn frame_magic(bytes: &[u8]) -> Option<u32> {
    bytes
        .first_chunk::<4>()
        .map(|magic| u32::from_le_bytes(*magic))
}

// Helper functions shared by the frame parsers

pub(crate) fn read_u32s<const N: usize>(reader: &mut &[u8]) -> Result<[u32; N], FrameError> {
    let needed = N * 4;
    if reader.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: reader.len(),
        });
    }

    let mut fields = [0u32; N];
    for (i, field) in fields.iter_mut().enumerate() {
        let at = i * 4;
        *field = u32::from_le_bytes([
            reader[at],
            reader[at + 1],
            reader[at + 2],
            reader[at + 3],
        ]);
    }
    *reader = &reader[needed..];

    Ok(fields)
}

pub(crate) fn expect_magic(expected: u32, found: u32) -> Result<(), FrameError> {
    if expected != found {
        return Err(FrameError::InvalidMagic { expected, found });
    }
    Ok(())
}

fn ascii_text(bytes: &[u8]) -> Result<&str, FrameError> {
    if !bytes.is_ascii() {
        return Err(FrameError::NonAscii);
    }
    std::str::from_utf8(bytes).map_err(|_| FrameError::NonAscii)
}
