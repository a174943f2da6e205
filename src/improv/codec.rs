//! Improv RPC command codec.
//!
//! Wire format of an RPC-command write:
//! ```text
//! ┌─────────┬─────────┬──────────────────────────────────────┬─────────┐
//! │ cmd (1B)│ len (1B)│ ssid_len ssid… pass_len pass…  (len) │ sum (1B)│
//! └─────────┴─────────┴──────────────────────────────────────┴─────────┘
//! ```
//!
//! `sum` is the low byte of the sum of every preceding byte. Only the
//! Wi-Fi settings command (`0x01`) is understood.

use core::fmt;

/// Wi-Fi settings command.
pub const CMD_WIFI_SETTINGS: u8 = 0x01;

/// Command, length and checksum bytes.
const FRAME_OVERHEAD: usize = 3;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

/// Largest encoded Wi-Fi settings frame.
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + 2 + MAX_SSID_LEN + MAX_PASSWORD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than command, length and checksum.
    TooShort,
    /// Length byte disagrees with the payload size.
    LengthMismatch,
    /// Trailing checksum byte does not match.
    BadChecksum,
    /// Command byte is not one this device handles.
    UnknownCommand(u8),
    /// Nested SSID/password lengths overrun the payload.
    Malformed,
    /// SSID or password is not valid UTF-8.
    InvalidUtf8,
    /// SSID is empty or longer than 32 bytes.
    SsidLength,
    /// Password is longer than 64 bytes.
    PasswordLength,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::LengthMismatch => write!(f, "length byte mismatch"),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::UnknownCommand(cmd) => write!(f, "unknown command 0x{cmd:02X}"),
            Self::Malformed => write!(f, "malformed payload"),
            Self::InvalidUtf8 => write!(f, "credentials are not UTF-8"),
            Self::SsidLength => write!(f, "SSID must be 1-32 bytes"),
            Self::PasswordLength => write!(f, "password must be at most 64 bytes"),
        }
    }
}

/// Decoded Wi-Fi settings.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: heapless::String<MAX_SSID_LEN>,
    pub password: heapless::String<MAX_PASSWORD_LEN>,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .finish()
    }
}

/// Turns a raw RPC-command write into credentials.
pub trait RpcCodec: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<WifiCredentials, DecodeError>;
}

/// Default Improv framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImprovCodec;

impl RpcCodec for ImprovCodec {
    fn decode(&self, raw: &[u8]) -> Result<WifiCredentials, DecodeError> {
        if raw.len() < FRAME_OVERHEAD {
            return Err(DecodeError::TooShort);
        }
        let body_len = raw[1] as usize;
        if body_len != raw.len() - FRAME_OVERHEAD {
            return Err(DecodeError::LengthMismatch);
        }
        let (framed, sum) = raw.split_at(raw.len() - 1);
        if checksum(framed) != sum[0] {
            return Err(DecodeError::BadChecksum);
        }
        if raw[0] != CMD_WIFI_SETTINGS {
            return Err(DecodeError::UnknownCommand(raw[0]));
        }

        let body = &framed[2..];
        let (ssid, rest) = take_field(body)?;
        let (password, rest) = take_field(rest)?;
        if !rest.is_empty() {
            return Err(DecodeError::Malformed);
        }

        let ssid = core::str::from_utf8(ssid).map_err(|_| DecodeError::InvalidUtf8)?;
        let password = core::str::from_utf8(password).map_err(|_| DecodeError::InvalidUtf8)?;
        if ssid.is_empty() {
            return Err(DecodeError::SsidLength);
        }

        let mut creds = WifiCredentials {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        creds.ssid.push_str(ssid).map_err(|()| DecodeError::SsidLength)?;
        creds
            .password
            .push_str(password)
            .map_err(|()| DecodeError::PasswordLength)?;
        Ok(creds)
    }
}

/// Split one length-prefixed field off the front of `buf`.
fn take_field(buf: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    let (&len, rest) = buf.split_first().ok_or(DecodeError::Malformed)?;
    let len = len as usize;
    if len > rest.len() {
        return Err(DecodeError::Malformed);
    }
    Ok(rest.split_at(len))
}

/// Low byte of the sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a Wi-Fi settings command the way a companion app sends it.
///
/// Returns `None` if either string exceeds its protocol bound.
pub fn encode_wifi_settings(ssid: &str, password: &str) -> Option<heapless::Vec<u8, MAX_FRAME_LEN>> {
    if ssid.len() > MAX_SSID_LEN || password.len() > MAX_PASSWORD_LEN {
        return None;
    }
    let body_len = 2 + ssid.len() + password.len();
    let mut out = heapless::Vec::new();
    out.push(CMD_WIFI_SETTINGS).ok()?;
    out.push(body_len as u8).ok()?;
    out.push(ssid.len() as u8).ok()?;
    out.extend_from_slice(ssid.as_bytes()).ok()?;
    out.push(password.len() as u8).ok()?;
    out.extend_from_slice(password.as_bytes()).ok()?;
    let sum = checksum(&out);
    out.push(sum).ok()?;
    Some(out)
}
