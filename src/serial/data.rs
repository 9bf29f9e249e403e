use std::string::FromUtf8Error;

use serde_derive::Deserialize;

/// What to do with a line whose bytes are not valid UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidUtf8 {
    /// End the read loop at the offending line
    #[default]
    Stop,
    /// Substitute U+FFFD for invalid sequences and keep the line
    Replace,
    /// Drop the offending line and keep reading
    Skip,
}

pub fn decode(bytes: Vec<u8>, policy: InvalidUtf8) -> Result<String, FromUtf8Error> {
    match policy {
        InvalidUtf8::Replace => Ok(match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }),
        InvalidUtf8::Stop | InvalidUtf8::Skip => String::from_utf8(bytes),
    }
}
