//! Working-encoding handling for the device.
//!
//! Writes arrive as raw bytes tagged with a declared encoding; the device
//! decodes them and checks the result is representable in its working
//! encoding before anything reaches the output buffer. A failed conversion
//! never mutates device state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text encodings the device recognizes.
///
/// `unicode` is accepted as a spelling of `utf8` when parsing option values,
/// matching what generic I/O callers send.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    #[strum(to_string = "utf8", serialize = "unicode")]
    Utf8,
    #[strum(serialize = "latin1")]
    Latin1,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("byte sequence is not valid utf8")]
    InvalidUtf8,
    #[error("text is not representable in {encoding}")]
    Unrepresentable { encoding: Encoding },
    #[error("char producer failed: {0}")]
    ProducerFailed(String),
}

/// Decodes `bytes` according to the encoding the caller declared for them.
pub fn decode(bytes: Vec<u8>, declared: Encoding) -> Result<String, ConversionError> {
    match declared {
        Encoding::Utf8 => String::from_utf8(bytes).map_err(|_| ConversionError::InvalidUtf8),
        // Latin1 maps bytes 1:1 onto the first 256 code points.
        Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
    }
}

/// Decodes `bytes` per `declared` and verifies the result fits the working
/// encoding. This is the single conversion step standard writes go through.
pub fn recode(
    bytes: Vec<u8>,
    declared: Encoding,
    working: Encoding,
) -> Result<String, ConversionError> {
    let text = decode(bytes, declared)?;
    match working {
        Encoding::Utf8 => Ok(text),
        Encoding::Latin1 => {
            if text.chars().all(|c| (c as u32) <= 0xFF) {
                Ok(text)
            } else {
                Err(ConversionError::Unrepresentable { encoding: working })
            }
        }
    }
}
