//! The encoder seam between the bridge and its wire formats.

use crate::frame::{CanFrame, FrameError};

/// Optional metadata fields an encoder may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionalField {
    /// Publishing instance identifier.
    PubId = 1,
    /// Monotonic publish counter.
    PubCnt = 2,
    /// Microsecond wall-clock timestamp.
    TimeStamp = 4,
}

/// A bitmask of [`OptionalField`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(transparent)]
pub struct OptionalFields(u8);

impl OptionalFields {
    /// No optional fields.
    pub const NONE: Self = Self(0);
    /// Every optional field.
    pub const ALL: Self = Self(0b111);

    /// Build from a raw bitmask, dropping undefined bits.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether `field`'s bit is set.
    #[must_use]
    pub fn contains(self, field: OptionalField) -> bool {
        self.0 & field as u8 != 0
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Add a field to the mask.
    #[must_use]
    pub fn with(self, field: OptionalField) -> Self {
        Self(self.0 | field as u8)
    }
}

/// Error variants for frame encode/decode.
#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Binary record does not start with the magic byte.
    BadMagic(u8),
    /// Record shorter than its type requires.
    Truncated,
    /// Record longer or shorter than the exact length its type requires.
    BadLength {
        /// Bytes the frame type requires.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// Unknown frame type value.
    BadType(u8),
    /// A frame invariant failed after decoding (id range, payload length).
    Frame(FrameError),
    /// The encoder cannot represent optional metadata fields.
    OptionalFieldsUnsupported,
    /// JSON parse or shape error.
    Malformed(String),
}

impl From<FrameError> for CodecError {
    fn from(err: FrameError) -> Self {
        CodecError::Frame(err)
    }
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::BadMagic(byte) => write!(f, "bad magic byte {byte:#04x}"),
            CodecError::Truncated => write!(f, "record truncated"),
            CodecError::BadLength { expected, actual } => {
                write!(f, "record is {actual} bytes, frame type requires {expected}")
            }
            CodecError::BadType(value) => write!(f, "unknown frame type {value}"),
            CodecError::Frame(err) => write!(f, "{err}"),
            CodecError::OptionalFieldsUnsupported => {
                write!(f, "encoder does not support optional fields")
            }
            CodecError::Malformed(detail) => write!(f, "malformed payload: {detail}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// One wire format for bridged CAN frames.
pub trait FrameCodec: Send + Sync {
    /// Encode a frame into its wire bytes.
    ///
    /// # Errors
    ///
    /// Fails when the frame carries metadata the format cannot express.
    fn encode(&self, frame: &CanFrame) -> Result<Vec<u8>, CodecError>;

    /// Decode wire bytes back into a frame.
    ///
    /// # Errors
    ///
    /// Fails on any shape, range, or type violation; the bridge drops such
    /// messages with a warning.
    fn decode(&self, payload: &[u8]) -> Result<CanFrame, CodecError>;

    /// Whether this codec can carry `field` on outbound frames.
    fn supports_optional_field(&self, field: OptionalField) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_membership() {
        let mask = OptionalFields::NONE
            .with(OptionalField::PubId)
            .with(OptionalField::TimeStamp);
        assert!(mask.contains(OptionalField::PubId));
        assert!(!mask.contains(OptionalField::PubCnt));
        assert!(mask.contains(OptionalField::TimeStamp));
    }

    #[test]
    fn from_bits_drops_undefined_bits() {
        assert_eq!(OptionalFields::from_bits(0xFF), OptionalFields::ALL);
        assert!(OptionalFields::from_bits(0).is_empty());
    }
}
