//! JSON wire format.
//!
//! UTF-8 JSON objects with a `type` discriminator and camel-case keys:
//!
//! ```json
//! {"type":"data","cobId":291,"data":[1,2,3],"pubId":7,"pubCnt":12,"ts":1700000000000000}
//! ```
//!
//! `cobId` is omitted for error frames and `data` for anything but data
//! frames. Which of `pubId`/`pubCnt`/`ts` go out is configured per bridge
//! instance; the decoder always reads them so self-filtering works against
//! any sender configuration.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, FrameCodec, OptionalField, OptionalFields};
use crate::frame::{CanFrame, CobId, FramePayload};

const TYPE_DATA: &str = "data";
const TYPE_REMOTE: &str = "remote";
const TYPE_ERROR: &str = "error";

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "cobId", default, skip_serializing_if = "Option::is_none")]
    cob_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<u8>>,
    #[serde(rename = "pubId", default, skip_serializing_if = "Option::is_none")]
    pub_id: Option<u32>,
    #[serde(rename = "pubCnt", default, skip_serializing_if = "Option::is_none")]
    pub_cnt: Option<u32>,
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    timestamp_us: Option<u64>,
}

/// The JSON codec, carrying a configured subset of optional fields.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    fields: OptionalFields,
}

impl JsonCodec {
    /// Create a codec that emits the optional fields in `fields`.
    #[must_use]
    pub fn new(fields: OptionalFields) -> Self {
        Self { fields }
    }
}

impl FrameCodec for JsonCodec {
    fn encode(&self, frame: &CanFrame) -> Result<Vec<u8>, CodecError> {
        let (kind, cob_id, data) = match &frame.payload {
            FramePayload::Data { cob_id, data } => {
                (TYPE_DATA, Some(cob_id.raw()), Some(data.clone()))
            }
            FramePayload::Remote { cob_id } => (TYPE_REMOTE, Some(cob_id.raw()), None),
            FramePayload::Error => (TYPE_ERROR, None, None),
        };
        let wire = WireFrame {
            kind: kind.to_owned(),
            cob_id,
            data,
            pub_id: frame.pub_id.filter(|_| self.fields.contains(OptionalField::PubId)),
            pub_cnt: frame.pub_cnt.filter(|_| self.fields.contains(OptionalField::PubCnt)),
            timestamp_us: frame
                .timestamp_us
                .filter(|_| self.fields.contains(OptionalField::TimeStamp)),
        };
        serde_json::to_vec(&wire).map_err(|err| CodecError::Malformed(err.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<CanFrame, CodecError> {
        let wire: WireFrame = serde_json::from_slice(payload)
            .map_err(|err| CodecError::Malformed(err.to_string()))?;

        let require_id = |id: Option<u16>| -> Result<CobId, CodecError> {
            let raw = id.ok_or_else(|| CodecError::Malformed("cobId missing".to_owned()))?;
            Ok(CobId::new(raw)?)
        };

        let mut frame = match wire.kind.as_str() {
            TYPE_DATA => {
                let cob_id = require_id(wire.cob_id)?;
                CanFrame::data(cob_id, wire.data.unwrap_or_default())?
            }
            TYPE_REMOTE => CanFrame::remote(require_id(wire.cob_id)?),
            TYPE_ERROR => CanFrame::error(),
            other => return Err(CodecError::Malformed(format!("unknown type {other:?}"))),
        };
        frame.pub_id = wire.pub_id;
        frame.pub_cnt = wire.pub_cnt;
        frame.timestamp_us = wire.timestamp_us;
        Ok(frame)
    }

    fn supports_optional_field(&self, field: OptionalField) -> bool {
        self.fields.contains(field)
    }
}
