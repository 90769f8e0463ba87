//! Classic-CAN frame model as it crosses the bridge.

/// An 11-bit CAN message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CobId(u16);

impl CobId {
    /// Highest valid identifier.
    pub const MAX: u16 = 0x7FF;

    /// Validate an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::CobIdRange`] above 0x7FF.
    pub fn new(raw: u16) -> Result<Self, FrameError> {
        if raw > Self::MAX {
            return Err(FrameError::CobIdRange(raw));
        }
        Ok(Self(raw))
    }

    /// The raw identifier value.
    #[must_use]
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for CobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

/// Error variants for frame construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Identifier above the 11-bit range.
    CobIdRange(u16),
    /// Data payload longer than the classic-CAN limit of 8 bytes.
    PayloadTooLong(usize),
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::CobIdRange(raw) => write!(f, "cobId {raw:#x} exceeds 11 bits"),
            FrameError::PayloadTooLong(len) => {
                write!(f, "payload of {len} bytes exceeds classic-CAN limit")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// The three frame shapes classic CAN distinguishes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// A data frame: identifier plus up to 8 payload bytes.
    Data {
        /// Message identifier.
        cob_id: CobId,
        /// Payload bytes, at most 8.
        data: Vec<u8>,
    },
    /// A remote-transmission request: identifier, no payload.
    Remote {
        /// Message identifier.
        cob_id: CobId,
    },
    /// An error frame: neither identifier nor payload.
    Error,
}

/// A frame plus the bridge-level optional metadata that may ride along,
/// depending on what the configured encoder supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// The CAN-level content.
    pub payload: FramePayload,
    /// Publishing instance identifier, used for self-filtering.
    pub pub_id: Option<u32>,
    /// Monotonic publish counter of the sending instance.
    pub pub_cnt: Option<u32>,
    /// Microseconds since the Unix epoch at publish time.
    pub timestamp_us: Option<u64>,
}

impl CanFrame {
    /// Build a data frame.
    ///
    /// # Errors
    ///
    /// Rejects payloads longer than 8 bytes.
    pub fn data(cob_id: CobId, data: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let data = data.into();
        if data.len() > 8 {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        Ok(Self::bare(FramePayload::Data { cob_id, data }))
    }

    /// Build a remote frame.
    #[must_use]
    pub fn remote(cob_id: CobId) -> Self {
        Self::bare(FramePayload::Remote { cob_id })
    }

    /// Build an error frame.
    #[must_use]
    pub fn error() -> Self {
        Self::bare(FramePayload::Error)
    }

    fn bare(payload: FramePayload) -> Self {
        Self {
            payload,
            pub_id: None,
            pub_cnt: None,
            timestamp_us: None,
        }
    }

    /// The identifier, if this frame type carries one.
    #[must_use]
    pub fn cob_id(&self) -> Option<CobId> {
        match &self.payload {
            FramePayload::Data { cob_id, .. } | FramePayload::Remote { cob_id } => Some(*cob_id),
            FramePayload::Error => None,
        }
    }

    /// Whether any optional metadata field is present.
    #[must_use]
    pub fn has_optional_fields(&self) -> bool {
        self.pub_id.is_some() || self.pub_cnt.is_some() || self.timestamp_us.is_some()
    }
}
