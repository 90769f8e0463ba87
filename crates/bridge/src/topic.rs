//! Topic scheme: `bus/can/{channel}/{cobId}`.
//!
//! Identifiers publish in decimal. Error frames carry no identifier and go
//! out under id 0; the receive path expects the same.

use crate::frame::CanFrame;

const PREFIX: &str = "bus/can";

/// The topic a frame publishes under on `channel`.
#[must_use]
pub fn publish_topic(channel: u8, frame: &CanFrame) -> String {
    let id = frame.cob_id().map_or(0, |cob_id| cob_id.raw());
    format!("{PREFIX}/{channel}/{id}")
}

/// The wildcard filter covering every id on `channel`.
#[must_use]
pub fn subscribe_filter(channel: u8) -> String {
    format!("{PREFIX}/{channel}/#")
}

/// Whether `topic` is exactly the publish topic `frame` belongs under.
///
/// A mismatch means the sender put the frame on the wrong branch and the
/// message is dropped.
#[must_use]
pub fn matches_frame(topic: &str, channel: u8, frame: &CanFrame) -> bool {
    topic == publish_topic(channel, frame)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // tests use unwrap for readable assertions
mod tests {
    use super::*;
    use crate::frame::{CanFrame, CobId};

    #[test]
    fn publish_topic_uses_decimal_id() {
        let frame = CanFrame::remote(CobId::new(0x123).unwrap());
        assert_eq!(publish_topic(5, &frame), "bus/can/5/291");
    }

    #[test]
    fn error_frames_publish_under_zero() {
        assert_eq!(publish_topic(0, &CanFrame::error()), "bus/can/0/0");
    }

    #[test]
    fn subscribe_filter_covers_the_channel() {
        assert_eq!(subscribe_filter(200), "bus/can/200/#");
    }

    #[test]
    fn mismatched_topics_are_detected() {
        let frame = CanFrame::remote(CobId::new(10).unwrap());
        assert!(matches_frame("bus/can/1/10", 1, &frame));
        assert!(!matches_frame("bus/can/1/11", 1, &frame));
        assert!(!matches_frame("bus/can/2/10", 1, &frame));
        assert!(!matches_frame("other/1/10", 1, &frame));
    }
}
