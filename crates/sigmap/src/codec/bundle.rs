//! OSC bundle encoding/decoding: multiple messages sharing one timestamp.

use crate::codec::message::MessageIter;
use crate::codec::Message;
use crate::error::{Error, Result};
use crate::time::TimeTag;

const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// A collection of messages that share a single delivery timestamp and are
/// applied atomically from the receiver's perspective (spec §5 "Ordering").
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Shared timestamp for every contained message.
    pub time: TimeTag,
    /// Messages, in wire (and therefore application) order.
    pub messages: Vec<Message>,
}

impl Bundle {
    /// Build an empty bundle at the given time.
    pub fn new(time: TimeTag) -> Self {
        Self {
            time,
            messages: Vec::new(),
        }
    }

    /// Append a message, builder-style.
    pub fn push(mut self, msg: Message) -> Self {
        self.messages.push(msg);
        self
    }

    /// Encode to the OSC bundle wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(BUNDLE_TAG);
        buf.extend_from_slice(&self.time.to_bits().to_be_bytes());
        for msg in &self.messages {
            let encoded = msg.encode();
            buf.extend_from_slice(&(encoded.len() as i32).to_be_bytes());
            buf.extend_from_slice(&encoded);
        }
        buf
    }

    /// Decode a bundle from its wire representation.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < BUNDLE_TAG.len() + 8 {
            return Err(Error::MalformedPacket("bundle too short".into()));
        }
        if &data[..BUNDLE_TAG.len()] != BUNDLE_TAG {
            return Err(Error::MalformedPacket("missing #bundle tag".into()));
        }
        let time_bytes: [u8; 8] = data[BUNDLE_TAG.len()..BUNDLE_TAG.len() + 8]
            .try_into()
            .unwrap();
        let time = TimeTag::from_bits(u64::from_be_bytes(time_bytes));
        let rest = &data[BUNDLE_TAG.len() + 8..];

        let mut messages = Vec::new();
        for item in MessageIter::new(rest) {
            messages.push(item?);
        }
        Ok(Bundle { time, messages })
    }

    /// True if the buffer looks like a bundle (vs. a bare message) without
    /// fully decoding it.
    pub fn is_bundle(data: &[u8]) -> bool {
        data.len() >= BUNDLE_TAG.len() && &data[..BUNDLE_TAG.len()] == BUNDLE_TAG
    }
}

/// Decode either a single message or a bundle, the way a device's transport
/// layer must when dispatching an arbitrary incoming packet.
pub fn decode_packet(data: &[u8]) -> Result<Bundle> {
    if Bundle::is_bundle(data) {
        Bundle::decode(data)
    } else {
        let msg = Message::decode(data)?;
        Ok(Bundle {
            time: TimeTag::IMMEDIATE,
            messages: vec![msg],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    #[test]
    fn round_trip_bundle() {
        let bundle = Bundle::new(TimeTag::new(100, 0))
            .push(Message::new("/a").arg(Value::Int32(1)))
            .push(Message::new("/b").arg(Value::Float32(2.0)));
        let encoded = bundle.encode();
        assert!(Bundle::is_bundle(&encoded));
        let decoded = Bundle::decode(&encoded).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn decode_packet_handles_bare_message() {
        let msg = Message::new("/solo").arg(Value::Int32(5));
        let decoded = decode_packet(&msg.encode()).unwrap();
        assert_eq!(decoded.messages, vec![msg]);
        assert!(decoded.time.is_immediate());
    }

    #[test]
    fn idempotent_queue_delivers_one_bundle_in_order() {
        // Mirrors spec §8 "Idempotent queue" law: queue_start(t); set(a);
        // set(b); queue_send(t) delivers one bundle with a then b.
        let bundle = Bundle::new(TimeTag::new(5, 0))
            .push(Message::new("/a").arg(Value::Int32(1)))
            .push(Message::new("/b").arg(Value::Int32(2)));
        let decoded = Bundle::decode(&bundle.encode()).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[0].address, "/a");
        assert_eq!(decoded.messages[1].address, "/b");
    }

    #[test]
    fn rejects_missing_tag() {
        let data = vec![0u8; 20];
        assert!(Bundle::decode(&data).is_err());
    }
}
