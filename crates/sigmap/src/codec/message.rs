//! OSC message encoding/decoding.

use crate::codec::{align_up, Value};
use crate::error::{Error, Result};
use crate::time::TimeTag;

/// An OSC message: an address pattern plus positionally-typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Slash-delimited address, e.g. `/device` or `/my/signal/path`.
    pub address: String,
    /// Arguments, in wire order.
    pub args: Vec<Value>,
}

impl Message {
    /// Build an empty message with no arguments.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument, builder-style.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// The type tag string for this message's arguments, e.g. `",ifs"`.
    pub fn type_tags(&self) -> String {
        let mut s = String::with_capacity(self.args.len() + 1);
        s.push(',');
        for a in &self.args {
            s.push(a.type_tag());
        }
        s
    }

    /// Encode this message to its OSC wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_string(&mut buf, &self.address);
        encode_string(&mut buf, &self.type_tags());
        for arg in &self.args {
            encode_arg(&mut buf, arg);
        }
        buf
    }

    /// Decode a single OSC message from a byte buffer (no bundle framing).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let address = decode_string(data, &mut pos)?;
        if !address.starts_with('/') {
            return Err(Error::MalformedPacket(format!(
                "address must start with '/': {address:?}"
            )));
        }
        let tags = decode_string(data, &mut pos)?;
        let mut tag_chars = tags.chars();
        match tag_chars.next() {
            Some(',') => {}
            _ => {
                return Err(Error::MalformedPacket(format!(
                    "type tag string must start with ',': {tags:?}"
                )))
            }
        }

        let mut args = Vec::new();
        for tag in tag_chars {
            args.push(decode_arg(tag, data, &mut pos)?);
        }
        Ok(Message { address, args })
    }
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    let aligned = align_up(buf.len());
    buf.resize(aligned, 0);
}

fn encode_arg(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Float32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Float64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Time(t) => buf.extend_from_slice(&t.to_bits().to_be_bytes()),
        Value::String(s) => encode_string(buf, s),
        Value::Blob(b) => {
            buf.extend_from_slice(&(b.len() as i32).to_be_bytes());
            buf.extend_from_slice(b);
            let aligned = align_up(buf.len());
            buf.resize(aligned, 0);
        }
    }
}

/// Read a null-terminated, 4-byte-aligned string starting at `*pos`,
/// advancing `*pos` past its padding.
fn decode_string(data: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    if start > data.len() {
        return Err(Error::MalformedPacket("truncated string".into()));
    }
    let nul = data[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MalformedPacket("unterminated string".into()))?;
    let s = std::str::from_utf8(&data[start..start + nul])
        .map_err(|e| Error::MalformedPacket(format!("invalid UTF-8: {e}")))?
        .to_string();
    let total = align_up(nul + 1);
    if start + total > data.len() {
        return Err(Error::MalformedPacket("string padding truncated".into()));
    }
    *pos = start + total;
    Ok(s)
}

fn decode_arg(tag: char, data: &[u8], pos: &mut usize) -> Result<Value> {
    match tag {
        'i' => {
            let bytes = take(data, pos, 4)?;
            Ok(Value::Int32(i32::from_be_bytes(bytes.try_into().unwrap())))
        }
        'f' => {
            let bytes = take(data, pos, 4)?;
            Ok(Value::Float32(f32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))
        }
        'd' => {
            let bytes = take(data, pos, 8)?;
            Ok(Value::Float64(f64::from_be_bytes(
                bytes.try_into().unwrap(),
            )))
        }
        'h' => {
            let bytes = take(data, pos, 8)?;
            Ok(Value::Int64(i64::from_be_bytes(bytes.try_into().unwrap())))
        }
        't' => {
            let bytes = take(data, pos, 8)?;
            Ok(Value::Time(TimeTag::from_bits(u64::from_be_bytes(
                bytes.try_into().unwrap(),
            ))))
        }
        's' => Ok(Value::String(decode_string(data, pos)?)),
        'b' => {
            let len_bytes = take(data, pos, 4)?;
            let len = i32::from_be_bytes(len_bytes.try_into().unwrap());
            if len < 0 {
                return Err(Error::MalformedPacket("negative blob length".into()));
            }
            let len = len as usize;
            let bytes = take(data, pos, len)?.to_vec();
            let aligned = align_up(len);
            let pad = aligned - len;
            if pad > 0 {
                take(data, pos, pad)?;
            }
            Ok(Value::Blob(bytes))
        }
        other => Err(Error::MalformedPacket(format!(
            "unsupported type tag '{other}'"
        ))),
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let start = *pos;
    let end = start
        .checked_add(len)
        .ok_or_else(|| Error::MalformedPacket("length overflow".into()))?;
    if end > data.len() {
        return Err(Error::MalformedPacket(format!(
            "truncated argument: need {len} bytes at {start}, have {}",
            data.len().saturating_sub(start)
        )));
    }
    *pos = end;
    Ok(&data[start..end])
}

/// Iterator over consecutive OSC messages in a bundle's payload, each
/// prefixed by a 4-byte big-endian size, mirroring the size-prefixed framing
/// of `nlink::netlink::message::MessageIter`.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Wrap a buffer of size-prefixed messages.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 4 {
            self.data = &[];
            return Some(Err(Error::MalformedPacket(
                "truncated bundle element size".into(),
            )));
        }
        let size = i32::from_be_bytes(self.data[0..4].try_into().unwrap());
        if size < 0 || size as usize > self.data.len() - 4 {
            self.data = &[];
            return Some(Err(Error::MalformedPacket(
                "bundle element size out of range".into(),
            )));
        }
        let size = size as usize;
        let msg_bytes = &self.data[4..4 + size];
        self.data = &self.data[4 + size..];
        Some(Message::decode(msg_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_message() {
        let msg = Message::new("/device")
            .arg(Value::String("foo.1".into()))
            .arg(Value::Int32(9000));
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_all_types() {
        let msg = Message::new("/types")
            .arg(Value::Int32(-7))
            .arg(Value::Float32(1.5))
            .arg(Value::Float64(2.25))
            .arg(Value::Int64(-90000000000))
            .arg(Value::String("hi there".into()))
            .arg(Value::Blob(vec![1, 2, 3, 4, 5]))
            .arg(Value::Time(TimeTag::new(10, 20)));
        let encoded = msg.encode();
        assert_eq!(encoded.len() % 4, 0);
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_args_means_release() {
        let msg = Message::new("/my/signal");
        assert!(msg.args.is_empty());
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn rejects_bad_address() {
        let mut buf = Vec::new();
        encode_string(&mut buf, "no-leading-slash");
        encode_string(&mut buf, ",");
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn rejects_truncated_argument() {
        let mut buf = Vec::new();
        encode_string(&mut buf, "/x");
        encode_string(&mut buf, ",i");
        // Missing the 4-byte int32 payload entirely.
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::MalformedPacket(_)));
    }

    #[test]
    fn rejects_unterminated_string() {
        let data = b"/no-null-here".to_vec();
        let err = Message::decode(&data).unwrap_err();
        assert!(matches!(err, Error::MalformedPacket(_)));
    }
}
