//! Admin bus message vocabulary: typed request/response pairs layered over
//! the raw OSC [`Message`](crate::codec::Message), mirroring how
//! libmapper's admin protocol fixes one address per verb and a positional
//! argument list per noun (spec §4.C/D/E "Admin protocol").

use crate::codec::{Message, Value};
use crate::error::{Error, Result};
use crate::graph::MapId;
use crate::signal::{Direction, ValueType};
use crate::time::TimeTag;

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Input => "input",
        Direction::Output => "output",
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "input" => Ok(Direction::Input),
        "output" => Ok(Direction::Output),
        other => Err(Error::MalformedPacket(format!("unknown direction {other:?}"))),
    }
}

fn parse_value_type(tag: char) -> Result<ValueType> {
    match tag {
        'i' => Ok(ValueType::Int32),
        'f' => Ok(ValueType::Float32),
        'd' => Ok(ValueType::Float64),
        other => Err(Error::MalformedPacket(format!("unknown value type tag {other:?}"))),
    }
}

fn arg_str(msg: &Message, idx: usize) -> Result<String> {
    match msg.args.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(Error::MalformedPacket(format!(
            "{}: expected string at arg {idx}, found {other:?}",
            msg.address
        ))),
    }
}

fn arg_i64(msg: &Message, idx: usize) -> Result<i64> {
    match msg.args.get(idx) {
        Some(Value::Int32(v)) => Ok(*v as i64),
        Some(Value::Int64(v)) => Ok(*v),
        other => Err(Error::MalformedPacket(format!(
            "{}: expected integer at arg {idx}, found {other:?}",
            msg.address
        ))),
    }
}

fn arg_f64(msg: &Message, idx: usize) -> Result<f64> {
    match msg.args.get(idx) {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| Error::MalformedPacket(format!("{}: arg {idx} is not numeric", msg.address))),
        None => Err(Error::MalformedPacket(format!("{}: missing arg {idx}", msg.address))),
    }
}

/// One parsed admin-bus request or announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminMessage {
    /// Broadcast query: "who's out there". Every device replies with its
    /// own `/device` announcement.
    Who,
    /// A device announcing or re-announcing itself.
    DeviceAnnounce {
        name: String,
        ordinal: u32,
        port: u16,
        version: u32,
    },
    /// A signal announcement from a specific device.
    SignalAnnounce {
        device: String,
        ordinal: u32,
        name: String,
        direction: Direction,
        value_type: ValueType,
        length: usize,
        unit: Option<String>,
        range: Option<(f64, f64)>,
    },
    /// A signal has been withdrawn.
    SignalRemoved {
        device: String,
        ordinal: u32,
        name: String,
    },
    /// Propose a map between one or more fully-qualified source signals
    /// and one destination signal.
    MapPropose {
        id: MapId,
        sources: Vec<String>,
        dst: String,
        expression: String,
        protocol: u8,
    },
    /// Acknowledge a map as fully negotiated and ready to carry data.
    Mapped { id: MapId },
    /// Change an active map's expression or properties in place.
    MapModify { id: MapId, expression: String },
    /// Request a map be torn down.
    Unmap { id: MapId },
    /// Acknowledge a map has been torn down.
    Unmapped { id: MapId },
    /// Ask peers to report a subset of entity kinds going forward.
    Subscribe { mask: u8, lease_seconds: u32 },
    /// Clock sync heartbeat.
    Sync {
        device: String,
        ordinal: u32,
        time: TimeTag,
    },
}

impl AdminMessage {
    /// Encode to a wire-ready OSC message.
    pub fn to_message(&self) -> Message {
        match self {
            AdminMessage::Who => Message::new("/who"),
            AdminMessage::DeviceAnnounce {
                name,
                ordinal,
                port,
                version,
            } => Message::new("/device")
                .arg(Value::String(name.clone()))
                .arg(Value::Int32(*ordinal as i32))
                .arg(Value::Int32(*port as i32))
                .arg(Value::Int32(*version as i32)),
            AdminMessage::SignalAnnounce {
                device,
                ordinal,
                name,
                direction,
                value_type,
                length,
                unit,
                range,
            } => {
                let mut m = Message::new("/signal")
                    .arg(Value::String(device.clone()))
                    .arg(Value::Int32(*ordinal as i32))
                    .arg(Value::String(name.clone()))
                    .arg(Value::String(direction_str(*direction).to_string()))
                    .arg(Value::String(value_type.wire_tag().to_string()))
                    .arg(Value::Int32(*length as i32));
                if let Some(u) = unit {
                    m = m.arg(Value::String(format!("unit:{u}")));
                }
                if let Some((min, max)) = range {
                    m = m.arg(Value::String("range".to_string())).arg(Value::Float64(*min)).arg(Value::Float64(*max));
                }
                m
            }
            AdminMessage::SignalRemoved { device, ordinal, name } => Message::new("/signal/removed")
                .arg(Value::String(device.clone()))
                .arg(Value::Int32(*ordinal as i32))
                .arg(Value::String(name.clone())),
            AdminMessage::MapPropose {
                id,
                sources,
                dst,
                expression,
                protocol,
            } => {
                let mut m = Message::new("/map")
                    .arg(Value::Int64(*id as i64))
                    .arg(Value::Int32(sources.len() as i32));
                for s in sources {
                    m = m.arg(Value::String(s.clone()));
                }
                m.arg(Value::String(dst.clone()))
                    .arg(Value::String(expression.clone()))
                    .arg(Value::Int32(*protocol as i32))
            }
            AdminMessage::Mapped { id } => Message::new("/mapped").arg(Value::Int64(*id as i64)),
            AdminMessage::MapModify { id, expression } => Message::new("/map/modify")
                .arg(Value::Int64(*id as i64))
                .arg(Value::String(expression.clone())),
            AdminMessage::Unmap { id } => Message::new("/unmap").arg(Value::Int64(*id as i64)),
            AdminMessage::Unmapped { id } => Message::new("/unmapped").arg(Value::Int64(*id as i64)),
            AdminMessage::Subscribe { mask, lease_seconds } => Message::new("/subscribe")
                .arg(Value::Int32(*mask as i32))
                .arg(Value::Int32(*lease_seconds as i32)),
            AdminMessage::Sync { device, ordinal, time } => Message::new("/sync")
                .arg(Value::String(device.clone()))
                .arg(Value::Int32(*ordinal as i32))
                .arg(Value::Time(*time)),
        }
    }

    /// Parse a raw OSC message into a typed admin message, dispatching on
    /// address. Unrecognized addresses are a [`Error::MalformedPacket`]
    /// rather than silently ignored, since the caller (the device poll
    /// loop) is responsible for deciding whether an unknown admin address
    /// is worth logging at all.
    pub fn from_message(msg: &Message) -> Result<AdminMessage> {
        match msg.address.as_str() {
            "/who" => Ok(AdminMessage::Who),
            "/device" => Ok(AdminMessage::DeviceAnnounce {
                name: arg_str(msg, 0)?,
                ordinal: arg_i64(msg, 1)? as u32,
                port: arg_i64(msg, 2)? as u16,
                version: arg_i64(msg, 3)? as u32,
            }),
            "/signal" => {
                let device = arg_str(msg, 0)?;
                let ordinal = arg_i64(msg, 1)? as u32;
                let name = arg_str(msg, 2)?;
                let direction = parse_direction(&arg_str(msg, 3)?)?;
                let tag = arg_str(msg, 4)?;
                let value_type = parse_value_type(tag.chars().next().unwrap_or('\0'))?;
                let length = arg_i64(msg, 5)? as usize;
                let mut unit = None;
                let mut range = None;
                let mut idx = 6;
                while let Some(Value::String(tag)) = msg.args.get(idx) {
                    if let Some(u) = tag.strip_prefix("unit:") {
                        unit = Some(u.to_string());
                        idx += 1;
                    } else if tag == "range" {
                        let min = arg_f64(msg, idx + 1)?;
                        let max = arg_f64(msg, idx + 2)?;
                        range = Some((min, max));
                        idx += 3;
                    } else {
                        break;
                    }
                }
                Ok(AdminMessage::SignalAnnounce {
                    device,
                    ordinal,
                    name,
                    direction,
                    value_type,
                    length,
                    unit,
                    range,
                })
            }
            "/signal/removed" => Ok(AdminMessage::SignalRemoved {
                device: arg_str(msg, 0)?,
                ordinal: arg_i64(msg, 1)? as u32,
                name: arg_str(msg, 2)?,
            }),
            "/map" => {
                let id = arg_i64(msg, 0)? as MapId;
                let n = arg_i64(msg, 1)? as usize;
                let mut sources = Vec::with_capacity(n);
                for i in 0..n {
                    sources.push(arg_str(msg, 2 + i)?);
                }
                let dst = arg_str(msg, 2 + n)?;
                let expression = arg_str(msg, 3 + n)?;
                let protocol = arg_i64(msg, 4 + n)? as u8;
                Ok(AdminMessage::MapPropose {
                    id,
                    sources,
                    dst,
                    expression,
                    protocol,
                })
            }
            "/mapped" => Ok(AdminMessage::Mapped { id: arg_i64(msg, 0)? as MapId }),
            "/map/modify" => Ok(AdminMessage::MapModify {
                id: arg_i64(msg, 0)? as MapId,
                expression: arg_str(msg, 1)?,
            }),
            "/unmap" => Ok(AdminMessage::Unmap { id: arg_i64(msg, 0)? as MapId }),
            "/unmapped" => Ok(AdminMessage::Unmapped { id: arg_i64(msg, 0)? as MapId }),
            "/subscribe" => Ok(AdminMessage::Subscribe {
                mask: arg_i64(msg, 0)? as u8,
                lease_seconds: arg_i64(msg, 1)? as u32,
            }),
            "/sync" => {
                let device = arg_str(msg, 0)?;
                let ordinal = arg_i64(msg, 1)? as u32;
                let time = match msg.args.get(2) {
                    Some(Value::Time(t)) => *t,
                    other => return Err(Error::MalformedPacket(format!("/sync: expected time tag, found {other:?}"))),
                };
                Ok(AdminMessage::Sync { device, ordinal, time })
            }
            other => Err(Error::MalformedPacket(format!("unrecognized admin address {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_announce_round_trips() {
        let msg = AdminMessage::DeviceAnnounce {
            name: "synth".into(),
            ordinal: 2,
            port: 9001,
            version: 3,
        };
        let encoded = msg.to_message();
        assert_eq!(encoded.address, "/device");
        assert_eq!(AdminMessage::from_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn signal_announce_round_trips_with_unit_and_range() {
        let msg = AdminMessage::SignalAnnounce {
            device: "synth".into(),
            ordinal: 0,
            name: "freq".into(),
            direction: Direction::Output,
            value_type: ValueType::Float32,
            length: 1,
            unit: Some("Hz".into()),
            range: Some((20.0, 20_000.0)),
        };
        let encoded = msg.to_message();
        assert_eq!(AdminMessage::from_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn map_propose_round_trips_multi_source() {
        let msg = AdminMessage::MapPropose {
            id: 42,
            sources: vec!["a/x".into(), "b/y".into()],
            dst: "c/z".into(),
            expression: "y=x0+x1".into(),
            protocol: 0,
        };
        let encoded = msg.to_message();
        assert_eq!(AdminMessage::from_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn unknown_address_is_rejected() {
        let msg = Message::new("/bogus");
        assert!(AdminMessage::from_message(&msg).is_err());
    }
}
