/// Wire codec for the four Canopy message shapes.
///
/// ASCII decimal, no separators: a three-letter tag followed by fixed-width
/// zero-padded fields. Node ids take `id_size` digits.
///
/// | Message | Layout | Example (`id_size = 3`) |
/// |---|---|---|
/// | Announce | `NDA` | `NDA` |
/// | AnnounceReply | `NDR` + recipient | `NDR005` |
/// | SensorReport | `SRV` + value(2) + origin | `SRV42005` |
/// | Command | `COM` + order(1) + destination | `COM1004` |
use crate::error::MeshProtocolError;
use crate::types::{NodeId, Order, ID_SIZE, MAX_SENSOR_VALUE, ORDER_DIGITS, VALUE_DIGITS};

const TAG_ANNOUNCE: &[u8; 3] = b"NDA";
const TAG_ANNOUNCE_REPLY: &[u8; 3] = b"NDR";
const TAG_SENSOR_REPORT: &[u8; 3] = b"SRV";
const TAG_COMMAND: &[u8; 3] = b"COM";
const TAG_LEN: usize = 3;

/// Largest id width that still fits a `u16` for every value.
const MAX_ID_SIZE: usize = 4;

/// A decoded Canopy message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Broadcast by a node looking for a parent.
    Announce,
    /// Broadcast by a connected node offering itself as parent to `recipient`.
    AnnounceReply { recipient: NodeId },
    /// Upward reading from `origin`.
    SensorReport { origin: NodeId, value: u8 },
    /// Downward instruction for `destination`.
    Command { order: Order, destination: NodeId },
}

impl Message {
    /// Short tag name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Announce => "announce",
            Message::AnnounceReply { .. } => "announce-reply",
            Message::SensorReport { .. } => "sensor-report",
            Message::Command { .. } => "command",
        }
    }
}

/// Encoder/decoder parameterized by the id width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCodec {
    id_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self { id_size: ID_SIZE }
    }
}

impl MessageCodec {
    /// Create a codec with a custom id width (1..=4 digits).
    pub fn new(id_size: usize) -> Result<Self, MeshProtocolError> {
        if id_size == 0 || id_size > MAX_ID_SIZE {
            return Err(MeshProtocolError::InvalidConfig(format!(
                "id_size must be 1..={MAX_ID_SIZE}, got {id_size}"
            )));
        }
        Ok(Self { id_size })
    }

    pub fn id_size(&self) -> usize {
        self.id_size
    }

    /// Largest node id representable with this codec.
    pub fn max_node_id(&self) -> u16 {
        // id_size <= 4, so this stays below u16::MAX
        (10u32.pow(self.id_size as u32) - 1) as u16
    }

    /// Encode a message to its wire bytes.
    ///
    /// Fails when a field does not fit its fixed width.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, MeshProtocolError> {
        let mut out = Vec::with_capacity(TAG_LEN + VALUE_DIGITS + self.id_size);
        match *message {
            Message::Announce => out.extend_from_slice(TAG_ANNOUNCE),
            Message::AnnounceReply { recipient } => {
                out.extend_from_slice(TAG_ANNOUNCE_REPLY);
                push_padded(&mut out, "recipient", recipient.get().into(), self.id_size)?;
            }
            Message::SensorReport { origin, value } => {
                if value > MAX_SENSOR_VALUE {
                    return Err(MeshProtocolError::FieldOverflow {
                        field: "value",
                        value: value.into(),
                        width: VALUE_DIGITS,
                    });
                }
                out.extend_from_slice(TAG_SENSOR_REPORT);
                push_padded(&mut out, "value", value.into(), VALUE_DIGITS)?;
                push_padded(&mut out, "origin", origin.get().into(), self.id_size)?;
            }
            Message::Command { order, destination } => {
                out.extend_from_slice(TAG_COMMAND);
                push_padded(&mut out, "order", order.code().into(), ORDER_DIGITS)?;
                push_padded(&mut out, "destination", destination.get().into(), self.id_size)?;
            }
        }
        Ok(out)
    }

    /// Decode wire bytes. Strict: exact length, ASCII digits only.
    pub fn decode(&self, data: &[u8]) -> Result<Message, MeshProtocolError> {
        if data.len() < TAG_LEN {
            return Err(MeshProtocolError::malformed(format!(
                "truncated frame ({} bytes)",
                data.len()
            )));
        }
        let (tag, body) = data.split_at(TAG_LEN);

        match tag {
            t if t == TAG_ANNOUNCE => {
                expect_len(body, 0, "announce")?;
                Ok(Message::Announce)
            }
            t if t == TAG_ANNOUNCE_REPLY => {
                expect_len(body, self.id_size, "announce-reply")?;
                let recipient = parse_digits(body, "recipient")?;
                Ok(Message::AnnounceReply {
                    recipient: node_id(recipient)?,
                })
            }
            t if t == TAG_SENSOR_REPORT => {
                expect_len(body, VALUE_DIGITS + self.id_size, "sensor-report")?;
                let (value, origin) = body.split_at(VALUE_DIGITS);
                let value = parse_digits(value, "value")?;
                let origin = parse_digits(origin, "origin")?;
                Ok(Message::SensorReport {
                    origin: node_id(origin)?,
                    // two digits: always <= 99
                    value: value as u8,
                })
            }
            t if t == TAG_COMMAND => {
                expect_len(body, ORDER_DIGITS + self.id_size, "command")?;
                let (order, destination) = body.split_at(ORDER_DIGITS);
                let order = parse_digits(order, "order")?;
                let destination = parse_digits(destination, "destination")?;
                Ok(Message::Command {
                    order: Order::new(order as u8)
                        .ok_or_else(|| MeshProtocolError::malformed("order out of range"))?,
                    destination: node_id(destination)?,
                })
            }
            other => Err(MeshProtocolError::malformed(format!(
                "unknown tag {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

fn push_padded(
    out: &mut Vec<u8>,
    field: &'static str,
    value: u32,
    width: usize,
) -> Result<(), MeshProtocolError> {
    let digits = format!("{value:0width$}");
    if digits.len() > width {
        return Err(MeshProtocolError::FieldOverflow {
            field,
            value,
            width,
        });
    }
    out.extend_from_slice(digits.as_bytes());
    Ok(())
}

fn expect_len(body: &[u8], expected: usize, kind: &str) -> Result<(), MeshProtocolError> {
    if body.len() != expected {
        return Err(MeshProtocolError::malformed(format!(
            "{kind} body is {} bytes, expected {expected}",
            body.len()
        )));
    }
    Ok(())
}

fn parse_digits(field: &[u8], name: &str) -> Result<u32, MeshProtocolError> {
    field.iter().try_fold(0u32, |acc, &b| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + u32::from(b - b'0'))
        } else {
            Err(MeshProtocolError::malformed(format!(
                "non-digit byte 0x{b:02x} in {name}"
            )))
        }
    })
}

fn node_id(raw: u32) -> Result<NodeId, MeshProtocolError> {
    u16::try_from(raw)
        .map(NodeId::new)
        .map_err(|_| MeshProtocolError::malformed(format!("node id {raw} out of range")))
}
