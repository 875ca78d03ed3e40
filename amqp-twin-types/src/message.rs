//! The wire-ish message type passed between the core and the consumed `AmqpClient`
//!
//! This deliberately mirrors the field layout of `fe2o3_amqp_types::messaging::Message`
//! (`properties`, `application_properties`, `message_annotations`, body) without pulling
//! in that crate's serde-based wire codec, since AMQP 1.0 framing itself is out of scope
//! here: the codec lives entirely on the other side of the `AmqpClient` boundary.

use indexmap::IndexMap;

use crate::value::AmqpValue;

/// Opaque delivery tag used to address `accept`/`reject`/`abandon` at a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DeliveryTag(pub Vec<u8>);

impl DeliveryTag {
    /// Creates a delivery tag from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

/// The message body: either a UTF-8 string or an opaque byte payload.
///
/// Twin requests always encode a string body (callers pass `body.to_string()`); CBS
/// put-token requests encode the token string directly.
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpBody {
    /// A UTF-8 string body
    String(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
}

impl AmqpBody {
    /// Returns the body as a string slice, if it is a [`AmqpBody::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmqpBody::String(s) => Some(s),
            AmqpBody::Bytes(_) => None,
        }
    }
}

impl From<String> for AmqpBody {
    fn from(value: String) -> Self {
        AmqpBody::String(value)
    }
}

impl From<&str> for AmqpBody {
    fn from(value: &str) -> Self {
        AmqpBody::String(value.to_string())
    }
}

/// Immutable message properties: `amqp:properties:list` field subset this protocol uses.
///
/// Mirrors `fe2o3_amqp_types::messaging::Properties`, trimmed to the fields this protocol
/// actually reads or writes (`message_id`, `to`, `reply_to`, `correlation_id`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    /// `messageId`. AMQP's `message-id` is polymorphic; this core only ever populates it
    /// with the string form of a generated UUID, but carries it as a plain `String` since
    /// callers on the receive side may see anything.
    pub message_id: Option<String>,
    /// `to`
    pub to: Option<String>,
    /// `reply_to`
    pub reply_to: Option<String>,
    /// `correlationId`
    pub correlation_id: Option<String>,
}

/// A message exchanged with the consumed AMQP client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmqpMessage {
    /// Message body.
    pub body: Option<AmqpBody>,
    /// `properties` section.
    pub properties: MessageProperties,
    /// `applicationProperties`: user key/value pairs.
    pub application_properties: IndexMap<String, AmqpValue>,
    /// `messageAnnotations`: service routing (`operation`, `resource`, `version`, ...).
    pub message_annotations: IndexMap<String, AmqpValue>,
    /// Delivery tag, populated by the `AmqpClient` on inbound messages only.
    pub delivery_tag: Option<DeliveryTag>,
}

impl AmqpMessage {
    /// Creates an empty message with the given body.
    pub fn with_body(body: impl Into<AmqpBody>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Returns the `status-code` application property, if present and numeric.
    pub fn status_code(&self) -> Option<i64> {
        match self.application_properties.get("status-code") {
            Some(AmqpValue::Int(code)) => Some(*code),
            _ => None,
        }
    }

    /// Returns the `status-description` application property, if present.
    pub fn status_description(&self) -> Option<&str> {
        match self.application_properties.get("status-description") {
            Some(value) => value.as_str(),
            None => None,
        }
    }
}
