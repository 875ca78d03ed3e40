//! Link attach options

use indexmap::IndexMap;

use crate::value::AmqpValue;

/// Sender settle mode, as attached to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderSettleMode {
    /// The sender will send all deliveries initially unsettled.
    Unsettled,
    /// The sender will send all deliveries settled (fire-and-forget at the link layer).
    #[default]
    Settled,
    /// The sender may choose per-delivery.
    Mixed,
}

/// Receiver settle mode, as attached to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverSettleMode {
    /// The receiver settles deliveries as soon as it receives them.
    #[default]
    First,
    /// The receiver waits for application disposition before settling (manual accept).
    Second,
}

/// Attach-properties bag carried verbatim to the consumed `AmqpClient`.
///
/// Equivalent to `fe2o3_amqp_types::definitions::Fields` plus the two settle-mode enums
/// that `fe2o3_amqp::link::builder::Builder` exposes as separate setters; bundled here
/// into one opaque value so `SenderLink`/`ReceiverLink` can pass it through without
/// interpreting it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkOptions {
    /// Per-link properties, e.g. `com.microsoft:channel-correlation-id`,
    /// `com.microsoft:api-version`.
    pub properties: IndexMap<String, AmqpValue>,
    /// Sender settle mode (meaningful for sender attach only).
    pub sender_settle_mode: SenderSettleMode,
    /// Receiver settle mode (meaningful for receiver attach only).
    pub receiver_settle_mode: ReceiverSettleMode,
}

impl LinkOptions {
    /// Creates an empty options bag with default settle modes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a single attach property, builder-style.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<AmqpValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the sender settle mode, builder-style.
    pub fn with_sender_settle_mode(mut self, mode: SenderSettleMode) -> Self {
        self.sender_settle_mode = mode;
        self
    }

    /// Sets the receiver settle mode, builder-style.
    pub fn with_receiver_settle_mode(mut self, mode: ReceiverSettleMode) -> Self {
        self.receiver_settle_mode = mode;
        self
    }
}
