//! Boundary to the mesh access layer.
//!
//! The Time models never send anything themselves. Handlers return an
//! [`Outbox`] describing replies and publishes, and [`deliver`] hands that
//! outbox to whatever implements [`MeshTransport`]. Delivery, retries,
//! segmentation and encryption all live on the other side of the trait.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::codec::{Message, Opcode, Payload};
use crate::error::{Result, TimeModelError};

/// Mesh unicast or group address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u16);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Addressing metadata of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMeta {
    pub src: Address,
    pub dst: Address,
}

/// A message as handed over by the access layer, payload still packed.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub opcode: Opcode,
    pub payload: &'a [u8],
    pub meta: RxMeta,
}

impl<'a> InboundMessage<'a> {
    pub fn new(opcode: Opcode, payload: &'a [u8], meta: RxMeta) -> Self {
        Self {
            opcode,
            payload,
            meta,
        }
    }

    pub fn decode(&self) -> Result<Message> {
        Ok(Message::decode(self.opcode, self.payload)?)
    }
}

/// Size of the transport MIC appended to an access message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransMicSize {
    /// 32-bit MIC.
    #[default]
    Small,
    /// 64-bit MIC; forces a segmented message.
    Large,
}

/// An outgoing opcode + packed payload, with per-message send options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMessage {
    pub opcode: Opcode,
    pub payload: Payload,
    pub force_segmented: bool,
    pub transmic_size: TransMicSize,
    /// Publish TTL for this message only. `None` keeps the model's
    /// configured publish TTL.
    pub ttl: Option<u8>,
}

impl AccessMessage {
    pub fn with_options(mut self, force_segmented: bool, transmic_size: TransMicSize) -> Self {
        self.force_segmented = force_segmented;
        self.transmic_size = transmic_size;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl From<&Message> for AccessMessage {
    fn from(message: &Message) -> Self {
        Self {
            opcode: message.opcode(),
            payload: message.encode(),
            force_segmented: false,
            transmic_size: TransMicSize::Small,
            ttl: None,
        }
    }
}

impl From<Message> for AccessMessage {
    fn from(message: Message) -> Self {
        Self::from(&message)
    }
}

/// Something a handler wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Unicast answer to the request described by `to`.
    Reply { to: RxMeta, message: AccessMessage },
    /// Send to the model's configured publish address.
    Publish(AccessMessage),
}

impl Outbound {
    pub fn message(&self) -> &AccessMessage {
        match self {
            Outbound::Reply { message, .. } | Outbound::Publish(message) => message,
        }
    }
}

/// Maximum number of sends a single handler produces (reply + publish).
pub const OUTBOX_CAPACITY: usize = 2;

pub type Outbox = heapless::Vec<Outbound, OUTBOX_CAPACITY>;

pub(crate) fn queue(outbox: &mut Outbox, item: Outbound) -> Result<()> {
    outbox
        .push(item)
        .map_err(|_| TimeModelError::ResourceExhausted)
}

/// An acknowledged request: the transport retries until a message with
/// `reply_opcode` arrives or `timeout` elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableRequest {
    pub message: AccessMessage,
    pub reply_opcode: Opcode,
    pub timeout: Duration,
}

/// Failures reported by the access layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no buffer available for the outgoing message")]
    NoBuffers,
    #[error("sequence numbers exhausted")]
    SequenceNumbersExhausted,
    #[error("invalid source or destination address")]
    InvalidAddress,
    #[error("model has no publish address configured")]
    PublishAddressUnset,
    #[error("transport rejected the message: {0}")]
    Rejected(String),
}

/// Primitives the Time models need from the mesh stack.
pub trait MeshTransport {
    /// Route `opcodes` addressed to `model_id` on this element to the caller.
    fn register_handlers(&mut self, model_id: u16, opcodes: &[Opcode])
        -> Result<(), TransportError>;

    /// Publish to the model's publish address. When `message.ttl` is set
    /// it overrides the model's publish TTL for this message only.
    fn publish(&mut self, message: &AccessMessage) -> Result<(), TransportError>;

    fn reply(&mut self, request: &RxMeta, message: &AccessMessage) -> Result<(), TransportError>;

    /// Start an acknowledged transaction. Completion arrives later as an
    /// inbound message or a timeout reported by the host.
    fn reliable_request(&mut self, request: &ReliableRequest) -> Result<(), TransportError>;

    fn local_unicast_address(&self) -> Address;
}

/// Send everything in `outbox`, in order, stopping at the first failure.
pub fn deliver<T>(transport: &mut T, outbox: &Outbox) -> Result<()>
where
    T: MeshTransport + ?Sized,
{
    for item in outbox {
        let message = item.message();
        trace!(
            opcode = ?message.opcode,
            ttl = ?message.ttl,
            payload = %hex::encode(&message.payload),
            "sending time model message"
        );
        match item {
            Outbound::Reply { to, message } => transport.reply(to, message)?,
            Outbound::Publish(message) => transport.publish(message)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Role;

    #[derive(Default)]
    struct FailingPublish {
        replies: usize,
    }

    impl MeshTransport for FailingPublish {
        fn register_handlers(&mut self, _: u16, _: &[Opcode]) -> Result<(), TransportError> {
            Ok(())
        }

        fn publish(&mut self, _: &AccessMessage) -> Result<(), TransportError> {
            Err(TransportError::NoBuffers)
        }

        fn reply(&mut self, _: &RxMeta, _: &AccessMessage) -> Result<(), TransportError> {
            self.replies += 1;
            Ok(())
        }

        fn reliable_request(&mut self, _: &ReliableRequest) -> Result<(), TransportError> {
            Err(TransportError::InvalidAddress)
        }

        fn local_unicast_address(&self) -> Address {
            Address(1)
        }
    }

    #[test]
    fn outbox_holds_reply_and_publish_only() {
        let message = AccessMessage::from(Message::RoleStatus(Role::Relay));
        let mut outbox = Outbox::new();
        queue(&mut outbox, Outbound::Publish(message.clone())).unwrap();
        queue(&mut outbox, Outbound::Publish(message.clone())).unwrap();
        assert_eq!(
            queue(&mut outbox, Outbound::Publish(message)),
            Err(TimeModelError::ResourceExhausted)
        );
    }

    #[test]
    fn send_options_default_to_model_settings() {
        let message = AccessMessage::from(Message::TimeGet);
        assert!(!message.force_segmented);
        assert_eq!(message.transmic_size, TransMicSize::Small);
        assert_eq!(message.ttl, None);

        let message = message.with_options(true, TransMicSize::Large).with_ttl(0);
        assert!(message.force_segmented);
        assert_eq!(message.transmic_size, TransMicSize::Large);
        assert_eq!(message.ttl, Some(0));
    }

    #[test]
    fn deliver_stops_at_first_failure() {
        let meta = RxMeta {
            src: Address(2),
            dst: Address(1),
        };
        let message = AccessMessage::from(Message::RoleStatus(Role::None));
        let mut outbox = Outbox::new();
        queue(&mut outbox, Outbound::Reply { to: meta, message: message.clone() }).unwrap();
        queue(&mut outbox, Outbound::Publish(message)).unwrap();

        let mut transport = FailingPublish::default();
        assert_eq!(
            deliver(&mut transport, &outbox),
            Err(TimeModelError::ResourceExhausted)
        );
        assert_eq!(transport.replies, 1);
    }
}
