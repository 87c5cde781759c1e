//! Mesh Time models.
//!
//! Distributes TAI time, the local time zone offset and the TAI-UTC delta
//! across a mesh network.
//!
//! # Models
//! - [`TimeServer`] answers Get messages and follows network time by role
//! - [`TimeSetupServer`] accepts Set messages and owns the time role
//! - [`TimeClient`] queries a remote server with an acknowledged Time Get
//!
//! Handlers never send anything directly. They return an [`Outbox`] which
//! the host passes to [`deliver`] together with its [`MeshTransport`].

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod policy;
pub mod server;
pub mod setup_server;
pub mod shared;
pub mod state;
pub mod transport;

pub use client::{ClientState, TimeClient, TimeClientEvents, TimeQueryOutcome, TIME_CLIENT_MODEL_ID};
pub use codec::{
    CodecError, Message, Opcode, Payload, TaiUtcDeltaSetParams, TaiUtcDeltaStatusParams,
    TimeParams, ZoneSetParams, ZoneStatusParams,
};
pub use config::{
    ClientSettings, ConfigError, ServerSettings, TimeModelConfig, DEFAULT_TIME_STATUS_TTL,
};
pub use error::{Result, TimeModelError};
pub use policy::{decide_inbound_status, IgnoreReason, Role, StatusDecision};
pub use server::{NoopEvents, TimeServer, TimeServerEvents, TIME_SERVER_MODEL_ID};
pub use setup_server::{TimeSetupServer, TimeSetupServerEvents, TIME_SETUP_SERVER_MODEL_ID};
pub use shared::SharedSetupServer;
pub use state::TimeState;
pub use transport::{
    deliver, AccessMessage, Address, InboundMessage, MeshTransport, Outbound, Outbox,
    ReliableRequest, RxMeta, TransMicSize, TransportError,
};
