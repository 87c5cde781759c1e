//! Time Setup Server: the only model that accepts Set messages.
//!
//! It owns a [`TimeServer`] and forwards every non-Set opcode to it. A Set
//! is always answered with the matching status; when the Set was rejected
//! the status shows the unchanged state, so the requester can tell by
//! comparing what it asked for with what came back.

use tracing::{debug, info, warn};

use crate::codec::{
    CodecError, Message, Opcode, TaiUtcDeltaSetParams, TimeParams, ZoneSetParams,
};
use crate::config::ServerSettings;
use crate::error::{Result, TimeModelError};
use crate::policy::Role;
use crate::server::{NoopEvents, TimeServer};
use crate::state::TimeState;
use crate::transport::{
    deliver, queue, Address, InboundMessage, MeshTransport, Outbound, Outbox, RxMeta,
};

pub const TIME_SETUP_SERVER_MODEL_ID: u16 = 0x1201;

/// Opcodes the Time Setup Server subscribes to.
pub const TIME_SETUP_SERVER_OPCODES: [Opcode; 5] = [
    Opcode::TimeSet,
    Opcode::ZoneSet,
    Opcode::TaiUtcDeltaSet,
    Opcode::RoleGet,
    Opcode::RoleSet,
];

/// Notifications from a [`TimeSetupServer`]. Set callbacks fire only when
/// the new value was applied.
pub trait TimeSetupServerEvents: Send {
    fn on_time_set(&mut self, _meta: &RxMeta, _params: &TimeParams) {}

    fn on_zone_set(&mut self, _meta: &RxMeta, _params: &ZoneSetParams) {}

    fn on_tai_utc_delta_set(&mut self, _meta: &RxMeta, _params: &TaiUtcDeltaSetParams) {}

    fn on_role_get(&mut self, _meta: &RxMeta) {}

    fn on_role_set(&mut self, _meta: &RxMeta, _role: Role) {}
}

impl TimeSetupServerEvents for NoopEvents {}

pub struct TimeSetupServer {
    server: TimeServer,
    events: Box<dyn TimeSetupServerEvents>,
}

impl std::fmt::Debug for TimeSetupServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSetupServer")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl TimeSetupServer {
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_events(TimeServer::new(settings), Box::new(NoopEvents))
    }

    pub fn with_events(server: TimeServer, events: Box<dyn TimeSetupServerEvents>) -> Self {
        Self { server, events }
    }

    /// Register both the contained Time Server and this model.
    pub fn register<T>(&self, transport: &mut T) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        self.server.register(transport)?;
        transport.register_handlers(TIME_SETUP_SERVER_MODEL_ID, &TIME_SETUP_SERVER_OPCODES)?;
        Ok(())
    }

    pub fn server(&self) -> &TimeServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut TimeServer {
        &mut self.server
    }

    pub fn state(&self) -> &TimeState {
        self.server.state()
    }

    pub fn dispatch<T>(&mut self, transport: &mut T, inbound: &InboundMessage<'_>) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        let outbox = self.handle(inbound, transport.local_unicast_address())?;
        deliver(transport, &outbox)
    }

    pub fn handle(&mut self, inbound: &InboundMessage<'_>, local: Address) -> Result<Outbox> {
        if !TIME_SETUP_SERVER_OPCODES.contains(&inbound.opcode) {
            return self.server.handle(inbound, local);
        }

        let message = match inbound.decode() {
            Ok(message) => message,
            Err(TimeModelError::Codec(CodecError::InvalidRole(raw))) => {
                warn!(src = %inbound.meta.src, raw, "rejecting prohibited time role");
                return self
                    .server
                    .reply(&inbound.meta, Message::RoleStatus(self.state().role()));
            }
            Err(err) if inbound.opcode.is_set() => {
                warn!(src = %inbound.meta.src, opcode = ?inbound.opcode, %err, "rejecting malformed set");
                return self
                    .server
                    .reply(&inbound.meta, self.current_status_for(inbound.opcode));
            }
            Err(err) => {
                warn!(src = %inbound.meta.src, opcode = ?inbound.opcode, %err, "dropping malformed time message");
                return Err(err);
            }
        };

        match message {
            Message::RoleGet => self.handle_role_get(&inbound.meta),
            set => self.handle_set(&inbound.meta, &set),
        }
    }

    /// Apply a Set-class message and answer with the resulting status.
    pub fn handle_set(&mut self, meta: &RxMeta, message: &Message) -> Result<Outbox> {
        let state = self.server.state_mut();
        let applied = match message {
            Message::TimeSet(params) => state.set_time(params).map(|()| {
                self.events.on_time_set(meta, params);
                Message::TimeStatus(state.time_status())
            }),
            Message::ZoneSet(params) => state
                .set_zone_transition(params.time_zone_offset_new, params.time_zone_change)
                .map(|()| {
                    self.events.on_zone_set(meta, params);
                    Message::ZoneStatus(state.zone_status())
                }),
            Message::TaiUtcDeltaSet(params) => state
                .set_delta_transition(params.tai_utc_delta_new, params.tai_utc_delta_change)
                .map(|()| {
                    self.events.on_tai_utc_delta_set(meta, params);
                    Message::TaiUtcDeltaStatus(state.tai_utc_delta_status())
                }),
            Message::RoleSet(role) => {
                state.set_role(*role);
                self.events.on_role_set(meta, *role);
                info!(src = %meta.src, role = ?role, "time role changed");
                Ok(Message::RoleStatus(*role))
            }
            other => return Err(TimeModelError::UnsupportedOpcode(other.opcode())),
        };

        match applied {
            Ok(status) => {
                let mut outbox = self.server.reply(meta, status)?;
                self.server.publish_on_change(status, &mut outbox)?;
                Ok(outbox)
            }
            Err(err) => {
                debug!(src = %meta.src, %err, "set rejected; replying with unchanged state");
                self.server
                    .reply(meta, self.current_status_for(message.opcode()))
            }
        }
    }

    pub fn handle_role_get(&mut self, meta: &RxMeta) -> Result<Outbox> {
        self.events.on_role_get(meta);
        self.server
            .reply(meta, Message::RoleStatus(self.state().role()))
    }

    /// Local role change. Publishes Role Status afterwards if configured to.
    pub fn set_role(&mut self, role: Role) -> Result<Outbox> {
        self.server.state_mut().set_role(role);
        let mut outbox = Outbox::new();
        self.server
            .publish_on_change(Message::RoleStatus(role), &mut outbox)?;
        Ok(outbox)
    }

    /// Publish the current role. Allowed for every role.
    pub fn publish_role_status(&self) -> Result<Outbox> {
        let mut outbox = Outbox::new();
        queue(
            &mut outbox,
            Outbound::Publish(
                self.server
                    .publish_message(Message::RoleStatus(self.state().role())),
            ),
        )?;
        Ok(outbox)
    }

    fn current_status_for(&self, opcode: Opcode) -> Message {
        let state = self.state();
        match opcode {
            Opcode::ZoneSet => Message::ZoneStatus(state.zone_status()),
            Opcode::TaiUtcDeltaSet => Message::TaiUtcDeltaStatus(state.tai_utc_delta_status()),
            Opcode::RoleSet => Message::RoleStatus(state.role()),
            _ => Message::TimeStatus(state.time_status()),
        }
    }
}
