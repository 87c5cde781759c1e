//! Time Server: answers Get messages, publishes status and listens to
//! Time Status from the network according to its role.

use tracing::{debug, trace, warn};

use crate::codec::{Message, Opcode, TimeParams};
use crate::config::ServerSettings;
use crate::error::{Result, TimeModelError};
use crate::policy::{decide_inbound_status, StatusDecision};
use crate::state::TimeState;
use crate::transport::{
    deliver, queue, AccessMessage, Address, InboundMessage, MeshTransport, Outbound, Outbox,
    RxMeta,
};

pub const TIME_SERVER_MODEL_ID: u16 = 0x1200;

/// Opcodes the Time Server subscribes to.
pub const TIME_SERVER_OPCODES: [Opcode; 4] = [
    Opcode::TimeGet,
    Opcode::TimeStatus,
    Opcode::ZoneGet,
    Opcode::TaiUtcDeltaGet,
];

/// Per-instance notifications from a [`TimeServer`]. All methods default to no-ops.
pub trait TimeServerEvents: Send {
    /// A Time Get arrived, or (`meta == None`) a periodic publish is about to go out.
    fn on_time_get(&mut self, _meta: Option<&RxMeta>) {}

    /// A Time Status from the network was adopted.
    fn on_time_status(&mut self, _meta: &RxMeta, _status: &TimeParams) {}

    fn on_zone_get(&mut self, _meta: &RxMeta) {}

    fn on_tai_utc_delta_get(&mut self, _meta: &RxMeta) {}
}

/// Event sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl TimeServerEvents for NoopEvents {}

pub struct TimeServer {
    state: TimeState,
    settings: ServerSettings,
    events: Box<dyn TimeServerEvents>,
}

impl std::fmt::Debug for TimeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeServer")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TimeServer {
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_events(settings, Box::new(NoopEvents))
    }

    pub fn with_events(settings: ServerSettings, events: Box<dyn TimeServerEvents>) -> Self {
        Self {
            state: TimeState::new(),
            settings,
            events,
        }
    }

    /// Subscribe this model's opcodes with the access layer.
    pub fn register<T>(&self, transport: &mut T) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        transport.register_handlers(TIME_SERVER_MODEL_ID, &TIME_SERVER_OPCODES)?;
        Ok(())
    }

    pub fn state(&self) -> &TimeState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TimeState {
        &mut self.state
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Handle one inbound message and deliver whatever it produces.
    pub fn dispatch<T>(&mut self, transport: &mut T, inbound: &InboundMessage<'_>) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        let outbox = self.handle(inbound, transport.local_unicast_address())?;
        deliver(transport, &outbox)
    }

    /// Handle one inbound message. `local` is this node's unicast address.
    pub fn handle(&mut self, inbound: &InboundMessage<'_>, local: Address) -> Result<Outbox> {
        let message = inbound.decode().inspect_err(|err| {
            warn!(src = %inbound.meta.src, opcode = ?inbound.opcode, %err, "dropping malformed time message");
        })?;

        match message {
            Message::TimeGet => self.handle_get(&inbound.meta),
            Message::TimeStatus(status) => self.handle_inbound_status(&status, &inbound.meta, local),
            Message::ZoneGet => self.handle_zone_get(&inbound.meta),
            Message::TaiUtcDeltaGet => self.handle_tai_utc_delta_get(&inbound.meta),
            other => Err(TimeModelError::UnsupportedOpcode(other.opcode())),
        }
    }

    /// Reply with the current Time Status. Never changes state.
    pub fn handle_get(&mut self, meta: &RxMeta) -> Result<Outbox> {
        self.events.on_time_get(Some(meta));
        self.reply(meta, Message::TimeStatus(self.state.time_status()))
    }

    pub fn handle_zone_get(&mut self, meta: &RxMeta) -> Result<Outbox> {
        self.events.on_zone_get(meta);
        self.reply(meta, Message::ZoneStatus(self.state.zone_status()))
    }

    pub fn handle_tai_utc_delta_get(&mut self, meta: &RxMeta) -> Result<Outbox> {
        self.events.on_tai_utc_delta_get(meta);
        self.reply(
            meta,
            Message::TaiUtcDeltaStatus(self.state.tai_utc_delta_status()),
        )
    }

    /// Apply the role policy to a Time Status heard from `meta.src`.
    pub fn handle_inbound_status(
        &mut self,
        status: &TimeParams,
        meta: &RxMeta,
        local: Address,
    ) -> Result<Outbox> {
        let decision = decide_inbound_status(self.state.role(), status, meta.src == local);
        let mut outbox = Outbox::new();

        if let StatusDecision::Ignore(reason) = decision {
            trace!(src = %meta.src, ?reason, role = ?self.state.role(), "ignoring time status");
            return Ok(outbox);
        }

        self.state.adopt_status(status);
        self.events.on_time_status(meta, status);
        debug!(
            src = %meta.src,
            tai_seconds = status.tai_seconds,
            authority = status.time_authority,
            "adopted network time"
        );

        if decision == StatusDecision::AcceptAndRelay {
            self.state.clear_authority();
            if !self.state.is_synchronized() {
                debug!(src = %meta.src, "adopted unknown time; not relaying");
                return Ok(outbox);
            }
            queue(
                &mut outbox,
                Outbound::Publish(
                    self.publish_message(Message::TimeStatus(self.state.time_status())),
                ),
            )?;
            debug!(tai_seconds = status.tai_seconds, "relaying authoritative time");
        }
        Ok(outbox)
    }

    /// Publish the current Time Status. Forbidden for the Client role and
    /// refused with `InvalidState` while the time is unknown.
    pub fn publish_status(&self) -> Result<Outbox> {
        self.publish_gated(Message::TimeStatus(self.state.time_status()))
    }

    pub fn publish_zone_status(&self) -> Result<Outbox> {
        self.publish_gated(Message::ZoneStatus(self.state.zone_status()))
    }

    pub fn publish_tai_utc_delta_status(&self) -> Result<Outbox> {
        self.publish_gated(Message::TaiUtcDeltaStatus(
            self.state.tai_utc_delta_status(),
        ))
    }

    /// Periodic publication hook, called by the host when the publish period elapses.
    pub fn on_publish_period(&mut self) -> Result<Outbox> {
        self.events.on_time_get(None);
        self.publish_status()
    }

    /// Local Time Set. Publishes Time Status afterwards if configured to.
    pub fn set_time(&mut self, params: &TimeParams) -> Result<Outbox> {
        self.state.set_time(params)?;
        let mut outbox = Outbox::new();
        self.publish_on_change(Message::TimeStatus(self.state.time_status()), &mut outbox)?;
        Ok(outbox)
    }

    pub fn set_zone_transition(&mut self, offset_new: i16, change_at: u64) -> Result<Outbox> {
        self.state.set_zone_transition(offset_new, change_at)?;
        let mut outbox = Outbox::new();
        self.publish_on_change(Message::ZoneStatus(self.state.zone_status()), &mut outbox)?;
        Ok(outbox)
    }

    pub fn set_delta_transition(&mut self, delta_new: i32, change_at: u64) -> Result<Outbox> {
        self.state.set_delta_transition(delta_new, change_at)?;
        let mut outbox = Outbox::new();
        self.publish_on_change(
            Message::TaiUtcDeltaStatus(self.state.tai_utc_delta_status()),
            &mut outbox,
        )?;
        Ok(outbox)
    }

    pub fn update_time(&mut self, tai_seconds: u64, subsecond: u8) -> Result<()> {
        self.state.update_time(tai_seconds, subsecond)
    }

    pub fn update_uncertainty(&mut self, uncertainty: u8) {
        self.state.update_uncertainty(uncertainty);
    }

    /// Host clock tick.
    pub fn advance(&mut self, delta_seconds: u64, delta_subsecond: u8) -> Result<()> {
        self.state.advance(delta_seconds, delta_subsecond)
    }

    /// Queue a state-change publish when the settings ask for one. The
    /// state change itself already succeeded, so a Client role or an
    /// unknown time skips the publish instead of failing.
    pub(crate) fn publish_on_change(&self, message: Message, outbox: &mut Outbox) -> Result<()> {
        if !self.settings.publish_on_state_change {
            return Ok(());
        }
        if !self.state.role().may_publish() && message.opcode() != Opcode::RoleStatus {
            debug!(opcode = ?message.opcode(), "client role: skipping state change publish");
            return Ok(());
        }
        if message.opcode() == Opcode::TimeStatus && !self.state.is_synchronized() {
            debug!("time unknown: skipping time status publish");
            return Ok(());
        }
        queue(outbox, Outbound::Publish(self.publish_message(message)))
    }

    /// Outgoing message carrying this model's send options. Time Status
    /// publishes also carry the configured status TTL.
    pub(crate) fn publish_message(&self, message: Message) -> AccessMessage {
        let outgoing = self.outgoing(message);
        if message.opcode() == Opcode::TimeStatus {
            outgoing.with_ttl(self.settings.status_ttl)
        } else {
            outgoing
        }
    }

    pub(crate) fn reply(&self, meta: &RxMeta, message: Message) -> Result<Outbox> {
        let mut outbox = Outbox::new();
        queue(
            &mut outbox,
            Outbound::Reply {
                to: *meta,
                message: self.outgoing(message),
            },
        )?;
        Ok(outbox)
    }

    fn outgoing(&self, message: Message) -> AccessMessage {
        AccessMessage::from(message)
            .with_options(self.settings.force_segmented, self.settings.transmic_size)
    }

    fn publish_gated(&self, message: Message) -> Result<Outbox> {
        if !self.state.role().may_publish() {
            return Err(TimeModelError::Forbidden);
        }
        if message.opcode() == Opcode::TimeStatus && !self.state.is_synchronized() {
            return Err(TimeModelError::InvalidState);
        }
        let mut outbox = Outbox::new();
        queue(&mut outbox, Outbound::Publish(self.publish_message(message)))?;
        Ok(outbox)
    }
}
